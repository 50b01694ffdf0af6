use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::event_store::{EventJournal, EventMetadata, StoredEvent};
use super::snapshot::{Snapshot, SnapshotStore};
use crate::error::{OrderflowError, Result};

/// Connect a pool for the journal and snapshot tables
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

fn row_to_event(row: &PgRow) -> StoredEvent {
    StoredEvent {
        id: row.get("id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        sequence_nr: row.get("sequence_nr"),
        event_type: row.get("event_type"),
        payload: row.get("payload"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL-backed event journal
#[derive(Clone)]
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All events sharing a correlation id, across entities
    pub async fn correlated_events(&self, correlation_id: &str) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, sequence_nr, event_type,
                   payload, metadata, created_at
            FROM entity_events
            WHERE metadata->>'correlation_id' = $1
            ORDER BY id ASC
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_event).collect())
    }
}

#[async_trait]
impl EventJournal for PostgresJournal {
    #[instrument(skip(self, payload, metadata))]
    async fn append(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected_sequence: i64,
        event_type: &str,
        payload: serde_json::Value,
        metadata: Option<EventMetadata>,
    ) -> Result<i64> {
        let metadata_json = metadata.and_then(|m| serde_json::to_value(m).ok());
        let sequence_nr = expected_sequence + 1;

        let result = sqlx::query(
            r#"
            INSERT INTO entity_events (
                entity_type, entity_id, sequence_nr, event_type, payload, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(sequence_nr)
        .bind(event_type)
        .bind(&payload)
        .bind(&metadata_json)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let id: i64 = row.get("id");
                debug!(
                    "Appended event {} to {}/{} (type: {}, seq: {})",
                    id, entity_type, entity_id, event_type, sequence_nr
                );
                Ok(sequence_nr)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let actual = self.latest_sequence(entity_type, entity_id).await?;
                Err(OrderflowError::JournalConflict {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    expected: expected_sequence,
                    actual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(
        &self,
        entity_type: &str,
        entity_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, sequence_nr, event_type,
                   payload, metadata, created_at
            FROM entity_events
            WHERE entity_type = $1 AND entity_id = $2 AND sequence_nr > $3
            ORDER BY sequence_nr ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(after_sequence)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_event).collect())
    }

    async fn latest_sequence(&self, entity_type: &str, entity_id: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT MAX(sequence_nr) as max_seq
            FROM entity_events
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;

        let max_seq: Option<i64> = row.get("max_seq");
        Ok(max_seq.unwrap_or(0))
    }
}

/// PostgreSQL-backed snapshot store, one row per entity
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    #[instrument(skip(self, snapshot), fields(entity_type = %snapshot.entity_type, entity_id = %snapshot.entity_id))]
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_snapshots (entity_type, entity_id, sequence_nr, state, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                sequence_nr = EXCLUDED.sequence_nr,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at
            WHERE entity_snapshots.sequence_nr < EXCLUDED.sequence_nr
            "#,
        )
        .bind(&snapshot.entity_type)
        .bind(&snapshot.entity_id)
        .bind(snapshot.sequence_nr)
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, entity_type: &str, entity_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, sequence_nr, state, created_at
            FROM entity_snapshots
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Snapshot {
            entity_type: row.get("entity_type"),
            entity_id: row.get("entity_id"),
            sequence_nr: row.get("sequence_nr"),
            state: row.get("state"),
            created_at: row.get("created_at"),
        }))
    }
}
