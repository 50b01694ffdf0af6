//! Entity snapshots
//!
//! A snapshot captures an entity's state at a given sequence number so that
//! recovery only replays the events written after it. Snapshots are an
//! optimisation: losing them never loses state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Snapshot data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_type: String,
    pub entity_id: String,
    /// Sequence number of the last event folded into `state`
    pub sequence_nr: i64,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        sequence_nr: i64,
        state: serde_json::Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            sequence_nr,
            state,
            created_at: Utc::now(),
        }
    }
}

/// When to take snapshots
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    /// Snapshot every N persisted events (0 disables snapshots)
    pub every: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { every: 50 }
    }
}

impl SnapshotPolicy {
    pub fn disabled() -> Self {
        Self { every: 0 }
    }

    pub fn should_snapshot(&self, events_since_snapshot: u64) -> bool {
        self.every > 0 && events_since_snapshot >= self.every
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing older ones for the same entity
    async fn save(&self, snapshot: Snapshot) -> Result<()>;

    /// Latest snapshot for an entity, if any
    async fn latest(&self, entity_type: &str, entity_id: &str) -> Result<Option<Snapshot>>;
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: DashMap<(String, String), Snapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        let key = (snapshot.entity_type.clone(), snapshot.entity_id.clone());
        debug!(
            "Saved snapshot for {}/{} at seq {}",
            snapshot.entity_type, snapshot.entity_id, snapshot.sequence_nr
        );

        // Never move a snapshot backwards
        match self.snapshots.get(&key) {
            Some(existing) if existing.sequence_nr >= snapshot.sequence_nr => Ok(()),
            _ => {
                self.snapshots.insert(key, snapshot);
                Ok(())
            }
        }
    }

    async fn latest(&self, entity_type: &str, entity_id: &str) -> Result<Option<Snapshot>> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.snapshots.get(&key).map(|s| s.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy() {
        assert!(!SnapshotPolicy::disabled().should_snapshot(1_000));
        let policy = SnapshotPolicy { every: 3 };
        assert!(!policy.should_snapshot(2));
        assert!(policy.should_snapshot(3));
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let store = InMemorySnapshotStore::new();
        store
            .save(Snapshot::new("Saga", "o-1", 4, serde_json::json!({"n": 4})))
            .await
            .unwrap();
        store
            .save(Snapshot::new("Saga", "o-1", 2, serde_json::json!({"n": 2})))
            .await
            .unwrap();

        let latest = store.latest("Saga", "o-1").await.unwrap().unwrap();
        assert_eq!(latest.sequence_nr, 4);
        assert!(store.latest("Saga", "o-2").await.unwrap().is_none());
    }
}
