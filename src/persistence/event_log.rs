//! Per-entity persistent state
//!
//! `EventLog` owns an entity's in-memory state together with its position in
//! the journal. State only changes through [`EventLog::persist`], which writes
//! the event first and applies it afterwards, so an entity never acts on state
//! that is not durable.

use std::sync::Arc;
use tracing::{debug, warn};

use super::event_store::{DomainEvent, EventJournal, EventMetadata, EventSourced};
use super::snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
use crate::error::Result;

/// Journal, snapshot store and snapshot policy shared by all entities
#[derive(Clone)]
pub struct Persistence {
    pub journal: Arc<dyn EventJournal>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub policy: SnapshotPolicy,
}

impl Persistence {
    pub fn new(
        journal: Arc<dyn EventJournal>,
        snapshots: Arc<dyn SnapshotStore>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            journal,
            snapshots,
            policy,
        }
    }

    /// In-memory journal and snapshots, for tests and local runs
    pub fn in_memory(policy: SnapshotPolicy) -> Self {
        Self::new(
            Arc::new(super::InMemoryJournal::new()),
            Arc::new(super::InMemorySnapshotStore::new()),
            policy,
        )
    }
}

pub struct EventLog<S: EventSourced> {
    entity_type: &'static str,
    entity_id: String,
    state: S,
    sequence_nr: i64,
    events_since_snapshot: u64,
    persistence: Persistence,
}

impl<S: EventSourced> EventLog<S> {
    /// Rebuild state from the latest snapshot plus the events written after it
    pub async fn recover(
        entity_type: &'static str,
        entity_id: &str,
        persistence: Persistence,
    ) -> Result<Self> {
        let (mut state, mut sequence_nr) =
            match persistence.snapshots.latest(entity_type, entity_id).await? {
                Some(snapshot) => match serde_json::from_value::<S>(snapshot.state) {
                    Ok(state) => (state, snapshot.sequence_nr),
                    Err(e) => {
                        warn!(
                            "Discarding unreadable snapshot for {}/{}: {}",
                            entity_type, entity_id, e
                        );
                        (S::default(), 0)
                    }
                },
                None => (S::default(), 0),
            };
        let from_snapshot = sequence_nr;

        let events = persistence
            .journal
            .load(entity_type, entity_id, sequence_nr)
            .await?;
        for stored in &events {
            let event: S::Event = stored.decode()?;
            state.apply(&event);
            sequence_nr = stored.sequence_nr;
        }

        if sequence_nr > 0 {
            debug!(
                "Recovered {}/{} at seq {} (snapshot seq {}, replayed {})",
                entity_type,
                entity_id,
                sequence_nr,
                from_snapshot,
                events.len()
            );
        }

        Ok(Self {
            entity_type,
            entity_id: entity_id.to_string(),
            state,
            sequence_nr,
            events_since_snapshot: events.len() as u64,
            persistence,
        })
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn sequence_nr(&self) -> i64 {
        self.sequence_nr
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Write one event, then apply it. On error the state is unchanged.
    pub async fn persist(&mut self, event: S::Event) -> Result<()> {
        self.persist_with(event, None).await
    }

    pub async fn persist_with(
        &mut self,
        event: S::Event,
        metadata: Option<EventMetadata>,
    ) -> Result<()> {
        let payload = serde_json::to_value(&event)?;
        let sequence_nr = self
            .persistence
            .journal
            .append(
                self.entity_type,
                &self.entity_id,
                self.sequence_nr,
                event.event_type(),
                payload,
                metadata,
            )
            .await?;

        self.state.apply(&event);
        self.sequence_nr = sequence_nr;
        self.events_since_snapshot += 1;

        if self.persistence.policy.should_snapshot(self.events_since_snapshot) {
            self.snapshot().await;
        }
        Ok(())
    }

    async fn snapshot(&mut self) {
        let state = match serde_json::to_value(&self.state) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to encode snapshot for {}/{}: {}", self.entity_type, self.entity_id, e);
                return;
            }
        };
        let snapshot = Snapshot::new(self.entity_type, &self.entity_id, self.sequence_nr, state);
        match self.persistence.snapshots.save(snapshot).await {
            Ok(()) => self.events_since_snapshot = 0,
            Err(e) => warn!(
                "Failed to save snapshot for {}/{}: {}",
                self.entity_type, self.entity_id, e
            ),
        }
    }
}
