//! Event journal for event-sourced entities
//!
//! Every entity owns one append-only stream keyed by `(entity_type, entity_id)`.
//! Events are immutable once written; state is rebuilt by replaying a stream
//! in sequence order, optionally starting from a snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use crate::error::{OrderflowError, Result};

/// Metadata for stored events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    /// Correlation ID for tracking related events
    pub correlation_id: Option<String>,
    /// Causation ID (event that caused this event)
    pub causation_id: Option<String>,
    /// User or system that triggered the event
    pub triggered_by: Option<String>,
    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            correlation_id: None,
            causation_id: None,
            triggered_by: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl EventMetadata {
    /// Create new metadata with correlation ID
    pub fn with_correlation(correlation_id: &str) -> Self {
        Self {
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        }
    }

    /// Add causation ID
    pub fn with_causation(mut self, causation_id: &str) -> Self {
        self.causation_id = Some(causation_id.to_string());
        self
    }

    /// Add triggered by
    pub fn with_triggered_by(mut self, triggered_by: &str) -> Self {
        self.triggered_by = Some(triggered_by.to_string());
        self
    }
}

/// A stored event in the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    /// Position in the entity's stream, starting at 1
    pub sequence_nr: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decode the payload back into a domain event
    pub fn decode<E: DomainEvent>(&self) -> Result<E> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            debug!(
                "Failed to decode {} event {} for {}: {}",
                self.entity_type, self.event_type, self.entity_id, e
            );
            OrderflowError::UnknownEvent {
                entity_type: self.entity_type.clone(),
                event_type: self.event_type.clone(),
            }
        })
    }
}

/// Events that can be written to the journal
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Stable name stored alongside the payload
    fn event_type(&self) -> &'static str;
}

/// State that is rebuilt from its own events
pub trait EventSourced:
    Default + Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    type Event: DomainEvent;

    /// Apply an event to mutate state. Must not fail and must not perform I/O.
    fn apply(&mut self, event: &Self::Event);

    /// Rebuild state from a sequence of events
    fn replay<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a Self::Event>,
    {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }
}

/// Append-only storage for entity event streams
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Append one event. `expected_sequence` is the last sequence number the
    /// writer has seen; the append fails with `JournalConflict` if the stream
    /// has moved on. Returns the new event's sequence number.
    async fn append(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected_sequence: i64,
        event_type: &str,
        payload: serde_json::Value,
        metadata: Option<EventMetadata>,
    ) -> Result<i64>;

    /// Events of one stream with a sequence number greater than `after_sequence`
    async fn load(
        &self,
        entity_type: &str,
        entity_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<StoredEvent>>;

    /// Highest sequence number written to a stream (0 when empty)
    async fn latest_sequence(&self, entity_type: &str, entity_id: &str) -> Result<i64>;
}

/// Process-local journal; contents are lost when the process exits
#[derive(Default)]
pub struct InMemoryJournal {
    streams: DashMap<(String, String), Vec<StoredEvent>>,
    next_id: AtomicI64,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events written across all streams
    pub fn total_events(&self) -> usize {
        self.streams.iter().map(|stream| stream.value().len()).sum()
    }
}

#[async_trait]
impl EventJournal for InMemoryJournal {
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
        let key = (entity_type.to_string(), entity_id.to_string());

        let mut stream = self.streams.entry(key).or_default();
        let actual = stream.len() as i64;
        if actual != expected_sequence {
            return Err(OrderflowError::JournalConflict {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                expected: expected_sequence,
                actual,
            });
        }

        let sequence_nr = actual + 1;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        stream.push(StoredEvent {
            id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            sequence_nr,
            event_type: event_type.to_string(),
            payload,
            metadata: metadata_json,
            created_at: Utc::now(),
        });

        debug!(
            "Appended event {} to {}/{} (type: {}, seq: {})",
            id, entity_type, entity_id, event_type, sequence_nr
        );

        Ok(sequence_nr)
    }

    async fn load(
        &self,
        entity_type: &str,
        entity_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<StoredEvent>> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self
            .streams
            .get(&key)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_nr > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_sequence(&self, entity_type: &str, entity_id: &str) -> Result<i64> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self
            .streams
            .get(&key)
            .map(|stream| stream.len() as i64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metadata_builder() {
        let metadata = EventMetadata::with_correlation("corr-123")
            .with_causation("cause-456")
            .with_triggered_by("system");

        assert_eq!(metadata.correlation_id, Some("corr-123".to_string()));
        assert_eq!(metadata.causation_id, Some("cause-456".to_string()));
        assert_eq!(metadata.triggered_by, Some("system".to_string()));
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_numbers() {
        let journal = InMemoryJournal::new();
        let payload = serde_json::json!({"type": "Started"});

        let first = journal
            .append("Saga", "o-1", 0, "Started", payload.clone(), None)
            .await
            .unwrap();
        let second = journal
            .append("Saga", "o-1", 1, "Started", payload.clone(), None)
            .await
            .unwrap();
        let other = journal
            .append("Saga", "o-2", 0, "Started", payload, None)
            .await
            .unwrap();

        assert_eq!((first, second, other), (1, 2, 1));
        assert_eq!(journal.latest_sequence("Saga", "o-1").await.unwrap(), 2);
        assert_eq!(journal.load("Saga", "o-1", 1).await.unwrap().len(), 1);
        assert_eq!(journal.total_events(), 3);
    }

    #[tokio::test]
    async fn test_stale_writer_gets_conflict() {
        let journal = InMemoryJournal::new();
        let payload = serde_json::json!({});
        journal
            .append("Order", "o-1", 0, "Placed", payload.clone(), None)
            .await
            .unwrap();

        let err = journal
            .append("Order", "o-1", 0, "Placed", payload, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(journal.latest_sequence("Order", "o-1").await.unwrap(), 1);
    }
}
