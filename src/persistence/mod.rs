pub mod event_log;
pub mod event_store;
pub mod postgres;
pub mod snapshot;

pub use event_log::{EventLog, Persistence};
pub use event_store::{
    DomainEvent, EventJournal, EventMetadata, EventSourced, InMemoryJournal, StoredEvent,
};
pub use postgres::{PostgresJournal, PostgresSnapshotStore};
pub use snapshot::{InMemorySnapshotStore, Snapshot, SnapshotPolicy, SnapshotStore};
