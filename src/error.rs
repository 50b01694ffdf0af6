use thiserror::Error;

/// Main error type for the order workflow service
#[derive(Error, Debug)]
pub enum OrderflowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Journal errors
    #[error("Journal conflict on {entity_type}/{entity_id}: expected sequence {expected}, found {actual}")]
    JournalConflict {
        entity_type: String,
        entity_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Unknown event type for {entity_type}: {event_type}")]
    UnknownEvent {
        entity_type: String,
        event_type: String,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Runtime errors
    #[error("Entity unavailable: {0}")]
    EntityUnavailable(String),

    #[error("Ask timed out after {elapsed_ms}ms: {target}")]
    AskTimeout { target: String, elapsed_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for OrderflowError
pub type Result<T> = std::result::Result<T, OrderflowError>;

impl OrderflowError {
    /// Whether the error came from the journal rejecting a stale append.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrderflowError::JournalConflict { .. })
    }
}
