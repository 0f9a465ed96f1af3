use thiserror::Error;

/// Failure classes the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry on a later tick.
    Transient,
    /// Quarantine the chain; never retried automatically.
    Permanent,
    /// Abort the tick.
    Configuration,
    /// Skip the dossier, log, continue the tick.
    Consistency,
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Transient registry failure: {0}")]
    Transient(String),

    #[error("Registry rejected request: {0}")]
    Permanent(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Measurement outside observation interval: {0}")]
    InvalidInterval(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A compare-and-swap on the journal lost against another writer.
    #[error("Journal conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML writer error: {0}")]
    Xml(String),

    #[error("Model error: {0}")]
    Model(#[from] brolink_model::ModelError),
}

impl DeliveryError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            DeliveryError::Transient(_) => ErrorClass::Transient,
            DeliveryError::Permanent(_)
            | DeliveryError::InvalidEnvelope(_)
            | DeliveryError::InvalidInterval(_) => ErrorClass::Permanent,
            DeliveryError::Configuration(_) | DeliveryError::Migration(_) => {
                ErrorClass::Configuration
            }
            DeliveryError::Consistency(_)
            | DeliveryError::Conflict(_)
            | DeliveryError::Database(_)
            | DeliveryError::Serialization(_)
            | DeliveryError::Xml(_)
            | DeliveryError::Model(_) => ErrorClass::Consistency,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
