use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the ledger, its sinks and the alert store
#[derive(Debug, Error)]
pub enum LedgerError {
    /// External usage store rejected a record
    #[error("usage sink error: {0}")]
    Sink(String),

    /// Alert store could not be read or written
    #[error("alert store error: {0}")]
    Store(String),

    /// No alert with this id
    #[error("budget alert not found: {id}")]
    AlertNotFound { id: Uuid },

    /// Alert definition is not usable
    #[error("invalid budget alert: {0}")]
    InvalidAlert(String),

    /// Notification could not be delivered
    #[error("notification failed: {0}")]
    Notify(String),

    /// Calendar arithmetic failed
    #[error("calendar error: {0}")]
    Calendar(String),

    /// Invalid ledger configuration
    #[error("ledger configuration error: {0}")]
    Config(String),
}
