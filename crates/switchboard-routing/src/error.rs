//! Routing-specific error types

use thiserror::Error;

/// Errors that can occur while resolving where a request goes
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// Logical model is neither an alias nor `provider/model`
    #[error("unknown model: {model}")]
    UnknownModel { model: String },

    /// Invalid routing configuration
    #[error("routing configuration error: {0}")]
    Config(String),
}
