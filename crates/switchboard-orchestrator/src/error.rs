use std::time::Duration;

use http::StatusCode;
use switchboard_core::HttpError;
use switchboard_dedup::FlightError;
use switchboard_routing::RoutingError;
use thiserror::Error;

/// Errors returned by the orchestrator
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Caller is over its rate limit
    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimitExceeded {
        /// Seconds until the window resets
        retry_after: u64,
    },

    /// Rate limit store is unreachable and configured to fail closed
    #[error("rate limiter unavailable: {0}")]
    RateLimiterUnavailable(String),

    /// Request is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Logical model could not be resolved
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A provider failed in a way retrying cannot fix, or mid-stream
    #[error("provider {provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    /// Every candidate failed
    #[error("all providers exhausted after {attempts} attempts: {last_error}")]
    AllProvidersExhausted { attempts: u32, last_error: String },

    /// The request this one was sharing ended without an outcome
    #[error("shared request failed: {0}")]
    DedupLeaderFailure(String),

    /// Request was cancelled before it finished
    #[error("request cancelled")]
    Cancelled,

    /// Orchestrator could not be built from its configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OrchestratorError {
    /// Map the outcome of a shared flight for a caller that did not lead it
    pub(crate) fn from_flight(error: FlightError<Self>) -> Self {
        match error {
            FlightError::Leader(e) => e,
            FlightError::Abandoned => Self::DedupLeaderFailure("leader abandoned the request".to_owned()),
        }
    }
}

impl HttpError for OrchestratorError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RateLimiterUnavailable(_) | Self::AllProvidersExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) | Self::Provider { retryable: false, .. } => StatusCode::BAD_REQUEST,
            Self::Routing(RoutingError::UnknownModel { .. }) => StatusCode::NOT_FOUND,
            Self::Provider { retryable: true, .. } | Self::DedupLeaderFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Routing(RoutingError::Config(_)) | Self::Cancelled | Self::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::RateLimiterUnavailable(_) => "rate_limiter_unavailable",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Routing(RoutingError::UnknownModel { .. }) => "not_found_error",
            Self::Provider { .. } => "provider_error",
            Self::AllProvidersExhausted { .. } => "providers_exhausted",
            Self::DedupLeaderFailure(_) => "dedup_leader_failure",
            Self::Cancelled => "cancelled",
            Self::Routing(RoutingError::Config(_)) | Self::Configuration(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Routing(RoutingError::Config(_)) | Self::Configuration(_) => {
                "an internal error occurred".to_owned()
            }
            other => other.to_string(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(Duration::from_secs(*retry_after)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (OrchestratorError::RateLimitExceeded { retry_after: 5 }, 429),
            (
                OrchestratorError::Provider {
                    provider: "openai".to_owned(),
                    message: "overloaded".to_owned(),
                    retryable: true,
                },
                502,
            ),
            (
                OrchestratorError::Provider {
                    provider: "openai".to_owned(),
                    message: "context too long".to_owned(),
                    retryable: false,
                },
                400,
            ),
            (
                OrchestratorError::AllProvidersExhausted {
                    attempts: 4,
                    last_error: "timeout".to_owned(),
                },
                503,
            ),
            (OrchestratorError::DedupLeaderFailure("gone".to_owned()), 502),
            (OrchestratorError::Cancelled, 500),
            (
                OrchestratorError::Routing(RoutingError::UnknownModel {
                    model: "gpt".to_owned(),
                }),
                404,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status_code().as_u16(), status, "{error}");
        }
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        assert_eq!(
            OrchestratorError::RateLimitExceeded { retry_after: 12 }.retry_after(),
            Some(Duration::from_secs(12))
        );
        assert_eq!(OrchestratorError::Cancelled.retry_after(), None);
    }

    #[test]
    fn internal_details_are_hidden() {
        let error = OrchestratorError::Configuration("redis://secret@host".to_owned());
        assert_eq!(error.client_message(), "an internal error occurred");
    }

    #[test]
    fn abandoned_flights_become_leader_failures() {
        assert!(matches!(
            OrchestratorError::from_flight(FlightError::Abandoned),
            OrchestratorError::DedupLeaderFailure(_)
        ));
        assert!(matches!(
            OrchestratorError::from_flight(FlightError::Leader(OrchestratorError::Cancelled)),
            OrchestratorError::Cancelled
        ));
    }
}
