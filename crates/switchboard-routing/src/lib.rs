//! Provider health, fallback ordering and retry backoff

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
pub mod fallback;
pub mod health;
pub mod retry;

pub use error::RoutingError;
pub use fallback::{Candidate, FallbackRouter};
pub use health::{HealthPolicy, HealthRecord, HealthStatus, HealthSummary, ProviderHealthTracker};
pub use retry::{RetryPolicies, RetryPolicy};
