use std::time::Duration;

use http::StatusCode;

/// Error that a route-handler collaborator can turn into an HTTP response
///
/// Domain crates implement this so the transport layer never needs to know
/// their variants.
pub trait HttpError: std::error::Error {
    /// Status code to respond with
    fn status_code(&self) -> StatusCode;

    /// Stable machine-readable kind, e.g. `rate_limit_error`
    fn error_type(&self) -> &str;

    /// Text that is safe to show to the caller
    fn client_message(&self) -> String;

    /// Value for a `Retry-After` header, when the caller should back off
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
