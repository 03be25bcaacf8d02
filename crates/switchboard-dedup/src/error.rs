use thiserror::Error;

/// Terminal failure shared with every member of a flight
#[derive(Debug, Clone, Error)]
pub enum FlightError<E> {
    /// The leader went away before producing a result
    #[error("leader abandoned the request")]
    Abandoned,

    /// The leader's call failed
    #[error("{0}")]
    Leader(E),
}
