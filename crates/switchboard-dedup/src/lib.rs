//! Request deduplication
//!
//! Identical requests that arrive while one is already in progress share
//! its outcome instead of triggering another upstream call. Buffered calls
//! fan a single result out; streamed calls fan out every chunk. Both kinds
//! live in one registry, so a fingerprint never has more than one call.

#![allow(clippy::must_use_candidate)]

mod error;
mod flight;
mod registry;
mod stream;

pub use error::FlightError;
pub use flight::{LeaderGuard, Waiter};
pub use registry::{Flight, InflightRegistry, StreamFlight};
pub use stream::{Publisher, Subscriber};
