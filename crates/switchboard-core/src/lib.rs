//! Shared types for the switchboard orchestration crates

#![allow(clippy::must_use_candidate)]

pub mod clock;
mod error;
mod fingerprint;
mod message;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::HttpError;
pub use fingerprint::{Fingerprint, normalize_content};
pub use message::{GenerationParams, Message, Role};
