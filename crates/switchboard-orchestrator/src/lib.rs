//! AI request orchestration
//!
//! [`Orchestrator`] ties the rate limiter, response cache, dedup registry,
//! fallback router, health tracker and usage ledger into one call path in
//! front of interchangeable [`Provider`]s.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
mod invoke;
mod metrics;
mod orchestrator;
pub mod provider;
mod types;
mod usage;

pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ResponseStream};
pub use provider::{Completion, Provider, ProviderChunk, ProviderError, ProviderStream};
pub use types::{
    GenerateRequest, GenerateResponse, HealthReport, InFlightStats, MaintenanceReport, ResponseMetadata, TokenUsage,
};

