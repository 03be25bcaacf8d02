//! Configuration fragments and orchestrator construction for tests

use std::sync::Arc;

use jiff::Timestamp;
use switchboard_config::Config;
use switchboard_core::{ManualClock, Message};
use switchboard_orchestrator::{GenerateRequest, Orchestrator};

use super::mock_provider::MockProvider;

/// Prices for the two models the tests route between
pub const PRICING: &str = r#"
[pricing.models."openai/gpt-4o"]
input_per_mtok = 2.0
output_per_mtok = 10.0

[pricing.models."anthropic/claude-sonnet"]
input_per_mtok = 3.0
output_per_mtok = 15.0
"#;

/// Two retries with millisecond backoff and no jitter
pub const FAST_RETRY: &str = r#"
[retry]
max_retries = 2
initial_delay = "1ms"
max_delay = "5ms"
jitter = 0.0
"#;

/// One attempt per provider, so every failure moves down the chain
pub const NO_RETRY: &str = r#"
[retry]
max_retries = 0
initial_delay = "1ms"
jitter = 0.0
"#;

/// `openai/gpt-4o` falls back to `anthropic/claude-sonnet`
pub const CHAIN: &str = r#"
[fallback.chains]
"openai/gpt-4o" = ["anthropic/claude-sonnet"]
"#;

/// Charge for one mock completion on `openai/gpt-4o`
pub const OPENAI_CHARGE: f64 = 0.007;

/// Charge for one mock completion on `anthropic/claude-sonnet`
pub const ANTHROPIC_CHARGE: f64 = 0.0105;

/// Join config fragments into one validated document
pub fn config(sections: &[&str]) -> Config {
    Config::parse(&sections.concat()).unwrap()
}

/// Mid-week instant used as the starting time
pub fn start_time() -> Timestamp {
    "2026-10-14T12:00:00Z".parse().unwrap()
}

/// Orchestrator over `providers`, driven by a manual clock
pub fn build(config: Config, providers: &[Arc<MockProvider>]) -> (Orchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let orchestrator = providers
        .iter()
        .fold(Orchestrator::builder(config), |builder, provider| {
            builder.shared_provider(provider.clone())
        })
        .clock(clock.clone())
        .build()
        .unwrap();
    (orchestrator, clock)
}

/// Single user message against `openai/gpt-4o`
pub fn ask(caller: &str, prompt: &str) -> GenerateRequest {
    GenerateRequest::new(caller, "openai/gpt-4o", vec![Message::user(prompt)])
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}
