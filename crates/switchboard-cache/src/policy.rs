//! Per-prompt cacheability and lifetime

use std::time::Duration;

use switchboard_config::CacheTtlConfig;
use switchboard_core::normalize_content;

use crate::CacheError;

const TIME_SENSITIVE: &[&str] = &["today", "now", "current", "latest", "recent", "tonight", "yesterday"];
const REFERENCE: &[&str] = &["what is", "define", "explain", "how to"];
const PERSONAL: &[&str] = &["my", "i", "for me", "me"];

/// Outcome of [`CachePolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    pub cacheable: bool,
    pub ttl: Duration,
}

/// Chooses how long a response may be reused
///
/// Checked in order: time-sensitive prompts get the short TTL, reference
/// questions the very long one, personal prompts are never stored, and
/// everything else gets the long TTL when sampling is deterministic and the
/// medium one otherwise.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    short: Duration,
    medium: Duration,
    long: Duration,
    very_long: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &CacheTtlConfig) -> Result<Self, CacheError> {
        Ok(Self {
            short: parse_duration(&config.short)?,
            medium: parse_duration(&config.medium)?,
            long: parse_duration(&config.long)?,
            very_long: parse_duration(&config.very_long)?,
        })
    }

    pub fn decide(&self, prompt: &str, temperature: Option<f64>) -> CacheDecision {
        // Pad with spaces so phrases only match on word boundaries
        let text = format!(" {} ", normalize_content(prompt).replace(|c: char| c.is_ascii_punctuation(), " "));
        let mentions = |phrases: &[&str]| phrases.iter().any(|p| text.contains(&format!(" {p} ")));

        let (cacheable, ttl) = if mentions(TIME_SENSITIVE) {
            (true, self.short)
        } else if mentions(REFERENCE) {
            (true, self.very_long)
        } else if mentions(PERSONAL) {
            (false, Duration::ZERO)
        } else if temperature.is_none_or(|t| t <= 0.0) {
            (true, self.long)
        } else {
            (true, self.medium)
        };

        CacheDecision { cacheable, ttl }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(300),
            medium: Duration::from_secs(1800),
            long: Duration::from_secs(3600),
            very_long: Duration::from_secs(86_400),
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, CacheError> {
    duration_str::parse(s).map_err(|e| CacheError::Config(format!("invalid duration '{s}': {e}")))
}
