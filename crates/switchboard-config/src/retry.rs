use indexmap::IndexMap;
use serde::Deserialize;

/// Exponential backoff between attempts against one provider
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
    /// Growth factor per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.25 = ±25%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Per-provider overrides
    #[serde(default)]
    pub providers: IndexMap<String, RetryOverride>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            providers: IndexMap::new(),
        }
    }
}

/// Fields left unset fall back to the top-level values
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub initial_delay: Option<String>,
    #[serde(default)]
    pub max_delay: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> String {
    "1s".to_owned()
}

fn default_max_delay() -> String {
    "30s".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_multiplier() -> f64 {
    2.0
}

#[allow(clippy::missing_const_for_fn)]
fn default_jitter() -> f64 {
    0.25
}
