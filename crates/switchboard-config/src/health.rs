use serde::Deserialize;

/// Provider health state machine thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Consecutive errors before a healthy provider is degraded
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,
    /// Consecutive errors before a degraded provider is marked down
    #[serde(default = "default_down_after")]
    pub down_after: u32,
    /// Errors further apart than this do not count as consecutive
    #[serde(default = "default_error_window")]
    pub error_window: String,
    /// Consecutive successes needed to leave degraded or down
    #[serde(default = "default_recovery_successes")]
    pub recovery_successes: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_after: default_degrade_after(),
            down_after: default_down_after(),
            error_window: default_error_window(),
            recovery_successes: default_recovery_successes(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_degrade_after() -> u32 {
    3
}

#[allow(clippy::missing_const_for_fn)]
fn default_down_after() -> u32 {
    5
}

fn default_error_window() -> String {
    "5m".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_recovery_successes() -> u32 {
    1
}
