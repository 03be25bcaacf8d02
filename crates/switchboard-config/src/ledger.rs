use serde::Deserialize;

/// Usage ledger and budget alert settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Records older than this are pruned
    #[serde(default = "default_retention")]
    pub retention: String,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            budget: BudgetConfig::default(),
        }
    }
}

/// Budget alert evaluation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Percentage of a threshold at which an alert fires
    #[serde(default = "default_trigger_percent")]
    pub trigger_percent: f64,
    /// How often the periodic evaluator runs
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            trigger_percent: default_trigger_percent(),
            check_interval: default_check_interval(),
        }
    }
}

fn default_retention() -> String {
    "90d".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_trigger_percent() -> f64 {
    80.0
}

fn default_check_interval() -> String {
    "5m".to_owned()
}
