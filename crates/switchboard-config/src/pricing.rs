use indexmap::IndexMap;
use serde::Deserialize;

/// Token pricing used for cost accounting
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Percentage added on top of provider cost
    #[serde(default)]
    pub markup_percent: f64,
    /// Floor applied to any billable request
    #[serde(default)]
    pub minimum_charge_usd: f64,
    /// Prices keyed by concrete `provider/model`
    #[serde(default)]
    pub models: IndexMap<String, ModelPricing>,
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}
