//! Token pricing

use std::collections::HashMap;

use serde::Serialize;
use switchboard_config::{ModelPricing, PricingConfig};

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Cost of one request, in USD rounded to six decimals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub provider_cost: f64,
    pub markup: f64,
    pub total_cost: f64,
    /// What the caller is charged, never below the minimum charge
    pub user_charge: f64,
}

/// Per-model prices plus markup and minimum charge
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    markup_percent: f64,
    minimum_charge_usd: f64,
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            markup_percent: config.markup_percent,
            minimum_charge_usd: config.minimum_charge_usd,
            models: config.models.iter().map(|(id, price)| (id.clone(), *price)).collect(),
        }
    }

    /// Cost of a request against `model` (`provider/model`)
    ///
    /// Unknown models cost nothing.
    pub fn cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> CostBreakdown {
        let Some(price) = self.models.get(model) else {
            tracing::debug!(model, "no pricing for model, recording zero cost");
            return CostBreakdown::default();
        };

        let provider_cost = f64::from(input_tokens) / TOKENS_PER_PRICE_UNIT * price.input_per_mtok
            + f64::from(output_tokens) / TOKENS_PER_PRICE_UNIT * price.output_per_mtok;
        let markup = provider_cost * self.markup_percent / 100.0;
        let total_cost = provider_cost + markup;

        CostBreakdown {
            provider_cost: round_usd(provider_cost),
            markup: round_usd(markup),
            total_cost: round_usd(total_cost),
            user_charge: round_usd(total_cost.max(self.minimum_charge_usd)),
        }
    }

    pub fn is_priced(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}

fn round_usd(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
