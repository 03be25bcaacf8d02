use std::path::Path;

use anyhow::Context;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::parse(&raw)
    }

    /// Expand, deserialize and validate configuration text
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw).context("config variable expansion failed")?;
        let config: Self = toml::from_str(&expanded).context("failed to parse config")?;

        config.validate()?;

        Ok(config)
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_rate_limit()?;
        self.validate_cache()?;
        self.validate_health()?;
        self.validate_fallback()?;
        self.validate_retry()?;
        self.validate_ledger()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_rate_limit(&self) -> anyhow::Result<()> {
        let Some(ref rate_limit) = self.rate_limit else {
            return Ok(());
        };

        if rate_limit.requests == 0 {
            anyhow::bail!("rate_limit.requests must be greater than 0");
        }
        check_window("rate_limit.window", &rate_limit.window)?;
        if let Some(ref penalty) = rate_limit.penalty {
            check_duration("rate_limit.penalty", penalty)?;
        }

        for (model, limit) in &rate_limit.models {
            if limit.requests == 0 {
                anyhow::bail!("rate_limit.models.\"{model}\".requests must be greater than 0");
            }
            check_window(&format!("rate_limit.models.\"{model}\".window"), &limit.window)?;
        }

        Ok(())
    }

    fn validate_cache(&self) -> anyhow::Result<()> {
        let ttl = &self.cache.ttl;
        for (name, value) in [
            ("short", &ttl.short),
            ("medium", &ttl.medium),
            ("long", &ttl.long),
            ("very_long", &ttl.very_long),
        ] {
            check_window(&format!("cache.ttl.{name}"), value)?;
        }
        Ok(())
    }

    fn validate_health(&self) -> anyhow::Result<()> {
        let health = &self.health;
        if health.degrade_after == 0 || health.down_after == 0 {
            anyhow::bail!("health.degrade_after and health.down_after must be greater than 0");
        }
        if health.recovery_successes == 0 {
            anyhow::bail!("health.recovery_successes must be greater than 0");
        }
        check_window("health.error_window", &health.error_window)
    }

    fn validate_fallback(&self) -> anyhow::Result<()> {
        for (alias, target) in &self.fallback.aliases {
            if !is_qualified(target) {
                anyhow::bail!("fallback alias '{alias}' must point at a 'provider/model' id, got '{target}'");
            }
        }

        for (model, chain) in &self.fallback.chains {
            if let Some(bad) = chain.iter().find(|candidate| !is_qualified(candidate)) {
                anyhow::bail!("fallback chain for '{model}' contains '{bad}', expected 'provider/model'");
            }
        }

        Ok(())
    }

    fn validate_retry(&self) -> anyhow::Result<()> {
        let retry = &self.retry;
        check_duration("retry.initial_delay", &retry.initial_delay)?;
        check_duration("retry.max_delay", &retry.max_delay)?;

        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be a finite number >= 1.0");
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            anyhow::bail!("retry.jitter must be between 0.0 and 1.0");
        }

        for (provider, over) in &retry.providers {
            if let Some(ref delay) = over.initial_delay {
                check_duration(&format!("retry.providers.{provider}.initial_delay"), delay)?;
            }
            if let Some(ref delay) = over.max_delay {
                check_duration(&format!("retry.providers.{provider}.max_delay"), delay)?;
            }
        }

        Ok(())
    }

    fn validate_ledger(&self) -> anyhow::Result<()> {
        check_window("ledger.retention", &self.ledger.retention)?;
        check_window("ledger.budget.check_interval", &self.ledger.budget.check_interval)?;

        let trigger = self.ledger.budget.trigger_percent;
        if trigger.is_nan() || trigger <= 0.0 || trigger > 100.0 {
            anyhow::bail!("ledger.budget.trigger_percent must be in (0, 100]");
        }

        if self.pricing.markup_percent < 0.0 || self.pricing.minimum_charge_usd < 0.0 {
            anyhow::bail!("pricing.markup_percent and pricing.minimum_charge_usd must not be negative");
        }

        Ok(())
    }

    fn validate_telemetry(&self) -> anyhow::Result<()> {
        let Some(ref telemetry) = self.telemetry else {
            return Ok(());
        };

        if !(0.0..=1.0).contains(&telemetry.sampling_rate) {
            anyhow::bail!("telemetry.sampling_rate must be between 0.0 and 1.0");
        }
        check_window("telemetry.metrics_interval", &telemetry.metrics_interval)
    }
}

fn is_qualified(id: &str) -> bool {
    id.split_once('/')
        .is_some_and(|(provider, model)| !provider.is_empty() && !model.is_empty())
}

fn check_duration(field: &str, value: &str) -> anyhow::Result<()> {
    duration_str::parse(value).map_err(|e| anyhow::anyhow!("{field}: invalid duration '{value}': {e}"))?;
    Ok(())
}

/// A duration that must also be non-zero
fn check_window(field: &str, value: &str) -> anyhow::Result<()> {
    let parsed =
        duration_str::parse(value).map_err(|e| anyhow::anyhow!("{field}: invalid duration '{value}': {e}"))?;
    if parsed.is_zero() {
        anyhow::bail!("{field} must be greater than zero");
    }
    Ok(())
}
