use std::time::Instant;

use opentelemetry::global;
use switchboard_telemetry::{Counter, Histogram, KeyValue, metrics as names};

/// Instruments recorded through the global meter
///
/// A no-op until telemetry installs a meter provider.
pub(crate) struct Metrics {
    request_duration: Histogram<f64>,
    requests: Counter<u64>,
    rate_limited: Counter<u64>,
    cache_hits: Counter<u64>,
    cache_misses: Counter<u64>,
    dedup_joins: Counter<u64>,
    provider_attempts: Counter<u64>,
    failovers: Counter<u64>,
    tokens: Counter<u64>,
    cost: Counter<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        let meter = global::meter(names::METER_NAME);
        Self {
            request_duration: meter
                .f64_histogram(names::REQUEST_DURATION)
                .with_unit("s")
                .with_description("Time to a terminal outcome per logical request")
                .build(),
            requests: meter.u64_counter(names::REQUEST_COUNT).build(),
            rate_limited: meter.u64_counter(names::RATE_LIMITED_COUNT).build(),
            cache_hits: meter.u64_counter(names::CACHE_HIT_COUNT).build(),
            cache_misses: meter.u64_counter(names::CACHE_MISS_COUNT).build(),
            dedup_joins: meter.u64_counter(names::DEDUP_JOIN_COUNT).build(),
            provider_attempts: meter.u64_counter(names::PROVIDER_ATTEMPT_COUNT).build(),
            failovers: meter.u64_counter(names::PROVIDER_FAILOVER_COUNT).build(),
            tokens: meter.u64_counter(names::TOKEN_USAGE).build(),
            cost: meter.f64_counter(names::COST_USD).with_unit("USD").build(),
        }
    }

    pub fn request(&self, start: Instant, model: &str, outcome: &str) {
        let attributes = [
            KeyValue::new("model", model.to_owned()),
            KeyValue::new("outcome", outcome.to_owned()),
        ];
        self.requests.add(1, &attributes);
        names::record_duration(&self.request_duration, start, &attributes);
    }

    pub fn rate_limited(&self, caller: &str) {
        self.rate_limited.add(1, &[KeyValue::new("caller", caller.to_owned())]);
    }

    pub fn cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.add(1, &[]);
        } else {
            self.cache_misses.add(1, &[]);
        }
    }

    pub fn dedup_join(&self) {
        self.dedup_joins.add(1, &[]);
    }

    pub fn attempt(&self, provider: &str, success: bool) {
        self.provider_attempts.add(
            1,
            &[
                KeyValue::new("provider", provider.to_owned()),
                KeyValue::new("success", success),
            ],
        );
    }

    pub fn failover(&self, from: &str, to: &str) {
        self.failovers.add(
            1,
            &[KeyValue::new("from", from.to_owned()), KeyValue::new("to", to.to_owned())],
        );
    }

    pub fn usage(&self, model: &str, input_tokens: u32, output_tokens: u32, cost_usd: f64) {
        let model = KeyValue::new("model", model.to_owned());
        self.tokens.add(
            u64::from(input_tokens),
            &[model.clone(), KeyValue::new("direction", "input")],
        );
        self.tokens.add(
            u64::from(output_tokens),
            &[model.clone(), KeyValue::new("direction", "output")],
        );
        self.cost.add(cost_usd, &[model]);
    }
}
