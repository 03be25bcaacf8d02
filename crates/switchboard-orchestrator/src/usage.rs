use std::sync::Arc;
use std::time::Instant;

use switchboard_core::{Fingerprint, SharedClock};
use switchboard_ledger::{UsageLedger, UsageOutcome, UsageRecord};
use uuid::Uuid;

/// Ledger row for a request still in progress
///
/// Written exactly once: by one of the finishing methods, or as
/// `cancelled` when dropped first.
pub(crate) struct PendingUsage {
    ledger: Arc<UsageLedger>,
    clock: SharedClock,
    started: Instant,
    draft: Option<UsageRecord>,
}

impl PendingUsage {
    pub fn new(
        ledger: Arc<UsageLedger>,
        clock: SharedClock,
        caller_id: &str,
        logical_model: &str,
        fingerprint: &Fingerprint,
        started: Instant,
    ) -> Self {
        let draft = UsageRecord {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_owned(),
            provider_id: String::new(),
            model_id: logical_model.to_owned(),
            fingerprint: fingerprint.clone(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            cached: false,
            dedup_sourced: false,
            outcome: UsageOutcome::Cancelled,
            timestamp: clock.now(),
        };

        Self {
            ledger,
            clock,
            started,
            draft: Some(draft),
        }
    }

    /// Mark the row as shared from another caller's provider call
    #[must_use]
    pub fn dedup_sourced(mut self) -> Self {
        if let Some(draft) = &mut self.draft {
            draft.dedup_sourced = true;
        }
        self
    }

    /// Mark the row as served from the response cache
    #[must_use]
    pub fn cached(mut self) -> Self {
        if let Some(draft) = &mut self.draft {
            draft.cached = true;
        }
        self
    }

    /// Attribute the row to the provider that served it
    pub fn served_by(&mut self, provider: &str, model: &str, input_tokens: u32, output_tokens: u32) {
        if let Some(draft) = &mut self.draft {
            provider.clone_into(&mut draft.provider_id);
            model.clone_into(&mut draft.model_id);
            draft.input_tokens = input_tokens;
            draft.output_tokens = output_tokens;
        }
    }

    pub fn succeed(mut self, cost_usd: f64) {
        self.write(UsageOutcome::Success, cost_usd);
    }

    pub fn fail(mut self) {
        self.write(UsageOutcome::ProviderError, 0.0);
    }

    pub fn cancel(mut self) {
        self.write(UsageOutcome::Cancelled, 0.0);
    }

    fn write(&mut self, outcome: UsageOutcome, cost_usd: f64) {
        let Some(mut record) = self.draft.take() else {
            return;
        };
        record.outcome = outcome;
        record.cost_usd = if record.is_provider_call() { cost_usd } else { 0.0 };
        record.latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record.timestamp = self.clock.now();
        self.ledger.record(record);
    }
}

impl Drop for PendingUsage {
    fn drop(&mut self) {
        if self.draft.is_some() {
            self.write(UsageOutcome::Cancelled, 0.0);
        }
    }
}
