use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use jiff::Timestamp;

use crate::{ModelUsage, UsageFilter, UsageOutcome, UsageRecord, UsageRecorder, UsageSummary};

#[derive(Debug)]
struct Row {
    seq: u64,
    record: UsageRecord,
}

/// Append-only record of every logical request
///
/// Rows are sharded by caller so concurrent appends from different callers
/// never contend. They are kept in memory for summaries and budget checks,
/// and forwarded to the external store when a recorder is attached.
#[derive(Debug, Default)]
pub struct UsageLedger {
    shards: DashMap<String, Vec<Row>>,
    /// Global append order across shards
    sequence: AtomicU64,
    recorder: Option<UsageRecorder>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that also forwards every row to `recorder`
    pub fn with_recorder(recorder: UsageRecorder) -> Self {
        Self {
            recorder: Some(recorder),
            ..Self::default()
        }
    }

    pub fn record(&self, record: UsageRecord) {
        tracing::debug!(
            caller = %record.caller_id,
            model = %record.qualified_model(),
            outcome = %record.outcome,
            cost_usd = record.cost_usd,
            cached = record.cached,
            dedup_sourced = record.dedup_sourced,
            "usage recorded"
        );

        if let Some(recorder) = &self.recorder {
            recorder.record(record.clone());
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.shards
            .entry(record.caller_id.clone())
            .or_default()
            .push(Row { seq, record });
    }

    /// Matching rows, oldest first
    pub fn records(&self, filter: &UsageFilter) -> Vec<UsageRecord> {
        self.collect(filter)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total cost of matching rows in USD
    pub fn spend(&self, filter: &UsageFilter) -> f64 {
        self.collect(filter).iter().map(|r| r.cost_usd).sum()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self, filter: &UsageFilter) -> UsageSummary {
        let records = self.collect(filter);
        let mut summary = UsageSummary::default();
        let mut latency_total = 0u64;
        let mut latencies: BTreeMap<String, Vec<u64>> = BTreeMap::new();

        for record in &records {
            summary.total_requests += 1;
            summary.total_cost_usd += record.cost_usd;
            latency_total += record.latency_ms;

            if record.cached {
                summary.cached_hits += 1;
            }
            if record.dedup_sourced {
                summary.dedup_hits += 1;
            }
            if record.outcome != UsageOutcome::Success {
                summary.failed += 1;
            }

            let key = record.qualified_model();
            let model = summary.by_model.entry(key.clone()).or_default();
            model.requests += 1;
            model.cost_usd += record.cost_usd;
            latencies.entry(key).or_default().push(record.latency_ms);

            if record.is_provider_call() {
                summary.provider_calls += 1;
                summary.input_tokens += u64::from(record.input_tokens);
                summary.output_tokens += u64::from(record.output_tokens);
                model.input_tokens += u64::from(record.input_tokens);
                model.output_tokens += u64::from(record.output_tokens);
            }
        }

        if summary.total_requests > 0 {
            summary.avg_latency_ms = latency_total as f64 / summary.total_requests as f64;
            summary.cache_hit_rate = summary.cached_hits as f64 / summary.total_requests as f64;
        }

        for (key, mut samples) in latencies {
            if let Some(model) = summary.by_model.get_mut(&key) {
                finish_model(model, &mut samples);
            }
        }

        summary
    }

    /// Drop rows older than `cutoff`, returning how many went
    pub fn prune_before(&self, cutoff: Timestamp) -> usize {
        let mut pruned = 0;
        self.shards.retain(|_, rows| {
            let before = rows.len();
            rows.retain(|row| row.record.timestamp >= cutoff);
            pruned += before - rows.len();
            !rows.is_empty()
        });

        if pruned > 0 {
            tracing::info!(pruned, cutoff = %cutoff, "pruned usage records past retention");
        }
        pruned
    }

    /// Matching rows in append order, reading one shard when the filter names a caller
    fn collect(&self, filter: &UsageFilter) -> Vec<UsageRecord> {
        let mut rows: Vec<(u64, UsageRecord)> = Vec::new();
        let mut take = |shard: &[Row]| {
            rows.extend(
                shard
                    .iter()
                    .filter(|row| filter.matches(&row.record))
                    .map(|row| (row.seq, row.record.clone())),
            );
        };

        match &filter.caller {
            Some(caller) => {
                if let Some(shard) = self.shards.get(caller) {
                    take(&shard);
                }
            }
            None => self.shards.iter().for_each(|shard| take(&shard)),
        }

        rows.sort_unstable_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, record)| record).collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn finish_model(model: &mut ModelUsage, samples: &mut [u64]) {
    if samples.is_empty() {
        return;
    }
    samples.sort_unstable();
    model.avg_latency_ms = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
    model.p95_latency_ms = percentile(samples, 95);
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    let rank = (sorted.len() * pct).div_ceil(100).max(1);
    sorted[rank - 1]
}
