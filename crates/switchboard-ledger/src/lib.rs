//! Usage accounting, pricing and budget alerts

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod budget;
mod error;
mod ledger;
pub mod pricing;
mod recorder;
mod types;

pub use budget::{
    AlertEvaluation, AlertScope, AlertStore, AlertUpdate, BudgetAlert, BudgetEvaluator, BudgetPeriod, LogNotifier,
    MemoryAlertStore, NewBudgetAlert, Notifier, TriggeredAlert,
};
pub use error::LedgerError;
pub use ledger::UsageLedger;
pub use pricing::{CostBreakdown, PricingTable};
pub use recorder::{UsageRecorder, UsageSink};
pub use types::{ModelUsage, UsageFilter, UsageOutcome, UsageRecord, UsageSummary};

/// Parse a retention window such as `90d`
pub fn parse_retention(raw: &str) -> Result<std::time::Duration, LedgerError> {
    duration_str::parse(raw).map_err(|e| LedgerError::Config(format!("invalid retention '{raw}': {e}")))
}
