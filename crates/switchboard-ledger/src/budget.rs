//! Budget alerts
//!
//! Each alert caps spend over a calendar period (UTC) for the whole
//! system, one caller or one model. The evaluator compares ledger spend
//! against the cap and notifies once per period when the trigger
//! percentage is reached.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use jiff::{Span, Timestamp, tz::TimeZone};
use serde::{Deserialize, Serialize};
use switchboard_config::BudgetConfig;
use switchboard_core::SharedClock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{LedgerError, UsageFilter, UsageLedger};

/// Calendar period an alert's spend is measured over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    /// Start of the period containing `now`: midnight UTC, Monday, or the 1st
    pub fn start(self, now: Timestamp) -> Result<Timestamp, LedgerError> {
        let today = now.to_zoned(TimeZone::UTC).date();
        let first_day = match self {
            Self::Daily => today,
            Self::Weekly => {
                let offset = i64::from(today.weekday().to_monday_zero_offset());
                today
                    .checked_sub(Span::new().days(offset))
                    .map_err(|e| LedgerError::Calendar(e.to_string()))?
            }
            Self::Monthly => today.first_of_month(),
        };

        first_day
            .to_zoned(TimeZone::UTC)
            .map(|start| start.timestamp())
            .map_err(|e| LedgerError::Calendar(e.to_string()))
    }
}

/// Whose spend an alert watches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum AlertScope {
    Global,
    Caller(String),
    /// Qualified `provider/model`
    Model(String),
}

impl AlertScope {
    fn filter(&self, since: Timestamp) -> UsageFilter {
        let filter = UsageFilter::default().since(since);
        match self {
            Self::Global => filter,
            Self::Caller(caller) => filter.caller(caller.clone()),
            Self::Model(model) => filter.model(model.clone()),
        }
    }
}

/// A spend cap and its latest evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    pub id: Uuid,
    pub name: String,
    pub threshold_usd: f64,
    pub period: BudgetPeriod,
    pub scope: AlertScope,
    /// Where notifications go, e.g. an email address or channel name
    pub notify_channel: String,
    pub enabled: bool,
    pub current_spend: f64,
    pub percent_used: f64,
    pub last_notified_at: Option<Timestamp>,
}

/// Fields supplied when creating an alert
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBudgetAlert {
    pub name: String,
    pub threshold_usd: f64,
    pub period: BudgetPeriod,
    pub scope: AlertScope,
    pub notify_channel: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NewBudgetAlert {
    fn into_alert(self) -> Result<BudgetAlert, LedgerError> {
        validate_threshold(self.threshold_usd)?;
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidAlert("name must not be empty".to_owned()));
        }

        Ok(BudgetAlert {
            id: Uuid::new_v4(),
            name: self.name,
            threshold_usd: self.threshold_usd,
            period: self.period,
            scope: self.scope,
            notify_channel: self.notify_channel,
            enabled: self.enabled,
            current_spend: 0.0,
            percent_used: 0.0,
            last_notified_at: None,
        })
    }
}

/// Partial update; unset fields keep their value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertUpdate {
    pub name: Option<String>,
    pub threshold_usd: Option<f64>,
    pub period: Option<BudgetPeriod>,
    pub scope: Option<AlertScope>,
    pub notify_channel: Option<String>,
    pub enabled: Option<bool>,
}

/// Result of one budget check for one alert
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertEvaluation {
    pub current_spend: f64,
    pub percent_used: f64,
    /// Set when this check sent a notification; `None` keeps the stored value
    pub notified_at: Option<Timestamp>,
}

/// Persistent store for alert definitions
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, alert: NewBudgetAlert) -> Result<BudgetAlert, LedgerError>;
    async fn get(&self, id: Uuid) -> Result<Option<BudgetAlert>, LedgerError>;
    async fn list(&self) -> Result<Vec<BudgetAlert>, LedgerError>;
    async fn update(&self, id: Uuid, update: AlertUpdate) -> Result<BudgetAlert, LedgerError>;
    /// Store the outcome of a budget check, leaving the definition untouched
    ///
    /// Returns the alert as now stored, or `None` when it no longer exists.
    async fn record_evaluation(
        &self,
        id: Uuid,
        evaluation: AlertEvaluation,
    ) -> Result<Option<BudgetAlert>, LedgerError>;
    async fn delete(&self, id: Uuid) -> Result<bool, LedgerError>;
}

/// Alert store held in process memory
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<Vec<BudgetAlert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create(&self, alert: NewBudgetAlert) -> Result<BudgetAlert, LedgerError> {
        let alert = alert.into_alert()?;
        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        tracing::info!(alert_id = %alert.id, name = %alert.name, "budget alert created");
        Ok(alert)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BudgetAlert>, LedgerError> {
        let alerts = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<BudgetAlert>, LedgerError> {
        Ok(self.alerts.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn update(&self, id: Uuid, update: AlertUpdate) -> Result<BudgetAlert, LedgerError> {
        if let Some(threshold) = update.threshold_usd {
            validate_threshold(threshold)?;
        }

        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(LedgerError::AlertNotFound { id })?;

        if let Some(name) = update.name {
            alert.name = name;
        }
        if let Some(threshold) = update.threshold_usd {
            alert.threshold_usd = threshold;
        }
        if let Some(period) = update.period {
            alert.period = period;
        }
        if let Some(scope) = update.scope {
            alert.scope = scope;
        }
        if let Some(channel) = update.notify_channel {
            alert.notify_channel = channel;
        }
        if let Some(enabled) = update.enabled {
            alert.enabled = enabled;
        }
        Ok(alert.clone())
    }

    async fn record_evaluation(
        &self,
        id: Uuid,
        evaluation: AlertEvaluation,
    ) -> Result<Option<BudgetAlert>, LedgerError> {
        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let Some(alert) = alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };

        alert.current_spend = evaluation.current_spend;
        alert.percent_used = evaluation.percent_used;
        if evaluation.notified_at.is_some() {
            alert.last_notified_at = evaluation.notified_at;
        }
        Ok(Some(alert.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, LedgerError> {
        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        Ok(alerts.len() < before)
    }
}

/// Delivers triggered alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &BudgetAlert) -> Result<(), LedgerError>;
}

/// Notifier that only writes a log line
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &BudgetAlert) -> Result<(), LedgerError> {
        tracing::warn!(
            alert_id = %alert.id,
            name = %alert.name,
            period = %alert.period,
            spend_usd = alert.current_spend,
            threshold_usd = alert.threshold_usd,
            percent_used = alert.percent_used,
            notify = %alert.notify_channel,
            "budget alert triggered"
        );
        Ok(())
    }
}

/// An alert at or over its trigger percentage
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredAlert {
    pub alert: BudgetAlert,
    pub period_start: Timestamp,
    /// Whether this check sent the notification; false when one already
    /// went out earlier in the period
    pub notified: bool,
}

/// Compares ledger spend against every enabled alert
pub struct BudgetEvaluator {
    ledger: Arc<UsageLedger>,
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    trigger_percent: f64,
    check_interval: Duration,
    clock: SharedClock,
}

impl BudgetEvaluator {
    pub fn new(
        config: &BudgetConfig,
        ledger: Arc<UsageLedger>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
    ) -> Result<Self, LedgerError> {
        let check_interval = duration_str::parse(&config.check_interval).map_err(|e| {
            LedgerError::Config(format!("invalid check_interval '{}': {e}", config.check_interval))
        })?;

        Ok(Self {
            ledger,
            store,
            notifier,
            trigger_percent: config.trigger_percent,
            check_interval,
            clock,
        })
    }

    pub const fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Refresh every enabled alert and return those at or over the trigger
    ///
    /// Each alert is notified at most once per period.
    pub async fn check_budget_alerts(&self) -> Result<Vec<TriggeredAlert>, LedgerError> {
        let now = self.clock.now();
        let mut triggered = Vec::new();

        for mut alert in self.store.list().await? {
            if !alert.enabled {
                continue;
            }

            let period_start = alert.period.start(now)?;
            let spend = self.ledger.spend(&alert.scope.filter(period_start));
            alert.current_spend = spend;
            alert.percent_used = if alert.threshold_usd > 0.0 {
                spend / alert.threshold_usd * 100.0
            } else {
                0.0
            };

            let over = alert.percent_used >= self.trigger_percent;
            let already_sent = alert.last_notified_at.is_some_and(|at| at >= period_start);
            let mut notified_at = None;

            if over && !already_sent {
                match self.notifier.notify(&alert).await {
                    Ok(()) => notified_at = Some(now),
                    Err(e) => {
                        tracing::warn!(alert_id = %alert.id, error = %e, "failed to send budget alert");
                    }
                }
            }

            let evaluation = AlertEvaluation {
                current_spend: alert.current_spend,
                percent_used: alert.percent_used,
                notified_at,
            };
            let Some(stored) = self.store.record_evaluation(alert.id, evaluation).await? else {
                tracing::debug!(alert_id = %alert.id, "budget alert removed during check, skipping");
                continue;
            };

            if over {
                triggered.push(TriggeredAlert {
                    alert: stored,
                    period_start,
                    notified: notified_at.is_some(),
                });
            }
        }

        Ok(triggered)
    }

    /// Check alerts every `interval` until `shutdown` fires
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "budget evaluator started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    match self.check_budget_alerts().await {
                        Ok(triggered) if !triggered.is_empty() => {
                            tracing::info!(triggered = triggered.len(), "budget alerts over threshold");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "budget alert check failed"),
                    }
                }
            }
        }

        tracing::debug!("budget evaluator stopped");
    }
}

impl std::fmt::Debug for BudgetEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetEvaluator")
            .field("trigger_percent", &self.trigger_percent)
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

fn validate_threshold(threshold: f64) -> Result<(), LedgerError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAlert(format!("threshold must be positive, got {threshold}")))
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}
