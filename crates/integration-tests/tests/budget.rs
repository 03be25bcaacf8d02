mod harness;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harness::config::{
    ANTHROPIC_CHARGE, CHAIN, FAST_RETRY, NO_RETRY, OPENAI_CHARGE, PRICING, approx, ask, build, config,
};
use harness::mock_provider::MockProvider;
use switchboard_config::BudgetConfig;
use switchboard_core::{ManualClock, Message};
use switchboard_ledger::{
    AlertScope, AlertStore, BudgetAlert, BudgetEvaluator, BudgetPeriod, LedgerError, MemoryAlertStore, NewBudgetAlert,
    Notifier,
};
use switchboard_orchestrator::{GenerateRequest, Orchestrator};

#[derive(Default)]
struct Recorded {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for Recorded {
    async fn notify(&self, alert: &BudgetAlert) -> Result<(), LedgerError> {
        self.sent.lock().unwrap().push(alert.name.clone());
        Ok(())
    }
}

impl Recorded {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

struct Fixture {
    orchestrator: Orchestrator,
    clock: Arc<ManualClock>,
    store: Arc<MemoryAlertStore>,
    notifier: Arc<Recorded>,
    evaluator: BudgetEvaluator,
}

fn fixture(providers: &[Arc<MockProvider>], sections: &[&str]) -> Fixture {
    let (orchestrator, clock) = build(config(sections), providers);
    let store = Arc::new(MemoryAlertStore::new());
    let notifier = Arc::new(Recorded::default());
    let evaluator = BudgetEvaluator::new(
        &BudgetConfig::default(),
        Arc::clone(orchestrator.ledger()),
        store.clone(),
        notifier.clone(),
        clock.clone(),
    )
    .unwrap();

    Fixture {
        orchestrator,
        clock,
        store,
        notifier,
        evaluator,
    }
}

fn alert(name: &str, threshold_usd: f64, scope: AlertScope) -> NewBudgetAlert {
    NewBudgetAlert {
        name: name.to_owned(),
        threshold_usd,
        period: BudgetPeriod::Daily,
        scope,
        notify_channel: "ops@example.com".to_owned(),
        enabled: true,
    }
}

#[tokio::test]
async fn caller_spend_from_requests_triggers_an_alert() {
    let provider = MockProvider::new("openai").shared();
    let f = fixture(&[provider], &[PRICING, FAST_RETRY]);
    f.store
        .create(alert("alice daily", 0.01, AlertScope::Caller("alice".to_owned())))
        .await
        .unwrap();

    f.orchestrator.generate(ask("alice", "Outline a study plan for algebra")).await.unwrap();
    assert!(f.evaluator.check_budget_alerts().await.unwrap().is_empty());

    let listed = f.store.list().await.unwrap();
    assert!(approx(listed[0].current_spend, OPENAI_CHARGE));
    assert!(approx(listed[0].percent_used, 70.0));

    f.orchestrator.generate(ask("alice", "Outline a study plan for geometry")).await.unwrap();
    let triggered = f.evaluator.check_budget_alerts().await.unwrap();
    assert_eq!(triggered.len(), 1);
    assert!(triggered[0].notified);
    assert!(approx(triggered[0].alert.current_spend, 2.0 * OPENAI_CHARGE));
    assert_eq!(f.notifier.count(), 1);

    // Still over, but already notified this period
    let again = f.evaluator.check_budget_alerts().await.unwrap();
    assert!(!again[0].notified);
    assert_eq!(f.notifier.count(), 1);

    // Next day the spend starts from zero
    f.clock.advance(Duration::from_secs(24 * 60 * 60));
    assert!(f.evaluator.check_budget_alerts().await.unwrap().is_empty());
}

#[tokio::test]
async fn shared_and_cached_responses_do_not_count_as_spend() {
    let provider = MockProvider::new("openai").with_delay(Duration::from_millis(50)).shared();
    let f = fixture(&[provider.clone()], &[PRICING, FAST_RETRY]);
    f.store
        .create(alert("global", 0.008, AlertScope::Global))
        .await
        .unwrap();

    let prompt = "Outline a study plan for algebra";
    let (first, second) = tokio::join!(
        f.orchestrator.generate(ask("alice", prompt)),
        f.orchestrator.generate(ask("bob", prompt)),
    );
    first.unwrap();
    second.unwrap();
    assert!(f.orchestrator.generate(ask("carol", prompt)).await.unwrap().cached);
    assert_eq!(provider.calls(), 1);

    let triggered = f.evaluator.check_budget_alerts().await.unwrap();
    assert_eq!(triggered.len(), 1);
    assert!(approx(triggered[0].alert.current_spend, OPENAI_CHARGE));
}

#[tokio::test]
async fn model_scope_follows_the_model_that_served() {
    let openai = MockProvider::new("openai").always_failing().shared();
    let anthropic = MockProvider::new("anthropic").shared();
    let f = fixture(&[openai, anthropic], &[PRICING, NO_RETRY, CHAIN]);

    f.store
        .create(alert("gpt-4o", 0.001, AlertScope::Model("openai/gpt-4o".to_owned())))
        .await
        .unwrap();
    f.store
        .create(alert("claude", 0.01, AlertScope::Model("anthropic/claude-sonnet".to_owned())))
        .await
        .unwrap();

    let request = GenerateRequest::new(
        "alice",
        "openai/gpt-4o",
        vec![Message::user("Outline a study plan for algebra")],
    );
    let response = f.orchestrator.generate(request).await.unwrap();
    assert_eq!(response.provider, "anthropic");

    let triggered = f.evaluator.check_budget_alerts().await.unwrap();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].alert.name, "claude");
    assert!(approx(triggered[0].alert.current_spend, ANTHROPIC_CHARGE));
}
