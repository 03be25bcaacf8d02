mod harness;

use std::time::Duration;

use futures::StreamExt;
use harness::config::{CHAIN, FAST_RETRY, NO_RETRY, OPENAI_CHARGE, PRICING, approx, ask, build, config};
use harness::mock_provider::MockProvider;
use switchboard_ledger::{UsageFilter, UsageOutcome};
use switchboard_orchestrator::{OrchestratorError, ResponseStream};

const PROMPT: &str = "Write a limerick about a lighthouse keeper";

async fn collect(stream: ResponseStream) -> Vec<Result<String, OrchestratorError>> {
    stream.collect().await
}

fn text(chunks: Vec<Result<String, OrchestratorError>>) -> Vec<String> {
    chunks.into_iter().map(Result::unwrap).collect()
}

#[tokio::test]
async fn chunks_arrive_in_order() {
    let provider = MockProvider::new("openai").with_chunks(&["There ", "once ", "was"]).shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    assert_eq!(text(collect(stream).await), ["There ", "once ", "was"]);

    let rows = orchestrator.ledger().records(&UsageFilter::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, UsageOutcome::Success);
    assert_eq!(rows[0].output_tokens, 500);
    assert!(approx(rows[0].cost_usd, OPENAI_CHARGE));
}

#[tokio::test]
async fn finished_streams_populate_the_cache() {
    let provider = MockProvider::new("openai").with_chunks(&["There ", "once ", "was"]).shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    collect(stream).await;

    let response = orchestrator.generate(ask("bob", PROMPT)).await.unwrap();
    assert!(response.cached);
    assert_eq!(response.content, "There once was");

    let replay = orchestrator.stream(ask("carol", PROMPT)).await.unwrap();
    assert_eq!(text(collect(replay).await), ["There once was"]);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn concurrent_streams_share_one_call() {
    let provider = MockProvider::new("openai")
        .with_chunks(&["There ", "once ", "was"])
        .with_delay(Duration::from_millis(20))
        .shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let first = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    let second = orchestrator.stream(ask("bob", PROMPT)).await.unwrap();
    assert_eq!(orchestrator.health_report().await.in_flight.streams, 1);

    let (first, second) = tokio::join!(collect(first), collect(second));
    assert_eq!(text(first), text(second));
    assert_eq!(provider.calls(), 1);

    let rows = orchestrator.ledger().records(&UsageFilter::default());
    assert_eq!(rows.len(), 2);
    let shared: Vec<_> = rows.iter().filter(|row| row.dedup_sourced).collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].caller_id, "bob");
    assert!(shared[0].cost_usd.abs() < f64::EPSILON);
    assert!(approx(orchestrator.ledger().spend(&UsageFilter::default()), OPENAI_CHARGE));
}

#[tokio::test]
async fn failure_before_the_first_chunk_fails_over() {
    let openai = MockProvider::new("openai").always_failing().shared();
    let anthropic = MockProvider::new("anthropic").with_chunks(&["Backup ", "verse"]).shared();
    let (orchestrator, _) = build(
        config(&[PRICING, NO_RETRY, CHAIN]),
        &[openai.clone(), anthropic.clone()],
    );

    let stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    assert_eq!(text(collect(stream).await), ["Backup ", "verse"]);
    assert_eq!(openai.calls(), 1);

    let rows = orchestrator.ledger().records(&UsageFilter::default());
    assert_eq!(rows[0].provider_id, "anthropic");
}

#[tokio::test]
async fn failure_after_output_started_ends_the_stream() {
    let openai = MockProvider::new("openai")
        .with_chunks(&["There ", "once ", "was"])
        .failing_mid_stream()
        .shared();
    let anthropic = MockProvider::new("anthropic").shared();
    let (orchestrator, _) = build(
        config(&[PRICING, FAST_RETRY, CHAIN]),
        &[openai.clone(), anthropic.clone()],
    );

    let stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    let mut chunks = collect(stream).await.into_iter();

    assert_eq!(chunks.next().unwrap().unwrap(), "There ");
    let error = chunks.next().unwrap().unwrap_err();
    assert!(matches!(error, OrchestratorError::Provider { .. }));
    assert!(chunks.next().is_none());

    assert_eq!(openai.calls(), 1);
    assert_eq!(anthropic.calls(), 0);

    let rows = orchestrator.ledger().records(&UsageFilter::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, UsageOutcome::ProviderError);
    assert_eq!(orchestrator.cache().unwrap().stats().await.unwrap().total_keys, 0);
}

#[tokio::test]
async fn dropping_the_last_consumer_aborts_the_call() {
    let provider = MockProvider::new("openai")
        .with_chunks(&["one ", "two ", "three ", "four ", "five"])
        .with_delay(Duration::from_millis(50))
        .shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let mut stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(provider.streams_aborted(), 1);
    let rows = orchestrator.ledger().records(&UsageFilter::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, UsageOutcome::Cancelled);
    assert_eq!(orchestrator.health_report().await.in_flight.streams, 0);
    assert_eq!(orchestrator.cache().unwrap().stats().await.unwrap().total_keys, 0);
}

#[tokio::test]
async fn a_remaining_consumer_keeps_the_call_alive() {
    let provider = MockProvider::new("openai")
        .with_chunks(&["one ", "two ", "three"])
        .with_delay(Duration::from_millis(20))
        .shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let first = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    let second = orchestrator.stream(ask("bob", PROMPT)).await.unwrap();
    drop(first);

    assert_eq!(text(collect(second).await), ["one ", "two ", "three"]);
    assert_eq!(provider.streams_aborted(), 0);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn shutdown_aborts_streams_in_progress() {
    let provider = MockProvider::new("openai")
        .with_chunks(&["one ", "two ", "three"])
        .with_delay(Duration::from_millis(50))
        .shared();
    let (orchestrator, _) = build(config(&[PRICING, FAST_RETRY]), &[provider.clone()]);

    let mut stream = orchestrator.stream(ask("alice", PROMPT)).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
    orchestrator.shutdown();

    let error = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(error, OrchestratorError::Cancelled));
    assert!(stream.next().await.is_none());

    let error = orchestrator.stream(ask("bob", PROMPT)).await.err().unwrap();
    assert!(matches!(error, OrchestratorError::Cancelled));
}
