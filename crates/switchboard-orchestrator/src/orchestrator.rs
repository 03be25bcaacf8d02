use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use jiff::Timestamp;
use switchboard_cache::{CacheEntry, CachePolicy, CachedResponse, ResponseCache, semantic_key};
use switchboard_config::Config;
use switchboard_core::{Fingerprint, HttpError, SharedClock, SystemClock};
use switchboard_dedup::{
    Flight, FlightError, InflightRegistry, LeaderGuard, Publisher, StreamFlight, Subscriber, Waiter,
};
use switchboard_ledger::{PricingTable, UsageLedger, UsageRecorder, UsageSink};
use switchboard_ratelimit::{RateLimitError, RateLimiter};
use switchboard_routing::{FallbackRouter, HealthPolicy, ProviderHealthTracker, RetryPolicies};
use tokio_util::sync::CancellationToken;

use crate::invoke::{Attempted, buffered_attempt, streamed_attempt};
use crate::metrics::Metrics;
use crate::provider::{Completion, Provider};
use crate::types::Served;
use crate::usage::PendingUsage;
use crate::{
    GenerateRequest, GenerateResponse, HealthReport, InFlightStats, MaintenanceReport, OrchestratorError,
    ResponseMetadata, TokenUsage,
};

/// Text chunks of a streamed response, ending early on error
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<String, OrchestratorError>> + Send>>;

/// Turns logical requests into provider calls
///
/// Every request passes the rate limiter, then the response cache, then the
/// dedup registry. Only the leader of a flight reaches the providers, which
/// are tried in fallback order with retries. The handle is cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) limiter: Option<RateLimiter>,
    pub(crate) cache: Option<ResponseCache>,
    pub(crate) cache_policy: CachePolicy,
    /// Buffered and streamed calls in progress, one per fingerprint
    pub(crate) flights: InflightRegistry<Served, String, OrchestratorError>,
    pub(crate) dedup_enabled: bool,
    pub(crate) health: Arc<ProviderHealthTracker>,
    pub(crate) router: FallbackRouter,
    pub(crate) retries: RetryPolicies,
    pub(crate) pricing: PricingTable,
    pub(crate) ledger: Arc<UsageLedger>,
    pub(crate) retention: Duration,
    pub(crate) clock: SharedClock,
    pub(crate) metrics: Metrics,
    pub(crate) shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            providers: Vec::new(),
            clock: None,
            usage_sink: None,
        }
    }

    /// Answer a request, sharing the provider call with identical ones in flight
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, OrchestratorError> {
        let started = Instant::now();
        let result = self.generate_inner(&request, started).await;

        let outcome = match &result {
            Ok(response) if response.cached => "cache_hit",
            Ok(response) if response.from_dedup => "dedup",
            Ok(_) => "success",
            Err(e) => e.error_type(),
        };
        self.inner.metrics.request(started, &request.model, outcome);

        result
    }

    /// Answer a request as a stream of text chunks
    ///
    /// Identical requests in flight share one provider call; late joiners
    /// replay what was already produced, and a stream joining a buffered
    /// call gets its answer as one chunk. The provider call is aborted once
    /// every consumer has dropped its stream.
    pub async fn stream(&self, request: GenerateRequest) -> Result<ResponseStream, OrchestratorError> {
        let started = Instant::now();
        self.ensure_running()?;
        request.validate()?;
        self.inner.router.resolve(&request.model)?;
        self.admit(&request).await?;

        let fingerprint = request.fingerprint();
        if request.enable_cache
            && let Some(entry) = self.lookup_cache(&request, &fingerprint).await
        {
            let content = self.serve_cached(&request, &fingerprint, entry, started).content;
            self.inner.metrics.request(started, &request.model, "cache_hit");
            return Ok(Box::pin(futures::stream::once(async move { Ok(content) })));
        }

        let (publisher, subscriber, usage) = if request.enable_dedup && self.inner.dedup_enabled {
            match self.inner.flights.begin_or_join_stream(&fingerprint) {
                StreamFlight::Leader { publisher, subscriber } => (Some(publisher), subscriber, None),
                StreamFlight::Subscriber(subscriber) => {
                    self.inner.metrics.dedup_join();
                    tracing::debug!(
                        caller = %request.caller_id,
                        fingerprint = %fingerprint.short(),
                        "joined in-flight stream"
                    );
                    let usage = self.pending_usage(&request, &fingerprint, started).dedup_sourced();
                    (None, subscriber, Some(usage))
                }
                StreamFlight::Waiter(waiter) => {
                    self.inner.metrics.dedup_join();
                    tracing::debug!(
                        caller = %request.caller_id,
                        fingerprint = %fingerprint.short(),
                        "stream joined in-flight request"
                    );
                    let usage = self.pending_usage(&request, &fingerprint, started).dedup_sourced();
                    return Ok(Box::pin(await_whole(waiter, usage)));
                }
            }
        } else {
            let (publisher, subscriber) = self.inner.flights.begin_detached(&fingerprint);
            (Some(publisher), subscriber, None)
        };

        if let Some(publisher) = publisher {
            tokio::spawn(self.clone().pump(request, fingerprint, publisher, started));
        }

        Ok(Box::pin(subscribe(subscriber, usage)))
    }

    /// Run requests with at most `concurrency` in flight, results in input order
    pub async fn generate_batch(
        &self,
        requests: Vec<GenerateRequest>,
        concurrency: usize,
    ) -> Vec<Result<GenerateResponse, OrchestratorError>> {
        futures::stream::iter(requests)
            .map(|request| self.generate(request))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Provider health, cache occupancy and in-flight counts
    pub async fn health_report(&self) -> HealthReport {
        let cache = match &self.inner.cache {
            Some(cache) => match cache.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read cache stats");
                    None
                }
            },
            None => None,
        };

        HealthReport {
            summary: self.inner.health.summary(),
            providers: self.inner.health.all_statuses(),
            cache,
            in_flight: InFlightStats {
                buffered: self.inner.flights.buffered_in_flight(),
                streams: self.inner.flights.streams_in_flight(),
            },
        }
    }

    /// Drop expired cache entries, rolled-over rate windows and usage past retention
    pub fn purge_expired(&self) -> MaintenanceReport {
        let cutoff = self
            .inner
            .clock
            .now()
            .checked_sub(self.inner.retention)
            .unwrap_or(Timestamp::MIN);

        let report = MaintenanceReport {
            cache_entries: self.inner.cache.as_ref().map_or(0, ResponseCache::purge_expired),
            rate_limit_windows: self.inner.limiter.as_ref().map_or(0, RateLimiter::purge_expired),
            usage_records: self.inner.ledger.prune_before(cutoff),
        };

        tracing::debug!(
            cache_entries = report.cache_entries,
            rate_limit_windows = report.rate_limit_windows,
            usage_records = report.usage_records,
            "maintenance sweep finished"
        );
        report
    }

    /// Sweep every `interval` until shutdown
    pub async fn run_maintenance(&self, interval: Duration) {
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    self.purge_expired();
                }
            }
        }
    }

    /// Stop accepting requests and abort streams still producing
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!("orchestrator shutting down");
            self.inner.shutdown.cancel();
        }
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.inner.ledger
    }

    pub fn health(&self) -> &Arc<ProviderHealthTracker> {
        &self.inner.health
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.inner.limiter.as_ref()
    }

    async fn generate_inner(
        &self,
        request: &GenerateRequest,
        started: Instant,
    ) -> Result<GenerateResponse, OrchestratorError> {
        self.ensure_running()?;
        request.validate()?;
        self.inner.router.resolve(&request.model)?;
        self.admit(request).await?;

        let fingerprint = request.fingerprint();
        if request.enable_cache
            && let Some(entry) = self.lookup_cache(request, &fingerprint).await
        {
            return Ok(self.serve_cached(request, &fingerprint, entry, started));
        }

        if !(request.enable_dedup && self.inner.dedup_enabled) {
            return self.lead(request, &fingerprint, None, started).await;
        }

        match self.inner.flights.begin_or_join(&fingerprint) {
            Flight::Leader(guard) => self.lead(request, &fingerprint, Some(guard), started).await,
            Flight::Waiter(waiter) => self.follow(request, &fingerprint, waiter, started).await,
        }
    }

    fn ensure_running(&self) -> Result<(), OrchestratorError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }

    async fn admit(&self, request: &GenerateRequest) -> Result<(), OrchestratorError> {
        let Some(limiter) = &self.inner.limiter else {
            return Ok(());
        };

        limiter
            .check(&request.caller_id, &request.model)
            .await
            .map_err(|e| match e {
                RateLimitError::Exceeded { retry_after } => {
                    self.inner.metrics.rate_limited(&request.caller_id);
                    tracing::info!(caller = %request.caller_id, retry_after, "request rejected by rate limit");
                    OrchestratorError::RateLimitExceeded { retry_after }
                }
                RateLimitError::Redis(message) => OrchestratorError::RateLimiterUnavailable(message),
                RateLimitError::Config(message) => OrchestratorError::Configuration(message),
            })
    }

    /// Exact entry first, then a near-duplicate prompt; errors count as a miss
    async fn lookup_cache(&self, request: &GenerateRequest, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let cache = self.inner.cache.as_ref()?;

        let exact = cache.get(fingerprint).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache lookup failed, treating as a miss");
            None
        });

        let entry = match (exact, semantic_key(&request.messages, &request.params())) {
            (Some(entry), _) => Some(entry),
            (None, Some(key)) => cache.get_similar(&key, &request.model).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "similar-prompt lookup failed, treating as a miss");
                None
            }),
            (None, None) => None,
        };

        self.inner.metrics.cache_lookup(entry.is_some());
        entry
    }

    fn serve_cached(
        &self,
        request: &GenerateRequest,
        fingerprint: &Fingerprint,
        entry: CacheEntry,
        started: Instant,
    ) -> GenerateResponse {
        let cached = entry.response;
        let mut usage = self.pending_usage(request, fingerprint, started).cached();
        usage.served_by(&cached.provider, &cached.model, cached.input_tokens, cached.output_tokens);
        usage.succeed(0.0);

        tracing::debug!(
            caller = %request.caller_id,
            fingerprint = %fingerprint.short(),
            "served from cache"
        );

        GenerateResponse {
            model_used: format!("{}/{}", cached.provider, cached.model),
            metadata: ResponseMetadata {
                fallback_used: false,
                attempts: 0,
                provider_status: self.inner.health.status(&cached.provider),
            },
            token_usage: TokenUsage::new(cached.input_tokens, cached.output_tokens),
            content: cached.content,
            provider: cached.provider,
            cost_usd: 0.0,
            latency_ms: elapsed_ms(started),
            cached: true,
            from_dedup: false,
            fingerprint: fingerprint.clone(),
        }
    }

    async fn lead(
        &self,
        request: &GenerateRequest,
        fingerprint: &Fingerprint,
        guard: Option<LeaderGuard<Served, String, OrchestratorError>>,
        started: Instant,
    ) -> Result<GenerateResponse, OrchestratorError> {
        let mut usage = self.pending_usage(request, fingerprint, started);
        let messages = request.messages.as_slice();
        let params = request.params();

        let outcome = self
            .inner
            .run_attempts(request, |provider, candidate| {
                buffered_attempt(provider, candidate, messages, params)
            })
            .await
            .map(|attempted| self.served(attempted));

        match &outcome {
            Ok(served) => {
                self.store(request, fingerprint, served).await;
                usage.served_by(&served.provider, &served.model, served.input_tokens, served.output_tokens);
                usage.succeed(served.cost_usd);
                self.inner
                    .metrics
                    .usage(&served.model_used(), served.input_tokens, served.output_tokens, served.cost_usd);
            }
            Err(e) => {
                tracing::warn!(caller = %request.caller_id, model = %request.model, error = %e, "request failed");
                usage.fail();
            }
        }

        if let Some(guard) = guard {
            let waiters = guard.resolve(outcome.clone());
            if waiters > 0 {
                tracing::debug!(fingerprint = %fingerprint.short(), waiters, "released waiters");
            }
        }

        outcome.map(|served| self.respond(served, fingerprint, started, false))
    }

    async fn follow(
        &self,
        request: &GenerateRequest,
        fingerprint: &Fingerprint,
        waiter: Waiter<Served, String, OrchestratorError>,
        started: Instant,
    ) -> Result<GenerateResponse, OrchestratorError> {
        self.inner.metrics.dedup_join();
        tracing::debug!(
            caller = %request.caller_id,
            fingerprint = %fingerprint.short(),
            "joined in-flight request"
        );

        let mut usage = self.pending_usage(request, fingerprint, started).dedup_sourced();
        match waiter.wait().await {
            Ok(served) => {
                usage.served_by(&served.provider, &served.model, served.input_tokens, served.output_tokens);
                usage.succeed(0.0);
                Ok(self.respond(served, fingerprint, started, true))
            }
            Err(e) => {
                settle_failure(usage, &e);
                Err(OrchestratorError::from_flight(e))
            }
        }
    }

    /// Produce a streamed flight until it completes or nobody is listening
    async fn pump(
        self,
        request: GenerateRequest,
        fingerprint: Fingerprint,
        publisher: Publisher<Served, String, OrchestratorError>,
        started: Instant,
    ) {
        let listeners_gone = publisher.cancellation();
        let mut usage = self.pending_usage(&request, &fingerprint, started);
        let messages = request.messages.as_slice();
        let params = request.params();
        let sink = &publisher;

        let outcome = tokio::select! {
            () = listeners_gone.cancelled() => Err(OrchestratorError::Cancelled),
            () = self.inner.shutdown.cancelled() => Err(OrchestratorError::Cancelled),
            result = self.inner.run_attempts(&request, |provider, candidate| {
                streamed_attempt(provider, candidate, messages, params, sink)
            }) => result.map(|attempted| self.served(attempted)),
        };

        let label = match outcome {
            Ok(served) => {
                self.store(&request, &fingerprint, &served).await;
                usage.served_by(&served.provider, &served.model, served.input_tokens, served.output_tokens);
                usage.succeed(served.cost_usd);
                self.inner
                    .metrics
                    .usage(&served.model_used(), served.input_tokens, served.output_tokens, served.cost_usd);
                publisher.finish(Ok(served));
                "success".to_owned()
            }
            Err(OrchestratorError::Cancelled) => {
                tracing::info!(fingerprint = %fingerprint.short(), "stream cancelled, provider call aborted");
                usage.cancel();
                publisher.finish(Err(OrchestratorError::Cancelled));
                "cancelled".to_owned()
            }
            Err(e) => {
                tracing::warn!(caller = %request.caller_id, model = %request.model, error = %e, "stream failed");
                usage.fail();
                let label = e.error_type().to_owned();
                publisher.finish(Err(e));
                label
            }
        };
        self.inner.metrics.request(started, &request.model, &label);
    }

    /// Cache a fresh response when the request and prompt allow it
    async fn store(&self, request: &GenerateRequest, fingerprint: &Fingerprint, served: &Served) {
        if !request.enable_cache {
            return;
        }
        let Some(cache) = &self.inner.cache else {
            return;
        };

        let decision = self
            .inner
            .cache_policy
            .decide(request.prompt().unwrap_or_default(), request.temperature);
        if !decision.cacheable {
            tracing::debug!(fingerprint = %fingerprint.short(), "response not cacheable");
            return;
        }

        let response = CachedResponse {
            content: served.content.clone(),
            provider: served.provider.clone(),
            model: served.model.clone(),
            input_tokens: served.input_tokens,
            output_tokens: served.output_tokens,
        };
        if let Err(e) = cache
            .put(
                fingerprint,
                response,
                &request.model,
                semantic_key(&request.messages, &request.params()),
                decision.ttl,
            )
            .await
        {
            tracing::warn!(error = %e, "cache write failed");
        }
    }

    fn served(&self, attempted: Attempted<Completion>) -> Served {
        let Attempted {
            value,
            candidate,
            attempts,
            fallback_used,
        } = attempted;
        let cost = self
            .inner
            .pricing
            .cost(&candidate.id(), value.input_tokens, value.output_tokens);

        Served {
            content: value.content,
            provider: candidate.provider,
            model: candidate.model,
            input_tokens: value.input_tokens,
            output_tokens: value.output_tokens,
            cost_usd: cost.user_charge,
            fallback_used,
            attempts,
        }
    }

    fn respond(&self, served: Served, fingerprint: &Fingerprint, started: Instant, from_dedup: bool) -> GenerateResponse {
        GenerateResponse {
            model_used: served.model_used(),
            token_usage: TokenUsage::new(served.input_tokens, served.output_tokens),
            cost_usd: if from_dedup { 0.0 } else { served.cost_usd },
            latency_ms: elapsed_ms(started),
            cached: false,
            from_dedup,
            fingerprint: fingerprint.clone(),
            metadata: ResponseMetadata {
                fallback_used: served.fallback_used,
                attempts: served.attempts,
                provider_status: self.inner.health.status(&served.provider),
            },
            content: served.content,
            provider: served.provider,
        }
    }

    fn pending_usage(&self, request: &GenerateRequest, fingerprint: &Fingerprint, started: Instant) -> PendingUsage {
        PendingUsage::new(
            Arc::clone(&self.inner.ledger),
            Arc::clone(&self.inner.clock),
            &request.caller_id,
            &request.model,
            fingerprint,
            started,
        )
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.inner.providers.keys().collect();
        providers.sort();
        f.debug_struct("Orchestrator")
            .field("providers", &providers)
            .field("cache", &self.inner.cache)
            .field("rate_limit", &self.inner.limiter.is_some())
            .field("dedup", &self.inner.dedup_enabled)
            .finish_non_exhaustive()
    }
}

/// Builds an [`Orchestrator`] from configuration and provider handles
pub struct OrchestratorBuilder {
    config: Config,
    providers: Vec<Arc<dyn Provider>>,
    clock: Option<SharedClock>,
    usage_sink: Option<Arc<dyn UsageSink>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn shared_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Time source for TTLs, windows and ledger timestamps
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// External store that receives every usage record
    #[must_use]
    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Build the orchestrator
    ///
    /// Must be called inside a Tokio runtime when a usage sink is set.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(SystemClock::shared);

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for provider in self.providers {
            let id = provider.id().to_owned();
            if providers.insert(id.clone(), provider).is_some() {
                return Err(OrchestratorError::Configuration(format!("provider '{id}' registered twice")));
            }
        }

        let limiter = match &config.rate_limit {
            Some(rate_limit) if rate_limit.enabled => {
                Some(RateLimiter::new(rate_limit, Arc::clone(&clock)).map_err(config_error)?)
            }
            _ => None,
        };

        let cache = if config.cache.enabled {
            Some(ResponseCache::new(&config.cache, Arc::clone(&clock)).map_err(config_error)?)
        } else {
            None
        };
        let cache_policy = CachePolicy::from_config(&config.cache.ttl).map_err(config_error)?;

        let health_policy = HealthPolicy::from_config(&config.health).map_err(config_error)?;
        let health = Arc::new(ProviderHealthTracker::new(health_policy, Arc::clone(&clock)));
        for id in providers.keys() {
            health.register(id);
        }

        let router = FallbackRouter::new(&config.fallback, Arc::clone(&health))
            .map_err(config_error)?
            .with_providers(providers.keys().cloned());
        let retries = RetryPolicies::from_config(&config.retry).map_err(config_error)?;
        let retention = switchboard_ledger::parse_retention(&config.ledger.retention).map_err(config_error)?;

        let ledger = Arc::new(match self.usage_sink {
            Some(sink) => UsageLedger::with_recorder(UsageRecorder::new(sink)),
            None => UsageLedger::new(),
        });

        tracing::info!(
            providers = providers.len(),
            cache = cache.is_some(),
            rate_limit = limiter.is_some(),
            dedup = config.dedup.enabled,
            "orchestrator ready"
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                providers,
                limiter,
                cache,
                cache_policy,
                flights: InflightRegistry::new(),
                dedup_enabled: config.dedup.enabled,
                health,
                router,
                retries,
                pricing: PricingTable::from_config(&config.pricing),
                ledger,
                retention,
                clock,
                metrics: Metrics::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn config_error(e: impl std::error::Error) -> OrchestratorError {
    OrchestratorError::Configuration(e.to_string())
}

/// Close a shared request's row after its flight failed
///
/// A leader that went away is a cancellation, not a provider failure.
fn settle_failure(usage: PendingUsage, error: &FlightError<OrchestratorError>) {
    match error {
        FlightError::Abandoned | FlightError::Leader(OrchestratorError::Cancelled) => usage.cancel(),
        FlightError::Leader(_) => usage.fail(),
    }
}

/// Adapt a flight subscriber into a response stream, writing its usage row at the end
fn subscribe(
    subscriber: Subscriber<Served, String, OrchestratorError>,
    usage: Option<PendingUsage>,
) -> impl Stream<Item = Result<String, OrchestratorError>> + Send {
    futures::stream::unfold(Some((subscriber, usage)), |state| async move {
        let (mut subscriber, usage) = state?;
        match subscriber.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((subscriber, usage)))),
            Some(Err(e)) => {
                if let Some(usage) = usage {
                    settle_failure(usage, &e);
                }
                Some((Err(OrchestratorError::from_flight(e)), None))
            }
            None => {
                if let Some(mut usage) = usage {
                    if let Some(served) = subscriber.completed() {
                        usage.served_by(&served.provider, &served.model, served.input_tokens, served.output_tokens);
                    }
                    usage.succeed(0.0);
                }
                None
            }
        }
    })
}

/// Stream a buffered request's result as a single chunk
fn await_whole(
    waiter: Waiter<Served, String, OrchestratorError>,
    mut usage: PendingUsage,
) -> impl Stream<Item = Result<String, OrchestratorError>> + Send {
    futures::stream::once(async move {
        match waiter.wait().await {
            Ok(served) => {
                usage.served_by(&served.provider, &served.model, served.input_tokens, served.output_tokens);
                usage.succeed(0.0);
                Ok(served.content)
            }
            Err(e) => {
                settle_failure(usage, &e);
                Err(OrchestratorError::from_flight(e))
            }
        }
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use switchboard_core::{GenerationParams, ManualClock, Message};
    use switchboard_ledger::{UsageFilter, UsageOutcome};
    use switchboard_routing::HealthStatus;

    use super::*;
    use crate::provider::ProviderError;

    struct Fixed {
        id: &'static str,
        calls: AtomicU32,
    }

    impl Fixed {
        const fn new(id: &'static str) -> Self {
            Self {
                id,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        async fn invoke(
            &self,
            model: &str,
            _messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<Completion, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                content: format!("answer from {}/{model}", self.id),
                input_tokens: 1_000,
                output_tokens: 500,
            })
        }
    }

    const CONFIG: &str = r#"
[pricing]
markup_percent = 0.0

[pricing.models."openai/gpt-4o"]
input_per_mtok = 2.0
output_per_mtok = 10.0

[ledger]
retention = "1h"
"#;

    fn orchestrator(clock: Arc<ManualClock>) -> (Orchestrator, Arc<Fixed>) {
        let provider = Arc::new(Fixed::new("openai"));
        let orchestrator = Orchestrator::builder(Config::parse(CONFIG).unwrap())
            .shared_provider(provider.clone())
            .clock(clock)
            .build()
            .unwrap();
        (orchestrator, provider)
    }

    fn ask(caller: &str, prompt: &str) -> GenerateRequest {
        GenerateRequest::new(caller, "openai/gpt-4o", vec![Message::user(prompt)])
    }

    #[tokio::test]
    async fn generate_charges_the_caller() {
        let (orchestrator, provider) = orchestrator(Arc::new(ManualClock::default()));

        let response = orchestrator
            .generate(ask("alice", "Summarize the borrow checker rules"))
            .await
            .unwrap();
        assert_eq!(response.content, "answer from openai/gpt-4o");
        assert_eq!(response.model_used, "openai/gpt-4o");
        assert_eq!(response.token_usage.total_tokens, 1_500);
        assert!((response.cost_usd - 0.007).abs() < 1e-9);
        assert!(!response.cached && !response.from_dedup);
        assert_eq!(response.metadata.attempts, 1);
        assert_eq!(response.metadata.provider_status, HealthStatus::Healthy);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let rows = orchestrator.ledger().records(&UsageFilter::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, UsageOutcome::Success);
        assert_eq!(rows[0].qualified_model(), "openai/gpt-4o");
        assert!((rows[0].cost_usd - 0.007).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeat_requests_are_served_from_cache() {
        let (orchestrator, provider) = orchestrator(Arc::new(ManualClock::default()));

        orchestrator
            .generate(ask("alice", "Translate good morning into German"))
            .await
            .unwrap();
        let second = orchestrator
            .generate(ask("bob", "translate   GOOD morning into german"))
            .await
            .unwrap();

        assert!(second.cached);
        assert!(second.cost_usd.abs() < f64::EPSILON);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let summary = orchestrator.ledger().summary(&UsageFilter::default());
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.cached_hits, 1);
    }

    #[tokio::test]
    async fn unknown_models_are_not_found() {
        let (orchestrator, _) = orchestrator(Arc::new(ManualClock::default()));
        let error = orchestrator
            .generate(GenerateRequest::new("alice", "gpt-4o", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert_eq!(error.status_code().as_u16(), 404);
        assert!(orchestrator.ledger().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_work() {
        let (orchestrator, provider) = orchestrator(Arc::new(ManualClock::default()));
        let error = orchestrator
            .generate(GenerateRequest::new("alice", "openai/gpt-4o", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(error, OrchestratorError::InvalidRequest(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_provider_ids_are_rejected() {
        let error = Orchestrator::builder(Config::default())
            .provider(Fixed::new("openai"))
            .provider(Fixed::new("openai"))
            .build()
            .unwrap_err();
        assert!(matches!(error, OrchestratorError::Configuration(_)));
    }

    #[tokio::test]
    async fn health_report_lists_registered_providers() {
        let (orchestrator, _) = orchestrator(Arc::new(ManualClock::default()));
        let report = orchestrator.health_report().await;

        assert_eq!(report.summary.healthy, 1);
        assert_eq!(report.providers[0].provider_id, "openai");
        assert_eq!(report.cache.map(|c| c.total_keys), Some(0));
        assert_eq!(report.in_flight, InFlightStats::default());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["providers"][0]["status"], "healthy");
        assert_eq!(json["inFlight"]["buffered"], 0);
    }

    #[tokio::test]
    async fn batch_results_keep_request_order() {
        let (orchestrator, _) = orchestrator(Arc::new(ManualClock::default()));
        let results = orchestrator
            .generate_batch(
                vec![
                    ask("alice", "Name three sorting algorithms"),
                    GenerateRequest::new("alice", "nope", vec![Message::user("x")]),
                    ask("alice", "Name three graph algorithms"),
                ],
                2,
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn purge_drops_usage_past_retention() {
        let clock = Arc::new(ManualClock::default());
        let (orchestrator, _) = orchestrator(clock.clone());
        orchestrator
            .generate(ask("alice", "List the planets of the solar system"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(30 * 60));
        assert_eq!(orchestrator.purge_expired().usage_records, 0);

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(orchestrator.purge_expired().usage_records, 1);
        assert!(orchestrator.ledger().is_empty());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let (orchestrator, provider) = orchestrator(Arc::new(ManualClock::default()));
        orchestrator.shutdown();

        let error = orchestrator.generate(ask("alice", "hello there")).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        tokio::time::timeout(Duration::from_secs(1), orchestrator.run_maintenance(Duration::from_secs(60)))
            .await
            .unwrap();
    }
}
