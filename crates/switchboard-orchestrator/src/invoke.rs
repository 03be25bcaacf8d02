//! Attempt loop shared by buffered and streamed requests
//!
//! Candidates come from the fallback router. Each one gets its retry budget
//! with backoff; every attempt is reported to the health tracker, and a
//! provider that goes down stops being retried.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use switchboard_core::{GenerationParams, Message};
use switchboard_dedup::Publisher;
use switchboard_routing::Candidate;

use crate::orchestrator::Inner;
use crate::provider::{Completion, Provider, ProviderChunk, ProviderError};
use crate::types::Served;
use crate::{GenerateRequest, OrchestratorError};

/// Why one attempt failed
pub(crate) enum AttemptError {
    /// Counts against the candidate; retrying or failing over is allowed
    Failed(ProviderError),
    /// Output already reached callers, so nothing else may be tried
    Interrupted(ProviderError),
}

/// Successful attempt and how it was reached
pub(crate) struct Attempted<T> {
    pub value: T,
    pub candidate: Candidate,
    pub attempts: u32,
    pub fallback_used: bool,
}

impl Inner {
    pub(crate) async fn run_attempts<T, F, Fut>(
        &self,
        request: &GenerateRequest,
        mut call: F,
    ) -> Result<Attempted<T>, OrchestratorError>
    where
        F: FnMut(Arc<dyn Provider>, Candidate) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let primary = self.router.resolve(&request.model)?;
        let candidates = self.router.route(&request.model, request.enable_fallback)?;

        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        let mut previous: Option<&Candidate> = None;

        for candidate in &candidates {
            let Some(provider) = self.providers.get(&candidate.provider).cloned() else {
                tracing::warn!(provider = %candidate.provider, "no provider registered under this id, skipping");
                last_error = Some(format!("provider '{}' is not registered", candidate.provider));
                continue;
            };

            if let Some(from) = previous {
                self.metrics.failover(&from.provider, &candidate.provider);
                tracing::warn!(from = %from, to = %candidate, "failing over to next candidate");
            }
            previous = Some(candidate);

            let policy = self.retries.for_provider(&candidate.provider);
            for retry in 0..policy.max_attempts() {
                if retry > 0 {
                    if self.health.is_down(&candidate.provider) {
                        tracing::debug!(provider = %candidate.provider, "provider is down, not retrying");
                        break;
                    }
                    let delay = policy.delay_for_attempt(retry - 1);
                    tracing::debug!(
                        provider = %candidate.provider,
                        attempt = retry + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }

                attempts += 1;
                match call(Arc::clone(&provider), candidate.clone()).await {
                    Ok(value) => {
                        self.health.record_success(&candidate.provider);
                        self.metrics.attempt(&candidate.provider, true);
                        return Ok(Attempted {
                            value,
                            fallback_used: *candidate != primary,
                            candidate: candidate.clone(),
                            attempts,
                        });
                    }
                    Err(AttemptError::Interrupted(e)) => {
                        self.health.record_error(&candidate.provider, &e.message);
                        self.metrics.attempt(&candidate.provider, false);
                        tracing::warn!(provider = %candidate.provider, error = %e, "stream failed after output started");
                        return Err(OrchestratorError::Provider {
                            provider: candidate.provider.clone(),
                            message: e.message,
                            retryable: e.retryable,
                        });
                    }
                    Err(AttemptError::Failed(e)) => {
                        let status = self.health.record_error(&candidate.provider, &e.message);
                        self.metrics.attempt(&candidate.provider, false);
                        tracing::warn!(
                            provider = %candidate.provider,
                            model = %candidate.model,
                            attempt = retry + 1,
                            status = %status,
                            retryable = e.retryable,
                            error = %e,
                            "provider attempt failed"
                        );

                        if !e.retryable {
                            return Err(OrchestratorError::Provider {
                                provider: candidate.provider.clone(),
                                message: e.message,
                                retryable: false,
                            });
                        }
                        last_error = Some(e.message);
                    }
                }
            }
        }

        Err(OrchestratorError::AllProvidersExhausted {
            attempts,
            last_error: last_error.unwrap_or_else(|| "no provider available".to_owned()),
        })
    }
}

/// One buffered provider call
pub(crate) async fn buffered_attempt(
    provider: Arc<dyn Provider>,
    candidate: Candidate,
    messages: &[Message],
    params: GenerationParams,
) -> Result<Completion, AttemptError> {
    provider
        .invoke(&candidate.model, messages, &params)
        .await
        .map_err(AttemptError::Failed)
}

/// One streamed provider call, forwarding text to subscribers as it arrives
pub(crate) async fn streamed_attempt(
    provider: Arc<dyn Provider>,
    candidate: Candidate,
    messages: &[Message],
    params: GenerationParams,
    publisher: &Publisher<Served, String, OrchestratorError>,
) -> Result<Completion, AttemptError> {
    let mut stream = provider
        .invoke_stream(&candidate.model, messages, &params)
        .await
        .map_err(AttemptError::Failed)?;

    let mut completion = Completion {
        content: String::new(),
        input_tokens: 0,
        output_tokens: 0,
    };
    let mut started = false;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(ProviderChunk::Delta(text)) => {
                if text.is_empty() {
                    continue;
                }
                started = true;
                completion.content.push_str(&text);
                publisher.push(text);
            }
            Ok(ProviderChunk::Usage {
                input_tokens,
                output_tokens,
            }) => {
                completion.input_tokens = input_tokens;
                completion.output_tokens = output_tokens;
            }
            Err(e) if started => return Err(AttemptError::Interrupted(e)),
            Err(e) => return Err(AttemptError::Failed(e)),
        }
    }

    Ok(completion)
}
