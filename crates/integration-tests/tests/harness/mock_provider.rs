//! Scriptable in-process provider for integration tests
//!
//! Counts every call and can fail, stall, or stream in pieces on demand.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use switchboard_core::{GenerationParams, Message};
use switchboard_orchestrator::{Completion, Provider, ProviderChunk, ProviderError, ProviderStream};

pub const INPUT_TOKENS: u32 = 1_000;
pub const OUTPUT_TOKENS: u32 = 500;

/// Mock provider with predictable replies
pub struct MockProvider {
    id: String,
    reply: Option<String>,
    chunks: Vec<String>,
    delay: Duration,
    /// Calls left to fail before succeeding
    fail_remaining: AtomicU32,
    always_fail: bool,
    fatal: bool,
    fail_mid_stream: bool,
    calls: AtomicU32,
    streams_aborted: Arc<AtomicU32>,
}

impl MockProvider {
    /// Provider that answers `reply from <id>/<model>` immediately
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            reply: None,
            chunks: Vec::new(),
            delay: Duration::ZERO,
            fail_remaining: AtomicU32::new(0),
            always_fail: false,
            fatal: false,
            fail_mid_stream: false,
            calls: AtomicU32::new(0),
            streams_aborted: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fixed reply content
    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_owned());
        self
    }

    /// Streamed replies arrive in these pieces
    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|chunk| (*chunk).to_owned()).collect();
        self
    }

    /// Wait this long before answering, and before every streamed piece
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `n` calls with a retryable error
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every call with a retryable error
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Failures are not retryable
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Streams break right after their first piece
    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Calls received, buffered and streamed
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Streams dropped before they were read to the end
    pub fn streams_aborted(&self) -> u32 {
        self.streams_aborted.load(Ordering::SeqCst)
    }

    fn content(&self, model: &str) -> String {
        match (&self.reply, self.chunks.is_empty()) {
            (Some(reply), _) => reply.clone(),
            (None, false) => self.chunks.concat(),
            (None, true) => format!("reply from {}/{model}", self.id),
        }
    }

    fn begin_call(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scheduled = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if self.always_fail || scheduled {
            let message = format!("{} returned 503", self.id);
            return Err(if self.fatal {
                ProviderError::fatal(message)
            } else {
                ProviderError::retryable(message)
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        model: &str,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<Completion, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.begin_call()?;

        Ok(Completion {
            content: self.content(model),
            input_tokens: INPUT_TOKENS,
            output_tokens: OUTPUT_TOKENS,
        })
    }

    async fn invoke_stream(
        &self,
        model: &str,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        self.begin_call()?;

        let pieces = if self.chunks.is_empty() {
            vec![self.content(model)]
        } else {
            self.chunks.clone()
        };

        let mut items = VecDeque::new();
        for (index, piece) in pieces.into_iter().enumerate() {
            items.push_back(Ok(ProviderChunk::Delta(piece)));
            if self.fail_mid_stream && index == 0 {
                items.push_back(Err(ProviderError::retryable("connection reset mid-stream")));
                break;
            }
        }
        items.push_back(Ok(ProviderChunk::Usage {
            input_tokens: INPUT_TOKENS,
            output_tokens: OUTPUT_TOKENS,
        }));

        let state = StreamState {
            items,
            delay: self.delay,
            guard: AbortGuard {
                counter: Arc::clone(&self.streams_aborted),
                finished: false,
            },
        };

        Ok(Box::pin(futures::stream::unfold(state, |mut state| async move {
            let Some(item) = state.items.pop_front() else {
                state.guard.finished = true;
                return None;
            };
            if matches!(item, Ok(ProviderChunk::Delta(_))) && !state.delay.is_zero() {
                tokio::time::sleep(state.delay).await;
            }
            Some((item, state))
        })))
    }
}

struct StreamState {
    items: VecDeque<Result<ProviderChunk, ProviderError>>,
    delay: Duration,
    guard: AbortGuard,
}

/// Counts streams dropped before their end
struct AbortGuard {
    counter: Arc<AtomicU32>,
    finished: bool,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}
