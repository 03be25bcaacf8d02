//! Upstream model provider seam

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use http::StatusCode;
use switchboard_core::{GenerationParams, Message};
use thiserror::Error;

/// Stream of chunks produced by a provider
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, ProviderError>> + Send>>;

/// Finished completion from one provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One event of a streamed completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChunk {
    /// Next piece of generated text
    Delta(String),
    /// Token counts, usually sent once at the end
    Usage { input_tokens: u32, output_tokens: u32 },
}

/// Failure reported by a provider
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// Whether trying again, here or elsewhere, may succeed
    pub retryable: bool,
    /// Upstream HTTP status, when there was one
    pub status: Option<u16>,
}

impl ProviderError {
    /// Transient failure worth retrying
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            status: None,
        }
    }

    /// Failure that will repeat no matter where the request goes
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            status: None,
        }
    }

    /// Classify an upstream HTTP status
    ///
    /// Timeouts, throttling and server-side failures are retryable.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let retryable = matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504);
        Self {
            message: message.into(),
            retryable,
            status: Some(status.as_u16()),
        }
    }
}

/// Network transport to one LLM vendor
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id used in `provider/model` identifiers
    fn id(&self) -> &str;

    /// Run a completion to the end
    async fn invoke(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError>;

    /// Run a completion as a stream of chunks
    ///
    /// Providers without native streaming answer with one delta followed by
    /// the usage.
    async fn invoke_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        let completion = self.invoke(model, messages, params).await?;
        let chunks = vec![
            Ok(ProviderChunk::Delta(completion.content)),
            Ok(ProviderChunk::Usage {
                input_tokens: completion.input_tokens,
                output_tokens: completion.output_tokens,
            }),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
