//! LLM Client — the single point of entry for all Generation Service calls.
//!
//! ARCHITECTURAL RULE: No other module may call the generation API directly.
//! All LLM interactions MUST go through `GenerationInvoker`.
//!
//! The wire protocol is picked from the model identifier once per call
//! (`Protocol::for_model`); callers never branch on it.
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::consultation::schema::SchemaDescriptor;
use crate::retry::{RetryError, RetryPolicy, Transient};

pub mod chat;
pub mod responses;
pub mod stream;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation service rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Generation service error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Generation service unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model refused the request: {0}")]
    Refused(String),

    #[error("Generation failed mid-stream: {0}")]
    StreamFailed(String),
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Server { .. } | LlmError::Timeout(_) => true,
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Maps a non-success HTTP status to `Rejected` (4xx) or `Server` (5xx).
pub(crate) fn error_for_status(status: StatusCode, body: String) -> LlmError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    if status.is_server_error() {
        LlmError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        LlmError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Request / response model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!("unknown reasoning effort '{other}'")),
        }
    }
}

/// One logical generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub user_turns: Vec<String>,
    pub schema: SchemaDescriptor,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub stream: bool,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// What a successful call yields: the whole document text, or the raw event stream.
pub enum Generation {
    Complete(String),
    Stream(ByteStream),
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Complete(text) => write!(f, "Complete({} bytes)", text.len()),
            Generation::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// The two wire protocols of the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Single-shot chat completions.
    Chat,
    /// Turn-based structured responses, streamable.
    Responses,
}

impl Protocol {
    const RESPONSES_PREFIXES: [&'static str; 4] = ["gpt-5", "o1", "o3", "o4"];

    pub fn for_model(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        if Self::RESPONSES_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
        {
            Protocol::Responses
        } else {
            Protocol::Chat
        }
    }
}

/// One wire protocol. Non-streaming sends must read the whole body before returning.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn send(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;
}

/// Wraps a response body into a `ByteStream`, mapping mid-body failures.
pub(crate) fn body_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::StreamInterrupted(e.to_string()))),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Invoker
// ────────────────────────────────────────────────────────────────────────────

/// Sends generation calls through the right transport with timeout and retry.
#[derive(Clone)]
pub struct GenerationInvoker {
    chat: Arc<dyn GenerationTransport>,
    responses: Arc<dyn GenerationTransport>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GenerationInvoker {
    pub fn new(
        chat: Arc<dyn GenerationTransport>,
        responses: Arc<dyn GenerationTransport>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            chat,
            responses,
            retry,
            timeout,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, LlmError> {
        // No client-level timeout: streaming reads are bounded by the invoker deadline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        let chat = chat::ChatTransport::new(
            client.clone(),
            config.api_url.clone(),
            config.api_key.clone(),
            config.temperature,
        );
        let responses = responses::ResponsesTransport::new(
            client,
            config.api_url.clone(),
            config.api_key.clone(),
        );
        Ok(Self::new(
            Arc::new(chat),
            Arc::new(responses),
            config.retry,
            config.timeout,
        ))
    }

    fn transport(&self, protocol: Protocol) -> &dyn GenerationTransport {
        match protocol {
            Protocol::Chat => self.chat.as_ref(),
            Protocol::Responses => self.responses.as_ref(),
        }
    }

    /// Sends `request`, retrying transient failures (5xx, timeouts, connection
    /// errors) with linear backoff. Each attempt is bounded by the configured
    /// timeout; for streams the same deadline keeps bounding every read.
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let protocol = Protocol::for_model(&request.model);
        let transport = self.transport(protocol);
        let limit = self.timeout;
        debug!(
            "Generation call: model={} protocol={:?} stream={}",
            request.model, protocol, request.stream
        );

        let outcome = self
            .retry
            .run("Generation call", |_attempt| async move {
                let deadline = Instant::now() + limit;
                match tokio::time::timeout_at(deadline, transport.send(request)).await {
                    Ok(Ok(Generation::Stream(body))) => {
                        Ok(Generation::Stream(with_deadline(body, deadline, limit)))
                    }
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(limit)),
                }
            })
            .await;

        outcome.map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => LlmError::UpstreamUnavailable {
                attempts,
                message: last.to_string(),
            },
            RetryError::Fatal { error, .. } => error,
        })
    }
}

/// Ends `body` with a `Timeout` item once `deadline` passes.
fn with_deadline(mut body: ByteStream, deadline: Instant, limit: Duration) -> ByteStream {
    Box::pin(async_stream::stream! {
        loop {
            match tokio::time::timeout_at(deadline, body.next()).await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(_) => {
                    yield Err(LlmError::Timeout(limit));
                    break;
                }
            }
        }
    })
}

/// Parses document text, tolerating markdown fences around the JSON.
pub fn parse_document(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(strip_json_fences(text))
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
