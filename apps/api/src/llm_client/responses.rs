//! Turn-based structured responses protocol.
//!
//! `POST {base}/responses` with `input` turns and a `text.format` schema.
//! Supports `stream: true`, in which case the body is an event stream that
//! `stream::StreamAssembler` consumes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::consultation::schema::SchemaDescriptor;
use crate::llm_client::{
    body_stream, error_for_status, Generation, GenerationRequest, GenerationTransport, LlmError,
    ReasoningEffort,
};

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputTurn<'a>>,
    text: TextOptions<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Reasoning>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct InputTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TextOptions<'a> {
    format: TextFormat<'a>,
}

#[derive(Debug, Serialize)]
struct TextFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    #[serde(flatten)]
    schema: &'a SchemaDescriptor,
}

#[derive(Debug, Serialize)]
struct Reasoning {
    effort: ReasoningEffort,
}

#[derive(Clone)]
pub struct ResponsesTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ResponsesTransport {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn url(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }
}

fn build_body(request: &GenerationRequest) -> ResponsesRequest<'_> {
    let mut input = vec![InputTurn {
        role: "system",
        content: &request.system,
    }];
    input.extend(request.user_turns.iter().map(|turn| InputTurn {
        role: "user",
        content: turn,
    }));
    ResponsesRequest {
        model: &request.model,
        input,
        text: TextOptions {
            format: TextFormat {
                format_type: "json_schema",
                schema: &request.schema,
            },
        },
        reasoning: request
            .reasoning_effort
            .map(|effort| Reasoning { effort }),
        stream: request.stream,
    }
}

/// Extracts the generated text from a response object: the `output_text`
/// convenience field when present, otherwise every `output_text` content part.
pub fn extract_output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let text: String = response
        .get("output")?
        .as_array()?
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl GenerationTransport for ResponsesTransport {
    async fn send(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let body = build_body(request);
        trace!(target: "llm", body = ?body, "responses request");

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, text));
        }

        if request.stream {
            return Ok(Generation::Stream(body_stream(response)));
        }

        let parsed: Value = response.json().await?;
        if let Some(usage) = parsed.get("usage") {
            debug!(
                "Responses call succeeded: input_tokens={}, output_tokens={}",
                usage["input_tokens"], usage["output_tokens"]
            );
        }

        extract_output_text(&parsed)
            .filter(|t| !t.trim().is_empty())
            .map(Generation::Complete)
            .ok_or(LlmError::EmptyContent)
    }
}
