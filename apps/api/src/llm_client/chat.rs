//! Single-shot chat completions protocol.
//!
//! `POST {base}/chat/completions` with a `json_schema` response format.
//! The full document arrives in `choices[0].message.content`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::consultation::schema::SchemaDescriptor;
use crate::llm_client::{
    body_stream, error_for_status, Generation, GenerationRequest, GenerationTransport, LlmError,
};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: &'a SchemaDescriptor,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Clone)]
pub struct ChatTransport {
    client: Client,
    base_url: String,
    api_key: String,
    temperature: f32,
}

impl ChatTransport {
    pub fn new(client: Client, base_url: String, api_key: String, temperature: f32) -> Self {
        Self {
            client,
            base_url,
            api_key,
            temperature,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn build_body(request: &GenerationRequest, temperature: f32) -> ChatRequest<'_> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: &request.system,
    }];
    messages.extend(request.user_turns.iter().map(|turn| ChatMessage {
        role: "user",
        content: turn,
    }));
    ChatRequest {
        model: &request.model,
        messages,
        response_format: ResponseFormat {
            format_type: "json_schema",
            json_schema: &request.schema,
        },
        temperature,
        stream: request.stream,
    }
}

#[async_trait]
impl GenerationTransport for ChatTransport {
    async fn send(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let body = build_body(request, self.temperature);
        trace!(target: "llm", body = ?body, "chat request");

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

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = &parsed.usage {
            debug!(
                "Chat call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(LlmError::EmptyContent)?;

        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(LlmError::Refused(refusal));
        }

        message
            .content
            .filter(|c| !c.trim().is_empty())
            .map(Generation::Complete)
            .ok_or(LlmError::EmptyContent)
    }
}
