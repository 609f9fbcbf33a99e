//! OpenAI-compatible wire format: request/response JSON shapes and the
//! HTTP call that turns an [`AgentOptions`] plus conversation history into
//! a streamed completion.
//!
//! This is the "excluded collaborator" of §1 made concrete: the core
//! agent loop never sees these types directly, only the [`Message`] /
//! [`ContentBlock`] vocabulary in [`crate::types`]. There is no
//! `tool_calls` field anywhere here — gadget invocations travel as plain
//! assistant text containing sentinel blocks, not structured function
//! calls, so the wire format needed is considerably smaller than a
//! typical OpenAI client's.

use crate::types::{AgentOptions, ContentBlock, Message, MessageRole};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One request message. Unlike the teacher's `OpenAIMessage`, there is no
/// `tool_calls` / `tool_call_id` pair — gadget results are folded into
/// plain user-role content by [`messages_to_openai`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Only sent when the stream should report token usage in its final
    /// chunk, which most OpenAI-compatible servers gate behind this flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    pub delta: OpenAIDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting for a completion. Usage reported by the provider at
/// end of stream is authoritative over any estimate the compaction
/// manager or budget tracker computed mid-stream (§4.6).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OpenAIUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    #[serde(default)]
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

/// Flatten a [`Message`]'s content blocks into the single string an
/// OpenAI-compatible chat endpoint expects per message. Assistant messages
/// are passed through as the raw text produced by the model (sentinels
/// included, per I3); user messages holding [`ContentBlock::GadgetResult`]
/// blocks are rendered as a compact JSON summary so the model sees its
/// gadget calls' outcomes on the next turn.
fn flatten_content(message: &Message) -> String {
    let mut parts = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(text) => parts.push(text.text.clone()),
            ContentBlock::Image(image) => parts.push(format!("[image: {}]", image.url())),
            ContentBlock::GadgetResult(result) => {
                let rendered = serde_json::json!({
                    "invocation_id": result.invocation_id,
                    "gadget": result.gadget_name,
                    "result": result.result,
                });
                parts.push(
                    serde_json::to_string(&rendered)
                        .unwrap_or_else(|_| "{\"error\":\"unserializable gadget result\"}".to_string()),
                );
            }
        }
    }
    parts.join("\n")
}

/// Convert base + history messages into the wire message list, in order.
/// `system_prompt` (base instructions, gadget grammar included) always
/// becomes the first message when non-empty.
pub fn messages_to_openai(system_prompt: &str, history: &[Message]) -> Vec<OpenAIMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        out.push(OpenAIMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
    }
    for message in history {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        out.push(OpenAIMessage {
            role: role.to_string(),
            content: flatten_content(message),
        });
    }
    out
}

/// Build the request body for one completion call.
pub fn build_request(options: &AgentOptions, system_prompt: &str, history: &[Message]) -> OpenAIRequest {
    OpenAIRequest {
        model: options.model().as_str().to_string(),
        messages: messages_to_openai(system_prompt, history),
        stream: true,
        max_tokens: options.max_tokens(),
        temperature: Some(options.temperature().value()),
        stream_options: Some(StreamOptions { include_usage: true }),
    }
}

/// Thin wrapper around a `reqwest::Client` scoped to one provider endpoint.
/// Holds nothing beyond what's needed to issue the completion call;
/// conversation state lives in `ConversationManager`, not here.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ProviderClient {
    pub fn new(options: &AgentOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout()))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            base_url: options.base_url().as_str().to_string(),
            api_key: options.api_key().to_string(),
        })
    }

    /// Issue the completion request and return the raw HTTP response for
    /// the caller to turn into an SSE stream. Kept separate from SSE
    /// parsing (in [`crate::stream`]) so this module stays pure wire
    /// format plus transport, with no dependency on the Block Parser.
    pub async fn stream_completion(&self, request: &OpenAIRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::api(format!("provider returned {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GadgetResultBlock;

    fn test_options() -> AgentOptions {
        AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_messages_to_openai_includes_system_prompt() {
        let history = vec![Message::user("hi")];
        let wire = messages_to_openai("be helpful", &history);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content, "be helpful");
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn test_messages_to_openai_skips_empty_system_prompt() {
        let history = vec![Message::user("hi")];
        let wire = messages_to_openai("", &history);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn test_flatten_content_renders_gadget_result_as_json() {
        let message = Message::gadget_results(vec![GadgetResultBlock::new(
            "gc_1",
            "Calc",
            serde_json::json!({"expr": "2+2"}),
            serde_json::json!("4"),
        )]);
        let rendered = flatten_content(&message);
        assert!(rendered.contains("gc_1"));
        assert!(rendered.contains("Calc"));
    }

    #[test]
    fn test_build_request_carries_options() {
        let options = test_options();
        let history = vec![Message::user("hi")];
        let request = build_request(&options, "sys", &history);
        assert_eq!(request.model, "test-model");
        assert!(request.stream);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.stream_options.unwrap().include_usage);
    }
}
