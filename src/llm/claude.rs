// Claude client — Anthropic Messages API over reqwest.
//
// One POST per completion. Text blocks in the reply are concatenated; any
// other block types are ignored.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{Completion, LlmClient, Usage};
use crate::error::ScanError;
use crate::http::{build_client, send_with_retry};
use crate::rate_limit::ApiName;

/// Default Anthropic endpoint. Override with ANTHROPIC_API_URL for tests.
pub const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

const SERVICE: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Steers the model toward the JSON shape the response parser expects.
const SYSTEM_PROMPT: &str = "You are a venture analyst who evaluates open-source AI projects. \
     Reply with a single JSON object and nothing else.";

pub struct ClaudeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ClaudeClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion, ScanError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model,
            max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = model, prompt_chars = prompt.len(), "Claude request");

        let response = send_with_retry(SERVICE, ApiName::Claude, || {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
        })
        .await?;

        let status = response.status().as_u16();
        let raw = response.text().await?;
        let parsed: MessagesResponse =
            serde_json::from_str(&raw).map_err(|e| ScanError::Upstream {
                service: SERVICE.to_string(),
                status,
                body: format!("unexpected response body: {e}"),
            })?;

        Ok(parsed.into_completion())
    }
}

// -- Wire types --

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl MessagesResponse {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        Completion {
            text,
            usage: Usage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
            stop_reason: self.stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_joins_text_blocks() {
        let raw = r#"{
            "id": "msg_1",
            "type": "message",
            "content": [
                {"type": "text", "text": "{\"a\":"},
                {"type": "tool_use", "id": "x", "name": "n", "input": {}},
                {"type": "text", "text": " 1}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 120, "output_tokens": 45}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let completion = parsed.into_completion();
        assert_eq!(completion.text, "{\"a\": 1}");
        assert_eq!(completion.usage.input_tokens, 120);
        assert_eq!(completion.usage.output_tokens, 45);
        assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_request_serializes_messages_shape() {
        let body = MessagesRequest {
            model: "claude-test",
            max_tokens: 100,
            system: "sys",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 100);
    }
}
