// LlmClient trait — a single prompt in, text plus token usage out.
//
// The analysis requester only needs this much, which keeps the Claude
// specifics in claude.rs and lets tests script responses.

use async_trait::async_trait;

use crate::error::ScanError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    /// Why generation stopped ("end_turn", "max_tokens", ...), if reported.
    pub stop_reason: Option<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one user prompt to `model` and return its text reply.
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion, ScanError>;
}
