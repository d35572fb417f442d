use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
}

/// A single materialized response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    pub upstream_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamChunk {
    Delta { content: String },
    Done {
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    },
}

/// A lazily-produced sequence of chunks. Pulled one at a time so that a
/// client disconnect can cancel the producer without buffering the whole
/// response.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Option<Result<StreamChunk, crate::errors::ProviderError>>;
}

pub enum ProviderOutcome {
    Response(NormalizedResponse),
    Stream(Box<dyn ChunkStream>),
}
