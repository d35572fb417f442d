pub mod credential;
pub mod errors;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;

pub use credential::{mask, DecryptedCredential};
pub use errors::{ErrorClass, ProviderError, ProviderResult};
pub use provider::{EmbeddingRequest, EmbeddingResponse, ModelInfo, Provider, ProviderConfig};
pub use registry::ProviderRegistry;
pub use request::{ChatMessage, ChatRole, NormalizedRequest, RequestBody, SamplingParams};
pub use response::{ChunkStream, FinishReason, NormalizedResponse, ProviderOutcome, StreamChunk, TokenUsage};
