//! AI assistant: rate-limited requests to chat-completions or local backends

pub mod assistant;
pub mod client;
mod error;
pub mod http;
pub mod models;
pub mod provider;
pub mod rate_limit;

pub use assistant::{
    quick_command, Assistant, ChatMessage, CommandContext, CommandSuggestion, ErrorExplanation,
};
pub use client::{AiClient, UsageStats, DEFAULT_EXTERNAL_BACKOFF};
pub use error::AiError;
pub use http::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use models::{AiModel, ProviderKind, CHAT_COMPLETIONS_ENDPOINT, LOCAL_INFERENCE_ENDPOINT};
pub use provider::{
    provider_for, AiProvider, ChatCompletionsProvider, LocalInferenceProvider, Message,
    ProviderResponse, RequestParams, Role,
};
pub use rate_limit::{Admission, RateLimitError, RateLimitStatus, RateLimiter};
