//! Provider wire formats
//!
//! Each backend speaks its own JSON dialect. `AiProvider` maps the canonical
//! message list onto a request body and the response body back onto text and
//! token usage.

use serde::{Deserialize, Serialize};

use super::error::AiError;
use super::models::{AiModel, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Canonical result of one completion
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub trait AiProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn endpoint(&self) -> &str;

    fn requires_credential(&self) -> bool {
        self.kind().requires_credential()
    }

    fn build_body(
        &self,
        model: AiModel,
        messages: &[Message],
        params: RequestParams,
    ) -> Result<Vec<u8>, AiError>;

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, AiError>;
}

/// Provider for `kind`, with an optional endpoint override
pub fn provider_for(kind: ProviderKind, endpoint: Option<&str>) -> Box<dyn AiProvider> {
    let endpoint = endpoint.unwrap_or(kind.default_endpoint()).to_string();
    match kind {
        ProviderKind::ChatCompletions => Box::new(ChatCompletionsProvider { endpoint }),
        ProviderKind::LocalInference => Box::new(LocalInferenceProvider { endpoint }),
    }
}

fn invalid(e: serde_json::Error) -> AiError {
    AiError::InvalidResponse(e.to_string())
}

// ============================================================================
// Chat completions (bearer credential)
// ============================================================================

pub struct ChatCompletionsProvider {
    endpoint: String,
}

impl ChatCompletionsProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl AiProvider for ChatCompletionsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ChatCompletions
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body(
        &self,
        model: AiModel,
        messages: &[Message],
        params: RequestParams,
    ) -> Result<Vec<u8>, AiError> {
        let request = ChatCompletionsRequest {
            model: model.id(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };
        serde_json::to_vec(&request).map_err(|e| AiError::ApiError(e.to_string()))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, AiError> {
        let response: ChatCompletionsResponse = serde_json::from_slice(body).map_err(invalid)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::InvalidResponse("Response contained no choices".into()))?;

        Ok(ProviderResponse {
            text: choice.message.content,
            input_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}

// ============================================================================
// Local inference (no credential)
// ============================================================================

pub struct LocalInferenceProvider {
    endpoint: String,
}

impl LocalInferenceProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct LocalRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: LocalOptions,
}

#[derive(Serialize)]
struct LocalOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct LocalResponse {
    message: ResponseMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl AiProvider for LocalInferenceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalInference
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body(
        &self,
        model: AiModel,
        messages: &[Message],
        params: RequestParams,
    ) -> Result<Vec<u8>, AiError> {
        let request = LocalRequest {
            model: model.id(),
            messages,
            stream: false,
            options: LocalOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };
        serde_json::to_vec(&request).map_err(|e| AiError::ApiError(e.to_string()))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, AiError> {
        let response: LocalResponse = serde_json::from_slice(body).map_err(invalid)?;
        // Only completion tokens are reported
        Ok(ProviderResponse {
            text: response.message.content,
            input_tokens: None,
            output_tokens: response.eval_count,
        })
    }
}
