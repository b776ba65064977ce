//! AI request orchestration
//!
//! ```text
//! send_request
//!   -> local window check (RateLimiter)
//!   -> credential (SecretStore) when the provider needs one
//!   -> provider body -> acquire -> one POST
//!   -> status mapping (429 / non-200) -> parse -> usage
//! ```
//!
//! A 429 puts the client into an externally-rate-limited state that clears
//! itself after the server's `Retry-After`. The local window is separate and
//! is never touched by it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::error::AiError;
use super::http::{HttpTransport, ReqwestTransport, TransportError};
use super::models::{AiModel, ProviderKind};
use super::provider::{provider_for, AiProvider, Message, RequestParams};
use super::rate_limit::{Admission, RateLimitError, RateLimitStatus, RateLimiter};
use crate::config::keychain::{KeychainError, SecretStore, AI_CREDENTIAL_ACCOUNT};
use crate::config::settings::AiSettings;
use crate::config::storage::{ai_usage_file, JsonFile};

/// Fallback pause after a 429 without `Retry-After`
pub const DEFAULT_EXTERNAL_BACKOFF: Duration = Duration::from_secs(60);

/// Accumulated usage, persisted after every update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    #[serde(default)]
    pub selected_model: AiModel,
    #[serde(default)]
    pub total_tokens_used: u64,
    #[serde(default, rename = "estimatedCostUSD")]
    pub estimated_cost_usd: f64,
}

pub struct AiClient {
    settings: AiSettings,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    usage: Mutex<UsageStats>,
    usage_file: Option<JsonFile<UsageStats>>,
    external_limit_until: Mutex<Option<Instant>>,
}

impl AiClient {
    pub fn new(
        settings: AiSettings,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, RateLimitError> {
        let limiter = RateLimiter::new(settings.window(), settings.max_requests_per_window)?;
        let usage = UsageStats {
            selected_model: settings.model,
            ..Default::default()
        };
        Ok(Self {
            settings,
            secrets,
            transport,
            limiter,
            usage: Mutex::new(usage),
            usage_file: None,
            external_limit_until: Mutex::new(None),
        })
    }

    /// Production client: reqwest transport, usage in the config dir
    pub fn open_default(
        settings: AiSettings,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, RateLimitError> {
        let client = Self::new(settings, secrets, Arc::new(ReqwestTransport::new()))?;
        match ai_usage_file() {
            Ok(path) => Ok(client.with_usage_file(JsonFile::new(path))),
            Err(e) => {
                warn!("AI usage will not be persisted: {}", e);
                Ok(client)
            }
        }
    }

    /// Load usage from `file` and write every update back to it
    pub fn with_usage_file(mut self, file: JsonFile<UsageStats>) -> Self {
        match file.load() {
            Ok(stats) => *self.usage.get_mut() = stats,
            Err(e) => warn!("Failed to load AI usage from {:?}: {}", file.path(), e),
        }
        self.usage_file = Some(file);
        self
    }

    pub fn model(&self) -> AiModel {
        self.usage.lock().selected_model
    }

    pub fn set_model(&self, model: AiModel) {
        let snapshot = {
            let mut usage = self.usage.lock();
            usage.selected_model = model;
            usage.clone()
        };
        info!("AI model set to {}", model.id());
        self.persist(&snapshot);
    }

    fn provider(&self, kind: ProviderKind) -> Box<dyn AiProvider> {
        let endpoint = match kind {
            ProviderKind::ChatCompletions => self.settings.chat_completions_endpoint.as_deref(),
            ProviderKind::LocalInference => self.settings.local_inference_endpoint.as_deref(),
        };
        provider_for(kind, endpoint)
    }

    // ========================================================================
    // Credential
    // ========================================================================

    pub fn set_credential(&self, credential: &str) -> Result<(), AiError> {
        self.secrets.save(AI_CREDENTIAL_ACCOUNT, credential)?;
        info!("AI credential stored");
        Ok(())
    }

    pub fn remove_credential(&self) -> Result<(), AiError> {
        self.secrets.delete(AI_CREDENTIAL_ACCOUNT)?;
        info!("AI credential removed");
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        self.secrets
            .exists(AI_CREDENTIAL_ACCOUNT)
            .unwrap_or_else(|e| {
                warn!("Failed to query AI credential: {}", e);
                false
            })
    }

    /// True when a request could be sent with the selected model
    pub fn is_enabled(&self) -> bool {
        !self.model().provider().requires_credential() || self.has_credential()
    }

    fn credential(&self) -> Result<Zeroizing<String>, AiError> {
        match self.secrets.retrieve(AI_CREDENTIAL_ACCOUNT) {
            Ok(secret) => Ok(secret),
            Err(KeychainError::NotFound(_)) => Err(AiError::NoCredential),
            Err(e) => Err(AiError::Secret(e)),
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub async fn send_request(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, AiError> {
        if let Admission::Rejected { retry_after_secs } = self.limiter.try_admit() {
            debug!("AI request rejected locally, retry in {}s", retry_after_secs);
            return Err(AiError::LocalRateLimitExceeded {
                wait_secs: retry_after_secs,
            });
        }

        let model = self.model();
        let provider = self.provider(model.provider());
        let credential = if provider.requires_credential() {
            Some(self.credential()?)
        } else {
            None
        };

        let body = provider.build_body(
            model,
            messages,
            RequestParams {
                max_tokens,
                temperature,
            },
        )?;

        // Another caller may have taken the last slot since try_admit
        if let Admission::Rejected { retry_after_secs } = self.limiter.acquire() {
            return Err(AiError::LocalRateLimitExceeded {
                wait_secs: retry_after_secs,
            });
        }

        debug!(
            "Sending AI request to {} ({} messages, model {})",
            provider.endpoint(),
            messages.len(),
            model.id()
        );

        let response = self
            .transport
            .post_json(
                provider.endpoint(),
                credential.as_ref().map(|c| c.as_str()),
                body,
                self.settings.request_timeout(),
            )
            .await
            .map_err(|e| match e {
                TransportError::Timeout => AiError::RequestTimeout,
                TransportError::Network(msg) => AiError::NetworkError(msg),
            })?;

        match response.status {
            200 => {}
            429 => {
                self.enter_external_limit(response.retry_after);
                return Err(AiError::RateLimitExceeded {
                    retry_after: response.retry_after,
                });
            }
            status => {
                let text = String::from_utf8_lossy(&response.body).into_owned();
                warn!("AI service returned HTTP {}", status);
                return Err(AiError::ApiError(text));
            }
        }

        let parsed = provider.parse_response(&response.body)?;
        self.record_usage(
            model,
            parsed.input_tokens.unwrap_or(0),
            parsed.output_tokens.unwrap_or(0),
        );
        Ok(parsed.text)
    }

    // ========================================================================
    // External rate limit
    // ========================================================================

    fn enter_external_limit(&self, retry_after: Option<u64>) {
        let backoff = retry_after
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXTERNAL_BACKOFF);
        *self.external_limit_until.lock() = Some(Instant::now() + backoff);
        warn!(
            "AI service rate limited this client for {}s",
            backoff.as_secs()
        );
    }

    /// True while a server-side 429 is in effect; clears itself on expiry
    pub fn is_externally_rate_limited(&self) -> bool {
        let mut until = self.external_limit_until.lock();
        match *until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *until = None;
                info!("AI service rate limit cleared");
                false
            }
            None => false,
        }
    }

    // ========================================================================
    // Usage
    // ========================================================================

    fn record_usage(&self, model: AiModel, input_tokens: u64, output_tokens: u64) {
        let snapshot = {
            let mut usage = self.usage.lock();
            usage.total_tokens_used += input_tokens + output_tokens;
            usage.estimated_cost_usd += model.cost(input_tokens, output_tokens);
            usage.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, stats: &UsageStats) {
        if let Some(file) = &self.usage_file {
            if let Err(e) = file.save(stats) {
                warn!("Failed to save AI usage: {}", e);
            }
        }
    }

    pub fn usage(&self) -> UsageStats {
        self.usage.lock().clone()
    }

    /// Zero the counters, keeping the selected model
    pub fn reset_usage(&self) {
        let snapshot = {
            let mut usage = self.usage.lock();
            usage.total_tokens_used = 0;
            usage.estimated_cost_usd = 0.0;
            usage.clone()
        };
        self.persist(&snapshot);
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }
}
