use crate::config::keychain::KeychainError;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("No AI credential configured")]
    NoCredential,

    #[error("Invalid response from AI service: {0}")]
    InvalidResponse(String),

    #[error("Rate limit exceeded, please wait {wait_secs} seconds")]
    LocalRateLimitExceeded { wait_secs: u64 },

    #[error("AI service rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Credential store error: {0}")]
    Secret(#[from] KeychainError),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(", retry after {} seconds", secs),
        None => String::new(),
    }
}

impl AiError {
    /// Errors worth retrying later without user action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::LocalRateLimitExceeded { .. }
                | AiError::RateLimitExceeded { .. }
                | AiError::NetworkError(_)
                | AiError::RequestTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            AiError::RateLimitExceeded {
                retry_after: Some(12)
            }
            .to_string(),
            "AI service rate limit exceeded, retry after 12 seconds"
        );
        assert_eq!(
            AiError::RateLimitExceeded { retry_after: None }.to_string(),
            "AI service rate limit exceeded"
        );
        assert!(AiError::RequestTimeout.is_transient());
        assert!(!AiError::NoCredential.is_transient());
    }
}
