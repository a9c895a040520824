//! Error types for the gemline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator (inference backend, messaging channel) has its
//! own error enum so the dispatcher can map failure kinds to fallbacks.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Message content {message_id} unavailable: {reason}")]
    ContentUnavailable { message_id: String, reason: String },

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn channel_error_displays_correctly() {
        let err = ChannelError::ContentUnavailable {
            message_id: "4711".into(),
            reason: "status 404".into(),
        };
        assert!(err.to_string().contains("4711"));
        assert!(err.to_string().contains("404"));
    }
}
