use crate::circuit_breaker::RequestOutcome;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TabError>;

/// Error taxonomy for the Tabcorp client.
///
/// The retry engine and circuit breaker both key their decisions off this
/// type: `is_retryable` drives backoff, `breaker_outcome` drives the failure
/// counters.
#[derive(Debug, Error)]
pub enum TabError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream server error (status {status}): {message}")]
    UpstreamServer { status: u16, message: String },

    #[error("rate limited by upstream: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("upstream rejected request (status {status}): {message}")]
    UpstreamClient { status: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("authentication expired, full re-authentication required: {0}")]
    AuthenticationExpired(String),

    #[error("circuit breaker '{name}' is open, retry in {retry_in:?}")]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TabError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

impl TabError {
    /// Classify an HTTP response that the transport delivered with an error
    /// status. 401 is fatal at the retry layer and handled by the
    /// orchestrator's forced-refresh path.
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = extract_error_message(body, status);
        match status {
            401 => TabError::AuthenticationFailed(message),
            429 => TabError::RateLimited {
                retry_after,
                message,
            },
            400..=499 => TabError::UpstreamClient { status, message },
            _ => TabError::UpstreamServer { status, message },
        }
    }

    /// Whether the retry engine may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TabError::Network(_)
                | TabError::Timeout
                | TabError::UpstreamServer { .. }
                | TabError::RateLimited { .. }
        )
    }

    /// Server-supplied delay hint (429 `Retry-After`), overriding the
    /// computed backoff delay when present.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            TabError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            TabError::UpstreamServer { status, .. } | TabError::UpstreamClient { status, .. } => {
                Some(*status)
            }
            TabError::AuthenticationFailed(_) => Some(401),
            TabError::RateLimited { .. } => Some(429),
            TabError::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// How this error counts against a circuit breaker. Transport-level and
    /// 5xx/429 failures indicate an unhealthy upstream; fatal client errors
    /// mean the upstream answered and are neutral.
    pub fn breaker_outcome(&self) -> RequestOutcome {
        match self {
            TabError::Network(_)
            | TabError::Timeout
            | TabError::UpstreamServer { .. }
            | TabError::RateLimited { .. }
            | TabError::RetriesExhausted { .. } => RequestOutcome::RetryableFailure,
            _ => RequestOutcome::FatalFailure,
        }
    }
}

impl From<reqwest::Error> for TabError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TabError::Timeout
        } else {
            TabError::Network(err.to_string())
        }
    }
}

/// Pull a human-readable message out of a Tabcorp error body. The API nests
/// messages under either `error.message` or `error_description` depending on
/// the endpoint; fall back to the raw body.
fn extract_error_message(body: &str, status: u16) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .pointer("/error/message")
            .or_else(|| value.get("error_description"))
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
        {
            return msg.to_string();
        }
    }
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            TabError::from_response(500, "", None),
            TabError::UpstreamServer { status: 500, .. }
        ));
        assert!(matches!(
            TabError::from_response(404, "", None),
            TabError::UpstreamClient { status: 404, .. }
        ));
        assert!(matches!(
            TabError::from_response(401, "", None),
            TabError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            TabError::from_response(429, "", Some(Duration::from_secs(2))),
            TabError::RateLimited {
                retry_after: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(TabError::Network("refused".to_string()).is_retryable());
        assert!(TabError::Timeout.is_retryable());
        assert!(TabError::from_response(503, "", None).is_retryable());
        assert!(TabError::from_response(429, "", None).is_retryable());
        assert!(!TabError::from_response(400, "", None).is_retryable());
        assert!(!TabError::from_response(401, "", None).is_retryable());
        assert!(!TabError::AuthenticationExpired("revoked".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint_only_on_rate_limit() {
        let limited = TabError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
            message: "quota exceeded".to_string(),
        };
        assert_eq!(limited.retry_after_hint(), Some(Duration::from_secs(7)));
        assert_eq!(TabError::Timeout.retry_after_hint(), None);
    }

    #[test]
    fn test_rate_limited_carries_message() {
        let body = r#"{"error":{"message":"request quota exceeded"}}"#;
        let err = TabError::from_response(429, body, Some(Duration::from_secs(5)));
        assert!(err.to_string().contains("request quota exceeded"));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"message":"meeting not found"}}"#;
        let err = TabError::from_response(404, body, None);
        assert!(err.to_string().contains("meeting not found"));

        let oauth_body = r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#;
        let err = TabError::from_response(400, oauth_body, None);
        assert!(err.to_string().contains("refresh token revoked"));
    }

    #[test]
    fn test_status_code_through_exhaustion_wrapper() {
        let inner = TabError::from_response(502, "", None);
        let wrapped = TabError::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert_eq!(wrapped.status_code(), Some(502));
        assert!(matches!(
            wrapped.breaker_outcome(),
            RequestOutcome::RetryableFailure
        ));
    }
}
