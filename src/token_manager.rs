use crate::circuit_breaker::{CircuitBreaker, RequestOutcome};
use crate::config::TabConfig;
use crate::dto::{TokenInfo, TokenResponse};
use crate::error::{Result, TabError};
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpTransport, Method, RequestBody};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const OAUTH_TOKEN_PATH: &str = "/oauth/token";

/// One credential set, scoped to a session. Tokens are never shared across
/// distinct credential sets.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Seed refresh token carried over from a previous session.
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn from_config(config: &TabConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            refresh_token: config.refresh_token.clone(),
        }
    }

    /// Identity used to key token state: client_id plus account, never the
    /// secrets themselves.
    pub fn identity(&self) -> String {
        match &self.username {
            Some(username) => format!("{}/{}", self.client_id, username),
            None => self.client_id.clone(),
        }
    }
}

/// Token state owned exclusively by the manager.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub obtained_at: Instant,
    pub obtained_at_utc: chrono::DateTime<chrono::Utc>,
    pub expires_at: Instant,
}

impl TokenState {
    fn from_response(response: TokenResponse) -> Self {
        let now = Instant::now();
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            scope: response.scope,
            obtained_at: now,
            obtained_at_utc: chrono::Utc::now(),
            expires_at: now + Duration::from_secs(response.expires_in),
        }
    }

    /// Fresh means the token outlives `now + buffer`, so a caller always has
    /// at least the buffer's worth of validity left.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        Instant::now() + buffer < self.expires_at
    }
}

#[derive(Debug, Default)]
struct SlotState {
    token: Option<TokenState>,
    /// Set once the seed refresh token from the credentials has been
    /// rejected, so we stop resubmitting a known-dead token.
    seed_refresh_rejected: bool,
}

struct TokenSlot {
    state: Mutex<SlotState>,
    /// Held across a refresh; waiters queue here and re-check freshness on
    /// wake, which makes the refresh single-flight.
    refresh_lock: Mutex<()>,
}

impl TokenSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            refresh_lock: Mutex::new(()),
        }
    }
}

/// Owns OAuth token state per credential set and coordinates refreshes.
///
/// Fast path returns a cached token without touching the network. A stale
/// token triggers a single-flight refresh through the retry engine, guarded
/// by the oauth circuit breaker.
pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    refresh_buffer: Duration,
    request_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<TokenSlot>>>,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        refresh_buffer: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), OAUTH_TOKEN_PATH),
            retry,
            breaker,
            refresh_buffer,
            request_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return a valid access token, refreshing or authenticating if needed.
    pub async fn get_valid_token(&self, credentials: &Credentials) -> Result<String> {
        let slot = self.slot(credentials).await;

        if let Some(token) = self.fresh_token(&slot).await {
            return Ok(token);
        }

        let _guard = slot.refresh_lock.lock().await;

        // A concurrent caller may have refreshed while we queued
        if let Some(token) = self.fresh_token(&slot).await {
            debug!(
                "Token for '{}' refreshed by concurrent caller",
                credentials.identity()
            );
            return Ok(token);
        }

        self.refresh_locked(credentials, &slot).await
    }

    /// Refresh regardless of remaining validity. Used by the orchestrator
    /// after a 401, where the held token is known bad despite looking fresh.
    pub async fn force_refresh(&self, credentials: &Credentials) -> Result<String> {
        let slot = self.slot(credentials).await;
        let _guard = slot.refresh_lock.lock().await;
        info!("Forcing token refresh for '{}'", credentials.identity());
        self.refresh_locked(credentials, &slot).await
    }

    /// Full re-authentication from the raw credentials, discarding any held
    /// refresh token. Recovery path after `AuthenticationExpired`.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<String> {
        let slot = self.slot(credentials).await;
        let _guard = slot.refresh_lock.lock().await;
        let state = self.acquire_token(credentials, None).await?;
        let token = state.access_token.clone();
        slot.state.lock().await.token = Some(state);
        Ok(token)
    }

    /// Non-secret view of the held token for this credential set.
    pub async fn token_info(&self, credentials: &Credentials) -> Option<TokenInfo> {
        let slot = self.slot(credentials).await;
        let state = slot.state.lock().await;
        state.token.as_ref().map(|token| TokenInfo {
            scope: token.scope.clone(),
            obtained_at: token.obtained_at_utc,
            expires_in_secs: token
                .expires_at
                .saturating_duration_since(Instant::now())
                .as_secs(),
            has_refresh_token: token.refresh_token.is_some(),
        })
    }

    /// Must be called with the slot's refresh lock held.
    async fn refresh_locked(
        &self,
        credentials: &Credentials,
        slot: &Arc<TokenSlot>,
    ) -> Result<String> {
        let refresh_token = {
            let state = slot.state.lock().await;
            state
                .token
                .as_ref()
                .and_then(|t| t.refresh_token.clone())
                .or_else(|| {
                    if state.seed_refresh_rejected {
                        None
                    } else {
                        credentials.refresh_token.clone()
                    }
                })
        };
        let was_refresh = refresh_token.is_some();

        match self.acquire_token(credentials, refresh_token).await {
            Ok(new_state) => {
                let token = new_state.access_token.clone();
                slot.state.lock().await.token = Some(new_state);
                Ok(token)
            }
            Err(err) => {
                if was_refresh && matches!(err, TabError::AuthenticationExpired(_)) {
                    // Drop the dead refresh token so a later call falls back
                    // to the initial authentication flow
                    let mut state = slot.state.lock().await;
                    state.token = None;
                    state.seed_refresh_rejected = true;
                }
                Err(err)
            }
        }
    }

    /// Acquire a token via the appropriate grant: refresh_token when one is
    /// held, otherwise password grant when account credentials exist,
    /// otherwise client_credentials.
    async fn acquire_token(
        &self,
        credentials: &Credentials,
        refresh_token: Option<String>,
    ) -> Result<TokenState> {
        if let Some(refresh_token) = refresh_token {
            debug!("Refreshing access token for '{}'", credentials.identity());
            let form = vec![
                ("grant_type".to_string(), "refresh_token".to_string()),
                ("client_id".to_string(), credentials.client_id.clone()),
                ("client_secret".to_string(), credentials.client_secret.clone()),
                ("refresh_token".to_string(), refresh_token),
            ];
            return match self.request_token(form).await {
                Ok(response) => Ok(TokenState::from_response(response)),
                // The token endpoint answered and rejected the refresh token;
                // transient failures keep their class and stay retryable later
                Err(
                    TabError::UpstreamClient { message, .. }
                    | TabError::AuthenticationFailed(message),
                ) => {
                    warn!(
                        "Refresh token rejected for '{}': {}",
                        credentials.identity(),
                        message
                    );
                    Err(TabError::AuthenticationExpired(message))
                }
                Err(err) => Err(err),
            };
        }

        let form = match (&credentials.username, &credentials.password) {
            (Some(username), Some(password)) => {
                info!(
                    "Authenticating '{}' via password grant",
                    credentials.identity()
                );
                vec![
                    ("grant_type".to_string(), "password".to_string()),
                    ("client_id".to_string(), credentials.client_id.clone()),
                    ("client_secret".to_string(), credentials.client_secret.clone()),
                    ("username".to_string(), username.clone()),
                    ("password".to_string(), password.clone()),
                ]
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(TabError::Config(
                    "password grant requires both username and password".to_string(),
                ));
            }
            (None, None) => {
                info!(
                    "Authenticating '{}' via client_credentials grant",
                    credentials.identity()
                );
                vec![
                    ("grant_type".to_string(), "client_credentials".to_string()),
                    ("client_id".to_string(), credentials.client_id.clone()),
                    ("client_secret".to_string(), credentials.client_secret.clone()),
                ]
            }
        };

        let response = self.request_token(form).await?;
        Ok(TokenState::from_response(response))
    }

    /// POST to the token endpoint through the retry engine, guarded by the
    /// oauth circuit breaker.
    async fn request_token(&self, form: Vec<(String, String)>) -> Result<TokenResponse> {
        let permit = self.breaker.acquire().await?;

        let result = self
            .retry
            .execute(|| {
                let form = form.clone();
                async move {
                    let request = HttpRequest {
                        method: Method::Post,
                        url: self.token_url.clone(),
                        params: Vec::new(),
                        headers: Vec::new(),
                        body: Some(RequestBody::Form(form)),
                        timeout: self.request_timeout,
                    };
                    let response = self.transport.send(request).await?;
                    if response.status >= 400 {
                        return Err(TabError::from_response(
                            response.status,
                            &response.body,
                            response.retry_after,
                        ));
                    }
                    serde_json::from_str::<TokenResponse>(&response.body)
                        .map_err(|e| TabError::InvalidResponse(e.to_string()))
                }
            })
            .await;

        let outcome = match &result {
            Ok(_) => RequestOutcome::Success,
            Err(err) => err.breaker_outcome(),
        };
        self.breaker.record_outcome(permit, outcome).await;

        result
    }

    async fn fresh_token(&self, slot: &Arc<TokenSlot>) -> Option<String> {
        let state = slot.state.lock().await;
        state.token.as_ref().and_then(|token| {
            if token.is_fresh(self.refresh_buffer) {
                Some(token.access_token.clone())
            } else {
                None
            }
        })
    }

    async fn slot(&self, credentials: &Credentials) -> Arc<TokenSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(credentials.identity())
            .or_insert_with(|| Arc::new(TokenSlot::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(username: Option<&str>) -> Credentials {
        Credentials {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            username: username.map(String::from),
            password: username.map(|_| "pw".to_string()),
            refresh_token: None,
        }
    }

    #[test]
    fn test_identity_keys_per_account() {
        assert_eq!(credentials(None).identity(), "cid");
        assert_eq!(credentials(Some("acct1")).identity(), "cid/acct1");
        assert_ne!(
            credentials(Some("acct1")).identity(),
            credentials(Some("acct2")).identity()
        );
    }

    #[test]
    fn test_token_freshness_respects_buffer() {
        let response = TokenResponse {
            access_token: "tok".to_string(),
            token_type: None,
            expires_in: 120,
            refresh_token: None,
            scope: None,
        };
        let state = TokenState::from_response(response);
        assert!(state.is_fresh(Duration::from_secs(60)));
        assert!(!state.is_fresh(Duration::from_secs(180)));
    }
}
