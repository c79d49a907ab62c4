#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tab_rs::transport::{HttpRequest, HttpResponse, HttpTransport};
use tab_rs::{Config, Result};

/// Scripted transport. Responses are queued per route class (token endpoint
/// vs everything else); an empty queue yields a generic success so tests only
/// script what they care about.
pub struct MockTransport {
    oauth_responses: Mutex<VecDeque<Result<HttpResponse>>>,
    api_responses: Mutex<VecDeque<Result<HttpResponse>>>,
    pub oauth_calls: AtomicU32,
    pub api_calls: AtomicU32,
    pub requests: Mutex<Vec<HttpRequest>>,
    oauth_delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            oauth_responses: Mutex::new(VecDeque::new()),
            api_responses: Mutex::new(VecDeque::new()),
            oauth_calls: AtomicU32::new(0),
            api_calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            oauth_delay: None,
        }
    }

    /// Hold every token-endpoint call for `delay`, so concurrent callers
    /// pile up behind the refresh.
    pub fn with_oauth_delay(delay: Duration) -> Self {
        Self {
            oauth_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn push_oauth(&self, response: Result<HttpResponse>) {
        self.oauth_responses.lock().unwrap().push_back(response);
    }

    pub fn push_api(&self, response: Result<HttpResponse>) {
        self.api_responses.lock().unwrap().push_back(response);
    }

    pub fn oauth_calls(&self) -> u32 {
        self.oauth_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> u32 {
        self.api_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let is_oauth = request.url.contains("/oauth/token");
        self.requests.lock().unwrap().push(request);

        if is_oauth {
            self.oauth_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.oauth_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.oauth_responses.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(token_response("test-token", 3600, Some("refresh-1"))))
        } else {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.api_responses.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(json_response(200, json!({"ok": true}))))
        }
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
        retry_after: None,
    }
}

pub fn token_response(access_token: &str, expires_in: u64, refresh_token: Option<&str>) -> HttpResponse {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    json_response(200, body)
}

/// Config with millisecond-scale retry delays so tests stay fast.
pub fn test_config() -> Config {
    config_with_resilience(
        r#"
max_attempts = 3
initial_delay_ms = 10
max_delay_ms = 50
failure_threshold = 3
recovery_timeout_secs = 1
request_timeout_secs = 5
"#,
    )
}

pub fn config_with_resilience(resilience: &str) -> Config {
    let toml = format!(
        r#"
[tab]
client_id = "cid"
client_secret = "secret"

[resilience]
{resilience}
"#
    );
    Config::from_toml(&toml).unwrap()
}
