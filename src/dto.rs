use crate::error::{Result, TabError};
use crate::transport::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jurisdictions the TAB API accepts.
pub const VALID_JURISDICTIONS: [&str; 7] = ["NSW", "VIC", "QLD", "SA", "TAS", "ACT", "NT"];

pub fn validate_jurisdiction(jurisdiction: &str) -> Result<String> {
    let j = jurisdiction.to_uppercase();
    if VALID_JURISDICTIONS.contains(&j.as_str()) {
        Ok(j)
    } else {
        Err(TabError::Config(format!(
            "invalid jurisdiction '{jurisdiction}', must be one of: {}",
            VALID_JURISDICTIONS.join(", ")
        )))
    }
}

/// Race type codes used in racing endpoint paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceType {
    Thoroughbred,
    Harness,
    Greyhound,
}

impl RaceType {
    pub fn as_code(&self) -> &'static str {
        match self {
            RaceType::Thoroughbred => "R",
            RaceType::Harness => "H",
            RaceType::Greyhound => "G",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code.to_uppercase().as_str() {
            "R" => Ok(RaceType::Thoroughbred),
            "H" => Ok(RaceType::Harness),
            "G" => Ok(RaceType::Greyhound),
            _ => Err(TabError::Config(format!(
                "invalid race type '{code}', must be one of: R (Racing), H (Harness), G (Greyhounds)"
            ))),
        }
    }
}

/// Body of a successful OAuth token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Non-secret view of a held token, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub scope: Option<String>,
    pub obtained_at: chrono::DateTime<chrono::Utc>,
    pub expires_in_secs: u64,
    pub has_refresh_token: bool,
}

/// Cache placement for a request: which namespace, and an optional TTL
/// override (defaulting to the namespace TTL).
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub namespace: String,
    pub ttl: Option<Duration>,
}

/// A single API call description consumed by the resilient client pipeline.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub cache: Option<CachePolicy>,
    pub breaker: String,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            params: Vec::new(),
            body: None,
            cache: None,
            breaker: crate::api_client::API_BREAKER.to_string(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            params: Vec::new(),
            body: None,
            cache: None,
            breaker: crate::api_client::API_BREAKER.to_string(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Cache the response in `namespace` with its default TTL.
    pub fn cached(mut self, namespace: impl Into<String>) -> Self {
        self.cache = Some(CachePolicy {
            namespace: namespace.into(),
            ttl: None,
        });
        self
    }

    /// Cache the response in `namespace` with an explicit TTL.
    pub fn cached_for(mut self, namespace: impl Into<String>, ttl: Duration) -> Self {
        self.cache = Some(CachePolicy {
            namespace: namespace.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn breaker(mut self, name: impl Into<String>) -> Self {
        self.breaker = name.into();
        self
    }
}
