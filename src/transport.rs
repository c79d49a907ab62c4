use crate::error::{Result, TabError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("tab-rs/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .push(("authorization".to_string(), format!("Bearer {token}")));
        self
    }
}

/// Status and body of an upstream response. Any HTTP status is delivered as
/// `Ok`; transports only fail for network-level problems. Classification into
/// the error taxonomy happens in the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Convert into a decoded JSON payload, mapping error statuses into the
    /// taxonomy.
    pub fn into_json(self) -> Result<serde_json::Value> {
        if self.status >= 400 {
            return Err(TabError::from_response(
                self.status,
                &self.body,
                self.retry_after,
            ));
        }
        serde_json::from_str(&self.body).map_err(|e| TabError::InvalidResponse(e.to_string()))
    }
}

/// Abstract HTTP transport the resilient core calls through. Production code
/// uses [`ReqwestTransport`]; tests substitute scripted implementations.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TabError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("{} {}", request.method.as_str(), request.url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        builder = builder.timeout(request.timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        match &request.body {
            Some(RequestBody::Json(value)) => builder = builder.json(value),
            Some(RequestBody::Form(fields)) => builder = builder.form(fields),
            None => {}
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;

        debug!("response status: {}", status);

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_bearer_header() {
        let request = HttpRequest::new(Method::Get, "https://api.beta.tab.com.au/v1").bearer("tok");
        assert_eq!(
            request.headers,
            vec![("authorization".to_string(), "Bearer tok".to_string())]
        );
        assert_eq!(request.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_into_json_success_and_error() {
        let ok = HttpResponse {
            status: 200,
            body: r#"{"meetings":[]}"#.to_string(),
            retry_after: None,
        };
        assert!(ok.into_json().unwrap().get("meetings").is_some());

        let server_err = HttpResponse {
            status: 503,
            body: String::new(),
            retry_after: None,
        };
        assert!(matches!(
            server_err.into_json(),
            Err(TabError::UpstreamServer { status: 503, .. })
        ));

        let garbled = HttpResponse {
            status: 200,
            body: "not json".to_string(),
            retry_after: None,
        };
        assert!(matches!(
            garbled.into_json(),
            Err(TabError::InvalidResponse(_))
        ));
    }
}
