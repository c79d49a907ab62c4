use crate::cache::{
    cache_key, CacheConfig, CacheRegistry, CacheStats, TtlCache, API_NAMESPACE,
    RACE_DATA_NAMESPACE,
};
use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitStats, RequestOutcome,
};
use crate::config::Config;
use crate::dto::{RaceType, RequestSpec, TokenInfo};
use crate::error::{Result, TabError};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::token_manager::{Credentials, TokenManager};
use crate::transport::{HttpRequest, HttpTransport, RequestBody, ReqwestTransport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Breaker for bearer-authenticated data calls.
pub const API_BREAKER: &str = "tabcorp-api";
/// Breaker for the OAuth token endpoint.
pub const OAUTH_BREAKER: &str = "tabcorp-oauth";

const RACING_BASE: &str = "/v1/tab-info-service/racing";
const SPORTS_BASE: &str = "/v1/tab-info-service/sports";

/// Resulted data barely changes; cache it for an hour.
const RESULTS_TTL: Duration = Duration::from_secs(3600);

/// Resilient TAB API client.
///
/// Every call runs the same pipeline: cache lookup, circuit breaker
/// admission, token acquisition, retry-wrapped HTTP call, then cache fill and
/// breaker reporting. A 401 on a fresh-looking token forces exactly one token
/// refresh and one replay before giving up.
///
/// The endpoint helpers are thin wrappers over [`TabApiClient::request`];
/// anything they don't cover goes through [`TabApiClient::get`] and
/// [`TabApiClient::post`] directly.
pub struct TabApiClient {
    config: Config,
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    caches: CacheRegistry,
    tokens: TokenManager,
}

impl TabApiClient {
    pub fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build a client over a custom transport. Tests inject scripted
    /// transports here.
    pub fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Self {
        let resilience = &config.resilience;

        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: resilience.max_attempts,
            initial_delay: resilience.initial_delay(),
            max_delay: resilience.max_delay(),
            multiplier: resilience.multiplier,
            jitter: resilience.jitter,
        });

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: resilience.failure_threshold,
            recovery_timeout: resilience.recovery_timeout(),
        };
        let api_breaker = Arc::new(CircuitBreaker::new(API_BREAKER, breaker_config.clone()));
        let oauth_breaker = Arc::new(CircuitBreaker::new(OAUTH_BREAKER, breaker_config.clone()));
        let breakers = CircuitBreakerRegistry::with_breakers(
            breaker_config,
            vec![api_breaker, oauth_breaker.clone()],
        );

        let api_cache_config = CacheConfig {
            capacity: resilience.api_cache_capacity,
            default_ttl: resilience.api_cache_ttl(),
        };
        let caches = CacheRegistry::with_caches(
            api_cache_config.clone(),
            vec![
                Arc::new(TtlCache::new(API_NAMESPACE, api_cache_config)),
                Arc::new(TtlCache::new(
                    RACE_DATA_NAMESPACE,
                    CacheConfig {
                        capacity: resilience.race_cache_capacity,
                        default_ttl: resilience.race_cache_ttl(),
                    },
                )),
            ],
        );

        let tokens = TokenManager::new(
            transport.clone(),
            &config.tab.base_url,
            retry.clone(),
            oauth_breaker,
            resilience.token_refresh_buffer(),
            resilience.request_timeout(),
        );
        let credentials = Credentials::from_config(&config.tab);

        Self {
            config,
            credentials,
            transport,
            retry,
            breakers,
            caches,
            tokens,
        }
    }

    pub fn jurisdiction(&self) -> &str {
        &self.config.tab.jurisdiction
    }

    /// Run one API call through the full resilience pipeline.
    pub async fn request(&self, spec: RequestSpec) -> Result<Value> {
        let key = cache_key(&spec.path, &spec.params);

        if let Some(policy) = &spec.cache {
            if let Some(value) = self.caches.get(&policy.namespace, &key).await {
                return Ok(value);
            }
        }

        let breaker = self.breakers.get_or_create(&spec.breaker).await;
        let permit = breaker.acquire().await?;

        let (result, outcome) = self.execute_with_auth(&spec).await;
        breaker.record_outcome(permit, outcome).await;

        let value = result?;
        if let Some(policy) = &spec.cache {
            self.caches
                .set(&policy.namespace, &key, value.clone(), policy.ttl)
                .await;
        }
        Ok(value)
    }

    /// Acquire a token and send, reporting how the call should count against
    /// this upstream's breaker. A 401 means the token went bad server-side
    /// despite looking fresh, so force one refresh and replay once; a second
    /// 401 means the session itself is gone.
    ///
    /// Token-layer failures come back as a neutral outcome: they belong to
    /// the oauth upstream and were already recorded on its breaker.
    async fn execute_with_auth(&self, spec: &RequestSpec) -> (Result<Value>, RequestOutcome) {
        let token = match self.tokens.get_valid_token(&self.credentials).await {
            Ok(token) => token,
            Err(err) => return (Err(err), RequestOutcome::FatalFailure),
        };

        match self.send(spec, &token).await {
            Err(TabError::AuthenticationFailed(_)) => {
                info!(
                    "Unauthorized on {} {}, refreshing token and replaying once",
                    spec.method.as_str(),
                    spec.path
                );
                let token = match self.tokens.force_refresh(&self.credentials).await {
                    Ok(token) => token,
                    Err(err) => return (Err(err), RequestOutcome::FatalFailure),
                };
                match self.send(spec, &token).await {
                    Err(TabError::AuthenticationFailed(message)) => (
                        Err(TabError::AuthenticationExpired(message)),
                        RequestOutcome::FatalFailure,
                    ),
                    other => Self::reported(other),
                }
            }
            other => Self::reported(other),
        }
    }

    fn reported(result: Result<Value>) -> (Result<Value>, RequestOutcome) {
        let outcome = match &result {
            Ok(_) => RequestOutcome::Success,
            Err(err) => err.breaker_outcome(),
        };
        (result, outcome)
    }

    /// Retry-wrapped HTTP call. Fatal classifications surface unwrapped so
    /// the 401 handling above can see them.
    async fn send(&self, spec: &RequestSpec, token: &str) -> Result<Value> {
        let url = format!(
            "{}{}",
            self.config.tab.base_url.trim_end_matches('/'),
            spec.path
        );

        self.retry
            .execute(|| {
                let mut request = HttpRequest::new(spec.method, url.clone()).bearer(token);
                request.params = spec.params.clone();
                request.timeout = self.config.resilience.request_timeout();
                if let Some(body) = &spec.body {
                    request.body = Some(RequestBody::Json(body.clone()));
                }
                async move { self.transport.send(request).await?.into_json() }
            })
            .await
    }

    fn with_jurisdiction(&self, spec: RequestSpec) -> RequestSpec {
        spec.param("jurisdiction", &self.config.tab.jurisdiction)
    }

    // ---- Racing endpoints ----

    /// Dates that have racing meetings.
    pub async fn racing_dates(&self) -> Result<Value> {
        let spec = RequestSpec::get(format!("{RACING_BASE}/dates")).cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// All meetings on a date (YYYY-MM-DD).
    pub async fn meetings(&self, date: &str) -> Result<Value> {
        let spec =
            RequestSpec::get(format!("{RACING_BASE}/dates/{date}/meetings")).cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Races in one meeting.
    pub async fn races(&self, date: &str, race_type: RaceType, venue: &str) -> Result<Value> {
        let spec = RequestSpec::get(format!(
            "{RACING_BASE}/dates/{date}/meetings/{}/{venue}/races",
            race_type.as_code()
        ))
        .cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// One race with runners, odds and pools.
    pub async fn race(
        &self,
        date: &str,
        race_type: RaceType,
        venue: &str,
        race_number: u32,
        fixed_odds: bool,
    ) -> Result<Value> {
        let spec = RequestSpec::get(format!(
            "{RACING_BASE}/dates/{date}/meetings/{}/{venue}/races/{race_number}",
            race_type.as_code()
        ))
        .param("fixedOdds", fixed_odds.to_string())
        .cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Upcoming races ordered by start time.
    pub async fn next_to_go_races(&self, max_races: Option<u32>) -> Result<Value> {
        let mut spec = RequestSpec::get(format!("{RACING_BASE}/next-to-go/races"))
            .cached(RACE_DATA_NAMESPACE);
        if let Some(max_races) = max_races {
            spec = spec.param("maxRaces", max_races.to_string());
        }
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Form guide for every runner in a race.
    pub async fn race_form(
        &self,
        date: &str,
        race_type: RaceType,
        venue: &str,
        race_number: u32,
    ) -> Result<Value> {
        let spec = RequestSpec::get(format!(
            "{RACING_BASE}/dates/{date}/meetings/{}/{venue}/races/{race_number}/form",
            race_type.as_code()
        ))
        .cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Form guide for a single runner.
    pub async fn runner_form(
        &self,
        date: &str,
        race_type: RaceType,
        venue: &str,
        race_number: u32,
        runner_number: u32,
    ) -> Result<Value> {
        let spec = RequestSpec::get(format!(
            "{RACING_BASE}/dates/{date}/meetings/{}/{venue}/races/{race_number}/form/{runner_number}",
            race_type.as_code()
        ))
        .cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Approximate dividends for one wagering product on a race.
    pub async fn pool_approximates(
        &self,
        date: &str,
        race_type: RaceType,
        venue: &str,
        race_number: u32,
        wagering_product: &str,
    ) -> Result<Value> {
        let spec = RequestSpec::get(format!(
            "{RACING_BASE}/dates/{date}/meetings/{}/{venue}/races/{race_number}/pools/{wagering_product}/approximates",
            race_type.as_code()
        ))
        .cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Currently open jackpots across all meetings.
    pub async fn open_jackpots(&self) -> Result<Value> {
        let spec =
            RequestSpec::get(format!("{RACING_BASE}/jackpots")).cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Jackpot pools for a date.
    pub async fn jackpot_pools(&self, date: &str) -> Result<Value> {
        let spec = RequestSpec::get(format!("{RACING_BASE}/dates/{date}/jackpot-pools"))
            .cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    // ---- Sports endpoints ----

    /// All sports currently offered.
    pub async fn sports(&self) -> Result<Value> {
        let spec = RequestSpec::get(SPORTS_BASE).cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Open markets for one sport. Deeper drill-downs (competitions,
    /// tournaments, matches, footy rounds) go through [`TabApiClient::get`]
    /// with the corresponding `/v1/tab-info-service/sports/...` path.
    pub async fn sport(&self, sport_name: &str) -> Result<Value> {
        let spec = RequestSpec::get(format!("{SPORTS_BASE}/{sport_name}")).cached(API_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Upcoming sports matches sorted by start time.
    pub async fn sports_next_to_go(&self) -> Result<Value> {
        let spec =
            RequestSpec::get(format!("{SPORTS_BASE}/nextToGo")).cached(RACE_DATA_NAMESPACE);
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Recent sports results, optionally narrowed to one sport.
    pub async fn sports_results(&self, sport: Option<&str>) -> Result<Value> {
        let path = match sport {
            Some(sport) => format!("{SPORTS_BASE}/results/{sport}"),
            None => format!("{SPORTS_BASE}/results"),
        };
        let spec = RequestSpec::get(path).cached_for(API_NAMESPACE, RESULTS_TTL);
        self.request(self.with_jurisdiction(spec)).await
    }

    // ---- Escape hatches ----

    /// Uncached GET against any TAB endpoint path. Jurisdiction is appended
    /// automatically.
    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let mut spec = RequestSpec::get(path);
        spec.params = params.to_vec();
        self.request(self.with_jurisdiction(spec)).await
    }

    /// Uncached POST with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let spec = RequestSpec::post(path).body(body);
        self.request(self.with_jurisdiction(spec)).await
    }

    // ---- Token lifecycle ----

    /// Authenticate eagerly instead of on first request.
    pub async fn authenticate(&self) -> Result<()> {
        self.tokens.authenticate(&self.credentials).await?;
        Ok(())
    }

    pub async fn token_info(&self) -> Option<TokenInfo> {
        self.tokens.token_info(&self.credentials).await
    }

    // ---- Observability ----

    pub async fn cache_stats(&self, namespace: &str) -> Option<CacheStats> {
        self.caches.stats(namespace).await
    }

    pub async fn all_cache_stats(&self) -> Vec<CacheStats> {
        self.caches.all_stats().await
    }

    /// Drop cached entries whose key starts with `pattern`.
    pub async fn invalidate_cache(&self, namespace: &str, pattern: &str) -> usize {
        self.caches.invalidate(namespace, pattern).await
    }

    pub async fn clear_caches(&self) {
        self.caches.clear_all().await;
    }

    pub async fn circuit_stats(&self, name: &str) -> Option<CircuitStats> {
        self.breakers.stats(name).await
    }

    pub async fn all_circuit_stats(&self) -> Vec<CircuitStats> {
        self.breakers.all_stats().await
    }

    /// Force every breaker back to CLOSED.
    pub async fn reset_circuits(&self) {
        self.breakers.reset_all().await;
    }
}
