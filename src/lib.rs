//! # tab-rs
//!
//! A resilient Rust client for the Tabcorp TAB betting REST API, built around
//! a fault-tolerant request pipeline: retry with exponential backoff,
//! per-upstream circuit breaking, TTL+LRU response caching, and coordinated
//! OAuth token lifecycle management.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tab_rs::{Config, TabApiClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Load configuration from config.toml
//! let config = Config::new()?;
//!
//! // Create the client; authentication happens lazily on first request
//! let client = TabApiClient::new(config)?;
//!
//! // Racing meetings for a date
//! let meetings = client.meetings("2026-08-28").await?;
//!
//! // A specific race with fixed odds
//! let race = client
//!     .race("2026-08-28", tab_rs::RaceType::Thoroughbred, "RAN", 1, true)
//!     .await?;
//!
//! // Next races across all codes
//! let next = client.next_to_go_races(Some(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Retry with backoff**: transient failures (network, timeout, 5xx, 429)
//!   are retried with exponential backoff; `Retry-After` hints are honored
//! - **Circuit breaking**: one breaker per upstream service fails fast during
//!   outages and probes recovery with a single trial call
//! - **Response caching**: namespaced TTL+LRU caches keep reference data and
//!   near-real-time race data on separate lifetimes
//! - **Token lifecycle**: OAuth tokens are refreshed ahead of expiry, with
//!   single-flight refresh under concurrency and automatic 401 recovery
//! - **Pluggable transport**: the HTTP layer sits behind a trait, so tests
//!   run against scripted transports
//!
//! ## Configuration
//!
//! Create a `config.toml` with your TAB API credentials:
//!
//! ```toml
//! [tab]
//! client_id = "your_client_id"
//! client_secret = "your_client_secret"
//! jurisdiction = "NSW"
//!
//! # Optional account credentials for the password grant
//! # username = "your_account_number"
//! # password = "your_password"
//!
//! [resilience]
//! max_attempts = 3
//! failure_threshold = 5
//! recovery_timeout_secs = 60
//! ```
//!
//! The whole `[resilience]` section is optional; every field has a default.

pub mod api_client;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod dto;
pub mod error;
pub mod retry;
pub mod token_manager;
pub mod transport;

// Re-export commonly used types at the crate root
pub use api_client::{TabApiClient, API_BREAKER, OAUTH_BREAKER};
pub use cache::{CacheStats, API_NAMESPACE, RACE_DATA_NAMESPACE};
pub use circuit_breaker::{CircuitState, CircuitStats};
pub use config::Config;
pub use dto::{RaceType, RequestSpec, TokenInfo};
pub use error::{Result, TabError};
pub use token_manager::Credentials;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
