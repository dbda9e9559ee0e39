use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub billing: Billing,
	pub providers: Providers,
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Billing {
	/// Credits granted when an account is opened on first login.
	pub initial_credits: i64,
	/// Credits charged per newly billed search-result row.
	pub search_row_cost: i64,
	/// Credits charged per enrichment run that delivered useful data.
	pub enrichment_cost: i64,
	#[serde(default)]
	pub retry: Retry,
}

/// Bounded retry of transient store failures. Retries always reuse the idempotency key.
#[derive(Debug, Deserialize)]
pub struct Retry {
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub enrichment: EnrichmentProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
}

impl Default for Retry {
	fn default() -> Self {
		Self { max_attempts: 3, base_backoff_ms: 50, max_backoff_ms: 1_000 }
	}
}
