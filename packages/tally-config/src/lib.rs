mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Billing, Config, EnrichmentProviderConfig, Postgres, Providers, Retry, Security, Service,
	Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.billing.initial_credits < 0 {
		return Err(Error::Validation {
			message: "billing.initial_credits must be zero or greater.".to_string(),
		});
	}

	for (label, cost) in [
		("billing.search_row_cost", cfg.billing.search_row_cost),
		("billing.enrichment_cost", cfg.billing.enrichment_cost),
	] {
		if cost <= 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	let retry = &cfg.billing.retry;

	if retry.max_attempts == 0 {
		return Err(Error::Validation {
			message: "billing.retry.max_attempts must be greater than zero.".to_string(),
		});
	}
	if retry.max_backoff_ms < retry.base_backoff_ms {
		return Err(Error::Validation {
			message: "billing.retry.max_backoff_ms must be at least billing.retry.base_backoff_ms."
				.to_string(),
		});
	}

	let enrichment = &cfg.providers.enrichment;

	for (label, value) in [
		("providers.enrichment.provider_id", &enrichment.provider_id),
		("providers.enrichment.api_base", &enrichment.api_base),
		("providers.enrichment.api_key", &enrichment.api_key),
		("providers.enrichment.model", &enrichment.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if enrichment.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.enrichment.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if enrichment.default_headers.values().any(|value| !value.is_string()) {
		return Err(Error::Validation {
			message: "providers.enrichment.default_headers values must be strings.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}

	let api_base = cfg.providers.enrichment.api_base.trim().trim_end_matches('/').to_string();

	cfg.providers.enrichment.api_base = api_base;
}
