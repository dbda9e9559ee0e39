use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};

use tally_domain::enrichment::EnrichedField;

use crate::{Error, Result};

/// Asks the enrichment provider to fill fields of one target record.
///
/// `current` is the record as the caller sees it; the provider decides which fields it can fill.
pub async fn enrich(
	cfg: &tally_config::EnrichmentProviderConfig,
	target_id: &str,
	current: &Map<String, Value>,
) -> Result<Vec<EnrichedField>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"target_id": target_id,
		"fields": current,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_enrichment_response(json)
}

fn parse_enrichment_response(json: Value) -> Result<Vec<EnrichedField>> {
	let payload = match chat_content(&json) {
		Some(content) => serde_json::from_str::<Value>(content).map_err(|_| {
			Error::InvalidResponse {
				message: "Enrichment content is not valid JSON.".to_string(),
			}
		})?,
		None => json,
	};
	let fields = payload.get("fields").cloned().ok_or_else(|| Error::InvalidResponse {
		message: "Enrichment response is missing fields array.".to_string(),
	})?;

	if !fields.is_array() {
		return Err(Error::InvalidResponse {
			message: "Enrichment fields must be an array.".to_string(),
		});
	}

	Ok(serde_json::from_value(fields)?)
}

fn chat_content(json: &Value) -> Option<&str> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
}
