use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result, TallyService};
use tally_config::Retry;
use tally_domain::action::ActionType;
use tally_storage::{FingerprintBatch, LedgerOutcome, LedgerWrite};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerRequest {
	pub account_id: String,
	pub idempotency_key: String,
	pub action_type: ActionType,
	pub amount: i64,
	#[serde(default)]
	pub metadata: Value,
	#[serde(default)]
	pub refund_of: Option<Uuid>,
	#[serde(default)]
	pub fingerprints: Option<LedgerFingerprints>,
}

/// Row fingerprints billed by a search charge, recorded with the entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerFingerprints {
	pub search_key: String,
	pub fingerprints: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerResponse {
	pub success: bool,
	pub new_balance: i64,
	pub entry_id: Option<Uuid>,
	pub replayed: bool,
	pub error: Option<String>,
}
impl LedgerResponse {
	pub(crate) fn from_outcome(outcome: &LedgerOutcome) -> Self {
		match outcome {
			LedgerOutcome::Applied(entry) => Self {
				success: true,
				new_balance: entry.balance_after,
				entry_id: Some(entry.entry_id),
				replayed: false,
				error: None,
			},
			LedgerOutcome::Replayed(entry) => Self {
				success: true,
				new_balance: entry.balance_after,
				entry_id: Some(entry.entry_id),
				replayed: true,
				error: None,
			},
			LedgerOutcome::InsufficientBalance { balance, .. } => Self {
				success: false,
				new_balance: *balance,
				entry_id: None,
				replayed: false,
				error: Some(crate::INSUFFICIENT_BALANCE.to_string()),
			},
		}
	}
}

impl TallyService {
	/// Applies one balance mutation atomically.
	///
	/// A repeated idempotency key returns the first recorded outcome without moving the balance.
	/// Insufficient balance is reported as `success: false` and writes nothing.
	pub async fn charge_or_refund(&self, req: LedgerRequest) -> Result<LedgerResponse> {
		let write = validate_request(req)?;
		let outcome = self.apply_with_retry(&write).await?;

		Ok(LedgerResponse::from_outcome(&outcome))
	}

	/// Applies `write`, retrying transient store failures with the identical idempotency key.
	pub(crate) async fn apply_with_retry(&self, write: &LedgerWrite) -> Result<LedgerOutcome> {
		let retry = &self.cfg.billing.retry;
		let mut attempt = 1;

		loop {
			match self.store.apply(write).await {
				Ok(outcome) => {
					// An earlier attempt of this write committed but its reply was lost.
					let outcome = match outcome {
						LedgerOutcome::Replayed(entry) if entry.entry_id == write.entry_id =>
							LedgerOutcome::Applied(entry),
						other => other,
					};

					log_outcome(write, &outcome);

					return Ok(outcome);
				},
				Err(err) if err.is_transient() && attempt < retry.max_attempts => {
					let delay = backoff_delay(retry, attempt);

					tracing::warn!(
						account_id = %write.account_id,
						idempotency_key = %write.idempotency_key,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %err,
						"Transient ledger failure. Retrying with the same idempotency key."
					);
					tokio::time::sleep(delay).await;

					attempt += 1;
				},
				Err(err) => return Err(err.into()),
			}
		}
	}
}

fn validate_request(req: LedgerRequest) -> Result<LedgerWrite> {
	let account_id = crate::require_non_empty("account_id", &req.account_id)?;
	let idempotency_key = crate::require_non_empty("idempotency_key", &req.idempotency_key)?;

	if req.amount == 0 {
		return Err(Error::InvalidRequest { message: "amount must be non-zero.".to_string() });
	}
	if !req.action_type.accepts_amount(req.amount) {
		let expected = if req.action_type.is_charge() { "negative" } else { "positive" };

		return Err(Error::InvalidRequest {
			message: format!("amount must be {expected} for {}.", req.action_type),
		});
	}

	match (req.action_type, req.refund_of) {
		(ActionType::Refund, None) => {
			return Err(Error::InvalidRequest {
				message: "refund_of is required for REFUND.".to_string(),
			});
		},
		(action, Some(_)) if action.is_charge() => {
			return Err(Error::InvalidRequest {
				message: format!("refund_of is only valid for REFUND, not {action}."),
			});
		},
		_ => {},
	}

	let fingerprints = match req.fingerprints {
		Some(_) if req.action_type != ActionType::SearchPageCharge => {
			return Err(Error::InvalidRequest {
				message: "fingerprints are only valid for SEARCH_PAGE_CHARGE.".to_string(),
			});
		},
		Some(batch) => Some(FingerprintBatch {
			search_key: crate::require_non_empty("fingerprints.search_key", &batch.search_key)?
				.to_string(),
			fingerprints: tally_domain::fingerprint::normalize(&batch.fingerprints),
		}),
		None => None,
	};

	Ok(LedgerWrite {
		entry_id: Uuid::new_v4(),
		account_id: account_id.to_string(),
		idempotency_key: idempotency_key.to_string(),
		action_type: req.action_type,
		amount: req.amount,
		metadata: if req.metadata.is_null() { Value::Object(Default::default()) } else { req.metadata },
		refund_of: req.refund_of,
		fingerprints,
	})
}

/// Exponential backoff for `attempt` (1-based), capped at `max_backoff_ms`.
fn backoff_delay(retry: &Retry, attempt: u32) -> Duration {
	let factor = 1_u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
	let millis = retry.base_backoff_ms.saturating_mul(factor).min(retry.max_backoff_ms);

	Duration::from_millis(millis)
}

fn log_outcome(write: &LedgerWrite, outcome: &LedgerOutcome) {
	match outcome {
		LedgerOutcome::Applied(entry) => tracing::info!(
			account_id = %write.account_id,
			idempotency_key = %write.idempotency_key,
			action_type = %write.action_type,
			amount = write.amount,
			entry_id = %entry.entry_id,
			balance_after = entry.balance_after,
			"Ledger entry applied."
		),
		LedgerOutcome::Replayed(entry) => tracing::info!(
			account_id = %write.account_id,
			idempotency_key = %write.idempotency_key,
			entry_id = %entry.entry_id,
			"Ledger request replayed."
		),
		LedgerOutcome::InsufficientBalance { balance, required } => tracing::info!(
			account_id = %write.account_id,
			idempotency_key = %write.idempotency_key,
			balance,
			required,
			"Ledger charge rejected for insufficient balance."
		),
	}
}
