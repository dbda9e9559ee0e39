use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{Error, LedgerResponse, Result, TallyService};
use tally_domain::{action::ActionType, idempotency, state::MeterState};
use tally_storage::{LedgerOutcome, LedgerWrite, RunTransition, models::LedgerEntry};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundRequest {
	pub account_id: String,
	pub entry_id: Uuid,
	#[serde(default)]
	pub reason: Option<String>,
}

impl TallyService {
	/// Compensates a charge entry with a mirrored `REFUND` entry.
	///
	/// Refunding the same entry again replays the first refund. The charge entry stays in the
	/// ledger.
	pub async fn refund(&self, req: RefundRequest) -> Result<LedgerResponse> {
		let account_id = crate::require_non_empty("account_id", &req.account_id)?;
		let original = self
			.store
			.entry(req.entry_id)
			.await?
			.filter(|entry| entry.account_id == account_id)
			.ok_or_else(|| Error::NotFound {
				message: format!("Ledger entry {} does not exist.", req.entry_id),
			})?;
		let action = original.action()?;

		if !action.is_charge() {
			return Err(Error::InvalidRequest {
				message: format!("Ledger entry {} is not a charge.", req.entry_id),
			});
		}

		let reason = req.reason.as_deref().map(str::trim).filter(|reason| !reason.is_empty());
		let write = LedgerWrite {
			entry_id: Uuid::new_v4(),
			account_id: account_id.to_string(),
			idempotency_key: idempotency::refund_key(original.entry_id),
			action_type: ActionType::Refund,
			amount: -original.amount,
			metadata: json!({
				"reason": reason,
				"original_action": action,
				"original_idempotency_key": original.idempotency_key,
			}),
			refund_of: Some(original.entry_id),
			fingerprints: None,
		};
		let outcome = self.apply_with_retry(&write).await?;

		if let LedgerOutcome::Applied(refund) | LedgerOutcome::Replayed(refund) = &outcome
			&& action == ActionType::AiEnrichCharge
		{
			self.mark_run_refunded(&original, refund).await?;
		}

		Ok(LedgerResponse::from_outcome(&outcome))
	}

	/// Moves the enrichment run behind `charge` to `REFUNDED` if it is still `CHARGED`.
	async fn mark_run_refunded(&self, charge: &LedgerEntry, refund: &LedgerEntry) -> Result<()> {
		let Some(run_id) = charge
			.metadata
			.get("run_id")
			.and_then(|value| value.as_str())
			.and_then(|raw| Uuid::parse_str(raw).ok())
		else {
			return Ok(());
		};
		let Some(run) = self.store.enrichment_run(run_id).await? else {
			return Ok(());
		};

		if run.meter_state()? != MeterState::Charged {
			return Ok(());
		}

		self.store
			.transition_enrichment_run(&RunTransition {
				run_id,
				from: MeterState::Charged,
				to: MeterState::Refunded,
				charge_entry_id: run.charge_entry_id,
				refund_entry_id: Some(refund.entry_id),
				result_summary: None,
			})
			.await?;

		tracing::info!(
			account_id = %charge.account_id,
			%run_id,
			refund_entry_id = %refund.entry_id,
			"Enrichment run refunded."
		);

		Ok(())
	}
}
