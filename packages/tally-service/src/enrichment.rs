//! Charge-after-value billing for AI enrichment runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{EnrichmentProvider, Error, RefundRequest, Result, TallyService, gate};
use tally_domain::{
	action::ActionType,
	enrichment::{self, EnrichedField},
	idempotency,
	state::MeterState,
};
use tally_storage::{
	LedgerOutcome, LedgerWrite, NewEnrichmentRun, RunTransition, models::EnrichmentRun,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentChargeRequest {
	pub account_id: String,
	pub target_id: String,
	pub run_id: Uuid,
	/// The record as it was before the run.
	#[serde(default)]
	pub before: Map<String, Value>,
	/// What the run proposed.
	pub fields: Vec<EnrichedField>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentChargeResponse {
	pub success: bool,
	pub new_balance: i64,
	pub charged: bool,
	pub state: MeterState,
	pub entry_id: Option<Uuid>,
	pub filled_fields: Vec<String>,
	pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentRunRequest {
	pub account_id: String,
	pub target_id: String,
	pub run_id: Uuid,
	#[serde(default)]
	pub before: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentRunResponse {
	pub fields: Vec<EnrichedField>,
	pub charge: EnrichmentChargeResponse,
}

impl TallyService {
	/// Charges a finished enrichment run once, and only if it filled a previously empty field.
	///
	/// Repeated calls with the same `run_id` return the run's settled state without charging
	/// again.
	pub async fn charge_enrichment(
		&self,
		req: EnrichmentChargeRequest,
	) -> Result<EnrichmentChargeResponse> {
		let account_id = crate::require_non_empty("account_id", &req.account_id)?;
		let target_id = crate::require_non_empty("target_id", &req.target_id)?;
		let scope = gate::enrichment_scope(account_id);

		self.gate
			.with_exclusive_charge(
				&scope,
				self.charge_enrichment_exclusive(account_id, target_id, &req),
			)
			.await
	}

	/// Runs the provider for a target, then settles the run through [`Self::charge_enrichment`].
	///
	/// Runs settled as `SKIPPED` or `REFUNDED` are returned as they are, without calling the
	/// provider. If the provider fails for a run that was already charged, the charge is refunded
	/// and the provider error is returned.
	pub async fn run_enrichment(
		&self,
		req: EnrichmentRunRequest,
		provider: &dyn EnrichmentProvider,
	) -> Result<EnrichmentRunResponse> {
		let account_id = crate::require_non_empty("account_id", &req.account_id)?;
		let target_id = crate::require_non_empty("target_id", &req.target_id)?;
		let run = self.start_run(account_id, target_id, req.run_id).await?;
		let state = run.meter_state()?;

		// Settled without a charge; running the provider again would deliver unpaid data.
		if matches!(state, MeterState::Skipped | MeterState::Refunded) {
			tracing::debug!(
				account_id,
				run_id = %run.run_id,
				%state,
				"Enrichment run already settled."
			);

			let charge = self.settled_response(account_id, &run, state).await?;

			return Ok(EnrichmentRunResponse { fields: Vec::new(), charge });
		}

		let fields = match provider
			.enrich(&self.cfg.providers.enrichment, target_id, &req.before)
			.await
		{
			Ok(fields) => fields,
			Err(err) => {
				tracing::warn!(
					account_id,
					run_id = %req.run_id,
					error = %err,
					"Enrichment provider failed."
				);

				self.compensate_failed_run(&run).await?;

				return Err(match err {
					Error::UpstreamProvider { .. } => err,
					other => Error::UpstreamProvider { message: other.to_string() },
				});
			},
		};
		let charge = self
			.charge_enrichment(EnrichmentChargeRequest {
				account_id: account_id.to_string(),
				target_id: target_id.to_string(),
				run_id: req.run_id,
				before: req.before,
				fields: fields.clone(),
			})
			.await?;

		Ok(EnrichmentRunResponse { fields, charge })
	}

	async fn charge_enrichment_exclusive(
		&self,
		account_id: &str,
		target_id: &str,
		req: &EnrichmentChargeRequest,
	) -> Result<EnrichmentChargeResponse> {
		let run = self.start_run(account_id, target_id, req.run_id).await?;
		let state = run.meter_state()?;

		if state != MeterState::Pending {
			tracing::debug!(
				account_id,
				run_id = %run.run_id,
				%state,
				"Enrichment run already settled."
			);

			return self.settled_response(account_id, &run, state).await;
		}

		let filled = enrichment::filled_fields(&req.before, &req.fields);

		if filled.is_empty() {
			let skipped = self
				.store
				.transition_enrichment_run(&RunTransition {
					run_id: run.run_id,
					from: MeterState::Pending,
					to: MeterState::Skipped,
					charge_entry_id: None,
					refund_entry_id: None,
					result_summary: Some(json!({ "filled_fields": [] })),
				})
				.await?;

			tracing::info!(
				account_id,
				run_id = %run.run_id,
				"Enrichment run produced no new data."
			);

			return self.settled_response(account_id, &skipped, MeterState::Skipped).await;
		}

		let write = LedgerWrite {
			entry_id: Uuid::new_v4(),
			account_id: account_id.to_string(),
			idempotency_key: run.idempotency_key.clone(),
			action_type: ActionType::AiEnrichCharge,
			amount: -self.cfg.billing.enrichment_cost,
			metadata: json!({
				"run_id": run.run_id,
				"target_id": target_id,
				"filled_fields": filled,
			}),
			refund_of: None,
			fingerprints: None,
		};

		match self.apply_with_retry(&write).await? {
			LedgerOutcome::Applied(entry) | LedgerOutcome::Replayed(entry) => {
				self.store
					.transition_enrichment_run(&RunTransition {
						run_id: run.run_id,
						from: MeterState::Pending,
						to: MeterState::Charged,
						charge_entry_id: Some(entry.entry_id),
						refund_entry_id: None,
						result_summary: Some(json!({ "filled_fields": filled })),
					})
					.await?;

				Ok(EnrichmentChargeResponse {
					success: true,
					new_balance: self.current_balance(account_id).await?,
					charged: true,
					state: MeterState::Charged,
					entry_id: Some(entry.entry_id),
					filled_fields: filled,
					error: None,
				})
			},
			LedgerOutcome::InsufficientBalance { balance, .. } => Ok(EnrichmentChargeResponse {
				success: false,
				new_balance: balance,
				charged: false,
				state: MeterState::Pending,
				entry_id: None,
				filled_fields: filled,
				error: Some(crate::INSUFFICIENT_BALANCE.to_string()),
			}),
		}
	}

	async fn start_run(
		&self,
		account_id: &str,
		target_id: &str,
		run_id: Uuid,
	) -> Result<EnrichmentRun> {
		let run = self
			.store
			.start_enrichment_run(&NewEnrichmentRun {
				run_id,
				account_id: account_id.to_string(),
				target_id: target_id.to_string(),
				idempotency_key: idempotency::enrichment_key(run_id),
			})
			.await?;

		Ok(run)
	}

	/// Refunds the run's charge if one was recorded. Pending runs stay pending so they can be
	/// retried.
	async fn compensate_failed_run(&self, run: &EnrichmentRun) -> Result<()> {
		let current = self.store.enrichment_run(run.run_id).await?.unwrap_or_else(|| run.clone());

		if current.meter_state()? != MeterState::Charged {
			return Ok(());
		}

		let Some(entry_id) = current.charge_entry_id else {
			return Err(Error::Storage {
				message: format!("Charged enrichment run {} has no charge entry.", run.run_id),
			});
		};

		self.refund(RefundRequest {
			account_id: current.account_id.clone(),
			entry_id,
			reason: Some("Enrichment provider failed after the run was charged.".to_string()),
		})
		.await?;

		Ok(())
	}

	async fn settled_response(
		&self,
		account_id: &str,
		run: &EnrichmentRun,
		state: MeterState,
	) -> Result<EnrichmentChargeResponse> {
		let filled_fields: Vec<String> = run
			.result_summary
			.get("filled_fields")
			.and_then(|value| serde_json::from_value(value.clone()).ok())
			.unwrap_or_default();

		Ok(EnrichmentChargeResponse {
			success: true,
			new_balance: self.current_balance(account_id).await?,
			charged: run.charged,
			state,
			entry_id: run.charge_entry_id,
			filled_fields,
			error: None,
		})
	}
}
