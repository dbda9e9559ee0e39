use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Error, Result, TallyService, gate};
use tally_domain::{
	action::ActionType,
	idempotency,
	search_key::{self, SearchKey, SearchQuery},
};
use tally_storage::{FingerprintBatch, LedgerOutcome, LedgerWrite};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchPageChargeRequest {
	pub account_id: String,
	/// A key previously returned by [`TallyService::search_key`]. Derived from `query` when
	/// absent.
	#[serde(default)]
	pub session_key: Option<String>,
	#[serde(default)]
	pub query: Option<SearchQuery>,
	pub page_number: u32,
	pub row_fingerprints: Vec<String>,
	#[serde(default)]
	pub meta: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchPageChargeResponse {
	pub success: bool,
	pub new_balance: i64,
	pub charged_count: u32,
	pub session_key: String,
	pub entry_id: Option<Uuid>,
	pub error: Option<String>,
}

impl TallyService {
	pub fn search_key(&self, query: &SearchQuery) -> SearchKey {
		search_key::derive_key(query)
	}

	/// Bills the rows of one result page that were not billed earlier in the same search.
	///
	/// On `success: false` nothing was recorded and the caller must not advance the page.
	pub async fn charge_search_page(
		&self,
		req: SearchPageChargeRequest,
	) -> Result<SearchPageChargeResponse> {
		let account_id = crate::require_non_empty("account_id", &req.account_id)?;
		let session_key = resolve_session_key(&req)?;
		let scope = gate::search_scope(account_id);

		self.gate
			.with_exclusive_charge(
				&scope,
				self.charge_search_page_exclusive(account_id, session_key, &req),
			)
			.await
	}

	async fn charge_search_page_exclusive(
		&self,
		account_id: &str,
		session_key: String,
		req: &SearchPageChargeRequest,
	) -> Result<SearchPageChargeResponse> {
		let unbilled = self
			.dedup
			.filter_unbilled(self.store.as_ref(), account_id, &session_key, &req.row_fingerprints)
			.await?;

		if unbilled.is_empty() {
			let balance = self.current_balance(account_id).await?;

			tracing::debug!(account_id, page_number = req.page_number, "No unbilled rows on page.");

			return Ok(SearchPageChargeResponse {
				success: true,
				new_balance: balance,
				charged_count: 0,
				session_key,
				entry_id: None,
				error: None,
			});
		}

		let count = unbilled.len();
		let amount = i64::try_from(count)
			.ok()
			.and_then(|count| count.checked_mul(self.cfg.billing.search_row_cost))
			.ok_or_else(|| Error::InvalidRequest {
				message: "Page charge exceeds the representable amount.".to_string(),
			})?;
		let write = LedgerWrite {
			entry_id: Uuid::new_v4(),
			account_id: account_id.to_string(),
			idempotency_key: idempotency::search_page_key(account_id, &session_key, req.page_number),
			action_type: ActionType::SearchPageCharge,
			amount: -amount,
			metadata: json!({
				"search_key": session_key,
				"page_number": req.page_number,
				"billed_count": count,
				"meta": req.meta,
			}),
			refund_of: None,
			fingerprints: Some(FingerprintBatch {
				search_key: session_key.clone(),
				fingerprints: unbilled.clone(),
			}),
		};
		let outcome = self.apply_with_retry(&write).await?;
		let response = match outcome {
			LedgerOutcome::Applied(entry) => {
				self.dedup.record_billed(account_id, &session_key, unbilled);

				SearchPageChargeResponse {
					success: true,
					new_balance: entry.balance_after,
					charged_count: count as u32,
					session_key,
					entry_id: Some(entry.entry_id),
					error: None,
				}
			},
			// Only the rows this page's first charge paid for are billed; the store holds them.
			LedgerOutcome::Replayed(entry) => SearchPageChargeResponse {
				success: true,
				new_balance: self.current_balance(account_id).await?,
				charged_count: 0,
				session_key,
				entry_id: Some(entry.entry_id),
				error: None,
			},
			LedgerOutcome::InsufficientBalance { balance, .. } => SearchPageChargeResponse {
				success: false,
				new_balance: balance,
				charged_count: 0,
				session_key,
				entry_id: None,
				error: Some(crate::INSUFFICIENT_BALANCE.to_string()),
			},
		};

		Ok(response)
	}
}

fn resolve_session_key(req: &SearchPageChargeRequest) -> Result<String> {
	if let Some(key) = req.session_key.as_deref().map(str::trim).filter(|key| !key.is_empty()) {
		return Ok(key.to_string());
	}

	match req.query.as_ref() {
		Some(query) => Ok(search_key::derive_key(query).into_string()),
		None => Err(Error::InvalidRequest {
			message: "Either session_key or query is required.".to_string(),
		}),
	}
}
