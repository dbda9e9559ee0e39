use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use tally_domain::{action::ActionType, state::MeterState};

use crate::{Error, Result};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Account {
	pub account_id: String,
	pub balance: i64,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LedgerEntry {
	pub entry_id: Uuid,
	pub seq: i64,
	pub account_id: String,
	pub idempotency_key: String,
	pub action_type: String,
	pub amount: i64,
	pub balance_after: i64,
	pub refund_of: Option<Uuid>,
	pub metadata: Value,
	pub created_at: OffsetDateTime,
}
impl LedgerEntry {
	pub fn action(&self) -> Result<ActionType> {
		self.action_type.parse().map_err(|err: tally_domain::ParseError| {
			Error::Corrupt(format!("ledger entry {}: {err}", self.entry_id))
		})
	}
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct EnrichmentRun {
	pub run_id: Uuid,
	pub account_id: String,
	pub target_id: String,
	pub idempotency_key: String,
	pub state: String,
	pub charged: bool,
	pub charge_entry_id: Option<Uuid>,
	pub refund_entry_id: Option<Uuid>,
	pub result_summary: Value,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl EnrichmentRun {
	pub fn meter_state(&self) -> Result<MeterState> {
		self.state.parse().map_err(|err: tally_domain::ParseError| {
			Error::Corrupt(format!("enrichment run {}: {err}", self.run_id))
		})
	}
}
