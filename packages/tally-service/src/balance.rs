use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, TallyService};
use tally_domain::action::ActionType;
use tally_storage::models::{Account, LedgerEntry};

pub const MAX_ENTRY_LIMIT: u32 = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
	pub account_id: String,
	pub balance: i64,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl From<Account> for BalanceResponse {
	fn from(account: Account) -> Self {
		Self {
			account_id: account.account_id,
			balance: account.balance,
			updated_at: account.updated_at,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntryView {
	pub entry_id: Uuid,
	pub seq: i64,
	pub idempotency_key: String,
	pub action_type: ActionType,
	pub amount: i64,
	pub balance_after: i64,
	pub refund_of: Option<Uuid>,
	pub metadata: Value,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl TryFrom<LedgerEntry> for LedgerEntryView {
	type Error = Error;

	fn try_from(entry: LedgerEntry) -> Result<Self> {
		Ok(Self {
			action_type: entry.action()?,
			entry_id: entry.entry_id,
			seq: entry.seq,
			idempotency_key: entry.idempotency_key,
			amount: entry.amount,
			balance_after: entry.balance_after,
			refund_of: entry.refund_of,
			metadata: entry.metadata,
			created_at: entry.created_at,
		})
	}
}

impl TallyService {
	/// Opens the account with the configured initial credits. Opening an existing account
	/// returns it unchanged.
	pub async fn open_account(&self, account_id: &str) -> Result<BalanceResponse> {
		let account_id = crate::require_non_empty("account_id", account_id)?;
		let account =
			self.store.open_account(account_id, self.cfg.billing.initial_credits).await?;

		tracing::info!(account_id, balance = account.balance, "Account opened.");

		Ok(account.into())
	}

	pub async fn balance(&self, account_id: &str) -> Result<BalanceResponse> {
		let account_id = crate::require_non_empty("account_id", account_id)?;

		Ok(self.load_account(account_id).await?.into())
	}

	/// Most recent entries first, at most [`MAX_ENTRY_LIMIT`].
	pub async fn ledger_entries(
		&self,
		account_id: &str,
		limit: u32,
	) -> Result<Vec<LedgerEntryView>> {
		let account_id = crate::require_non_empty("account_id", account_id)?;

		if limit == 0 {
			return Err(Error::InvalidRequest {
				message: "limit must be greater than zero.".to_string(),
			});
		}

		self.load_account(account_id).await?;

		self.store
			.entries(account_id, limit.min(MAX_ENTRY_LIMIT))
			.await?
			.into_iter()
			.map(LedgerEntryView::try_from)
			.collect()
	}

	pub(crate) async fn current_balance(&self, account_id: &str) -> Result<i64> {
		Ok(self.load_account(account_id).await?.balance)
	}

	async fn load_account(&self, account_id: &str) -> Result<Account> {
		self.store
			.account(account_id)
			.await?
			.ok_or_else(|| Error::AccountNotFound { account_id: account_id.to_string() })
	}
}
