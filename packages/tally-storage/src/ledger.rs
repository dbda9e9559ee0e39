//! The credit ledger contract shared by the Postgres and in-memory stores.

use std::{collections::HashSet, future::Future, pin::Pin};

use serde_json::Value;
use uuid::Uuid;

use tally_domain::{action::ActionType, state::MeterState};

use crate::{
	Result,
	models::{Account, EnrichmentRun, LedgerEntry},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One balance mutation, applied atomically by [`LedgerStore::apply`].
#[derive(Clone, Debug)]
pub struct LedgerWrite {
	/// Id the entry receives if this write is applied. A replay returning this id is a retry of
	/// this same write.
	pub entry_id: Uuid,
	pub account_id: String,
	pub idempotency_key: String,
	pub action_type: ActionType,
	/// Negative for charges, positive for refunds.
	pub amount: i64,
	pub metadata: Value,
	/// The charge entry a refund compensates.
	pub refund_of: Option<Uuid>,
	/// Fingerprints recorded as billed in the same transaction as the entry. Ignored on replay.
	pub fingerprints: Option<FingerprintBatch>,
}

#[derive(Clone, Debug)]
pub struct FingerprintBatch {
	pub search_key: String,
	pub fingerprints: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum LedgerOutcome {
	Applied(LedgerEntry),
	/// The idempotency key was already used; the original entry is returned untouched.
	Replayed(LedgerEntry),
	InsufficientBalance {
		balance: i64,
		required: i64,
	},
}
impl LedgerOutcome {
	pub fn entry(&self) -> Option<&LedgerEntry> {
		match self {
			Self::Applied(entry) | Self::Replayed(entry) => Some(entry),
			Self::InsufficientBalance { .. } => None,
		}
	}
}

#[derive(Clone, Debug)]
pub struct NewEnrichmentRun {
	pub run_id: Uuid,
	pub account_id: String,
	pub target_id: String,
	pub idempotency_key: String,
}

/// A guarded state change of an enrichment run.
///
/// Applied only when the stored state equals `from`; otherwise the store reports a conflict.
#[derive(Clone, Debug)]
pub struct RunTransition {
	pub run_id: Uuid,
	pub from: MeterState,
	pub to: MeterState,
	pub charge_entry_id: Option<Uuid>,
	pub refund_entry_id: Option<Uuid>,
	pub result_summary: Option<Value>,
}

pub trait LedgerStore
where
	Self: Send + Sync,
{
	/// Creates the account with `initial_balance`, or returns it unchanged if it exists.
	fn open_account<'a>(
		&'a self,
		account_id: &'a str,
		initial_balance: i64,
	) -> BoxFuture<'a, Result<Account>>;

	fn account<'a>(&'a self, account_id: &'a str) -> BoxFuture<'a, Result<Option<Account>>>;

	/// Checks the idempotency key, checks the balance, appends the entry, and moves the balance,
	/// all in one transaction.
	fn apply<'a>(&'a self, write: &'a LedgerWrite) -> BoxFuture<'a, Result<LedgerOutcome>>;

	fn entry<'a>(&'a self, entry_id: Uuid) -> BoxFuture<'a, Result<Option<LedgerEntry>>>;

	/// Most recent entries first.
	fn entries<'a>(
		&'a self,
		account_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<LedgerEntry>>>;

	/// The subset of `candidates` already billed under `(account_id, search_key)`.
	fn billed_fingerprints<'a>(
		&'a self,
		account_id: &'a str,
		search_key: &'a str,
		candidates: &'a [String],
	) -> BoxFuture<'a, Result<HashSet<String>>>;

	/// Inserts a `PENDING` run, or returns the existing run with the same id.
	fn start_enrichment_run<'a>(
		&'a self,
		run: &'a NewEnrichmentRun,
	) -> BoxFuture<'a, Result<EnrichmentRun>>;

	fn enrichment_run<'a>(&'a self, run_id: Uuid)
	-> BoxFuture<'a, Result<Option<EnrichmentRun>>>;

	fn transition_enrichment_run<'a>(
		&'a self,
		transition: &'a RunTransition,
	) -> BoxFuture<'a, Result<EnrichmentRun>>;
}

/// The amount a charge needs when `balance` cannot cover it, or `None` when it can.
pub(crate) fn shortfall(balance: i64, amount: i64) -> Option<i64> {
	if amount >= 0 || balance.checked_add(amount).is_some_and(|after| after >= 0) {
		return None;
	}

	Some(amount.saturating_neg())
}

pub(crate) fn balance_after(balance: i64, amount: i64) -> Result<i64> {
	balance.checked_add(amount).ok_or_else(|| {
		crate::Error::InvalidArgument(format!("Balance {balance} cannot move by {amount}."))
	})
}

/// Rejects transitions the metering state machine does not allow.
pub(crate) fn check_transition(transition: &RunTransition) -> Result<()> {
	if transition.from.can_transition_to(transition.to) {
		return Ok(());
	}

	Err(crate::Error::InvalidArgument(format!(
		"Enrichment run cannot move from {} to {}.",
		transition.from, transition.to
	)))
}

/// Validation shared by both stores before a refund is written.
pub(crate) fn check_refund_target(
	write: &LedgerWrite,
	original: Option<&LedgerEntry>,
	already_refunded: bool,
) -> Result<()> {
	use crate::Error;

	let Some(refund_of) = write.refund_of else {
		return Ok(());
	};
	let Some(original) = original else {
		return Err(Error::NotFound(format!("Ledger entry {refund_of} does not exist.")));
	};

	if original.account_id != write.account_id {
		return Err(Error::InvalidArgument(format!(
			"Ledger entry {refund_of} belongs to another account."
		)));
	}
	if !original.action()?.is_charge() {
		return Err(Error::InvalidArgument(format!("Ledger entry {refund_of} is not a charge.")));
	}
	if original.amount.checked_neg() != Some(write.amount) {
		return Err(Error::InvalidArgument(format!(
			"Refund amount {} does not match charge {refund_of} of {}.",
			write.amount, original.amount
		)));
	}
	if already_refunded {
		return Err(Error::Conflict(format!("Ledger entry {refund_of} is already refunded.")));
	}

	Ok(())
}
