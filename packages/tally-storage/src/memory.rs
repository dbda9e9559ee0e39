//! Process-local ledger store.
//!
//! Every operation runs under one mutex, which gives `apply` the same all-or-nothing behavior as
//! the Postgres transaction. Used by tests and by single-process deployments without a database.

use std::{
	collections::{HashMap, HashSet},
	sync::{Mutex, MutexGuard},
};

use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use tally_domain::{fingerprint::SearchSession, state::MeterState};

use crate::{
	BoxFuture, Error, LedgerOutcome, LedgerStore, LedgerWrite, NewEnrichmentRun, Result,
	RunTransition, ledger,
	models::{Account, EnrichmentRun, LedgerEntry},
};

#[derive(Default)]
pub struct MemoryLedgerStore {
	state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
	accounts: HashMap<String, Account>,
	entries: Vec<LedgerEntry>,
	by_key: HashMap<String, usize>,
	by_id: HashMap<Uuid, usize>,
	refunded: HashSet<Uuid>,
	sessions: HashMap<(String, String), SearchSession>,
	runs: HashMap<Uuid, EnrichmentRun>,
}
impl MemoryState {
	fn apply(&mut self, write: &LedgerWrite) -> Result<LedgerOutcome> {
		let Some(balance) = self.accounts.get(&write.account_id).map(|account| account.balance)
		else {
			return Err(Error::AccountNotFound(write.account_id.clone()));
		};

		if let Some(idx) = self.by_key.get(&write.idempotency_key).copied() {
			let existing = self.entries[idx].clone();

			if existing.account_id != write.account_id {
				return Err(Error::Conflict(format!(
					"Idempotency key {} belongs to another account.",
					write.idempotency_key
				)));
			}

			return Ok(LedgerOutcome::Replayed(existing));
		}
		if let Some(required) = ledger::shortfall(balance, write.amount) {
			return Ok(LedgerOutcome::InsufficientBalance { balance, required });
		}

		let original =
			write.refund_of.and_then(|id| self.by_id.get(&id).map(|idx| &self.entries[*idx]));
		let already_refunded = write.refund_of.is_some_and(|id| self.refunded.contains(&id));

		ledger::check_refund_target(write, original, already_refunded)?;

		let now = OffsetDateTime::now_utc();
		let balance_after = ledger::balance_after(balance, write.amount)?;
		let entry = LedgerEntry {
			entry_id: write.entry_id,
			seq: self.entries.len() as i64 + 1,
			account_id: write.account_id.clone(),
			idempotency_key: write.idempotency_key.clone(),
			action_type: write.action_type.as_str().to_string(),
			amount: write.amount,
			balance_after,
			refund_of: write.refund_of,
			metadata: write.metadata.clone(),
			created_at: now,
		};
		let idx = self.entries.len();

		if self.by_id.contains_key(&entry.entry_id) {
			return Err(Error::Conflict(format!("Ledger entry {} already exists.", entry.entry_id)));
		}

		self.by_key.insert(entry.idempotency_key.clone(), idx);
		self.by_id.insert(entry.entry_id, idx);

		if let Some(refund_of) = write.refund_of {
			self.refunded.insert(refund_of);
		}
		if let Some(account) = self.accounts.get_mut(&write.account_id) {
			account.balance = balance_after;
			account.updated_at = now;
		}

		self.entries.push(entry.clone());
		self.merge_fingerprints(write);

		Ok(LedgerOutcome::Applied(entry))
	}

	fn merge_fingerprints(&mut self, write: &LedgerWrite) {
		let Some(batch) = write.fingerprints.as_ref() else {
			return;
		};

		self.sessions
			.entry((write.account_id.clone(), batch.search_key.clone()))
			.or_insert_with(|| SearchSession::new(batch.search_key.clone()))
			.merge(batch.fingerprints.iter().cloned());
	}
}

impl MemoryLedgerStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, MemoryState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}

impl LedgerStore for MemoryLedgerStore {
	fn open_account<'a>(
		&'a self,
		account_id: &'a str,
		initial_balance: i64,
	) -> BoxFuture<'a, Result<Account>> {
		Box::pin(async move {
			if initial_balance < 0 {
				return Err(Error::InvalidArgument(
					"Initial balance must be zero or greater.".to_string(),
				));
			}

			let mut state = self.lock();
			let now = OffsetDateTime::now_utc();
			let account = state.accounts.entry(account_id.to_string()).or_insert_with(|| Account {
				account_id: account_id.to_string(),
				balance: initial_balance,
				created_at: now,
				updated_at: now,
			});

			Ok(account.clone())
		})
	}

	fn account<'a>(&'a self, account_id: &'a str) -> BoxFuture<'a, Result<Option<Account>>> {
		Box::pin(async move { Ok(self.lock().accounts.get(account_id).cloned()) })
	}

	fn apply<'a>(&'a self, write: &'a LedgerWrite) -> BoxFuture<'a, Result<LedgerOutcome>> {
		Box::pin(async move { self.lock().apply(write) })
	}

	fn entry<'a>(&'a self, entry_id: Uuid) -> BoxFuture<'a, Result<Option<LedgerEntry>>> {
		Box::pin(async move {
			let state = self.lock();

			Ok(state.by_id.get(&entry_id).map(|idx| state.entries[*idx].clone()))
		})
	}

	fn entries<'a>(
		&'a self,
		account_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
		Box::pin(async move {
			let state = self.lock();

			Ok(state
				.entries
				.iter()
				.rev()
				.filter(|entry| entry.account_id == account_id)
				.take(limit as usize)
				.cloned()
				.collect())
		})
	}

	fn billed_fingerprints<'a>(
		&'a self,
		account_id: &'a str,
		search_key: &'a str,
		candidates: &'a [String],
	) -> BoxFuture<'a, Result<HashSet<String>>> {
		Box::pin(async move {
			let state = self.lock();
			let Some(session) =
				state.sessions.get(&(account_id.to_string(), search_key.to_string()))
			else {
				return Ok(HashSet::new());
			};

			Ok(candidates
				.iter()
				.filter(|fingerprint| session.charged_fingerprints().contains(*fingerprint))
				.cloned()
				.collect())
		})
	}

	fn start_enrichment_run<'a>(
		&'a self,
		run: &'a NewEnrichmentRun,
	) -> BoxFuture<'a, Result<EnrichmentRun>> {
		Box::pin(async move {
			let mut state = self.lock();

			if !state.accounts.contains_key(&run.account_id) {
				return Err(Error::AccountNotFound(run.account_id.clone()));
			}
			if let Some(existing) = state.runs.get(&run.run_id) {
				if existing.account_id != run.account_id || existing.target_id != run.target_id {
					return Err(Error::Conflict(format!(
						"Enrichment run {} was started for another target.",
						run.run_id
					)));
				}

				return Ok(existing.clone());
			}

			let now = OffsetDateTime::now_utc();
			let created = EnrichmentRun {
				run_id: run.run_id,
				account_id: run.account_id.clone(),
				target_id: run.target_id.clone(),
				idempotency_key: run.idempotency_key.clone(),
				state: MeterState::Pending.as_str().to_string(),
				charged: false,
				charge_entry_id: None,
				refund_entry_id: None,
				result_summary: json!({}),
				created_at: now,
				updated_at: now,
			};

			state.runs.insert(run.run_id, created.clone());

			Ok(created)
		})
	}

	fn enrichment_run<'a>(
		&'a self,
		run_id: Uuid,
	) -> BoxFuture<'a, Result<Option<EnrichmentRun>>> {
		Box::pin(async move { Ok(self.lock().runs.get(&run_id).cloned()) })
	}

	fn transition_enrichment_run<'a>(
		&'a self,
		transition: &'a RunTransition,
	) -> BoxFuture<'a, Result<EnrichmentRun>> {
		Box::pin(async move {
			crate::ledger::check_transition(transition)?;

			let mut state = self.lock();
			let Some(run) = state.runs.get_mut(&transition.run_id) else {
				return Err(Error::NotFound(format!(
					"Enrichment run {} does not exist.",
					transition.run_id
				)));
			};

			if run.state != transition.from.as_str() {
				return Err(Error::Conflict(format!(
					"Enrichment run {} is {}, expected {}.",
					transition.run_id, run.state, transition.from
				)));
			}

			run.state = transition.to.as_str().to_string();
			run.charged = transition.to.has_net_charge();
			run.charge_entry_id = transition.charge_entry_id.or(run.charge_entry_id);
			run.refund_entry_id = transition.refund_entry_id.or(run.refund_entry_id);

			if let Some(summary) = transition.result_summary.clone() {
				run.result_summary = summary;
			}

			run.updated_at = OffsetDateTime::now_utc();

			Ok(run.clone())
		})
	}
}
