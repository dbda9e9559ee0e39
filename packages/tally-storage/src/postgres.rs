use std::collections::HashSet;

use serde_json::json;
use sqlx::{PgConnection, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use tally_domain::state::MeterState;

use crate::{
	BoxFuture, Error, LedgerOutcome, LedgerStore, LedgerWrite, NewEnrichmentRun, Result,
	RunTransition,
	db::Db,
	ledger,
	models::{Account, EnrichmentRun, LedgerEntry},
};

const ENTRY_COLUMNS: &str = "\
entry_id, seq, account_id, idempotency_key, action_type, amount, balance_after, refund_of, \
metadata, created_at";
const RUN_COLUMNS: &str = "\
run_id, account_id, target_id, idempotency_key, state, charged, charge_entry_id, \
refund_entry_id, result_summary, created_at, updated_at";

pub struct PgLedgerStore {
	db: Db,
}
impl PgLedgerStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	pub fn db(&self) -> &Db {
		&self.db
	}

	async fn apply_tx(&self, write: &LedgerWrite) -> Result<LedgerOutcome> {
		let mut tx = self.db.pool.begin().await?;
		// The row lock serializes every mutation of this account, including concurrent attempts
		// with the same idempotency key.
		let balance: Option<i64> =
			sqlx::query_scalar("SELECT balance FROM accounts WHERE account_id = $1 FOR UPDATE")
				.bind(write.account_id.as_str())
				.fetch_optional(&mut *tx)
				.await?;
		let Some(balance) = balance else {
			return Err(Error::AccountNotFound(write.account_id.clone()));
		};

		if let Some(existing) =
			fetch_entry_by_key(&mut tx, write.idempotency_key.as_str()).await?
		{
			if existing.account_id != write.account_id {
				return Err(Error::Conflict(format!(
					"Idempotency key {} belongs to another account.",
					write.idempotency_key
				)));
			}

			tx.rollback().await?;

			return Ok(LedgerOutcome::Replayed(existing));
		}
		if let Some(required) = ledger::shortfall(balance, write.amount) {
			tx.rollback().await?;

			return Ok(LedgerOutcome::InsufficientBalance { balance, required });
		}
		if let Some(refund_of) = write.refund_of {
			let original = fetch_entry(&mut *tx, refund_of).await?;
			let already_refunded: bool = sqlx::query_scalar(
				"SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE refund_of = $1)",
			)
			.bind(refund_of)
			.fetch_one(&mut *tx)
			.await?;

			ledger::check_refund_target(write, original.as_ref(), already_refunded)?;
		}

		let now = OffsetDateTime::now_utc();
		let balance_after = ledger::balance_after(balance, write.amount)?;
		let insert = format!(
			"\
INSERT INTO ledger_entries (
	entry_id,
	account_id,
	idempotency_key,
	action_type,
	amount,
	balance_after,
	refund_of,
	metadata,
	created_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
RETURNING {ENTRY_COLUMNS}"
		);
		let entry: LedgerEntry = sqlx::query_as(&insert)
			.bind(write.entry_id)
			.bind(write.account_id.as_str())
			.bind(write.idempotency_key.as_str())
			.bind(write.action_type.as_str())
			.bind(write.amount)
			.bind(balance_after)
			.bind(write.refund_of)
			.bind(&write.metadata)
			.bind(now)
			.fetch_one(&mut *tx)
			.await
			.map_err(Error::from)
			.map_err(|err| {
				if err.is_unique_violation() {
					Error::Conflict(format!(
						"Ledger entry {} or idempotency key {} already exists.",
						write.entry_id, write.idempotency_key
					))
				} else {
					err
				}
			})?;

		sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE account_id = $3")
			.bind(balance_after)
			.bind(now)
			.bind(write.account_id.as_str())
			.execute(&mut *tx)
			.await?;

		merge_fingerprints(&mut tx, write, entry.entry_id).await?;

		tx.commit().await?;

		Ok(LedgerOutcome::Applied(entry))
	}
}

impl LedgerStore for PgLedgerStore {
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

			sqlx::query(
				"\
INSERT INTO accounts (account_id, balance)
VALUES ($1, $2)
ON CONFLICT (account_id) DO NOTHING",
			)
			.bind(account_id)
			.bind(initial_balance)
			.execute(&self.db.pool)
			.await?;

			let account: Account = sqlx::query_as(
				"\
SELECT account_id, balance, created_at, updated_at
FROM accounts
WHERE account_id = $1",
			)
			.bind(account_id)
			.fetch_one(&self.db.pool)
			.await?;

			Ok(account)
		})
	}

	fn account<'a>(&'a self, account_id: &'a str) -> BoxFuture<'a, Result<Option<Account>>> {
		Box::pin(async move {
			let account = sqlx::query_as(
				"\
SELECT account_id, balance, created_at, updated_at
FROM accounts
WHERE account_id = $1",
			)
			.bind(account_id)
			.fetch_optional(&self.db.pool)
			.await?;

			Ok(account)
		})
	}

	fn apply<'a>(&'a self, write: &'a LedgerWrite) -> BoxFuture<'a, Result<LedgerOutcome>> {
		Box::pin(self.apply_tx(write))
	}

	fn entry<'a>(&'a self, entry_id: Uuid) -> BoxFuture<'a, Result<Option<LedgerEntry>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			fetch_entry(&mut *conn, entry_id).await
		})
	}

	fn entries<'a>(
		&'a self,
		account_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
		Box::pin(async move {
			let sql = format!(
				"\
SELECT {ENTRY_COLUMNS}
FROM ledger_entries
WHERE account_id = $1
ORDER BY seq DESC
LIMIT $2"
			);
			let entries = sqlx::query_as(&sql)
				.bind(account_id)
				.bind(i64::from(limit))
				.fetch_all(&self.db.pool)
				.await?;

			Ok(entries)
		})
	}

	fn billed_fingerprints<'a>(
		&'a self,
		account_id: &'a str,
		search_key: &'a str,
		candidates: &'a [String],
	) -> BoxFuture<'a, Result<HashSet<String>>> {
		Box::pin(async move {
			if candidates.is_empty() {
				return Ok(HashSet::new());
			}

			let billed: Vec<String> = sqlx::query_scalar(
				"\
SELECT fingerprint
FROM search_fingerprints
WHERE account_id = $1
	AND search_key = $2
	AND fingerprint = ANY($3)",
			)
			.bind(account_id)
			.bind(search_key)
			.bind(candidates)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(billed.into_iter().collect())
		})
	}

	fn start_enrichment_run<'a>(
		&'a self,
		run: &'a NewEnrichmentRun,
	) -> BoxFuture<'a, Result<EnrichmentRun>> {
		Box::pin(async move {
			let exists: bool =
				sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE account_id = $1)")
					.bind(run.account_id.as_str())
					.fetch_one(&self.db.pool)
					.await?;

			if !exists {
				return Err(Error::AccountNotFound(run.account_id.clone()));
			}

			sqlx::query(
				"\
INSERT INTO enrichment_runs (run_id, account_id, target_id, idempotency_key, state, result_summary)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (run_id) DO NOTHING",
			)
			.bind(run.run_id)
			.bind(run.account_id.as_str())
			.bind(run.target_id.as_str())
			.bind(run.idempotency_key.as_str())
			.bind(MeterState::Pending.as_str())
			.bind(json!({}))
			.execute(&self.db.pool)
			.await?;

			let stored = self.enrichment_run(run.run_id).await?.ok_or_else(|| {
				Error::NotFound(format!("Enrichment run {} does not exist.", run.run_id))
			})?;

			if stored.account_id != run.account_id || stored.target_id != run.target_id {
				return Err(Error::Conflict(format!(
					"Enrichment run {} was started for another target.",
					run.run_id
				)));
			}

			Ok(stored)
		})
	}

	fn enrichment_run<'a>(
		&'a self,
		run_id: Uuid,
	) -> BoxFuture<'a, Result<Option<EnrichmentRun>>> {
		Box::pin(async move {
			let sql = format!("SELECT {RUN_COLUMNS} FROM enrichment_runs WHERE run_id = $1");
			let run = sqlx::query_as(&sql).bind(run_id).fetch_optional(&self.db.pool).await?;

			Ok(run)
		})
	}

	fn transition_enrichment_run<'a>(
		&'a self,
		transition: &'a RunTransition,
	) -> BoxFuture<'a, Result<EnrichmentRun>> {
		Box::pin(async move {
			crate::ledger::check_transition(transition)?;

			let sql = format!(
				"\
UPDATE enrichment_runs
SET
	state = $1,
	charged = $2,
	charge_entry_id = COALESCE($3, charge_entry_id),
	refund_entry_id = COALESCE($4, refund_entry_id),
	result_summary = COALESCE($5, result_summary),
	updated_at = $6
WHERE run_id = $7 AND state = $8
RETURNING {RUN_COLUMNS}"
			);
			let updated: Option<EnrichmentRun> = sqlx::query_as(&sql)
				.bind(transition.to.as_str())
				.bind(transition.to.has_net_charge())
				.bind(transition.charge_entry_id)
				.bind(transition.refund_entry_id)
				.bind(transition.result_summary.as_ref())
				.bind(OffsetDateTime::now_utc())
				.bind(transition.run_id)
				.bind(transition.from.as_str())
				.fetch_optional(&self.db.pool)
				.await?;

			if let Some(run) = updated {
				return Ok(run);
			}

			match self.enrichment_run(transition.run_id).await? {
				Some(run) => Err(Error::Conflict(format!(
					"Enrichment run {} is {}, expected {}.",
					transition.run_id, run.state, transition.from
				))),
				None => Err(Error::NotFound(format!(
					"Enrichment run {} does not exist.",
					transition.run_id
				))),
			}
		})
	}
}

async fn fetch_entry(conn: &mut PgConnection, entry_id: Uuid) -> Result<Option<LedgerEntry>> {
	let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE entry_id = $1");
	let entry = sqlx::query_as(&sql).bind(entry_id).fetch_optional(conn).await?;

	Ok(entry)
}

async fn fetch_entry_by_key(
	tx: &mut Transaction<'_, Postgres>,
	idempotency_key: &str,
) -> Result<Option<LedgerEntry>> {
	let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1");
	let entry = sqlx::query_as(&sql).bind(idempotency_key).fetch_optional(&mut **tx).await?;

	Ok(entry)
}

async fn merge_fingerprints(
	tx: &mut Transaction<'_, Postgres>,
	write: &LedgerWrite,
	entry_id: Uuid,
) -> Result<()> {
	let Some(batch) = write.fingerprints.as_ref() else {
		return Ok(());
	};

	if batch.fingerprints.is_empty() {
		return Ok(());
	}

	sqlx::query(
		"\
INSERT INTO search_fingerprints (account_id, search_key, fingerprint, entry_id, created_at)
SELECT $1, $2, fingerprint, $3, $4
FROM UNNEST($5::text[]) AS fingerprint
ON CONFLICT (account_id, search_key, fingerprint) DO NOTHING",
	)
	.bind(write.account_id.as_str())
	.bind(batch.search_key.as_str())
	.bind(entry_id)
	.bind(OffsetDateTime::now_utc())
	.bind(&batch.fingerprints)
	.execute(&mut **tx)
	.await?;

	Ok(())
}
