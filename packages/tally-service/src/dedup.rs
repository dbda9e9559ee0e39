use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

use tally_domain::fingerprint::{self, SearchSession};
use tally_storage::LedgerStore;

use crate::Result;

/// Filters search rows down to the ones not yet billed for an account's current search.
///
/// The store is authoritative. The in-process cache holds only fingerprints whose charge
/// committed, so it can drop candidates early but never bills anything the store would not.
#[derive(Debug, Default)]
pub struct FingerprintDeduper {
	sessions: Mutex<HashMap<String, SearchSession>>,
}
impl FingerprintDeduper {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn filter_unbilled(
		&self,
		store: &dyn LedgerStore,
		account_id: &str,
		session_key: &str,
		candidates: &[String],
	) -> Result<Vec<String>> {
		let normalized = fingerprint::normalize(candidates);

		if normalized.is_empty() {
			return Ok(Vec::new());
		}

		let remaining = {
			let mut sessions = self.lock();
			let session = sessions
				.entry(account_id.to_string())
				.or_insert_with(|| SearchSession::new(session_key));

			if session.rekey(session_key) {
				tracing::debug!(account_id, session_key, "Search session replaced.");
			}

			session.filter_unbilled(&normalized)
		};

		if remaining.is_empty() {
			return Ok(remaining);
		}

		let billed = store.billed_fingerprints(account_id, session_key, &remaining).await?;
		let unbilled = fingerprint::unbilled(&remaining, &billed);

		if !billed.is_empty() {
			self.record_billed(account_id, session_key, billed);
		}

		Ok(unbilled)
	}

	/// Adds fingerprints whose charge committed under `session_key` to the cache.
	pub fn record_billed<I>(&self, account_id: &str, session_key: &str, billed: I)
	where
		I: IntoIterator<Item = String>,
	{
		let mut sessions = self.lock();
		let session = sessions
			.entry(account_id.to_string())
			.or_insert_with(|| SearchSession::new(session_key));

		session.rekey(session_key);
		session.merge(billed);
	}

	/// A snapshot of the cached session for `account_id`.
	pub fn session(&self, account_id: &str) -> Option<SearchSession> {
		self.lock().get(account_id).cloned()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, SearchSession>> {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner())
	}
}
