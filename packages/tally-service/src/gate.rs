//! Per-scope exclusion for charge attempts.
//!
//! A second attempt on a held scope fails immediately with [`Error::ChargeInProgress`] instead of
//! queueing behind the first. The ledger's idempotency keys remain the final guard against double
//! application; the gate only keeps one client session from racing itself.

use std::{
	collections::HashSet,
	future::Future,
	sync::{Arc, Mutex, MutexGuard},
};

use crate::{Error, Result};

pub fn search_scope(account_id: &str) -> String {
	format!("search:{account_id}")
}

pub fn enrichment_scope(account_id: &str) -> String {
	format!("enrich:{account_id}")
}

#[derive(Clone, Debug, Default)]
pub struct ChargeGate {
	held: Arc<Mutex<HashSet<String>>>,
}
impl ChargeGate {
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims `scope`, or fails if another attempt already holds it.
	pub fn try_acquire(&self, scope: &str) -> Result<ChargePermit> {
		if !lock(&self.held).insert(scope.to_string()) {
			tracing::info!(scope, "Charge attempt rejected while another is in flight.");

			return Err(Error::ChargeInProgress { scope: scope.to_string() });
		}

		Ok(ChargePermit { held: self.held.clone(), scope: scope.to_string() })
	}

	/// Runs `fut` while holding `scope`. The scope is released when the future completes, fails,
	/// or is dropped.
	pub async fn with_exclusive_charge<F, T>(&self, scope: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let _permit = self.try_acquire(scope)?;

		fut.await
	}

	pub fn is_held(&self, scope: &str) -> bool {
		lock(&self.held).contains(scope)
	}
}

/// Holds a gate scope until dropped.
#[derive(Debug)]
pub struct ChargePermit {
	held: Arc<Mutex<HashSet<String>>>,
	scope: String,
}
impl ChargePermit {
	pub fn scope(&self) -> &str {
		&self.scope
	}
}

impl Drop for ChargePermit {
	fn drop(&mut self) {
		lock(&self.held).remove(&self.scope);
	}
}

fn lock(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
	held.lock().unwrap_or_else(|err| err.into_inner())
}
