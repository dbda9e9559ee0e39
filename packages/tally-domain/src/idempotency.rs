//! Idempotency keys for every ledger call site.
//!
//! Keys are deterministic in their inputs so a retried or replayed request lands on the same
//! ledger row instead of creating a new one.

use uuid::Uuid;

/// Caller-supplied parts are length-prefixed, so a `:` inside them cannot make two different
/// `(account, session, page)` triples share a key.
pub fn search_page_key(account_id: &str, session_key: &str, page_number: u32) -> String {
	format!(
		"search:{}:{account_id}:{}:{session_key}:{page_number}",
		account_id.len(),
		session_key.len()
	)
}

pub fn enrichment_key(run_id: Uuid) -> String {
	format!("enrich:{run_id}")
}

/// A refund is keyed by the entry it compensates, so an entry can be refunded at most once.
pub fn refund_key(original_entry_id: Uuid) -> String {
	format!("refund:{original_entry_id}")
}
