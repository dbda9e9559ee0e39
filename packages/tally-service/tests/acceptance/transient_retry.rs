use std::sync::{Arc, atomic::Ordering};

use serde_json::Value;

use tally_domain::action::ActionType;
use tally_service::{Error, LedgerRequest};

use super::ScriptedStore;

#[tokio::test]
async fn lost_acknowledgements_are_retried_without_double_charging() {
	let store = Arc::new(ScriptedStore::with_lost_acks(2));
	let service = super::service_on(store.clone(), 10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("Charge failed after retries.");

	assert!(response.success);
	assert_eq!(response.charged_count, 3);
	assert_eq!(response.new_balance, 7);
	assert_eq!(store.apply_count(), 3);
	assert_eq!(super::balance_of(&service, "acct-1").await, 7);
	assert_eq!(super::entry_count(&service, "acct-1").await, 1);
}

#[tokio::test]
async fn exhausted_retries_surface_a_transient_error() {
	let store = Arc::new(ScriptedStore::with_lost_acks(3));
	let service = super::service_on(store.clone(), 10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let err = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect_err("Expected transient failure.");

	assert!(matches!(err, Error::TransientStore { .. }), "Unexpected error: {err:?}");
	assert_eq!(store.apply_count(), 3);

	let retry = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect("Caller retry failed.");

	assert!(retry.success);
	assert_eq!(retry.charged_count, 0);
	assert_eq!(retry.new_balance, 8);
	assert_eq!(super::entry_count(&service, "acct-1").await, 1);
}

#[tokio::test]
async fn retry_of_a_key_committed_by_an_earlier_call_stays_a_replay() {
	let store = Arc::new(ScriptedStore::new());
	let service = super::service_on(store.clone(), 10);
	let request = LedgerRequest {
		account_id: "acct-1".to_string(),
		idempotency_key: "order-7".to_string(),
		action_type: ActionType::SearchPageCharge,
		amount: -4,
		metadata: Value::Null,
		refund_of: None,
		fingerprints: None,
	};

	service.open_account("acct-1").await.expect("Failed to open account.");

	let first = service.charge_or_refund(request.clone()).await.expect("First charge failed.");

	assert!(!first.replayed);

	store.failures_before_commit.store(1, Ordering::SeqCst);

	let second = service.charge_or_refund(request).await.expect("Retried charge failed.");

	assert!(second.success);
	assert!(second.replayed);
	assert_eq!(second.entry_id, first.entry_id);
	assert_eq!(second.new_balance, 6);
	assert_eq!(store.apply_count(), 3);
}
