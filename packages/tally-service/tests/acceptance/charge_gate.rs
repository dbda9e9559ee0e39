use std::{sync::Arc, time::Duration};

use tally_service::Error;

use super::ScriptedStore;

#[tokio::test]
async fn concurrent_charge_for_the_same_scope_fails_fast() {
	let store = Arc::new(ScriptedStore::with_delay(Duration::from_millis(50)));
	let service = super::service_on(store.clone(), 10);

	service.open_account("acct-1").await.expect("Failed to open account.");
	service.open_account("acct-2").await.expect("Failed to open account.");

	let (first, contended, other_account) = tokio::join!(
		service.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"])),
		service.charge_search_page(super::page("acct-1", "s1", 2, &["c"])),
		service.charge_search_page(super::page("acct-2", "s1", 1, &["a"])),
	);
	let first = first.expect("First charge failed.");
	let err = contended.expect_err("Expected gate contention.");
	let other_account = other_account.expect("Other account charge failed.");

	assert_eq!(first.charged_count, 2);
	assert!(
		matches!(err, Error::ChargeInProgress { ref scope } if scope == "search:acct-1"),
		"Unexpected error: {err:?}"
	);
	assert_eq!(other_account.charged_count, 1);
	assert_eq!(store.apply_count(), 2);
	assert!(!service.gate.is_held("search:acct-1"));

	let retried = service
		.charge_search_page(super::page("acct-1", "s1", 2, &["c"]))
		.await
		.expect("Retry after release failed.");

	assert_eq!(retried.charged_count, 1);
	assert_eq!(retried.new_balance, 7);
}

#[tokio::test]
async fn search_and_enrichment_scopes_do_not_contend() {
	let store = Arc::new(ScriptedStore::with_delay(Duration::from_millis(50)));
	let service = super::service_on(store, 10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let (search, enrichment) = tokio::join!(
		service.charge_search_page(super::page("acct-1", "s1", 1, &["a"])),
		service.charge_enrichment(tally_service::EnrichmentChargeRequest {
			account_id: "acct-1".to_string(),
			target_id: "buyer-1".to_string(),
			run_id: uuid::Uuid::new_v4(),
			before: serde_json::Map::new(),
			fields: vec![super::field("email", "sales@acme.test", "contact page")],
		}),
	);

	assert_eq!(search.expect("Search charge failed.").charged_count, 1);
	assert!(enrichment.expect("Enrichment charge failed.").charged);
	assert_eq!(super::balance_of(&service, "acct-1").await, 4);
}
