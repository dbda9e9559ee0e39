use tally_domain::{
	idempotency::search_page_key,
	search_key::{SearchFilter, SearchQuery},
};
use tally_service::{Error, SearchPageChargeRequest};

#[tokio::test]
async fn identical_page_requests_charge_once() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let first = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("First charge failed.");

	assert!(first.success);
	assert_eq!(first.charged_count, 3);
	assert_eq!(first.new_balance, 7);

	for _ in 0..3 {
		let again = service
			.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
			.await
			.expect("Repeated charge failed.");

		assert!(again.success);
		assert_eq!(again.charged_count, 0);
		assert_eq!(again.new_balance, 7);
	}

	assert_eq!(super::entry_count(&service, "acct-1").await, 1);
}

#[tokio::test]
async fn pagination_bills_only_new_rows() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let page_one = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("Page 1 failed.");
	let page_two = service
		.charge_search_page(super::page("acct-1", "s1", 2, &["c", "d", "e"]))
		.await
		.expect("Page 2 failed.");
	let revisit = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("Revisit failed.");

	assert_eq!(page_one.charged_count, 3);
	assert_eq!(page_two.charged_count, 2);
	assert_eq!(page_two.new_balance, 5);
	assert_eq!(revisit.charged_count, 0);
	assert_eq!(revisit.new_balance, 5);
	assert_eq!(super::balance_of(&service, "acct-1").await, 5);
}

#[tokio::test]
async fn insufficient_balance_blocks_the_page() {
	let service = super::memory_service(1);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("Charge call failed.");

	assert!(!response.success);
	assert_eq!(response.error.as_deref(), Some("INSUFFICIENT_BALANCE"));
	assert_eq!(response.charged_count, 0);
	assert_eq!(response.new_balance, 1);
	assert_eq!(super::balance_of(&service, "acct-1").await, 1);
	assert_eq!(super::entry_count(&service, "acct-1").await, 0);

	let session = service.dedup.session("acct-1").expect("Missing cached session.");

	assert!(session.is_empty(), "Rejected rows must not be recorded as billed.");

	let affordable = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a"]))
		.await
		.expect("Affordable charge failed.");

	assert!(affordable.success);
	assert_eq!(affordable.charged_count, 1);
	assert_eq!(affordable.new_balance, 0);
}

#[tokio::test]
async fn a_new_search_bills_the_same_rows_again() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");
	service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect("First search failed.");

	let other_search = service
		.charge_search_page(super::page("acct-1", "s2", 1, &["a", "b"]))
		.await
		.expect("Second search failed.");

	assert_eq!(other_search.charged_count, 2);
	assert_eq!(other_search.new_balance, 6);
}

#[tokio::test]
async fn session_key_is_derived_from_the_query() {
	let service = super::memory_service(10);
	let query = SearchQuery {
		keyword: Some(" led lights ".to_string()),
		category: Some("electronics".to_string()),
		filters: vec![SearchFilter { filter_type: "country".to_string(), value: "DE".to_string() }],
		..Default::default()
	};
	let expected = service.search_key(&query);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_search_page(SearchPageChargeRequest {
			account_id: "acct-1".to_string(),
			session_key: None,
			query: Some(query),
			page_number: 1,
			row_fingerprints: super::rows(&["a"]),
			meta: serde_json::json!({ "source": "importers" }),
		})
		.await
		.expect("Charge failed.");

	assert_eq!(response.session_key, expected.as_str());

	let entries = service.ledger_entries("acct-1", 10).await.expect("Failed to list entries.");

	assert_eq!(entries[0].idempotency_key, search_page_key("acct-1", expected.as_str(), 1));
	assert_eq!(entries[0].metadata["billed_count"], 1);
	assert_eq!(entries[0].metadata["meta"]["source"], "importers");
}

#[tokio::test]
async fn empty_and_blank_pages_do_not_touch_the_ledger() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["", "  "]))
		.await
		.expect("Charge failed.");

	assert!(response.success);
	assert_eq!(response.charged_count, 0);
	assert_eq!(response.new_balance, 10);
	assert_eq!(super::entry_count(&service, "acct-1").await, 0);
}

#[tokio::test]
async fn missing_session_key_and_query_is_rejected() {
	let service = super::memory_service(10);
	let mut request = super::page("acct-1", "s1", 1, &["a"]);

	request.session_key = Some("  ".to_string());

	let err = service.charge_search_page(request).await.expect_err("Expected error.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");
}

#[tokio::test]
async fn unknown_account_is_a_hard_error() {
	let service = super::memory_service(10);
	let err = service
		.charge_search_page(super::page("acct-ghost", "s1", 1, &["a"]))
		.await
		.expect_err("Expected error.");

	assert!(
		matches!(err, Error::AccountNotFound { ref account_id } if account_id == "acct-ghost"),
		"Unexpected error: {err:?}"
	);
}

#[tokio::test]
async fn replayed_page_does_not_mark_new_rows_billed() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let first = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("First charge failed.");

	assert_eq!(first.charged_count, 3);
	assert_eq!(first.new_balance, 7);

	let revisit = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c", "d"]))
		.await
		.expect("Revisit failed.");

	assert!(revisit.success);
	assert_eq!(revisit.charged_count, 0);
	assert_eq!(revisit.new_balance, 7);

	let page_two = service
		.charge_search_page(super::page("acct-1", "s1", 2, &["d", "e"]))
		.await
		.expect("Second page charge failed.");

	assert!(page_two.success);
	assert_eq!(page_two.charged_count, 2);
	assert_eq!(page_two.new_balance, 5);

	let session = service.dedup.session("acct-1").expect("Missing cached session.");

	assert_eq!(session.len(), 5);
}
