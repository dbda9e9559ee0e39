use std::sync::Arc;

use uuid::Uuid;

use tally_service::{EnrichmentChargeRequest, RefundRequest};
use tally_storage::{PgLedgerStore, db::Db};

#[tokio::test]
#[ignore = "Requires external Postgres. Set TALLY_PG_DSN to run."]
async fn postgres_gateway_bills_pages_and_enrichment_once() {
	let Some(test_db) =
		tally_testkit::TestDatabase::from_env().await.expect("Failed to create test database.")
	else {
		eprintln!(
			"Skipping postgres_gateway_bills_pages_and_enrichment_once; set TALLY_PG_DSN to run."
		);

		return;
	};
	let mut cfg = super::test_config(20);

	cfg.storage.postgres = test_db.postgres_config(2);

	let db = Db::connect(&cfg.storage.postgres).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let pool = db.pool.clone();
	let service = super::service_on(Arc::new(PgLedgerStore::new(db)), 20);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let page_one = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c"]))
		.await
		.expect("Page 1 failed.");
	let page_two = service
		.charge_search_page(super::page("acct-1", "s1", 2, &["c", "d", "e"]))
		.await
		.expect("Page 2 failed.");

	assert_eq!(page_one.charged_count, 3);
	assert_eq!(page_two.charged_count, 2);
	assert_eq!(page_two.new_balance, 15);

	let run_id = Uuid::new_v4();
	let request = EnrichmentChargeRequest {
		account_id: "acct-1".to_string(),
		target_id: "buyer-1".to_string(),
		run_id,
		before: serde_json::Map::new(),
		fields: vec![super::field("email", "sales@acme.test", "contact page")],
	};
	let first = service.charge_enrichment(request.clone()).await.expect("Enrichment failed.");
	let second = service.charge_enrichment(request).await.expect("Enrichment rerun failed.");

	assert!(first.charged && second.charged);
	assert_eq!(second.new_balance, 10);

	let refunded = service
		.refund(RefundRequest {
			account_id: "acct-1".to_string(),
			entry_id: first.entry_id.expect("Missing enrichment entry."),
			reason: None,
		})
		.await
		.expect("Refund failed.");

	assert_eq!(refunded.new_balance, 15);
	assert_eq!(super::entry_count(&service, "acct-1").await, 4);

	pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
