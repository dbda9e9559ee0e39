use uuid::Uuid;

use tally_domain::action::ActionType;
use tally_service::{Error, RefundRequest};

fn refund(account_id: &str, entry_id: Uuid) -> RefundRequest {
	RefundRequest {
		account_id: account_id.to_string(),
		entry_id,
		reason: Some("search results failed to load".to_string()),
	}
}

#[tokio::test]
async fn refund_restores_the_balance_and_keeps_both_entries() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let charge = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b", "c", "d"]))
		.await
		.expect("Charge failed.");
	let charge_entry = charge.entry_id.expect("Missing charge entry.");

	assert_eq!(charge.new_balance, 6);

	let refunded = service.refund(refund("acct-1", charge_entry)).await.expect("Refund failed.");

	assert!(refunded.success && !refunded.replayed);
	assert_eq!(refunded.new_balance, 10);

	let entries = service.ledger_entries("acct-1", 10).await.expect("Failed to list entries.");

	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].action_type, ActionType::Refund);
	assert_eq!(entries[0].amount, 4);
	assert_eq!(entries[0].refund_of, Some(charge_entry));
	assert_eq!(entries[0].idempotency_key, format!("refund:{charge_entry}"));
	assert_eq!(entries[1].entry_id, charge_entry);
}

#[tokio::test]
async fn repeated_refund_replays_the_first() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let charge = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect("Charge failed.");
	let charge_entry = charge.entry_id.expect("Missing charge entry.");
	let first = service.refund(refund("acct-1", charge_entry)).await.expect("Refund failed.");
	let second = service.refund(refund("acct-1", charge_entry)).await.expect("Replay failed.");

	assert!(second.replayed);
	assert_eq!(second.entry_id, first.entry_id);
	assert_eq!(super::balance_of(&service, "acct-1").await, 10);
	assert_eq!(super::entry_count(&service, "acct-1").await, 2);
}

#[tokio::test]
async fn refunded_rows_stay_billed_for_the_search() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");

	let charge = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect("Charge failed.");

	service
		.refund(refund("acct-1", charge.entry_id.expect("Missing charge entry.")))
		.await
		.expect("Refund failed.");

	let revisit = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a", "b"]))
		.await
		.expect("Revisit failed.");

	assert_eq!(revisit.charged_count, 0);
	assert_eq!(revisit.new_balance, 10);
}

#[tokio::test]
async fn refunds_cannot_cross_accounts_or_target_refunds() {
	let service = super::memory_service(10);

	service.open_account("acct-1").await.expect("Failed to open account.");
	service.open_account("acct-2").await.expect("Failed to open account.");

	let charge = service
		.charge_search_page(super::page("acct-1", "s1", 1, &["a"]))
		.await
		.expect("Charge failed.");
	let charge_entry = charge.entry_id.expect("Missing charge entry.");
	let err = service.refund(refund("acct-2", charge_entry)).await.expect_err("Expected error.");

	assert!(matches!(err, Error::NotFound { .. }), "Unexpected error: {err:?}");

	let refunded = service.refund(refund("acct-1", charge_entry)).await.expect("Refund failed.");
	let refund_entry = refunded.entry_id.expect("Missing refund entry.");
	let err = service.refund(refund("acct-1", refund_entry)).await.expect_err("Expected error.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");

	let err = service
		.refund(refund("acct-1", Uuid::new_v4()))
		.await
		.expect_err("Expected unknown entry to fail.");

	assert!(matches!(err, Error::NotFound { .. }), "Unexpected error: {err:?}");
}
