use std::sync::Arc;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use tally_domain::{enrichment::EnrichedField, state::MeterState};
use tally_service::{EnrichmentChargeRequest, EnrichmentRunRequest, Error};
use tally_storage::{LedgerStore, MemoryLedgerStore};

use super::StubProvider;

fn charge_request(run_id: Uuid, fields: Vec<EnrichedField>) -> EnrichmentChargeRequest {
	let mut before = Map::new();

	before.insert("company".to_string(), json!("Acme Imports"));
	before.insert("email".to_string(), Value::Null);

	EnrichmentChargeRequest {
		account_id: "acct-1".to_string(),
		target_id: "buyer-1".to_string(),
		run_id,
		before,
		fields,
	}
}

#[tokio::test]
async fn run_without_new_data_is_skipped_free() {
	let service = super::memory_service(10);
	let run_id = Uuid::new_v4();

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_enrichment(charge_request(
			run_id,
			vec![
				super::field("company", "Acme Imports Ltd", "registry"),
				super::field("email", "sales@acme.test", " "),
			],
		))
		.await
		.expect("Charge call failed.");

	assert!(response.success);
	assert!(!response.charged);
	assert_eq!(response.state, MeterState::Skipped);
	assert_eq!(response.new_balance, 10);
	assert_eq!(super::entry_count(&service, "acct-1").await, 0);
}

#[tokio::test]
async fn useful_run_is_charged_once_per_run_id() {
	let service = super::memory_service(10);
	let run_id = Uuid::new_v4();
	let fields = vec![super::field("email", "sales@acme.test", "contact page")];

	service.open_account("acct-1").await.expect("Failed to open account.");

	let first = service
		.charge_enrichment(charge_request(run_id, fields.clone()))
		.await
		.expect("First charge failed.");
	let second = service
		.charge_enrichment(charge_request(run_id, fields))
		.await
		.expect("Second charge failed.");

	assert!(first.charged && second.charged);
	assert_eq!(first.state, MeterState::Charged);
	assert_eq!(second.state, MeterState::Charged);
	assert_eq!(first.filled_fields, vec!["email".to_string()]);
	assert_eq!(second.filled_fields, vec!["email".to_string()]);
	assert_eq!(first.new_balance, 5);
	assert_eq!(second.new_balance, 5);
	assert_eq!(second.entry_id, first.entry_id);
	assert_eq!(super::entry_count(&service, "acct-1").await, 1);

	let entries = service.ledger_entries("acct-1", 1).await.expect("Failed to list entries.");

	assert_eq!(entries[0].idempotency_key, format!("enrich:{run_id}"));
	assert_eq!(entries[0].amount, -5);
}

#[tokio::test]
async fn unaffordable_run_stays_pending() {
	let store = Arc::new(MemoryLedgerStore::new());
	let service = super::service_on(store.clone(), 3);
	let run_id = Uuid::new_v4();

	service.open_account("acct-1").await.expect("Failed to open account.");

	let response = service
		.charge_enrichment(charge_request(
			run_id,
			vec![super::field("email", "sales@acme.test", "contact page")],
		))
		.await
		.expect("Charge call failed.");

	assert!(!response.success);
	assert!(!response.charged);
	assert_eq!(response.error.as_deref(), Some("INSUFFICIENT_BALANCE"));
	assert_eq!(response.state, MeterState::Pending);
	assert_eq!(response.new_balance, 3);

	let run = store.enrichment_run(run_id).await.expect("Lookup failed.").expect("Missing run.");

	assert_eq!(run.meter_state().expect("Valid state."), MeterState::Pending);
}

#[tokio::test]
async fn run_enrichment_charges_after_the_provider_delivers() {
	let service = super::memory_service(10);
	let provider =
		StubProvider::returning(vec![super::field("phone", "+49 30 1234", "imprint page")]);
	let request = EnrichmentRunRequest {
		account_id: "acct-1".to_string(),
		target_id: "buyer-1".to_string(),
		run_id: Uuid::new_v4(),
		before: Map::new(),
	};

	service.open_account("acct-1").await.expect("Failed to open account.");

	let first = service.run_enrichment(request.clone(), &provider).await.expect("Run failed.");
	let second = service.run_enrichment(request, &provider).await.expect("Rerun failed.");

	assert_eq!(first.fields.len(), 1);
	assert!(first.charge.charged);
	assert_eq!(second.charge.new_balance, 5);
	assert_eq!(provider.count(), 2);
	assert_eq!(super::entry_count(&service, "acct-1").await, 1);
}

#[tokio::test]
async fn provider_failure_before_any_charge_costs_nothing() {
	let store = Arc::new(MemoryLedgerStore::new());
	let service = super::service_on(store.clone(), 10);
	let run_id = Uuid::new_v4();

	service.open_account("acct-1").await.expect("Failed to open account.");

	let err = service
		.run_enrichment(
			EnrichmentRunRequest {
				account_id: "acct-1".to_string(),
				target_id: "buyer-1".to_string(),
				run_id,
				before: Map::new(),
			},
			&StubProvider::failing(),
		)
		.await
		.expect_err("Expected provider failure.");

	assert!(matches!(err, Error::UpstreamProvider { .. }), "Unexpected error: {err:?}");
	assert_eq!(super::balance_of(&service, "acct-1").await, 10);
	assert_eq!(super::entry_count(&service, "acct-1").await, 0);

	let run = store.enrichment_run(run_id).await.expect("Lookup failed.").expect("Missing run.");

	assert_eq!(run.meter_state().expect("Valid state."), MeterState::Pending);
}

#[tokio::test]
async fn provider_failure_after_a_recorded_charge_is_refunded() {
	let store = Arc::new(MemoryLedgerStore::new());
	let service = super::service_on(store.clone(), 10);
	let run_id = Uuid::new_v4();

	service.open_account("acct-1").await.expect("Failed to open account.");
	service
		.charge_enrichment(charge_request(
			run_id,
			vec![super::field("email", "sales@acme.test", "contact page")],
		))
		.await
		.expect("Charge failed.");

	assert_eq!(super::balance_of(&service, "acct-1").await, 5);

	let err = service
		.run_enrichment(
			EnrichmentRunRequest {
				account_id: "acct-1".to_string(),
				target_id: "buyer-1".to_string(),
				run_id,
				before: Map::new(),
			},
			&StubProvider::failing(),
		)
		.await
		.expect_err("Expected provider failure.");

	assert_eq!(err.code(), "UPSTREAM_PROVIDER");
	assert_eq!(super::balance_of(&service, "acct-1").await, 10);

	let entries = service.ledger_entries("acct-1", 10).await.expect("Failed to list entries.");

	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].amount, 5);
	assert_eq!(entries[0].refund_of, Some(entries[1].entry_id));

	let run = store.enrichment_run(run_id).await.expect("Lookup failed.").expect("Missing run.");

	assert_eq!(run.meter_state().expect("Valid state."), MeterState::Refunded);
	assert!(!run.charged);
	assert_eq!(run.refund_entry_id, Some(entries[0].entry_id));
}

#[tokio::test]
async fn skipped_run_is_not_sent_to_the_provider_again() {
	let service = super::memory_service(10);
	let request = EnrichmentRunRequest {
		account_id: "acct-1".to_string(),
		target_id: "buyer-1".to_string(),
		run_id: Uuid::new_v4(),
		before: Map::new(),
	};

	service.open_account("acct-1").await.expect("Failed to open account.");

	let empty = StubProvider::returning(Vec::new());
	let first = service.run_enrichment(request.clone(), &empty).await.expect("Run failed.");

	assert_eq!(first.charge.state, MeterState::Skipped);

	let useful =
		StubProvider::returning(vec![super::field("phone", "+49 30 1234", "imprint page")]);
	let second = service.run_enrichment(request, &useful).await.expect("Rerun failed.");

	assert_eq!(useful.count(), 0);
	assert!(second.fields.is_empty());
	assert!(!second.charge.charged);
	assert_eq!(second.charge.state, MeterState::Skipped);
	assert_eq!(second.charge.new_balance, 10);
	assert_eq!(super::entry_count(&service, "acct-1").await, 0);
}
