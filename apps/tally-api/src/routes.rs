use axum::{
	Json, Router,
	extract::{Query, Request, State},
	http::{HeaderMap, StatusCode, header::AUTHORIZATION},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state::AppState;
use tally_domain::{action::ActionType, enrichment::EnrichedField, search_key::SearchQuery};
use tally_service::{
	BalanceResponse, EnrichmentChargeRequest, EnrichmentChargeResponse, EnrichmentRunRequest,
	EnrichmentRunResponse, Error, LedgerEntryView, LedgerFingerprints, LedgerRequest,
	LedgerResponse, RefundRequest, SearchPageChargeRequest, SearchPageChargeResponse,
};

pub const HEADER_ACCOUNT_ID: &str = "X-Tally-Account-Id";

const DEFAULT_ENTRY_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
	pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerChargeBody {
	pub idempotency_key: String,
	pub action_type: ActionType,
	pub amount: i64,
	#[serde(default)]
	pub metadata: Value,
	#[serde(default)]
	pub refund_of: Option<Uuid>,
	#[serde(default)]
	pub fingerprints: Option<LedgerFingerprints>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
	pub entry_id: Uuid,
	#[serde(default)]
	pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchChargeBody {
	#[serde(default)]
	pub session_key: Option<String>,
	#[serde(default)]
	pub query: Option<SearchQuery>,
	pub page_number: u32,
	pub row_fingerprints: Vec<String>,
	#[serde(default)]
	pub meta: Value,
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentChargeBody {
	pub target_id: String,
	pub run_id: Uuid,
	#[serde(default)]
	pub before: Map<String, Value>,
	pub fields: Vec<EnrichedField>,
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentRunBody {
	pub target_id: String,
	pub run_id: Uuid,
	#[serde(default)]
	pub before: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SearchKeyResponse {
	pub search_key: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let status = match &err {
			Error::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
			Error::AccountNotFound { .. } | Error::NotFound { .. } => StatusCode::NOT_FOUND,
			Error::TransientStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
			Error::UpstreamProvider { .. } => StatusCode::BAD_GATEWAY,
			Error::ChargeInProgress { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
			Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			Error::Storage { .. } => {
				tracing::error!(error = %err, "Ledger storage failure.");

				StatusCode::INTERNAL_SERVER_ERROR
			},
		};
		let message = match &err {
			Error::TransientStore { .. } => format!("{err} Try again."),
			_ => err.to_string(),
		};

		json_error(status, err.code(), message, None)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

pub fn router(state: AppState) -> Router {
	let api = Router::new()
		.route("/v1/accounts", post(open_account))
		.route("/v1/balance", get(balance))
		.route("/v1/ledger/entries", get(ledger_entries))
		.route("/v1/ledger/charges", post(ledger_charge))
		.route("/v1/ledger/refunds", post(ledger_refund))
		.route("/v1/search/keys", post(search_key))
		.route("/v1/search/charges", post(search_charge))
		.route("/v1/enrichment/charges", post(enrichment_charge))
		.route("/v1/enrichment/runs", post(enrichment_run))
		.layer(middleware::from_fn_with_state(state.clone(), api_auth_middleware));

	Router::new().route("/health", get(health)).merge(api).with_state(state)
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn api_auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
	let Some(expected) = state.service.cfg.security.api_auth_token.as_deref() else {
		return next.run(req).await;
	};

	if read_bearer_token(req.headers()).is_some_and(|token| token == expected) {
		return next.run(req).await;
	}

	json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing or invalid bearer token.", None)
		.into_response()
}

async fn open_account(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let response = state.service.open_account(account_id).await?;

	Ok(Json(response))
}

async fn balance(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let response = state.service.balance(account_id).await?;

	Ok(Json(response))
}

async fn ledger_entries(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<EntriesQuery>,
) -> Result<Json<Vec<LedgerEntryView>>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let limit = query.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);
	let response = state.service.ledger_entries(account_id, limit).await?;

	Ok(Json(response))
}

async fn ledger_charge(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<LedgerChargeBody>,
) -> Result<Json<LedgerResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let required = payload.amount.saturating_neg();
	let response = state
		.service
		.charge_or_refund(LedgerRequest {
			account_id: account_id.to_string(),
			idempotency_key: payload.idempotency_key,
			action_type: payload.action_type,
			amount: payload.amount,
			metadata: payload.metadata,
			refund_of: payload.refund_of,
			fingerprints: payload.fingerprints,
		})
		.await?;

	if !response.success {
		return Err(Error::InsufficientBalance { balance: response.new_balance, required }.into());
	}

	Ok(Json(response))
}

async fn ledger_refund(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<RefundBody>,
) -> Result<Json<LedgerResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let response = state
		.service
		.refund(RefundRequest {
			account_id: account_id.to_string(),
			entry_id: payload.entry_id,
			reason: payload.reason,
		})
		.await?;

	Ok(Json(response))
}

async fn search_key(
	State(state): State<AppState>,
	Json(payload): Json<SearchQuery>,
) -> Json<SearchKeyResponse> {
	let key = state.service.search_key(&payload);

	Json(SearchKeyResponse { search_key: key.into_string() })
}

async fn search_charge(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<SearchChargeBody>,
) -> Result<Json<SearchPageChargeResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let response = state
		.service
		.charge_search_page(SearchPageChargeRequest {
			account_id: account_id.to_string(),
			session_key: payload.session_key,
			query: payload.query,
			page_number: payload.page_number,
			row_fingerprints: payload.row_fingerprints,
			meta: payload.meta,
		})
		.await?;

	Ok(Json(response))
}

async fn enrichment_charge(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<EnrichmentChargeBody>,
) -> Result<Json<EnrichmentChargeResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let response = state
		.service
		.charge_enrichment(EnrichmentChargeRequest {
			account_id: account_id.to_string(),
			target_id: payload.target_id,
			run_id: payload.run_id,
			before: payload.before,
			fields: payload.fields,
		})
		.await?;

	Ok(Json(response))
}

async fn enrichment_run(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<EnrichmentRunBody>,
) -> Result<Json<EnrichmentRunResponse>, ApiError> {
	let account_id = read_account_id(&headers)?;
	let request = EnrichmentRunRequest {
		account_id: account_id.to_string(),
		target_id: payload.target_id,
		run_id: payload.run_id,
		before: payload.before,
	};
	let response = state.service.run_enrichment(request, state.service.provider.as_ref()).await?;

	Ok(Json(response))
}

fn read_account_id(headers: &HeaderMap) -> Result<&str, ApiError> {
	headers
		.get(HEADER_ACCOUNT_ID)
		.and_then(|raw| raw.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.ok_or_else(|| {
			json_error(
				StatusCode::BAD_REQUEST,
				"INVALID_REQUEST",
				format!("{HEADER_ACCOUNT_ID} header is required."),
				Some(vec![HEADER_ACCOUNT_ID.to_string()]),
			)
		})
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(AUTHORIZATION)?;
	let value = raw.to_str().ok()?.trim();
	let token = value.strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}
