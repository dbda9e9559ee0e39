pub mod action;
pub mod enrichment;
pub mod fingerprint;
pub mod idempotency;
pub mod search_key;
pub mod state;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value {value:?}.")]
pub struct ParseError {
	pub kind: &'static str,
	pub value: String,
}
