pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Insufficient balance: {balance} available, {required} required.")]
	InsufficientBalance { balance: i64, required: i64 },
	#[error("Account {account_id} does not exist.")]
	AccountNotFound { account_id: String },
	#[error("Ledger store is temporarily unavailable: {message}")]
	TransientStore { message: String },
	#[error("Upstream provider error: {message}")]
	UpstreamProvider { message: String },
	#[error("A charge is already in progress for {scope}.")]
	ChargeInProgress { scope: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	/// Stable machine-readable code, shared by responses and the HTTP layer.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InsufficientBalance { .. } => crate::INSUFFICIENT_BALANCE,
			Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
			Self::TransientStore { .. } => "TRANSIENT_STORE",
			Self::UpstreamProvider { .. } => "UPSTREAM_PROVIDER",
			Self::ChargeInProgress { .. } => "CHARGE_IN_PROGRESS",
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::Conflict { .. } => "CONFLICT",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::Storage { .. } => "STORAGE",
		}
	}
}

impl From<tally_storage::Error> for Error {
	fn from(err: tally_storage::Error) -> Self {
		if err.is_transient() {
			return Self::TransientStore { message: err.to_string() };
		}

		match err {
			tally_storage::Error::AccountNotFound(account_id) => Self::AccountNotFound { account_id },
			tally_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			tally_storage::Error::NotFound(message) => Self::NotFound { message },
			tally_storage::Error::Conflict(message) => Self::Conflict { message },
			tally_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			tally_storage::Error::Corrupt(message) => Self::Storage { message },
		}
	}
}

impl From<tally_providers::Error> for Error {
	fn from(err: tally_providers::Error) -> Self {
		Self::UpstreamProvider { message: err.to_string() }
	}
}
