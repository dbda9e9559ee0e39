#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Account {0} does not exist.")]
	AccountNotFound(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Corrupt ledger row: {0}")]
	Corrupt(String),
}
impl Error {
	/// Whether the failed call may be retried verbatim.
	///
	/// Ledger writes are keyed by idempotency key, so a retry of a write that did commit replays
	/// the recorded outcome instead of applying it twice.
	pub fn is_transient(&self) -> bool {
		let Self::Sqlx(err) = self else {
			return false;
		};

		match err {
			sqlx::Error::PoolTimedOut
			| sqlx::Error::PoolClosed
			| sqlx::Error::Io(_)
			| sqlx::Error::Tls(_)
			| sqlx::Error::Protocol(_)
			| sqlx::Error::WorkerCrashed => true,
			sqlx::Error::Database(db_err) =>
				matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")),
			_ => false,
		}
	}

	pub(crate) fn is_unique_violation(&self) -> bool {
		match self {
			Self::Sqlx(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
			_ => false,
		}
	}
}
