pub mod db;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

mod error;

pub use error::Error;
pub use ledger::{
	BoxFuture, FingerprintBatch, LedgerOutcome, LedgerStore, LedgerWrite, NewEnrichmentRun,
	RunTransition,
};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

pub type Result<T, E = Error> = std::result::Result<T, E>;
