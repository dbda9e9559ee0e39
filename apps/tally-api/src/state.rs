use std::sync::Arc;

use tally_service::TallyService;
use tally_storage::{PgLedgerStore, db::Db};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<TallyService>,
}
impl AppState {
	/// Connects to Postgres, applies the schema, and builds the service on the Postgres ledger.
	pub async fn new(config: tally_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let service = TallyService::new(config, Arc::new(PgLedgerStore::new(db)));

		Ok(Self::with_service(service))
	}

	pub fn with_service(service: TallyService) -> Self {
		Self { service: Arc::new(service) }
	}
}
