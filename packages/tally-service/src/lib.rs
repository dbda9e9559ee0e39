pub mod balance;
pub mod dedup;
pub mod enrichment;
pub mod gate;
pub mod ledger;
pub mod refund;
pub mod search_charge;
pub mod time_serde;

mod error;

pub use balance::{BalanceResponse, LedgerEntryView};
pub use dedup::FingerprintDeduper;
pub use enrichment::{
	EnrichmentChargeRequest, EnrichmentChargeResponse, EnrichmentRunRequest,
	EnrichmentRunResponse,
};
pub use error::{Error, Result};
pub use gate::{ChargeGate, ChargePermit};
pub use ledger::{LedgerFingerprints, LedgerRequest, LedgerResponse};
pub use refund::RefundRequest;
pub use search_charge::{SearchPageChargeRequest, SearchPageChargeResponse};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::{Map, Value};

use tally_config::{Config, EnrichmentProviderConfig};
use tally_domain::enrichment::EnrichedField;
use tally_storage::LedgerStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";

/// Produces enrichment proposals for one target record.
pub trait EnrichmentProvider
where
	Self: Send + Sync,
{
	fn enrich<'a>(
		&'a self,
		cfg: &'a EnrichmentProviderConfig,
		target_id: &'a str,
		current: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<Vec<EnrichedField>>>;
}

/// The configured HTTP enrichment provider.
pub struct HttpEnrichmentProvider;
impl EnrichmentProvider for HttpEnrichmentProvider {
	fn enrich<'a>(
		&'a self,
		cfg: &'a EnrichmentProviderConfig,
		target_id: &'a str,
		current: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<Vec<EnrichedField>>> {
		Box::pin(async move {
			Ok(tally_providers::enrichment::enrich(cfg, target_id, current).await?)
		})
	}
}

pub struct TallyService {
	pub cfg: Config,
	pub store: Arc<dyn LedgerStore>,
	pub gate: ChargeGate,
	pub dedup: FingerprintDeduper,
	pub provider: Arc<dyn EnrichmentProvider>,
}
impl TallyService {
	pub fn new(cfg: Config, store: Arc<dyn LedgerStore>) -> Self {
		Self::with_provider(cfg, store, Arc::new(HttpEnrichmentProvider))
	}

	pub fn with_provider(
		cfg: Config,
		store: Arc<dyn LedgerStore>,
		provider: Arc<dyn EnrichmentProvider>,
	) -> Self {
		Self { cfg, store, gate: ChargeGate::new(), dedup: FingerprintDeduper::new(), provider }
	}
}

pub(crate) fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str> {
	let trimmed = value.trim();

	if trimmed.is_empty() {
		return Err(Error::InvalidRequest { message: format!("{field} is required.") });
	}

	Ok(trimmed)
}
