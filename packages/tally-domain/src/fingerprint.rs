use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Normalizes a page of row fingerprints: blank entries dropped, duplicates removed, first-seen
/// order kept.
pub fn normalize(candidates: &[String]) -> Vec<String> {
	let mut seen = HashSet::with_capacity(candidates.len());

	candidates
		.iter()
		.map(|fingerprint| fingerprint.trim())
		.filter(|fingerprint| !fingerprint.is_empty())
		.filter(|fingerprint| seen.insert(*fingerprint))
		.map(str::to_string)
		.collect()
}

/// Returns the candidates that are not in `billed`, in candidate order.
pub fn unbilled<'a, I>(candidates: I, billed: &HashSet<String>) -> Vec<String>
where
	I: IntoIterator<Item = &'a String>,
{
	candidates.into_iter().filter(|fingerprint| !billed.contains(*fingerprint)).cloned().collect()
}

/// The billed fingerprints of one logical search.
///
/// A fingerprint merged into the session is never offered for billing again under the same key.
/// Starting a different search replaces the session wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSession {
	search_key: String,
	charged_fingerprints: HashSet<String>,
}
impl SearchSession {
	pub fn new(search_key: impl Into<String>) -> Self {
		Self { search_key: search_key.into(), charged_fingerprints: HashSet::new() }
	}

	pub fn search_key(&self) -> &str {
		&self.search_key
	}

	pub fn charged_fingerprints(&self) -> &HashSet<String> {
		&self.charged_fingerprints
	}

	pub fn len(&self) -> usize {
		self.charged_fingerprints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.charged_fingerprints.is_empty()
	}

	/// Switches the session to `search_key`, discarding the billed set if the key changed.
	/// Returns whether the session was replaced.
	pub fn rekey(&mut self, search_key: &str) -> bool {
		if self.search_key == search_key {
			return false;
		}

		*self = Self::new(search_key);

		true
	}

	pub fn filter_unbilled(&self, candidates: &[String]) -> Vec<String> {
		unbilled(&normalize(candidates), &self.charged_fingerprints)
	}

	/// Records fingerprints whose charge has committed.
	pub fn merge<I>(&mut self, billed: I)
	where
		I: IntoIterator<Item = String>,
	{
		self.charged_fingerprints.extend(billed);
	}
}
