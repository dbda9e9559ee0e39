//! Stable session keys for logical searches.
//!
//! Two queries that differ only in whitespace, filter order, blank filters, or duplicated filters
//! share a key. Every other change produces a new key and therefore a new billing session.

use std::fmt;

use serde::{Deserialize, Serialize};

const CANONICAL_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchQuery {
	#[serde(default)]
	pub keyword: Option<String>,
	#[serde(default)]
	pub category: Option<String>,
	#[serde(default)]
	pub filters: Vec<SearchFilter>,
	/// Inclusive lower date bound, ISO-8601 (`YYYY-MM-DD`).
	#[serde(default)]
	pub date_from: Option<String>,
	/// Inclusive upper date bound, ISO-8601 (`YYYY-MM-DD`).
	#[serde(default)]
	pub date_to: Option<String>,
	#[serde(default)]
	pub sort: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchFilter {
	#[serde(rename = "type")]
	pub filter_type: String,
	pub value: String,
}

/// Hex-encoded 256-bit BLAKE3 digest of the canonical query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchKey(String);
impl SearchKey {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for SearchKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for SearchKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

#[derive(Serialize)]
struct CanonicalQuery<'a> {
	v: u32,
	keyword: Option<&'a str>,
	category: Option<&'a str>,
	filters: Vec<(&'a str, &'a str)>,
	date_from: Option<&'a str>,
	date_to: Option<&'a str>,
	sort: Option<&'a str>,
}

pub fn derive_key(query: &SearchQuery) -> SearchKey {
	let canonical = canonicalize(query);
	// Serializing borrowed strings, integers, and tuples cannot fail.
	let raw = serde_json::to_vec(&canonical).unwrap_or_default();

	SearchKey(blake3::hash(&raw).to_hex().to_string())
}

fn canonicalize(query: &SearchQuery) -> CanonicalQuery<'_> {
	let mut filters = query
		.filters
		.iter()
		.filter_map(|filter| {
			let filter_type = filter.filter_type.trim();
			let value = filter.value.trim();

			if filter_type.is_empty() || value.is_empty() {
				None
			} else {
				Some((filter_type, value))
			}
		})
		.collect::<Vec<_>>();

	filters.sort_unstable();
	filters.dedup();

	CanonicalQuery {
		v: CANONICAL_VERSION,
		keyword: non_blank(query.keyword.as_deref()),
		category: non_blank(query.category.as_deref()),
		filters,
		date_from: non_blank(query.date_from.as_deref()),
		date_to: non_blank(query.date_to.as_deref()),
		sort: non_blank(query.sort.as_deref()),
	}
}

fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|value| !value.is_empty())
}
