//! The "useful data produced" predicate behind charge-after-value-delivered billing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One field value proposed by an enrichment run, with the evidence it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedField {
	pub field: String,
	pub value: Value,
	#[serde(default)]
	pub evidence: Vec<String>,
}

/// Names of fields that were empty in `before` and are filled with evidence-backed values.
///
/// A field counts once even if the run proposes it several times.
pub fn filled_fields(before: &Map<String, Value>, proposed: &[EnrichedField]) -> Vec<String> {
	let mut filled: Vec<String> = Vec::new();

	for candidate in proposed {
		let name = candidate.field.trim();

		if name.is_empty() || filled.iter().any(|existing| existing == name) {
			continue;
		}

		let was_empty = before.get(name).map(is_empty_value).unwrap_or(true);
		let has_evidence = candidate.evidence.iter().any(|quote| !quote.trim().is_empty());

		if was_empty && !is_empty_value(&candidate.value) && has_evidence {
			filled.push(name.to_string());
		}
	}

	filled
}

pub fn produced_useful_data(before: &Map<String, Value>, proposed: &[EnrichedField]) -> bool {
	!filled_fields(before, proposed).is_empty()
}

pub fn is_empty_value(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::String(text) => text.trim().is_empty(),
		Value::Array(items) => items.is_empty(),
		Value::Object(map) => map.is_empty(),
		Value::Bool(_) | Value::Number(_) => false,
	}
}
