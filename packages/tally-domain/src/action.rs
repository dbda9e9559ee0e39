use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// The closed set of balance-affecting ledger actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
	SearchPageCharge,
	AiEnrichCharge,
	Refund,
}
impl ActionType {
	pub const ALL: [Self; 3] = [Self::SearchPageCharge, Self::AiEnrichCharge, Self::Refund];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::SearchPageCharge => "SEARCH_PAGE_CHARGE",
			Self::AiEnrichCharge => "AI_ENRICH_CHARGE",
			Self::Refund => "REFUND",
		}
	}

	pub fn is_charge(self) -> bool {
		matches!(self, Self::SearchPageCharge | Self::AiEnrichCharge)
	}

	/// Charges debit the balance and refunds credit it; zero is never a valid amount.
	pub fn accepts_amount(self, amount: i64) -> bool {
		if self.is_charge() { amount < 0 } else { amount > 0 }
	}
}

impl fmt::Display for ActionType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ActionType {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|action| action.as_str() == s)
			.ok_or_else(|| ParseError { kind: "action_type", value: s.to_string() })
	}
}
