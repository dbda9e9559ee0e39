use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Lifecycle of one metered operation.
///
/// `Pending` resolves to `Charged` or `Skipped`; only `Charged` may later become `Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterState {
	Pending,
	Charged,
	Skipped,
	Refunded,
}
impl MeterState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::Charged => "CHARGED",
			Self::Skipped => "SKIPPED",
			Self::Refunded => "REFUNDED",
		}
	}

	pub fn can_transition_to(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Pending, Self::Charged)
				| (Self::Pending, Self::Skipped)
				| (Self::Charged, Self::Refunded)
		)
	}

	/// Net balance sign of the operation once it rests in this state.
	pub fn has_net_charge(self) -> bool {
		matches!(self, Self::Charged)
	}
}

impl fmt::Display for MeterState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MeterState {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"PENDING" => Ok(Self::Pending),
			"CHARGED" => Ok(Self::Charged),
			"SKIPPED" => Ok(Self::Skipped),
			"REFUNDED" => Ok(Self::Refunded),
			_ => Err(ParseError { kind: "meter_state", value: s.to_string() }),
		}
	}
}
