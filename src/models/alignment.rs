//! Trend alignment types produced by the external alignment gate.

use serde::{Deserialize, Serialize};

/// Direction reported by the trend alignment gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    Bullish,
    Bearish,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Bullish => "BULLISH",
            TrendDirection::Bearish => "BEARISH",
        }
    }
}

/// Result of a trend alignment check for (symbol, logic).
///
/// Consumed read-only: the gate is authoritative, and a failed check is a
/// business decision, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub aligned: bool,
    pub direction: TrendDirection,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl AlignmentResult {
    pub fn aligned(direction: TrendDirection, details: impl Into<String>) -> Self {
        Self {
            aligned: true,
            direction,
            details: details.into(),
            failure_reason: None,
        }
    }

    pub fn rejected(direction: TrendDirection, reason: impl Into<String>) -> Self {
        Self {
            aligned: false,
            direction,
            details: String::new(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Reason string for logging, with a fallback when the gate gave none.
    pub fn reason(&self) -> &str {
        self.failure_reason.as_deref().unwrap_or("unknown reason")
    }
}
