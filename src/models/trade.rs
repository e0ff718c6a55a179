//! Trade model representing individual orders placed by the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TrendDirection;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    /// The trend direction this side implies for alignment checks.
    pub fn implied_trend(&self) -> TrendDirection {
        match self {
            TradeSide::Buy => TrendDirection::Bullish,
            TradeSide::Sell => TrendDirection::Bearish,
        }
    }

    /// The opposite side, used when closing at market.
    pub fn opposite(&self) -> TradeSide {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }
}

/// An order the engine has placed (or simulated).
///
/// Identity is fixed at creation; `trade_id` is filled in after broker
/// acknowledgment and stays `None` in simulation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Trading symbol (e.g., "XAUUSD")
    pub symbol: String,

    /// Entry price
    pub entry: Decimal,

    /// Stop-loss price
    pub sl: Decimal,

    /// Take-profit price
    pub tp: Decimal,

    /// Lot size
    pub lot_size: Decimal,

    /// Trade direction
    pub side: TradeSide,

    /// Strategy / logic id that produced the trade (e.g., "LOGIC1")
    pub logic: String,

    /// When the order was opened
    pub open_time: DateTime<Utc>,

    /// Re-entry chain this trade belongs to, if any
    pub chain_id: Option<String>,

    /// Level within the chain (0 for the first trade of a sequence)
    pub chain_level: u32,

    /// Whether this trade was produced by the re-entry engine
    pub is_re_entry: bool,

    /// Broker ticket, assigned after acknowledgment
    pub trade_id: Option<String>,
}

impl Trade {
    /// Unrealized profit in account currency at `current_price`.
    ///
    /// `pip_size` and `pip_value` (per this trade's lot) come from the
    /// per-symbol configuration.
    pub fn unrealized_pnl(
        &self,
        current_price: Decimal,
        pip_size: Decimal,
        pip_value: Decimal,
    ) -> Decimal {
        if pip_size.is_zero() {
            return Decimal::ZERO;
        }
        let diff = match self.side {
            TradeSide::Buy => current_price - self.entry,
            TradeSide::Sell => self.entry - current_price,
        };
        (diff / pip_size) * pip_value
    }

    /// Price distance between entry and stop-loss.
    pub fn sl_distance(&self) -> Decimal {
        (self.entry - self.sl).abs()
    }
}
