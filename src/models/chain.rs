//! Chain records: re-entry chains and profit-booking chains.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A sequence of re-entries sharing risk-reduction lineage.
///
/// `current_level` starts at 0, advances by exactly one per successful
/// re-entry, and never decrements. A chain at `max_level` accepts no
/// further re-entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReentryChain {
    pub chain_id: String,
    pub symbol: String,
    pub logic: String,
    pub current_level: u32,
    pub max_level: u32,
    pub total_profit: Decimal,
    pub trade_ids: Vec<String>,
    pub last_activity: DateTime<Utc>,
}

impl ReentryChain {
    pub fn new(chain_id: String, symbol: String, logic: String, max_level: u32) -> Self {
        Self {
            chain_id,
            symbol,
            logic,
            current_level: 0,
            max_level,
            total_profit: Decimal::ZERO,
            trade_ids: Vec::new(),
            last_activity: Utc::now(),
        }
    }

    /// Whether the chain can still accept a re-entry.
    pub fn has_capacity(&self) -> bool {
        self.current_level < self.max_level
    }
}

/// One order tracked by a profit-booking chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitOrder {
    pub trade_id: String,
    pub level: u32,
    /// Fixed per-order profit target in account currency.
    pub target: Decimal,
    pub booked: bool,
    pub realized: Decimal,
}

impl ProfitOrder {
    pub fn new(trade_id: String, level: u32, target: Decimal) -> Self {
        Self {
            trade_id,
            level,
            target,
            booked: false,
            realized: Decimal::ZERO,
        }
    }
}

/// Independent chain closing individual orders at small fixed targets.
///
/// An order belongs to at most one profit-booking chain. The chain advances
/// to the next level only once every order at the current level is booked
/// or otherwise closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitBookingChain {
    pub chain_id: String,
    pub symbol: String,
    pub current_level: u32,
    pub orders: Vec<ProfitOrder>,
    pub total_booked: Decimal,
    pub last_activity: DateTime<Utc>,
}

impl ProfitBookingChain {
    pub fn new(chain_id: String, symbol: String) -> Self {
        Self {
            chain_id,
            symbol,
            current_level: 0,
            orders: Vec::new(),
            total_booked: Decimal::ZERO,
            last_activity: Utc::now(),
        }
    }

    /// Orders belonging to the chain's current level.
    pub fn current_level_orders(&self) -> impl Iterator<Item = &ProfitOrder> {
        let level = self.current_level;
        self.orders.iter().filter(move |o| o.level == level)
    }

    /// True when every order at the current level has been booked.
    pub fn level_complete(&self) -> bool {
        let mut any = false;
        for order in self.current_level_orders() {
            any = true;
            if !order.booked {
                return false;
            }
        }
        any
    }
}
