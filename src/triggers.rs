//! Registry of pending price triggers.
//!
//! Three independent symbol-keyed maps (SL-hunt, TP-continuation,
//! exit-continuation), at most one pending entry per symbol per kind. A
//! registration overwrites any prior entry for that symbol/kind; entries
//! are consumed exactly once, by firing, gating failure, or cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::models::{Trade, TradeSide};

/// Pending SL-hunt recovery: re-enter once price recovers past SL + offset.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSlHunt {
    pub target_price: Decimal,
    pub sl_price: Decimal,
    pub side: TradeSide,
    pub chain_id: String,
    pub logic: String,
}

/// Pending TP continuation: re-enter once price clears TP by the gap.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTpContinuation {
    pub tp_price: Decimal,
    pub side: TradeSide,
    pub chain_id: String,
    pub logic: String,
}

/// Pending exit continuation: seed a brand-new chain once price confirms
/// continuation past the exit price.
#[derive(Debug, Clone, Serialize)]
pub struct PendingExitContinuation {
    pub exit_price: Decimal,
    pub side: TradeSide,
    pub logic: String,
    pub exit_reason: String,
    pub timeframe: String,
}

#[derive(Default)]
struct PendingMaps {
    sl_hunt: HashMap<String, PendingSlHunt>,
    tp_continuation: HashMap<String, PendingTpContinuation>,
    exit_continuation: HashMap<String, PendingExitContinuation>,
    // Symbols cancelled since the last take_* drain. A cancellation that
    // lands while the loop holds a drained copy must not be undone by the
    // restore; restore_* consumes these instead of re-inserting.
    sl_hunt_cancelled: HashSet<String>,
    tp_continuation_cancelled: HashSet<String>,
    exit_continuation_cancelled: HashSet<String>,
}

/// Snapshot of all pending entries for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PendingDetails {
    pub sl_hunt: HashMap<String, PendingSlHunt>,
    pub tp_continuation: HashMap<String, PendingTpContinuation>,
    pub exit_continuation: HashMap<String, PendingExitContinuation>,
}

/// Shared trigger registry. One lock guards all three maps: registrations
/// arrive from the trade-lifecycle path while the control loop evaluates.
#[derive(Clone)]
pub struct TriggerRegistry {
    config: BotConfig,
    maps: Arc<Mutex<PendingMaps>>,
}

impl TriggerRegistry {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            maps: Arc::new(Mutex::new(PendingMaps::default())),
        }
    }

    /// Register SL-hunt monitoring for a stopped-out trade.
    ///
    /// Target = SL + offset for buys, SL − offset for sells. Rejects trades
    /// without a chain id or with a non-positive stop-loss; validation
    /// happens before any mutation.
    pub async fn register_sl_hunt(&self, trade: &Trade, logic: &str) {
        let Some(chain_id) = trade.chain_id.clone() else {
            warn!(symbol = %trade.symbol, "Cannot register SL hunt: trade has no chain id");
            return;
        };
        if trade.sl <= Decimal::ZERO {
            warn!(symbol = %trade.symbol, sl = %trade.sl, "Cannot register SL hunt: invalid SL");
            return;
        }

        let sc = self.config.symbol_or_fallback(&trade.symbol);
        let offset = self.config.re_entry.sl_hunt_offset_pips * sc.pip_size;
        let target_price = match trade.side {
            TradeSide::Buy => trade.sl + offset,
            TradeSide::Sell => trade.sl - offset,
        };

        let pending = PendingSlHunt {
            target_price,
            sl_price: trade.sl,
            side: trade.side,
            chain_id,
            logic: logic.to_string(),
        };

        let mut maps = self.maps.lock().await;
        maps.sl_hunt.insert(trade.symbol.clone(), pending);
        info!(
            symbol = %trade.symbol,
            target = %target_price,
            pending = maps.sl_hunt.len(),
            "SL hunt monitoring registered"
        );
    }

    /// Register TP continuation monitoring after a take-profit fill.
    pub async fn register_tp_continuation(&self, trade: &Trade, tp_price: Decimal, logic: &str) {
        let Some(chain_id) = trade.chain_id.clone() else {
            warn!(symbol = %trade.symbol, "Cannot register TP continuation: trade has no chain id");
            return;
        };
        if tp_price <= Decimal::ZERO {
            warn!(symbol = %trade.symbol, %tp_price, "Cannot register TP continuation: invalid TP");
            return;
        }

        let pending = PendingTpContinuation {
            tp_price,
            side: trade.side,
            chain_id,
            logic: logic.to_string(),
        };

        let mut maps = self.maps.lock().await;
        maps.tp_continuation.insert(trade.symbol.clone(), pending);
        info!(
            symbol = %trade.symbol,
            tp = %tp_price,
            pending = maps.tp_continuation.len(),
            "TP continuation monitoring registered"
        );
    }

    /// Register continuation monitoring after a discretionary exit. Firing
    /// seeds a new chain instead of advancing an existing one.
    pub async fn register_exit_continuation(
        &self,
        trade: &Trade,
        exit_price: Decimal,
        exit_reason: &str,
        logic: &str,
        timeframe: &str,
    ) {
        if exit_price <= Decimal::ZERO {
            warn!(symbol = %trade.symbol, %exit_price, "Cannot register exit continuation: invalid exit price");
            return;
        }

        let pending = PendingExitContinuation {
            exit_price,
            side: trade.side,
            logic: logic.to_string(),
            exit_reason: exit_reason.to_string(),
            timeframe: timeframe.to_string(),
        };

        let mut maps = self.maps.lock().await;
        maps.exit_continuation.insert(trade.symbol.clone(), pending);
        info!(
            symbol = %trade.symbol,
            exit = %exit_price,
            reason = exit_reason,
            pending = maps.exit_continuation.len(),
            "Exit continuation monitoring registered"
        );
    }

    /// Cancel pending SL-hunt monitoring. Safe no-op when absent. Effective
    /// even against a copy the control loop has drained for evaluation.
    pub async fn cancel_sl_hunt(&self, symbol: &str, reason: &str) {
        let mut maps = self.maps.lock().await;
        let removed = maps.sl_hunt.remove(symbol).is_some();
        maps.sl_hunt_cancelled.insert(symbol.to_string());
        if removed {
            info!(symbol, reason, "SL hunt monitoring stopped");
        }
    }

    /// Cancel pending TP continuation monitoring. Safe no-op when absent.
    /// Effective even against a copy the control loop has drained.
    pub async fn cancel_tp_continuation(&self, symbol: &str, reason: &str) {
        let mut maps = self.maps.lock().await;
        let removed = maps.tp_continuation.remove(symbol).is_some();
        maps.tp_continuation_cancelled.insert(symbol.to_string());
        if removed {
            info!(symbol, reason, "TP continuation monitoring stopped");
        }
    }

    /// Cancel pending exit continuation monitoring. Safe no-op when absent.
    /// Effective even against a copy the control loop has drained.
    pub async fn cancel_exit_continuation(&self, symbol: &str, reason: &str) {
        let mut maps = self.maps.lock().await;
        let removed = maps.exit_continuation.remove(symbol).is_some();
        maps.exit_continuation_cancelled.insert(symbol.to_string());
        if removed {
            info!(symbol, reason, "Exit continuation monitoring stopped");
        }
    }

    // One-shot evaluation protocol: the loop drains a kind, evaluates
    // without holding the lock, then restores only the entries it retained.
    // `or_insert` on restore keeps registrations that arrived mid-cycle
    // from being clobbered by stale retained copies, and the cancelled sets
    // keep cancellations that arrived mid-cycle from being undone: a
    // retained entry whose symbol was cancelled after the drain is dropped
    // instead of restored. Each take_* starts a fresh cancellation window.

    pub async fn take_sl_hunt(&self) -> HashMap<String, PendingSlHunt> {
        let mut maps = self.maps.lock().await;
        maps.sl_hunt_cancelled.clear();
        std::mem::take(&mut maps.sl_hunt)
    }

    pub async fn restore_sl_hunt(&self, retained: HashMap<String, PendingSlHunt>) {
        let mut maps = self.maps.lock().await;
        for (symbol, pending) in retained {
            if maps.sl_hunt_cancelled.remove(&symbol) {
                continue;
            }
            maps.sl_hunt.entry(symbol).or_insert(pending);
        }
        maps.sl_hunt_cancelled.clear();
    }

    pub async fn take_tp_continuation(&self) -> HashMap<String, PendingTpContinuation> {
        let mut maps = self.maps.lock().await;
        maps.tp_continuation_cancelled.clear();
        std::mem::take(&mut maps.tp_continuation)
    }

    pub async fn restore_tp_continuation(&self, retained: HashMap<String, PendingTpContinuation>) {
        let mut maps = self.maps.lock().await;
        for (symbol, pending) in retained {
            if maps.tp_continuation_cancelled.remove(&symbol) {
                continue;
            }
            maps.tp_continuation.entry(symbol).or_insert(pending);
        }
        maps.tp_continuation_cancelled.clear();
    }

    pub async fn take_exit_continuation(&self) -> HashMap<String, PendingExitContinuation> {
        let mut maps = self.maps.lock().await;
        maps.exit_continuation_cancelled.clear();
        std::mem::take(&mut maps.exit_continuation)
    }

    pub async fn restore_exit_continuation(
        &self,
        retained: HashMap<String, PendingExitContinuation>,
    ) {
        let mut maps = self.maps.lock().await;
        for (symbol, pending) in retained {
            if maps.exit_continuation_cancelled.remove(&symbol) {
                continue;
            }
            maps.exit_continuation.entry(symbol).or_insert(pending);
        }
        maps.exit_continuation_cancelled.clear();
    }

    /// (sl_hunt, tp_continuation, exit_continuation) pending counts.
    pub async fn pending_counts(&self) -> (usize, usize, usize) {
        let maps = self.maps.lock().await;
        (
            maps.sl_hunt.len(),
            maps.tp_continuation.len(),
            maps.exit_continuation.len(),
        )
    }

    /// Full pending snapshot for the status surface.
    pub async fn pending_details(&self) -> PendingDetails {
        let maps = self.maps.lock().await;
        PendingDetails {
            sl_hunt: maps.sl_hunt.clone(),
            tp_continuation: maps.tp_continuation.clone(),
            exit_continuation: maps.exit_continuation.clone(),
        }
    }
}
