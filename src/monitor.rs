//! Price monitor: the fixed-interval control loop.
//!
//! Once per interval the loop evaluates, in fixed order, pending SL-hunt
//! triggers, TP-continuation triggers, exit-continuation triggers, and
//! profit-booking chains. Each category gets a single pass per cycle; a
//! mutation made by an earlier category is never re-evaluated within the
//! same cycle. Cycles never overlap: the next one starts only after the
//! current cycle and its sleep complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Notifier, OrderExecutor, PriceSource, TrendGate};
use crate::chains::{ProfitBookingManager, ReentryChainStore};
use crate::config::BotConfig;
use crate::db::Database;
use crate::models::{Trade, TradeSide};
use crate::trading::PositionSizer;
use crate::triggers::{
    PendingDetails, PendingExitContinuation, PendingSlHunt, PendingTpContinuation, TriggerRegistry,
};

/// External collaborators the loop talks to.
pub struct Collaborators {
    pub prices: Arc<dyn PriceSource>,
    pub executor: Arc<dyn OrderExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub gate: Arc<dyn TrendGate>,
}

/// Decision for one pending trigger within one cycle.
///
/// Encodes "retained vs dropped vs fired" in the type instead of leaving
/// it implicit in control flow.
#[derive(Debug)]
enum TriggerOutcome {
    /// Transient failure (price unavailable): keep for the next cycle.
    Retained,
    /// Target price not reached yet: keep for the next cycle.
    NotReached,
    /// Terminal rejection (gating, chain state): consume the trigger.
    Dropped,
    /// Re-entry executed (or decision completed): consume the trigger.
    Fired,
}

impl TriggerOutcome {
    fn retains(&self) -> bool {
        matches!(self, TriggerOutcome::Retained | TriggerOutcome::NotReached)
    }
}

/// Diagnostic snapshot returned by [`PriceMonitor::status`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub pending_counts: PendingCounts,
    pub pending_details: PendingDetails,
    pub open_trades: usize,
    pub active_chains: usize,
    pub active_profit_chains: usize,
    pub configuration: ConfigSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingCounts {
    pub sl_hunt: usize,
    pub tp_continuation: usize,
    pub exit_continuation: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub sl_hunt_enabled: bool,
    pub tp_reentry_enabled: bool,
    pub exit_continuation_enabled: bool,
    pub profit_booking_enabled: bool,
    pub monitor_interval_secs: u64,
    pub sl_hunt_offset_pips: Decimal,
    pub tp_continuation_gap_pips: Decimal,
    pub simulate_orders: bool,
}

/// The scheduled re-entry and profit-booking engine.
pub struct PriceMonitor {
    core: Arc<MonitorCore>,
    running: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the spawned loop task.
struct MonitorCore {
    config: BotConfig,
    registry: TriggerRegistry,
    chains: ReentryChainStore,
    profit: ProfitBookingManager,
    sizer: PositionSizer,
    collab: Collaborators,
    db: Arc<Database>,
    open_trades: Arc<RwLock<Vec<Trade>>>,
    last_cleanup: RwLock<chrono::DateTime<Utc>>,
}

impl PriceMonitor {
    pub fn new(config: BotConfig, collab: Collaborators, db: Arc<Database>) -> Self {
        let registry = TriggerRegistry::new(config.clone());
        let chains = ReentryChainStore::new(config.re_entry.max_chain_levels);
        let profit = ProfitBookingManager::new(config.clone());
        let sizer = PositionSizer::new(config.clone());

        let core = MonitorCore {
            config,
            registry,
            chains,
            profit,
            sizer,
            collab,
            db,
            open_trades: Arc::new(RwLock::new(Vec::new())),
            last_cleanup: RwLock::new(Utc::now()),
        };

        Self {
            core: Arc::new(core),
            running: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Trigger registry, for the trade-lifecycle collaborator.
    pub fn registry(&self) -> &TriggerRegistry {
        &self.core.registry
    }

    /// Re-entry chain store.
    pub fn chains(&self) -> &ReentryChainStore {
        &self.core.chains
    }

    /// Profit-booking manager.
    pub fn profit_chains(&self) -> &ProfitBookingManager {
        &self.core.profit
    }

    /// Shared open-trade set the loop appends to and books from.
    pub fn open_trades(&self) -> Arc<RwLock<Vec<Trade>>> {
        self.core.open_trades.clone()
    }

    /// Spawn the monitoring task. Warns and returns if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Price monitor already running");
            return;
        }

        let core = self.core.clone();
        let running = self.running.clone();
        let stop_notify = self.stop_notify.clone();

        let handle = tokio::spawn(async move {
            run_loop(core, running, stop_notify).await;
        });
        *self.handle.lock().await = Some(handle);

        info!(
            interval_secs = self.core.config.re_entry.monitor_interval_secs,
            "Price monitor started"
        );
    }

    /// Request a cooperative stop and wait for the in-flight cycle to
    /// finish before returning.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_one();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Monitor task join failed");
            }
        }
        info!("Price monitor stopped");
    }

    /// Side-effect-free diagnostic snapshot.
    pub async fn status(&self) -> MonitorStatus {
        let (sl_hunt, tp_continuation, exit_continuation) =
            self.core.registry.pending_counts().await;
        let cfg = &self.core.config;

        MonitorStatus {
            running: self.running.load(Ordering::SeqCst),
            pending_counts: PendingCounts {
                sl_hunt,
                tp_continuation,
                exit_continuation,
            },
            pending_details: self.core.registry.pending_details().await,
            open_trades: self.core.open_trades.read().await.len(),
            active_chains: self.core.chains.active_count().await,
            active_profit_chains: self.core.profit.active_count().await,
            configuration: ConfigSummary {
                sl_hunt_enabled: cfg.re_entry.sl_hunt_enabled,
                tp_reentry_enabled: cfg.re_entry.tp_reentry_enabled,
                exit_continuation_enabled: cfg.re_entry.exit_continuation_enabled,
                profit_booking_enabled: cfg.profit_booking.enabled,
                monitor_interval_secs: cfg.re_entry.monitor_interval_secs,
                sl_hunt_offset_pips: cfg.re_entry.sl_hunt_offset_pips,
                tp_continuation_gap_pips: cfg.re_entry.tp_continuation_gap_pips,
                simulate_orders: cfg.simulate_orders,
            },
        }
    }

    /// Run exactly one evaluation cycle. Exposed for tests; the spawned
    /// task calls the same path.
    pub async fn run_cycle_once(&self) {
        self.core.run_cycle().await;
    }
}

async fn run_loop(core: Arc<MonitorCore>, running: Arc<AtomicBool>, stop_notify: Arc<Notify>) {
    let interval = StdDuration::from_secs(core.config.re_entry.monitor_interval_secs);
    let mut cycle_count: u64 = 0;

    info!(
        interval_secs = interval.as_secs(),
        sl_hunt = core.config.re_entry.sl_hunt_enabled,
        tp = core.config.re_entry.tp_reentry_enabled,
        exit = core.config.re_entry.exit_continuation_enabled,
        "Monitor loop started"
    );

    while running.load(Ordering::SeqCst) {
        cycle_count += 1;

        if cycle_count % 10 == 0 {
            let (sl, tp, exit) = core.registry.pending_counts().await;
            info!(
                cycle = cycle_count,
                sl_hunt = sl,
                tp_continuation = tp,
                exit_continuation = exit,
                "Monitor loop heartbeat"
            );
        }

        let started = std::time::Instant::now();
        core.run_cycle().await;

        let elapsed = started.elapsed();
        if elapsed > interval {
            warn!(
                cycle_secs = elapsed.as_secs_f64(),
                interval_secs = interval.as_secs(),
                "Monitor cycle took longer than interval"
            );
        }

        // The sleep always follows the cycle; a stop request skips it but
        // never interrupts an in-flight cycle.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_notify.notified() => {}
        }
    }

    info!(cycles = cycle_count, "Monitor loop stopped");
}

impl MonitorCore {
    /// One cycle. Any unexpected error is caught here: the service never
    /// dies from a single cycle's failure.
    async fn run_cycle(&self) {
        if let Err(e) = self.try_cycle().await {
            error!(error = %e, "Monitor cycle error");
        }
    }

    async fn try_cycle(&self) -> Result<()> {
        debug!("Monitor cycle start");

        self.check_sl_hunt().await;
        self.check_tp_continuation().await;
        self.check_exit_continuation().await;
        self.check_profit_booking().await;
        self.maybe_run_cleanup().await;

        Ok(())
    }

    // ==================== SL hunt ====================

    async fn check_sl_hunt(&self) {
        if !self.config.re_entry.sl_hunt_enabled {
            return;
        }

        let pending = self.registry.take_sl_hunt().await;
        let mut retained = HashMap::new();

        for (symbol, entry) in pending {
            let outcome = self.eval_sl_hunt(&symbol, &entry).await;
            debug!(symbol = %symbol, ?outcome, "SL hunt evaluated");
            if outcome.retains() {
                retained.insert(symbol, entry);
            }
        }

        self.registry.restore_sl_hunt(retained).await;
    }

    async fn eval_sl_hunt(&self, symbol: &str, entry: &PendingSlHunt) -> TriggerOutcome {
        let Some(price) = self.collab.prices.current_price(symbol, entry.side).await else {
            debug!(symbol, "SL hunt: price unavailable");
            return TriggerOutcome::Retained;
        };

        if !target_reached(entry.side, price, entry.target_price) {
            debug!(
                symbol,
                side = entry.side.as_str(),
                %price,
                target = %entry.target_price,
                "SL hunt: target not reached"
            );
            return TriggerOutcome::NotReached;
        }

        info!(symbol, %price, target = %entry.target_price, "SL hunt re-entry triggered");

        if !self.gate_allows(symbol, &entry.logic, entry.side, "SL hunt").await {
            return TriggerOutcome::Dropped;
        }

        self.fire_chain_reentry(
            symbol,
            entry.side,
            price,
            &entry.chain_id,
            &entry.logic,
            ReentryKind::SlHunt,
        )
        .await
    }

    // ==================== TP continuation ====================

    async fn check_tp_continuation(&self) {
        if !self.config.re_entry.tp_reentry_enabled {
            return;
        }

        let pending = self.registry.take_tp_continuation().await;
        let mut retained = HashMap::new();

        for (symbol, entry) in pending {
            let outcome = self.eval_tp_continuation(&symbol, &entry).await;
            debug!(symbol = %symbol, ?outcome, "TP continuation evaluated");
            if outcome.retains() {
                retained.insert(symbol, entry);
            }
        }

        self.registry.restore_tp_continuation(retained).await;
    }

    async fn eval_tp_continuation(
        &self,
        symbol: &str,
        entry: &PendingTpContinuation,
    ) -> TriggerOutcome {
        let Some(price) = self.collab.prices.current_price(symbol, entry.side).await else {
            debug!(symbol, "TP continuation: price unavailable");
            return TriggerOutcome::Retained;
        };

        let sc = self.config.symbol_or_fallback(symbol);
        let gap = self.config.re_entry.tp_continuation_gap_pips * sc.pip_size;
        let target = match entry.side {
            TradeSide::Buy => entry.tp_price + gap,
            TradeSide::Sell => entry.tp_price - gap,
        };

        if !target_reached(entry.side, price, target) {
            debug!(
                symbol,
                side = entry.side.as_str(),
                %price,
                %target,
                "TP continuation: gap not reached"
            );
            return TriggerOutcome::NotReached;
        }

        info!(symbol, %price, %target, "TP continuation re-entry triggered");

        if !self
            .gate_allows(symbol, &entry.logic, entry.side, "TP continuation")
            .await
        {
            return TriggerOutcome::Dropped;
        }

        self.fire_chain_reentry(
            symbol,
            entry.side,
            price,
            &entry.chain_id,
            &entry.logic,
            ReentryKind::TpContinuation,
        )
        .await
    }

    // ==================== Exit continuation ====================

    async fn check_exit_continuation(&self) {
        if !self.config.re_entry.exit_continuation_enabled {
            return;
        }

        let pending = self.registry.take_exit_continuation().await;
        let mut retained = HashMap::new();

        for (symbol, entry) in pending {
            let outcome = self.eval_exit_continuation(&symbol, &entry).await;
            debug!(symbol = %symbol, ?outcome, "Exit continuation evaluated");
            if outcome.retains() {
                retained.insert(symbol, entry);
            }
        }

        self.registry.restore_exit_continuation(retained).await;
    }

    async fn eval_exit_continuation(
        &self,
        symbol: &str,
        entry: &PendingExitContinuation,
    ) -> TriggerOutcome {
        let Some(price) = self.collab.prices.current_price(symbol, entry.side).await else {
            return TriggerOutcome::Retained;
        };

        let sc = self.config.symbol_or_fallback(symbol);
        let gap = self.config.re_entry.tp_continuation_gap_pips * sc.pip_size;
        let target = match entry.side {
            TradeSide::Buy => entry.exit_price + gap,
            TradeSide::Sell => entry.exit_price - gap,
        };

        if !target_reached(entry.side, price, target) {
            debug!(
                symbol,
                side = entry.side.as_str(),
                reason = %entry.exit_reason,
                %price,
                %target,
                "Exit continuation: gap not reached"
            );
            return TriggerOutcome::NotReached;
        }

        info!(
            symbol,
            %price,
            reason = %entry.exit_reason,
            "Exit continuation re-entry triggered"
        );

        if !self
            .gate_allows(symbol, &entry.logic, entry.side, "Exit continuation")
            .await
        {
            return TriggerOutcome::Dropped;
        }

        // A fresh chain rather than a new level on an old one.
        let chain_id = self.chains.create_chain(symbol, &entry.logic).await;

        let balance = match self.collab.executor.account_balance().await {
            Ok(b) => b,
            Err(e) => {
                error!(symbol, error = %e, "Exit continuation: balance unavailable after fire");
                return TriggerOutcome::Fired;
            }
        };

        let lot_size = self.sizer.fixed_lot_size(balance);
        let (sl, _) =
            self.sizer
                .calculate_sl_price(symbol, price, entry.side, lot_size, balance, Decimal::ONE);
        let tp = self
            .sizer
            .calculate_tp_price(price, sl, entry.side, self.config.risk.rr_ratio);

        let mut trade = Trade {
            symbol: symbol.to_string(),
            entry: price,
            sl,
            tp,
            lot_size,
            side: entry.side,
            logic: entry.logic.clone(),
            open_time: Utc::now(),
            chain_id: Some(chain_id.clone()),
            chain_level: 0,
            is_re_entry: true,
            trade_id: None,
        };

        if !self.config.simulate_orders {
            let comment = format!("{}_EXIT_CONT_REENTRY", entry.logic);
            match self
                .collab
                .executor
                .place_order(symbol, entry.side, lot_size, price, sl, tp, &comment)
                .await
            {
                Ok(id) => trade.trade_id = Some(id),
                Err(e) => error!(symbol, error = %e, "Exit continuation order failed"),
            }
        }

        self.chains
            .attach_trade(&chain_id, trade.trade_id.as_deref())
            .await;
        self.open_trades.write().await.push(trade.clone());

        self.send_notification(format!(
            "EXIT CONTINUATION RE-ENTRY\n\
             Strategy: {}\n\
             Symbol: {}\n\
             Direction: {}\n\
             After: {}\n\
             Entry: {:.5}\n\
             SL: {:.5}\n\
             TP: {:.5}\n\
             Lots: {:.2}\n\
             Chain: {}",
            entry.logic,
            symbol,
            entry.side.as_str().to_uppercase(),
            entry.exit_reason,
            price,
            sl,
            tp,
            lot_size,
            chain_id,
        ))
        .await;

        TriggerOutcome::Fired
    }

    // ==================== Shared firing path ====================

    /// Alignment gate shared by all trigger kinds. Returning false is a
    /// business decision, not an error: the caller drops the trigger.
    async fn gate_allows(&self, symbol: &str, logic: &str, side: TradeSide, kind: &str) -> bool {
        let alignment = self.collab.gate.check_alignment(symbol, logic).await;

        if !alignment.aligned {
            warn!(
                symbol,
                logic,
                kind,
                reason = alignment.reason(),
                "Re-entry blocked: alignment failed"
            );
            return false;
        }

        let expected = side.implied_trend();
        if alignment.direction != expected {
            warn!(
                symbol,
                logic,
                kind,
                signal = expected.as_str(),
                alignment = alignment.direction.as_str(),
                "Re-entry blocked: direction mismatch"
            );
            return false;
        }

        true
    }

    /// Level a chain up with a new re-entry order. Shared by SL-hunt and
    /// TP-continuation firing; exit continuation seeds its own chain.
    async fn fire_chain_reentry(
        &self,
        symbol: &str,
        side: TradeSide,
        price: Decimal,
        chain_id: &str,
        logic: &str,
        kind: ReentryKind,
    ) -> TriggerOutcome {
        // Chain missing or exhausted: terminal, dropped without noise.
        let Some(chain) = self.chains.get(chain_id).await else {
            return TriggerOutcome::Dropped;
        };
        if !chain.has_capacity() {
            return TriggerOutcome::Dropped;
        }

        // Compounding SL tightening: (1 - reduction)^level.
        let reduction = self.config.re_entry.sl_reduction_per_level;
        let factor = (1.0 - reduction).powi(chain.current_level as i32);
        let adjustment = Decimal::try_from(factor).unwrap_or(Decimal::ONE);
        let reduction_pct = (1.0 - factor) * 100.0;

        let balance = match self.collab.executor.account_balance().await {
            Ok(b) => b,
            Err(e) => {
                // Fire decision already made: the trigger is consumed.
                error!(symbol, error = %e, "Re-entry balance unavailable after fire");
                return TriggerOutcome::Fired;
            }
        };

        let lot_size = self.sizer.fixed_lot_size(balance);
        let (sl, _) = self
            .sizer
            .calculate_sl_price(symbol, price, side, lot_size, balance, adjustment);
        let tp = self
            .sizer
            .calculate_tp_price(price, sl, side, self.config.risk.rr_ratio);

        let level = chain.current_level + 1;
        let mut trade = Trade {
            symbol: symbol.to_string(),
            entry: price,
            sl,
            tp,
            lot_size,
            side,
            logic: logic.to_string(),
            open_time: Utc::now(),
            chain_id: Some(chain_id.to_string()),
            chain_level: level,
            is_re_entry: true,
            trade_id: None,
        };

        if !self.config.simulate_orders {
            let comment = match kind {
                ReentryKind::SlHunt => format!("{logic}_SL_HUNT_REENTRY"),
                ReentryKind::TpContinuation => {
                    format!("{logic}_TP{}_REENTRY", chain.current_level)
                }
            };
            match self
                .collab
                .executor
                .place_order(symbol, side, lot_size, price, sl, tp, &comment)
                .await
            {
                Ok(id) => trade.trade_id = Some(id),
                Err(e) => error!(symbol, error = %e, "Re-entry order failed"),
            }
        }

        self.chains
            .advance_level(chain_id, trade.trade_id.as_deref())
            .await;
        self.open_trades.write().await.push(trade.clone());

        match kind {
            ReentryKind::SlHunt => {
                self.send_notification(format!(
                    "SL HUNT RE-ENTRY #{level}\n\
                     Strategy: {logic}\n\
                     Symbol: {symbol}\n\
                     Direction: {}\n\
                     Entry: {price:.5}\n\
                     SL: {sl:.5} (-{reduction_pct:.0}% reduction)\n\
                     TP: {tp:.5}\n\
                     Lots: {lot_size:.2}\n\
                     Chain: {chain_id}\n\
                     Level: {level}/{}",
                    side.as_str().to_uppercase(),
                    chain.max_level,
                ))
                .await;
            }
            ReentryKind::TpContinuation => {
                // Audit row for every TP-continuation re-entry.
                if let Err(e) = self
                    .db
                    .record_tp_reentry(
                        chain_id,
                        symbol,
                        level as i64,
                        chain.total_profit.to_f64().unwrap_or(0.0),
                        price.to_f64().unwrap_or(0.0),
                        reduction_pct,
                    )
                    .await
                {
                    error!(chain_id, error = %e, "Failed to persist TP re-entry event");
                }

                self.send_notification(format!(
                    "TP{level} RE-ENTRY\n\
                     Strategy: {logic}\n\
                     Symbol: {symbol}\n\
                     Direction: {}\n\
                     Entry: {price:.5}\n\
                     SL: {sl:.5} (-{reduction_pct:.0}% reduction)\n\
                     TP: {tp:.5}\n\
                     Lots: {lot_size:.2}\n\
                     Chain Profit: ${:.2}\n\
                     Level: {level}/{}",
                    side.as_str().to_uppercase(),
                    chain.total_profit,
                    chain.max_level,
                ))
                .await;
            }
        }

        TriggerOutcome::Fired
    }

    /// Fire-and-forget: a notification failure never blocks the loop.
    async fn send_notification(&self, text: String) {
        if let Err(e) = self.collab.notifier.notify(&text).await {
            warn!(error = %e, "Notification failed");
        }
    }

    // ==================== Profit booking ====================

    async fn check_profit_booking(&self) {
        if !self.config.profit_booking.enabled || !self.profit.is_enabled() {
            return;
        }

        for chain_id in self.profit.chain_ids().await {
            if let Err(e) = self.check_profit_chain(&chain_id).await {
                error!(chain_id = %chain_id, error = %e, "Error checking profit-booking chain");
            }
        }
    }

    /// Stale-chain sweep on its own cadence (default 5 minutes), kept off
    /// the per-trigger hot path. Runs every cycle regardless of the
    /// profit-booking toggle; both chain stores are swept.
    async fn maybe_run_cleanup(&self) {
        let interval = Duration::seconds(self.config.re_entry.cleanup_interval_secs as i64);
        let now = Utc::now();

        let mut last = self.last_cleanup.write().await;
        if now - *last < interval {
            return;
        }
        *last = now;
        drop(last);

        self.profit
            .cleanup_stale(Duration::seconds(self.config.profit_booking.stale_chain_secs))
            .await;
        self.chains
            .cleanup_stale(Duration::seconds(self.config.re_entry.chain_max_idle_secs))
            .await;
    }

    async fn check_profit_chain(&self, chain_id: &str) -> Result<()> {
        let open = self.open_trades.read().await.clone();

        if !self.profit.validate_chain(chain_id, &open).await {
            return Ok(());
        }

        let Some(chain) = self.profit.get(chain_id).await else {
            return Ok(());
        };

        // One price per chain; members share the symbol.
        let side = chain
            .orders
            .iter()
            .find(|o| !o.booked)
            .and_then(|o| {
                open.iter()
                    .find(|t| t.trade_id.as_deref() == Some(o.trade_id.as_str()))
            })
            .map(|t| t.side);
        let Some(side) = side else {
            return Ok(());
        };

        let Some(price) = self.collab.prices.current_price(&chain.symbol, side).await else {
            debug!(chain_id, symbol = %chain.symbol, "Profit booking: price unavailable");
            return Ok(());
        };

        let ready = self.profit.qualifying_orders(chain_id, &open, price).await;
        if ready.is_empty() {
            return Ok(());
        }

        for trade_id in &ready {
            match self
                .profit
                .book_order(chain_id, trade_id, self.collab.executor.as_ref(), &open)
                .await
            {
                Ok(realized) => {
                    self.open_trades
                        .write()
                        .await
                        .retain(|t| t.trade_id.as_deref() != Some(trade_id.as_str()));
                    info!(chain_id, trade_id = %trade_id, %realized, "Order booked");
                }
                Err(e) => {
                    error!(chain_id, trade_id = %trade_id, error = %e, "Failed to book order");
                }
            }
        }

        self.profit.check_and_progress(chain_id).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ReentryKind {
    SlHunt,
    TpContinuation,
}

/// Buy triggers fire at or above target; sell triggers at or below.
fn target_reached(side: TradeSide, price: Decimal, target: Decimal) -> bool {
    match side {
        TradeSide::Buy => price >= target,
        TradeSide::Sell => price <= target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::models::{AlignmentResult, TrendDirection};
    use rust_decimal_macros::dec;

    fn sim_config() -> BotConfig {
        BotConfig::default() // simulate_orders = true
    }

    async fn monitor_with_broker(config: BotConfig) -> (PriceMonitor, Arc<SimBroker>) {
        let broker = Arc::new(SimBroker::new(dec!(10000)));
        let collab = Collaborators {
            prices: broker.clone(),
            executor: broker.clone(),
            notifier: broker.clone(),
            gate: broker.clone(),
        };
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        (PriceMonitor::new(config, collab, db), broker)
    }

    fn stopped_trade(symbol: &str, side: TradeSide, sl: Decimal, chain_id: &str) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            entry: dec!(1905.00),
            sl,
            tp: dec!(1910.00),
            lot_size: dec!(0.10),
            side,
            logic: "LOGIC1".to_string(),
            open_time: Utc::now(),
            chain_id: Some(chain_id.to_string()),
            chain_level: 0,
            is_re_entry: false,
            trade_id: Some("t0".to_string()),
        }
    }

    #[test]
    fn directional_comparisons() {
        assert!(target_reached(TradeSide::Buy, dec!(1900.02), dec!(1900.01)));
        assert!(target_reached(TradeSide::Buy, dec!(1900.01), dec!(1900.01)));
        assert!(!target_reached(TradeSide::Buy, dec!(1900.00), dec!(1900.01)));

        assert!(target_reached(TradeSide::Sell, dec!(1949.70), dec!(1949.80)));
        assert!(!target_reached(TradeSide::Sell, dec!(1949.90), dec!(1949.80)));
    }

    #[test]
    fn reduction_factor_non_increasing() {
        let reduction = 0.10_f64;
        let mut prev = 1.0_f64;
        for level in 0..10 {
            let factor = (1.0 - reduction).powi(level);
            assert!(factor <= prev + 1e-12);
            prev = factor;
        }
    }

    // Scenario: SL=1900.00, offset=1 pip, pip 0.01, buy -> target 1900.01.
    // Price 1900.02 fires; aligned bullish -> re-entry at level 1 with a
    // tighter SL than level 0 would get.
    #[tokio::test]
    async fn sl_hunt_fires_and_levels_chain() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        // Level 0 -> 1 happened before the SL was hunted.
        monitor.chains().advance_level(&chain_id, Some("t0")).await;

        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;
        broker.set_price("XAUUSD", dec!(1900.02)).await;
        broker
            .set_alignment(
                "XAUUSD",
                AlignmentResult::aligned(TrendDirection::Bullish, "HTF agrees"),
            )
            .await;

        monitor.run_cycle_once().await;

        // Trigger consumed.
        assert_eq!(monitor.registry().pending_counts().await, (0, 0, 0));

        // Chain advanced to level 2, trade appended at that level.
        let chain = monitor.chains().get(&chain_id).await.unwrap();
        assert_eq!(chain.current_level, 2);

        let open = monitor.open_trades();
        let open = open.read().await;
        assert_eq!(open.len(), 1);
        let reentry = &open[0];
        assert_eq!(reentry.chain_level, 2);
        assert!(reentry.is_re_entry);
        // simulate_orders: no broker ticket, no real order.
        assert!(reentry.trade_id.is_none());
        assert!(broker.orders().await.is_empty());

        // SL tightened by the compounded factor (chain was at level 1 when
        // sized), so the distance is strictly inside the unadjusted one.
        let sizer = PositionSizer::new(sim_config());
        let (_, baseline) = sizer.calculate_sl_price(
            "XAUUSD",
            reentry.entry,
            TradeSide::Buy,
            reentry.lot_size,
            dec!(10000),
            Decimal::ONE,
        );
        let dist = reentry.entry - reentry.sl;
        assert!(dist > Decimal::ZERO);
        assert!(dist < baseline);

        let notes = broker.notifications().await;
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("SL HUNT RE-ENTRY"));
    }

    #[tokio::test]
    async fn sl_hunt_not_reached_is_retained() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;

        broker.set_price("XAUUSD", dec!(1900.00)).await; // below 1900.01
        monitor.run_cycle_once().await;

        let (sl, _, _) = monitor.registry().pending_counts().await;
        assert_eq!(sl, 1);
    }

    #[tokio::test]
    async fn price_unavailable_retains_trigger() {
        let (monitor, _broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;

        // No price set at all.
        monitor.run_cycle_once().await;

        let (sl, _, _) = monitor.registry().pending_counts().await;
        assert_eq!(sl, 1);
    }

    // Scenario: TP=1950.00, gap=2 pips, pip 0.1, sell -> target 1949.80.
    // Price 1949.70 fires but the trend is misaligned: dropped, no order.
    #[tokio::test]
    async fn tp_continuation_misaligned_is_dropped() {
        let mut config = sim_config();
        config.symbols.insert(
            "USOIL".to_string(),
            crate::config::SymbolConfig {
                pip_size: dec!(0.1),
                pip_value_per_std_lot: dec!(10.0),
            },
        );
        let (monitor, broker) = monitor_with_broker(config).await;

        let chain_id = monitor.chains().create_chain("USOIL", "LOGIC1").await;
        let trade = stopped_trade("USOIL", TradeSide::Sell, dec!(1955.00), &chain_id);

        monitor
            .registry()
            .register_tp_continuation(&trade, dec!(1950.00), "LOGIC1")
            .await;
        broker.set_price("USOIL", dec!(1949.70)).await;
        broker
            .set_alignment(
                "USOIL",
                AlignmentResult::rejected(TrendDirection::Bullish, "HTF disagrees"),
            )
            .await;

        monitor.run_cycle_once().await;

        // Consumed with no order and no chain movement.
        assert_eq!(monitor.registry().pending_counts().await, (0, 0, 0));
        assert!(broker.orders().await.is_empty());
        assert!(monitor.open_trades().read().await.is_empty());
        assert_eq!(
            monitor.chains().get(&chain_id).await.unwrap().current_level,
            0
        );
    }

    #[tokio::test]
    async fn direction_mismatch_drops_trigger() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;

        broker.set_price("XAUUSD", dec!(1900.05)).await;
        // Aligned, but bearish against a buy trigger.
        broker
            .set_alignment(
                "XAUUSD",
                AlignmentResult::aligned(TrendDirection::Bearish, "HTF bearish"),
            )
            .await;

        monitor.run_cycle_once().await;

        assert_eq!(monitor.registry().pending_counts().await, (0, 0, 0));
        assert!(monitor.open_trades().read().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_chain_drops_silently() {
        let mut config = sim_config();
        config.re_entry.max_chain_levels = 1;
        let (monitor, broker) = monitor_with_broker(config).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        monitor.chains().advance_level(&chain_id, None).await; // now at max

        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;

        broker.set_price("XAUUSD", dec!(1900.05)).await;
        broker
            .set_alignment(
                "XAUUSD",
                AlignmentResult::aligned(TrendDirection::Bullish, ""),
            )
            .await;

        monitor.run_cycle_once().await;

        assert_eq!(monitor.registry().pending_counts().await, (0, 0, 0));
        assert!(monitor.open_trades().read().await.is_empty());
        assert_eq!(
            monitor.chains().get(&chain_id).await.unwrap().current_level,
            1
        );
    }

    #[tokio::test]
    async fn exit_continuation_seeds_new_chain() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), "old-chain");
        monitor
            .registry()
            .register_exit_continuation(&trade, dec!(3640.200), "Reversal", "LOGIC1", "15M")
            .await;

        // Gap: 2 pips * 0.01 = 0.02 above exit.
        broker.set_price("XAUUSD", dec!(3640.23)).await;
        broker
            .set_alignment(
                "XAUUSD",
                AlignmentResult::aligned(TrendDirection::Bullish, ""),
            )
            .await;

        monitor.run_cycle_once().await;

        assert_eq!(monitor.registry().pending_counts().await, (0, 0, 0));

        let open = monitor.open_trades();
        let open = open.read().await;
        assert_eq!(open.len(), 1);
        let seeded = &open[0];
        assert_eq!(seeded.chain_level, 0);
        assert!(seeded.is_re_entry);

        // The chain is brand new, not "old-chain".
        let new_chain_id = seeded.chain_id.clone().unwrap();
        assert_ne!(new_chain_id, "old-chain");
        let chain = monitor.chains().get(&new_chain_id).await.unwrap();
        assert_eq!(chain.current_level, 0);
    }

    #[tokio::test]
    async fn profit_chain_books_and_advances() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        // Two level-0 orders, both open.
        let mk = |id: &str, entry: Decimal| Trade {
            symbol: "XAUUSD".to_string(),
            entry,
            sl: entry - dec!(0.10),
            tp: entry + dec!(1.50),
            lot_size: dec!(0.10),
            side: TradeSide::Buy,
            logic: "LOGIC1".to_string(),
            open_time: Utc::now(),
            chain_id: None,
            chain_level: 0,
            is_re_entry: false,
            trade_id: Some(id.to_string()),
        };
        {
            let open = monitor.open_trades();
            let mut open = open.write().await;
            open.push(mk("t1", dec!(1900.00)));
            open.push(mk("t2", dec!(1900.06)));
        }
        let chain_id = monitor
            .profit_chains()
            .create_chain("XAUUSD", &["t1".to_string(), "t2".to_string()])
            .await;
        monitor.profit_chains().add_order(&chain_id, "t3", 1).await;
        {
            let open = monitor.open_trades();
            open.write().await.push(mk("t3", dec!(1900.06)));
        }

        // t1 is +7 pips = $7 (books); t2 is +$1 (stays open).
        broker.set_price("XAUUSD", dec!(1900.07)).await;
        broker.set_close_profit("t1", dec!(7.00)).await;
        monitor.run_cycle_once().await;

        let chain = monitor.profit_chains().get(&chain_id).await.unwrap();
        assert_eq!(chain.current_level, 0); // t2 still open: no advance
        assert_eq!(chain.total_booked, dec!(7.00));
        assert_eq!(monitor.open_trades().read().await.len(), 2);

        // t2 reaches its target next cycle.
        broker.set_price("XAUUSD", dec!(1900.13)).await;
        broker.set_close_profit("t2", dec!(7.00)).await;
        monitor.run_cycle_once().await;

        let chain = monitor.profit_chains().get(&chain_id).await.unwrap();
        assert_eq!(chain.current_level, 1); // whole level closed: advance
        assert_eq!(chain.total_booked, dec!(14.00));
    }

    #[tokio::test]
    async fn stale_chains_swept_with_profit_booking_disabled() {
        let mut config = sim_config();
        config.profit_booking.enabled = false;
        // Sweep every cycle; any idle chain counts as stale.
        config.re_entry.cleanup_interval_secs = 0;
        config.re_entry.chain_max_idle_secs = 0;
        let (monitor, _broker) = monitor_with_broker(config).await;

        monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        assert_eq!(monitor.chains().active_count().await, 1);

        monitor.run_cycle_once().await;

        assert_eq!(monitor.chains().active_count().await, 0);
    }

    #[tokio::test]
    async fn tp_continuation_writes_audit_row() {
        let (monitor, broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor
            .registry()
            .register_tp_continuation(&trade, dec!(1910.00), "LOGIC1")
            .await;

        broker.set_price("XAUUSD", dec!(1910.02)).await;
        broker
            .set_alignment(
                "XAUUSD",
                AlignmentResult::aligned(TrendDirection::Bullish, ""),
            )
            .await;

        monitor.run_cycle_once().await;

        let events = monitor.core.db.recent_tp_reentries(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chain_id, chain_id);
        assert_eq!(events[0].symbol, "XAUUSD");
        assert_eq!(events[0].level, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins() {
        let mut config = sim_config();
        config.re_entry.monitor_interval_secs = 3600; // long sleep; stop must not wait it out
        let (monitor, _broker) = monitor_with_broker(config).await;

        monitor.start().await;
        monitor.start().await; // second call warns and returns

        let status = monitor.status().await;
        assert!(status.running);

        monitor.stop().await;
        let status = monitor.status().await;
        assert!(!status.running);
    }

    #[tokio::test]
    async fn status_reports_pending_and_config() {
        let (monitor, _broker) = monitor_with_broker(sim_config()).await;

        let chain_id = monitor.chains().create_chain("XAUUSD", "LOGIC1").await;
        let trade = stopped_trade("XAUUSD", TradeSide::Buy, dec!(1900.00), &chain_id);
        monitor.registry().register_sl_hunt(&trade, "LOGIC1").await;

        let status = monitor.status().await;
        assert!(!status.running);
        assert_eq!(status.pending_counts.sl_hunt, 1);
        assert_eq!(status.active_chains, 1);
        assert_eq!(status.configuration.monitor_interval_secs, 30);
        assert!(status.pending_details.sl_hunt.contains_key("XAUUSD"));
    }
}
