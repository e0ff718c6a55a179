//! Simulated broker with settable prices, balance, and alignment answers.
//!
//! Backs `run --simulate` and the engine tests: orders and notifications are
//! recorded instead of sent, and failures can be injected per call site.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::{AlignmentResult, TradeSide, TrendDirection};

use super::{Notifier, OrderExecutor, PriceSource, TrendGate};

/// A simulated order recorded by [`SimBroker::place_order`].
#[derive(Debug, Clone)]
pub struct SimOrder {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub lot_size: Decimal,
    pub price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub comment: String,
}

#[derive(Default)]
struct SimState {
    prices: HashMap<String, Decimal>,
    alignments: HashMap<String, AlignmentResult>,
    orders: Vec<SimOrder>,
    closed: Vec<(String, Decimal)>,
    notifications: Vec<String>,
    /// Realized profit returned for the next close of a given trade id.
    close_profits: HashMap<String, Decimal>,
}

/// In-memory stand-in for the whole broker stack.
pub struct SimBroker {
    state: Arc<RwLock<SimState>>,
    balance: Arc<RwLock<Decimal>>,
    next_ticket: AtomicU64,
    fail_orders: AtomicBool,
}

impl SimBroker {
    pub fn new(balance: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimState::default())),
            balance: Arc::new(RwLock::new(balance)),
            next_ticket: AtomicU64::new(1),
            fail_orders: AtomicBool::new(false),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.write().await.prices.insert(symbol.to_string(), price);
    }

    pub async fn clear_price(&self, symbol: &str) {
        self.state.write().await.prices.remove(symbol);
    }

    pub async fn set_alignment(&self, symbol: &str, result: AlignmentResult) {
        self.state
            .write()
            .await
            .alignments
            .insert(symbol.to_string(), result);
    }

    pub async fn set_balance(&self, balance: Decimal) {
        *self.balance.write().await = balance;
    }

    /// Make subsequent `place_order` calls fail.
    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Fix the realized profit the next `close_order` for `trade_id` returns.
    pub async fn set_close_profit(&self, trade_id: &str, profit: Decimal) {
        self.state
            .write()
            .await
            .close_profits
            .insert(trade_id.to_string(), profit);
    }

    pub async fn orders(&self) -> Vec<SimOrder> {
        self.state.read().await.orders.clone()
    }

    pub async fn closed_orders(&self) -> Vec<(String, Decimal)> {
        self.state.read().await.closed.clone()
    }

    pub async fn notifications(&self) -> Vec<String> {
        self.state.read().await.notifications.clone()
    }
}

#[async_trait]
impl PriceSource for SimBroker {
    async fn current_price(&self, symbol: &str, _side: TradeSide) -> Option<Decimal> {
        self.state.read().await.prices.get(symbol).copied()
    }
}

#[async_trait]
impl OrderExecutor for SimBroker {
    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        lot_size: Decimal,
        price: Decimal,
        sl: Decimal,
        tp: Decimal,
        comment: &str,
    ) -> anyhow::Result<String> {
        if self.fail_orders.load(Ordering::SeqCst) {
            bail!("simulated order rejection for {symbol}");
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let trade_id = format!("sim-{ticket}");

        let order = SimOrder {
            trade_id: trade_id.clone(),
            symbol: symbol.to_string(),
            side,
            lot_size,
            price,
            sl,
            tp,
            comment: comment.to_string(),
        };
        self.state.write().await.orders.push(order);

        info!(symbol, side = side.as_str(), %price, %lot_size, "Simulated order filled");
        Ok(trade_id)
    }

    async fn close_order(
        &self,
        trade_id: &str,
        _symbol: &str,
        _lot_size: Decimal,
    ) -> anyhow::Result<Decimal> {
        let mut state = self.state.write().await;
        let profit = state
            .close_profits
            .remove(trade_id)
            .unwrap_or(Decimal::ZERO);
        state.closed.push((trade_id.to_string(), profit));
        Ok(profit)
    }

    async fn account_balance(&self) -> anyhow::Result<Decimal> {
        Ok(*self.balance.read().await)
    }
}

#[async_trait]
impl Notifier for SimBroker {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.state.write().await.notifications.push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl TrendGate for SimBroker {
    async fn check_alignment(&self, symbol: &str, _logic: &str) -> AlignmentResult {
        self.state
            .read()
            .await
            .alignments
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| {
                AlignmentResult::rejected(TrendDirection::Bullish, "no alignment configured")
            })
    }
}
