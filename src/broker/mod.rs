//! External collaborator seams: price feed, order execution, notification,
//! and the trend alignment gate.
//!
//! The engine only ever talks to these traits; broker protocol details,
//! chat-bot transport, and signal generation live behind them.

mod sim;

pub use sim::SimBroker;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{AlignmentResult, TradeSide};

/// Current price lookup. `None` means the feed is unavailable right now;
/// the caller retains its pending work and retries next cycle.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Ask price for buys, bid price for sells.
    async fn current_price(&self, symbol: &str, side: TradeSide) -> Option<Decimal>;
}

/// Order placement and account queries.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Place a market order; returns the broker ticket.
    #[allow(clippy::too_many_arguments)]
    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        lot_size: Decimal,
        price: Decimal,
        sl: Decimal,
        tp: Decimal,
        comment: &str,
    ) -> anyhow::Result<String>;

    /// Close an open order at market; returns realized profit.
    async fn close_order(
        &self,
        trade_id: &str,
        symbol: &str,
        lot_size: Decimal,
    ) -> anyhow::Result<Decimal>;

    /// Current account balance.
    async fn account_balance(&self) -> anyhow::Result<Decimal>;
}

/// Fire-and-forget notification channel. Failures are logged by callers and
/// never block the control loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// Directional confirmation gate. Authoritative: a failed check is never
/// retried within the same cycle.
#[async_trait]
pub trait TrendGate: Send + Sync {
    async fn check_alignment(&self, symbol: &str, logic: &str) -> AlignmentResult;
}
