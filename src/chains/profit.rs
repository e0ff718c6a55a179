//! Profit-booking chains: close individual orders at small fixed targets
//! and progress through levels as each level fully closes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::OrderExecutor;
use crate::config::BotConfig;
use crate::models::{ProfitBookingChain, ProfitOrder, Trade};

/// Owns all active profit-booking chains.
#[derive(Clone)]
pub struct ProfitBookingManager {
    config: BotConfig,
    chains: Arc<RwLock<HashMap<String, ProfitBookingChain>>>,
}

impl ProfitBookingManager {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            chains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.profit_booking.enabled
    }

    /// Create a chain with the given trades as its level-0 members.
    pub async fn create_chain(&self, symbol: &str, trade_ids: &[String]) -> String {
        let chain_id = uuid::Uuid::new_v4().to_string();
        let target = self.config.profit_booking.per_order_target;

        let mut chain = ProfitBookingChain::new(chain_id.clone(), symbol.to_string());
        for trade_id in trade_ids {
            chain.orders.push(ProfitOrder::new(trade_id.clone(), 0, target));
        }

        self.chains.write().await.insert(chain_id.clone(), chain);
        info!(chain_id = %chain_id, symbol, members = trade_ids.len(), "Profit-booking chain created");
        chain_id
    }

    /// Register an order under a chain at the given level.
    ///
    /// Rejected (logged no-op) when the order already belongs to any chain:
    /// an order is a member of at most one profit-booking chain.
    pub async fn add_order(&self, chain_id: &str, trade_id: &str, level: u32) {
        let mut chains = self.chains.write().await;

        let taken = chains
            .values()
            .any(|c| c.orders.iter().any(|o| o.trade_id == trade_id));
        if taken {
            warn!(trade_id, "Order already tracked by a profit-booking chain");
            return;
        }

        let Some(chain) = chains.get_mut(chain_id) else {
            warn!(chain_id, "Cannot add order to unknown profit-booking chain");
            return;
        };

        let target = self.config.profit_booking.per_order_target;
        chain
            .orders
            .push(ProfitOrder::new(trade_id.to_string(), level, target));
        chain.last_activity = Utc::now();
    }

    pub async fn get(&self, chain_id: &str) -> Option<ProfitBookingChain> {
        self.chains.read().await.get(chain_id).cloned()
    }

    pub async fn chain_ids(&self) -> Vec<String> {
        self.chains.read().await.keys().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.chains.read().await.len()
    }

    /// Reconcile a chain against the open-trade set: de-duplicate members
    /// and drop unbooked orders that are no longer open. Returns false when
    /// nothing tracked remains to evaluate.
    pub async fn validate_chain(&self, chain_id: &str, open_trades: &[Trade]) -> bool {
        let open_ids: HashSet<&str> = open_trades
            .iter()
            .filter_map(|t| t.trade_id.as_deref())
            .collect();

        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(chain_id) else {
            return false;
        };

        let mut seen = HashSet::new();
        chain.orders.retain(|order| {
            if !seen.insert(order.trade_id.clone()) {
                debug!(trade_id = %order.trade_id, "Dropping duplicate chain member");
                return false;
            }
            // Booked members stay for level accounting.
            order.booked || open_ids.contains(order.trade_id.as_str())
        });

        chain.orders.iter().any(|o| !o.booked)
    }

    /// Trade ids at the chain's current level whose unrealized profit has
    /// reached the per-order target. Higher levels wait their turn.
    pub async fn qualifying_orders(
        &self,
        chain_id: &str,
        open_trades: &[Trade],
        current_price: Decimal,
    ) -> Vec<String> {
        let chains = self.chains.read().await;
        let Some(chain) = chains.get(chain_id) else {
            return Vec::new();
        };

        let sc = self.config.symbol_or_fallback(&chain.symbol);

        chain
            .orders
            .iter()
            .filter(|o| !o.booked && o.level == chain.current_level)
            .filter_map(|order| {
                let trade = open_trades
                    .iter()
                    .find(|t| t.trade_id.as_deref() == Some(order.trade_id.as_str()))?;
                let pip_value = sc.pip_value_per_std_lot * trade.lot_size;
                let pnl = trade.unrealized_pnl(current_price, sc.pip_size, pip_value);
                (pnl >= order.target).then(|| order.trade_id.clone())
            })
            .collect()
    }

    /// Close one order at market and record its realized profit.
    pub async fn book_order(
        &self,
        chain_id: &str,
        trade_id: &str,
        executor: &dyn OrderExecutor,
        open_trades: &[Trade],
    ) -> anyhow::Result<Decimal> {
        let (symbol, lot_size) = {
            let trade = open_trades
                .iter()
                .find(|t| t.trade_id.as_deref() == Some(trade_id))
                .ok_or_else(|| anyhow::anyhow!("trade {trade_id} not in open set"))?;
            (trade.symbol.clone(), trade.lot_size)
        };

        let realized = executor.close_order(trade_id, &symbol, lot_size).await?;

        let mut chains = self.chains.write().await;
        if let Some(chain) = chains.get_mut(chain_id) {
            if let Some(order) = chain
                .orders
                .iter_mut()
                .find(|o| o.trade_id == trade_id && !o.booked)
            {
                order.booked = true;
                order.realized = realized;
                chain.total_booked += realized;
                chain.last_activity = Utc::now();
            }
        }

        info!(chain_id, trade_id, %realized, "Profit-booking order closed");
        Ok(realized)
    }

    /// Advance the chain once every current-level order is booked; remove
    /// the chain entirely when no members remain beyond the finished level.
    pub async fn check_and_progress(&self, chain_id: &str) {
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(chain_id) else {
            return;
        };

        if !chain.level_complete() {
            return;
        }

        let finished = chain.current_level;
        let has_higher = chain.orders.iter().any(|o| o.level > finished);

        if has_higher {
            chain.current_level += 1;
            chain.last_activity = Utc::now();
            info!(chain_id, level = chain.current_level, "Profit-booking chain advanced");
        } else {
            let total = chain.total_booked;
            chains.remove(chain_id);
            info!(chain_id, %total, "Profit-booking chain complete, archived");
        }
    }

    /// Remove chains idle past the horizon. Periodic sweep only.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut chains = self.chains.write().await;

        let before = chains.len();
        chains.retain(|_, chain| chain.last_activity >= cutoff);
        let removed = before - chains.len();

        if removed > 0 {
            info!(removed, remaining = chains.len(), "Stale profit-booking chains removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::models::TradeSide;
    use rust_decimal_macros::dec;

    fn open_trade(trade_id: &str, entry: Decimal) -> Trade {
        Trade {
            symbol: "XAUUSD".to_string(),
            entry,
            sl: entry - dec!(1.00),
            tp: entry + dec!(1.50),
            lot_size: dec!(0.10), // $1/pip
            side: TradeSide::Buy,
            logic: "LOGIC1".to_string(),
            open_time: Utc::now(),
            chain_id: None,
            chain_level: 0,
            is_re_entry: false,
            trade_id: Some(trade_id.to_string()),
        }
    }

    fn manager() -> ProfitBookingManager {
        ProfitBookingManager::new(BotConfig::default())
    }

    #[tokio::test]
    async fn qualifying_respects_per_order_target() {
        let mgr = manager();
        let open = vec![open_trade("t1", dec!(1900.00)), open_trade("t2", dec!(1900.05))];
        let id = mgr
            .create_chain("XAUUSD", &["t1".to_string(), "t2".to_string()])
            .await;

        // At 1900.07: t1 is +7 pips = $7 (target), t2 is +$2.
        let ready = mgr.qualifying_orders(&id, &open, dec!(1900.07)).await;
        assert_eq!(ready, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn booking_is_not_repeated() {
        let mgr = manager();
        let broker = SimBroker::new(dec!(10000));
        let open = vec![open_trade("t1", dec!(1900.00))];
        let id = mgr.create_chain("XAUUSD", &["t1".to_string()]).await;

        broker.set_close_profit("t1", dec!(7.00)).await;
        let realized = mgr.book_order(&id, "t1", &broker, &open).await.unwrap();
        assert_eq!(realized, dec!(7.00));

        // Booked orders no longer qualify.
        let ready = mgr.qualifying_orders(&id, &open, dec!(1999.00)).await;
        assert!(ready.is_empty());

        let chain = mgr.get(&id).await.unwrap();
        assert_eq!(chain.total_booked, dec!(7.00));
    }

    #[tokio::test]
    async fn level_advances_only_when_all_closed() {
        let mgr = manager();
        let broker = SimBroker::new(dec!(10000));
        let open = vec![open_trade("t1", dec!(1900.00)), open_trade("t2", dec!(1900.00))];
        let id = mgr
            .create_chain("XAUUSD", &["t1".to_string(), "t2".to_string()])
            .await;
        mgr.add_order(&id, "t3", 1).await;
        let open = {
            let mut v = open;
            v.push(open_trade("t3", dec!(1900.00)));
            v
        };

        broker.set_close_profit("t1", dec!(7.00)).await;
        mgr.book_order(&id, "t1", &broker, &open).await.unwrap();
        mgr.check_and_progress(&id).await;
        assert_eq!(mgr.get(&id).await.unwrap().current_level, 0);

        broker.set_close_profit("t2", dec!(7.00)).await;
        mgr.book_order(&id, "t2", &broker, &open).await.unwrap();
        mgr.check_and_progress(&id).await;
        assert_eq!(mgr.get(&id).await.unwrap().current_level, 1);
    }

    #[tokio::test]
    async fn chain_archived_when_all_levels_complete() {
        let mgr = manager();
        let broker = SimBroker::new(dec!(10000));
        let open = vec![open_trade("t1", dec!(1900.00))];
        let id = mgr.create_chain("XAUUSD", &["t1".to_string()]).await;

        mgr.book_order(&id, "t1", &broker, &open).await.unwrap();
        mgr.check_and_progress(&id).await;

        assert!(mgr.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn order_belongs_to_one_chain_only() {
        let mgr = manager();
        let a = mgr.create_chain("XAUUSD", &["t1".to_string()]).await;
        let b = mgr.create_chain("XAUUSD", &[]).await;

        mgr.add_order(&b, "t1", 0).await;
        assert!(mgr.get(&b).await.unwrap().orders.is_empty());
        assert_eq!(mgr.get(&a).await.unwrap().orders.len(), 1);
    }

    #[tokio::test]
    async fn validate_drops_dead_refs_and_duplicates() {
        let mgr = manager();
        let open = vec![open_trade("t1", dec!(1900.00))];
        let id = mgr.create_chain("XAUUSD", &["t1".to_string()]).await;

        // Inject a duplicate and a dangling reference directly.
        {
            let mut chains = mgr.chains.write().await;
            let chain = chains.get_mut(&id).unwrap();
            chain.orders.push(ProfitOrder::new("t1".to_string(), 0, dec!(7)));
            chain.orders.push(ProfitOrder::new("gone".to_string(), 0, dec!(7)));
        }

        assert!(mgr.validate_chain(&id, &open).await);
        let chain = mgr.get(&id).await.unwrap();
        assert_eq!(chain.orders.len(), 1);
        assert_eq!(chain.orders[0].trade_id, "t1");
    }
}
