//! Store for active re-entry chains.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::ReentryChain;

/// Owns all active re-entry chains.
///
/// Mutated by the control loop during evaluation and by the trade-lifecycle
/// collaborator when sequences open; the inner lock serializes both paths.
#[derive(Clone)]
pub struct ReentryChainStore {
    chains: Arc<RwLock<HashMap<String, ReentryChain>>>,
    max_level: u32,
}

impl ReentryChainStore {
    pub fn new(max_level: u32) -> Self {
        Self {
            chains: Arc::new(RwLock::new(HashMap::new())),
            max_level,
        }
    }

    /// Create a fresh chain at level 0 and return its id.
    pub async fn create_chain(&self, symbol: &str, logic: &str) -> String {
        let chain_id = uuid::Uuid::new_v4().to_string();
        let chain = ReentryChain::new(
            chain_id.clone(),
            symbol.to_string(),
            logic.to_string(),
            self.max_level,
        );

        self.chains.write().await.insert(chain_id.clone(), chain);
        info!(chain_id = %chain_id, symbol, logic, "Re-entry chain created");
        chain_id
    }

    /// Record chain membership without advancing the level (used for the
    /// seed trade of an exit-continuation chain).
    pub async fn attach_trade(&self, chain_id: &str, trade_id: Option<&str>) {
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(chain_id) else {
            warn!(chain_id, "Cannot attach trade to unknown chain");
            return;
        };

        if let Some(id) = trade_id {
            chain.trade_ids.push(id.to_string());
        }
        chain.last_activity = Utc::now();
    }

    /// Advance the chain by one level after a successful re-entry.
    ///
    /// Logged no-op when the chain is unknown or already at its ceiling;
    /// levels never decrement.
    pub async fn advance_level(&self, chain_id: &str, trade_id: Option<&str>) -> bool {
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(chain_id) else {
            warn!(chain_id, "Cannot advance unknown chain");
            return false;
        };

        if !chain.has_capacity() {
            warn!(
                chain_id,
                level = chain.current_level,
                max = chain.max_level,
                "Chain already at max level, not advancing"
            );
            return false;
        }

        chain.current_level += 1;
        if let Some(id) = trade_id {
            chain.trade_ids.push(id.to_string());
        }
        chain.last_activity = Utc::now();

        debug!(chain_id, level = chain.current_level, "Chain advanced");
        true
    }

    pub async fn get(&self, chain_id: &str) -> Option<ReentryChain> {
        self.chains.read().await.get(chain_id).cloned()
    }

    /// Add realized profit to the chain's running total.
    pub async fn record_profit(&self, chain_id: &str, amount: Decimal) {
        let mut chains = self.chains.write().await;
        if let Some(chain) = chains.get_mut(chain_id) {
            chain.total_profit += amount;
            chain.last_activity = Utc::now();
        }
    }

    pub async fn active_count(&self) -> usize {
        self.chains.read().await.len()
    }

    /// Remove chains idle past the horizon. Runs from the control loop's
    /// periodic sweep, never on the hot path.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut chains = self.chains.write().await;

        let before = chains.len();
        chains.retain(|_, chain| chain.last_activity >= cutoff);
        let removed = before - chains.len();

        if removed > 0 {
            info!(removed, remaining = chains.len(), "Stale re-entry chains removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn advance_stops_at_max_level() {
        let store = ReentryChainStore::new(2);
        let id = store.create_chain("XAUUSD", "LOGIC1").await;

        assert!(store.advance_level(&id, Some("t1")).await);
        assert!(store.advance_level(&id, Some("t2")).await);
        // Exhausted: no-op.
        assert!(!store.advance_level(&id, Some("t3")).await);

        let chain = store.get(&id).await.unwrap();
        assert_eq!(chain.current_level, 2);
        assert_eq!(chain.trade_ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn advance_unknown_chain_is_noop() {
        let store = ReentryChainStore::new(5);
        assert!(!store.advance_level("missing", None).await);
    }

    #[tokio::test]
    async fn profit_accumulates() {
        let store = ReentryChainStore::new(5);
        let id = store.create_chain("EURUSD", "LOGIC2").await;

        store.record_profit(&id, dec!(12.50)).await;
        store.record_profit(&id, dec!(-2.50)).await;

        assert_eq!(store.get(&id).await.unwrap().total_profit, dec!(10.00));
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale() {
        let store = ReentryChainStore::new(5);
        let stale = store.create_chain("XAUUSD", "LOGIC1").await;
        let fresh = store.create_chain("EURUSD", "LOGIC1").await;

        {
            let mut chains = store.chains.write().await;
            chains.get_mut(&stale).unwrap().last_activity = Utc::now() - Duration::hours(2);
        }

        let removed = store.cleanup_stale(Duration::hours(1)).await;
        assert_eq!(removed, 1);
        assert!(store.get(&stale).await.is_none());
        assert!(store.get(&fresh).await.is_some());
    }
}
