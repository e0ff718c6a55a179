//! Risk-based stop-loss, take-profit, and lot sizing.

use rust_decimal::Decimal;

use crate::config::BotConfig;
use crate::models::TradeSide;

/// Maps (symbol, balance, side, risk adjustment) to SL/TP prices and lots.
///
/// Missing symbol configuration is recovered locally via the documented
/// fallback pip constants and never propagated as an error.
pub struct PositionSizer {
    config: BotConfig,
}

impl PositionSizer {
    pub fn new(config: BotConfig) -> Self {
        Self { config }
    }

    /// Compute the stop-loss price and its distance from entry.
    ///
    /// Base risk is `balance * risk_per_trade`, scaled by `adjustment`
    /// (the compounding per-level reduction), converted to pips via the
    /// symbol's pip value for this lot size, then applied opposite the
    /// trade side.
    pub fn calculate_sl_price(
        &self,
        symbol: &str,
        entry: Decimal,
        side: TradeSide,
        lot_size: Decimal,
        balance: Decimal,
        adjustment: Decimal,
    ) -> (Decimal, Decimal) {
        let sc = self.config.symbol_or_fallback(symbol);
        let pip_value = sc.pip_value_per_std_lot * lot_size;

        if pip_value.is_zero() {
            return (entry, Decimal::ZERO);
        }

        let risk_amount = balance * self.config.risk.risk_per_trade * adjustment;
        let sl_pips = risk_amount / pip_value;
        let sl_distance = sl_pips * sc.pip_size;

        let sl_price = match side {
            TradeSide::Buy => entry - sl_distance,
            TradeSide::Sell => entry + sl_distance,
        };

        (sl_price, sl_distance)
    }

    /// Take-profit at `rr_ratio` times the SL distance on the profit side.
    pub fn calculate_tp_price(
        &self,
        entry: Decimal,
        sl_price: Decimal,
        side: TradeSide,
        rr_ratio: Decimal,
    ) -> Decimal {
        let sl_distance = (entry - sl_price).abs();
        let tp_distance = sl_distance * rr_ratio;

        match side {
            TradeSide::Buy => entry + tp_distance,
            TradeSide::Sell => entry - tp_distance,
        }
    }

    /// Fixed lot size for the current balance from the configured tiers.
    pub fn fixed_lot_size(&self, balance: Decimal) -> Decimal {
        let mut lot = self
            .config
            .risk
            .lot_tiers
            .first()
            .map(|t| t.lot_size)
            .unwrap_or(Decimal::ONE);

        for tier in &self.config.risk.lot_tiers {
            if balance >= tier.min_balance {
                lot = tier.lot_size;
            }
        }

        lot
    }
}
