//! Stop-loss calculator for profit-booking orders.
//!
//! Independent of the risk-based sizer: every profit-booking order gets a
//! stop targeting the same fixed dollar loss regardless of chain level.

use rust_decimal::Decimal;
use tracing::warn;

use crate::config::{BotConfig, FALLBACK_PIP_SIZE, FALLBACK_PIP_VALUE_PER_STD_LOT};
use crate::models::TradeSide;

/// Diagnostics from [`ProfitBookingSlCalculator::validate_sl_loss`].
#[derive(Debug, Clone)]
pub struct SlLossValidation {
    pub valid: bool,
    pub actual_loss: Decimal,
    pub expected_loss: Decimal,
    pub difference: Decimal,
    pub tolerance: Decimal,
}

pub struct ProfitBookingSlCalculator {
    config: BotConfig,
    fixed_sl_loss: Decimal,
}

impl ProfitBookingSlCalculator {
    pub fn new(config: BotConfig) -> Self {
        let fixed_sl_loss = config.profit_booking.fixed_sl_loss;
        Self { config, fixed_sl_loss }
    }

    fn pip_params(&self, symbol: &str) -> (Decimal, Decimal) {
        match self.config.symbol(symbol) {
            Some(sc) => (sc.pip_size, sc.pip_value_per_std_lot),
            None => {
                warn!(symbol, "Symbol missing from pip table, using fallback SL constants");
                (FALLBACK_PIP_SIZE, FALLBACK_PIP_VALUE_PER_STD_LOT)
            }
        }
    }

    /// SL price and distance that lose exactly the fixed dollar amount.
    pub fn calculate_sl_price(
        &self,
        entry: Decimal,
        side: TradeSide,
        symbol: &str,
        lot_size: Decimal,
    ) -> (Decimal, Decimal) {
        let (pip_size, pip_value_per_std_lot) = self.pip_params(symbol);
        let pip_value = pip_value_per_std_lot * lot_size;

        if pip_value.is_zero() {
            return (entry, Decimal::ZERO);
        }

        let sl_pips = self.fixed_sl_loss / pip_value;
        let sl_distance = sl_pips * pip_size;

        let sl_price = match side {
            TradeSide::Buy => entry - sl_distance,
            TradeSide::Sell => entry + sl_distance,
        };

        (sl_price, sl_distance)
    }

    /// Pip value in account currency for a symbol and lot size.
    pub fn pip_value(&self, symbol: &str, lot_size: Decimal) -> Decimal {
        let (_, pip_value_per_std_lot) = self.pip_params(symbol);
        pip_value_per_std_lot * lot_size
    }

    /// Check that a stop yields the fixed target loss within 5% tolerance.
    pub fn validate_sl_loss(
        &self,
        entry: Decimal,
        sl_price: Decimal,
        symbol: &str,
        lot_size: Decimal,
    ) -> SlLossValidation {
        let (pip_size, pip_value_per_std_lot) = self.pip_params(symbol);
        let pip_value = pip_value_per_std_lot * lot_size;

        let expected_loss = self.fixed_sl_loss;
        let tolerance = expected_loss * Decimal::new(5, 2); // 5%

        if pip_size.is_zero() || pip_value.is_zero() {
            return SlLossValidation {
                valid: false,
                actual_loss: Decimal::ZERO,
                expected_loss,
                difference: expected_loss,
                tolerance,
            };
        }

        let pips = (entry - sl_price).abs() / pip_size;
        let actual_loss = pips * pip_value;
        let difference = (actual_loss - expected_loss).abs();

        SlLossValidation {
            valid: difference <= tolerance,
            actual_loss,
            expected_loss,
            difference,
            tolerance,
        }
    }
}
