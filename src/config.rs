//! Engine configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-symbol pip configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Smallest quoted pip increment (e.g., 0.01 for XAUUSD)
    pub pip_size: Decimal,

    /// Pip value in account currency per 1.0 standard lot
    pub pip_value_per_std_lot: Decimal,
}

/// Conservative fallback used when a symbol is missing from the pip table.
pub const FALLBACK_PIP_SIZE: Decimal = dec!(0.01);
pub const FALLBACK_PIP_VALUE_PER_STD_LOT: Decimal = dec!(10.0);

/// Re-entry monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReentryConfig {
    /// SL-hunt recovery re-entries
    pub sl_hunt_enabled: bool,

    /// TP continuation re-entries
    pub tp_reentry_enabled: bool,

    /// Re-entries after discretionary exit/reversal signals
    pub exit_continuation_enabled: bool,

    /// Control loop interval (seconds)
    pub monitor_interval_secs: u64,

    /// Pips above/below the hunted SL before re-entering
    pub sl_hunt_offset_pips: Decimal,

    /// Confirmation gap beyond the previous TP (pips)
    pub tp_continuation_gap_pips: Decimal,

    /// Fractional SL reduction applied per chain level (0, 1]
    pub sl_reduction_per_level: f64,

    /// Ceiling on chain re-entries
    pub max_chain_levels: u32,

    /// Chains idle longer than this are archived (seconds)
    pub chain_max_idle_secs: i64,

    /// Cadence of the stale-chain sweep (seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for ReentryConfig {
    fn default() -> Self {
        Self {
            sl_hunt_enabled: true,
            tp_reentry_enabled: true,
            exit_continuation_enabled: true,
            monitor_interval_secs: 30,
            sl_hunt_offset_pips: dec!(1.0),
            tp_continuation_gap_pips: dec!(2.0),
            sl_reduction_per_level: 0.10, // 10% tighter per level
            max_chain_levels: 5,
            chain_max_idle_secs: 3600,    // 1 hour
            cleanup_interval_secs: 300,   // 5 minutes
        }
    }
}

/// Profit-booking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitBookingConfig {
    pub enabled: bool,

    /// Per-order profit target in account currency
    pub per_order_target: Decimal,

    /// Fixed dollar loss the booking SL calculator aims for
    pub fixed_sl_loss: Decimal,

    /// Profit chains idle longer than this are archived (seconds)
    pub stale_chain_secs: i64,
}

impl Default for ProfitBookingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_order_target: dec!(7.0),
            fixed_sl_loss: dec!(10.0),
            stale_chain_secs: 3600,
        }
    }
}

/// A fixed lot size applied at and above a balance threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LotTier {
    pub min_balance: Decimal,
    pub lot_size: Decimal,
}

/// Risk and sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade before level adjustment
    pub risk_per_trade: Decimal,

    /// Reward-to-risk ratio for take-profit placement
    pub rr_ratio: Decimal,

    /// Fixed lot tiers, ascending by balance threshold
    pub lot_tiers: Vec<LotTier>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(0.01), // 1% of balance
            rr_ratio: dec!(1.5),
            lot_tiers: vec![
                LotTier { min_balance: dec!(0), lot_size: dec!(0.01) },
                LotTier { min_balance: dec!(1000), lot_size: dec!(0.05) },
                LotTier { min_balance: dec!(5000), lot_size: dec!(0.10) },
                LotTier { min_balance: dec!(10000), lot_size: dec!(0.20) },
                LotTier { min_balance: dec!(25000), lot_size: dec!(0.50) },
            ],
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Skip broker order placement and run fully simulated
    pub simulate_orders: bool,

    /// SQLite URL for the TP re-entry audit trail
    pub database_url: String,

    pub re_entry: ReentryConfig,
    pub profit_booking: ProfitBookingConfig,
    pub risk: RiskConfig,

    /// Per-symbol pip table
    pub symbols: HashMap<String, SymbolConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        let mut symbols = HashMap::new();
        symbols.insert(
            "XAUUSD".to_string(),
            SymbolConfig { pip_size: dec!(0.01), pip_value_per_std_lot: dec!(10.0) },
        );
        symbols.insert(
            "EURUSD".to_string(),
            SymbolConfig { pip_size: dec!(0.0001), pip_value_per_std_lot: dec!(10.0) },
        );
        symbols.insert(
            "GBPUSD".to_string(),
            SymbolConfig { pip_size: dec!(0.0001), pip_value_per_std_lot: dec!(10.0) },
        );
        symbols.insert(
            "USDJPY".to_string(),
            SymbolConfig { pip_size: dec!(0.01), pip_value_per_std_lot: dec!(9.1) },
        );
        symbols.insert(
            "USDCAD".to_string(),
            SymbolConfig { pip_size: dec!(0.0001), pip_value_per_std_lot: dec!(7.3) },
        );

        Self {
            simulate_orders: true,
            database_url: "sqlite:./reentrybot.db?mode=rwc".to_string(),
            re_entry: ReentryConfig::default(),
            profit_booking: ProfitBookingConfig::default(),
            risk: RiskConfig::default(),
            symbols,
        }
    }
}

impl BotConfig {
    /// Pip configuration for a symbol, if present.
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.get(symbol)
    }

    /// Pip configuration with the documented conservative fallback.
    pub fn symbol_or_fallback(&self, symbol: &str) -> SymbolConfig {
        self.symbols.get(symbol).copied().unwrap_or(SymbolConfig {
            pip_size: FALLBACK_PIP_SIZE,
            pip_value_per_std_lot: FALLBACK_PIP_VALUE_PER_STD_LOT,
        })
    }
}
