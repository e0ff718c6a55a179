//! Data models for trades, re-entry chains, profit-booking chains, and trend alignment.

mod alignment;
mod chain;
mod trade;

pub use alignment::{AlignmentResult, TrendDirection};
pub use chain::{ProfitBookingChain, ProfitOrder, ReentryChain};
pub use trade::{Trade, TradeSide};
