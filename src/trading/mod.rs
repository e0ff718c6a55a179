//! Trading math: risk-based SL/TP sizing and the independent
//! profit-booking SL calculator.

mod profit_sl;
mod sizer;

pub use profit_sl::{ProfitBookingSlCalculator, SlLossValidation};
pub use sizer::PositionSizer;
