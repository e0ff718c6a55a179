//! Chain state: re-entry chains and profit-booking chains.

mod profit;
mod reentry;

pub use profit::ProfitBookingManager;
pub use reentry::ReentryChainStore;
