pub mod correlation;
pub mod market;

pub use correlation::CorrelationFilter;
pub use market::{MarketFilter, MarketSentiment, MarketTrend};
