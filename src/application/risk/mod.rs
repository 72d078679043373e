pub mod calculator;
pub mod circuit_breaker;
pub mod manager;

pub use calculator::{PerformanceState, RiskCalculator, SizedPosition, SizingRequest};
pub use circuit_breaker::TradingCircuitBreaker;
pub use manager::RiskManager;
