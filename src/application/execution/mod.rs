pub mod executor;
pub mod metrics;

pub use executor::{ExecutionOutcome, OrderExecutor, sniper_signal};
pub use metrics::{ExecPath, ExecSample, ExecutionMetrics};
