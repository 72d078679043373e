use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the exchange client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient I/O failure after retries: {0}")]
    Transient(String),

    #[error("banned by venue, {remaining_secs}s remaining")]
    Banned { remaining_secs: i64 },

    #[error("fatal exchange error {code}: {message}")]
    Fatal { code: i64, message: String },

    #[error("invalid payload from venue: {0}")]
    DataQuality(String),

    #[error("order rejected by venue: {0}")]
    OrderRejected(String),
}

/// Risk-manager admission rejections. Normal operational outcomes, counted
/// per reason in cycle metrics, never retried.
#[derive(Debug, Error)]
pub enum RiskRejection {
    #[error("position cap reached: {open}/{max} open")]
    MaxPositions { open: usize, max: usize },

    #[error("daily loss limit hit: {loss_pct:.2}% >= {limit_pct:.2}%")]
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },

    #[error("intraday drawdown hard stop: {drawdown_pct:.2}% >= {limit_pct:.2}%")]
    IntradayDrawdown { drawdown_pct: f64, limit_pct: f64 },

    #[error("per-trade risk too high: {risk_pct:.2}% > {max_pct:.2}%")]
    PerTradeRisk { risk_pct: f64, max_pct: f64 },

    #[error("portfolio risk cap: projected {projected:.4} > {max:.4}")]
    PortfolioRisk { projected: f64, max: f64 },

    #[error("circuit breaker tripped, {remaining_secs}s cooldown remaining")]
    CircuitBreaker { remaining_secs: u64 },

    #[error("kill switch engaged, manual reset required")]
    KillSwitch,

    #[error("{symbol} blacklisted for {remaining_secs}s")]
    Blacklisted { symbol: String, remaining_secs: u64 },
}

/// Failures of the order execution pipeline.
#[derive(Debug, Error)]
pub enum ExecutionError {
    // Literal reason format preserved from the production system.
    #[error("Spread alto: {spread:.3}% > {max}%")]
    SpreadTooWide { spread: f64, max: f64 },

    #[error("max quantity unavailable for {symbol}")]
    MaxQtyUnavailable { symbol: String },

    #[error("sizing rejected: {0}")]
    Sizing(String),

    #[error("quantity {quantity} below min notional {min_notional} at {price}")]
    MinNotional {
        quantity: Decimal,
        price: Decimal,
        min_notional: Decimal,
    },

    #[error(transparent)]
    Risk(#[from] RiskRejection),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("all limit attempts exhausted and market fallback failed: {0}")]
    Unfilled(String),
}

impl ExecutionError {
    /// Stable counter key for cycle metrics.
    pub fn reason_key(&self) -> &'static str {
        match self {
            ExecutionError::SpreadTooWide { .. } => "spread",
            ExecutionError::MaxQtyUnavailable { .. } => "max_qty",
            ExecutionError::Sizing(_) => "sizing",
            ExecutionError::MinNotional { .. } => "min_notional",
            ExecutionError::Risk(_) => "risk_manager",
            ExecutionError::Exchange(_) => "exchange",
            ExecutionError::Unfilled(_) => "unfilled",
        }
    }
}
