//! Top-level trading loop: scan, score, filter, execute, with per-stage
//! latency caps and structured cycle metrics. The cadence adapts to BTC
//! volatility.

use crate::application::events::{BotEvent, EventBus};
use crate::application::execution::OrderExecutor;
use crate::application::filters::{CorrelationFilter, MarketFilter};
use crate::application::monitor::Blacklist;
use crate::application::risk::RiskManager;
use crate::application::scanner::MarketScanner;
use crate::application::signals::SignalGenerator;
use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, TradeRepository};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

const SCAN_STAGE_CAP: Duration = Duration::from_secs(30);
const SIGNAL_STAGE_CAP: Duration = Duration::from_secs(30);
const FILTER_STAGE_CAP: Duration = Duration::from_secs(15);
const EXECUTION_STAGE_CAP: Duration = Duration::from_secs(60);
const CYCLE_CAP: Duration = Duration::from_secs(180);
const BAN_SLEEP_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct CycleMetrics {
    pub cycle_id: String,
    pub scanned: usize,
    pub signals: usize,
    pub after_market_filter: usize,
    pub after_correlation: usize,
    pub after_blacklist: usize,
    pub executed: usize,
    pub rejections: HashMap<String, usize>,
    pub scan_ms: u128,
    pub signal_ms: u128,
    pub filter_ms: u128,
    pub execution_ms: u128,
    pub total_ms: u128,
}

/// In-process record of recent cycles with rolling averages.
#[derive(Default)]
pub struct CycleDashboard {
    recent: StdMutex<VecDeque<CycleMetrics>>,
}

impl CycleDashboard {
    const WINDOW: usize = 50;

    pub fn record(&self, metrics: CycleMetrics) {
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.push_back(metrics);
        while recent.len() > Self::WINDOW {
            recent.pop_front();
        }
    }

    pub fn rolling_avg_total_ms(&self) -> f64 {
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().map(|m| m.total_ms as f64).sum::<f64>() / recent.len() as f64
    }

    pub fn cycles_recorded(&self) -> usize {
        self.recent.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct Orchestrator {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    scanner: Arc<MarketScanner>,
    signals: Arc<SignalGenerator>,
    market_filter: Arc<MarketFilter>,
    correlation_filter: Arc<CorrelationFilter>,
    executor: Arc<OrderExecutor>,
    risk_manager: Arc<RiskManager>,
    blacklist: Arc<Blacklist>,
    config: ConfigHandle,
    events: EventBus,
    heartbeats: Arc<HeartbeatRegistry>,
    dashboard: Arc<CycleDashboard>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        scanner: Arc<MarketScanner>,
        signals: Arc<SignalGenerator>,
        market_filter: Arc<MarketFilter>,
        correlation_filter: Arc<CorrelationFilter>,
        executor: Arc<OrderExecutor>,
        risk_manager: Arc<RiskManager>,
        blacklist: Arc<Blacklist>,
        config: ConfigHandle,
        events: EventBus,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            scanner,
            signals,
            market_filter,
            correlation_filter,
            executor,
            risk_manager,
            blacklist,
            config,
            events,
            heartbeats,
            dashboard: Arc::new(CycleDashboard::default()),
        }
    }

    pub fn dashboard(&self) -> Arc<CycleDashboard> {
        self.dashboard.clone()
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            self.heartbeats.beat("trading");

            // A banned client sleeps out (part of) the ban instead of burning
            // requests.
            if let Some(remaining) = self.exchange.ban_remaining() {
                let nap = remaining.min(BAN_SLEEP_MAX);
                warn!("exchange ban active, sleeping {:?}", nap);
                tokio::time::sleep(nap).await;
                continue;
            }

            let interval = match self.cycle().await {
                Ok(()) => self.scan_interval().await,
                Err(e) => {
                    error!("trading cycle failed: {e}");
                    self.events.publish(BotEvent::ErrorReported {
                        source: "trading".into(),
                        message: e.to_string(),
                    });
                    self.scan_interval().await
                }
            };
            tokio::time::sleep(interval).await;
        }
    }

    /// Volatile markets get scanned more often: 5m / 10m / 15m buckets.
    async fn scan_interval(&self) -> Duration {
        let vol = self
            .market_filter
            .btc_volatility_24h()
            .await
            .unwrap_or(0.0);
        if vol >= 5.0 {
            Duration::from_secs(300)
        } else if vol >= 2.0 {
            Duration::from_secs(600)
        } else {
            Duration::from_secs(900)
        }
    }

    pub async fn cycle(&self) -> anyhow::Result<()> {
        // Kill switch engaged: nothing to do until a manual reset.
        if self.risk_manager.breaker().is_halted() {
            info!("kill switch engaged, skipping trading cycle");
            return Ok(());
        }

        let cycle_id = Uuid::new_v4().to_string();
        let config = self.config.snapshot();
        let cycle_start = Instant::now();
        let mut metrics = CycleMetrics {
            cycle_id: cycle_id.clone(),
            ..Default::default()
        };
        self.events.publish(BotEvent::CycleStarted {
            cycle_id: cycle_id.clone(),
        });

        // Volatility factor feeds per-trade risk scaling.
        if let Ok(vol) = self.market_filter.btc_volatility_24h().await {
            self.risk_manager.set_volatility_factor((vol / 5.0).clamp(0.5, 1.5));
        }

        let sentiment = self.market_filter.assess().await?;
        let balance = self.exchange.account_balance().await?;
        let open_trades = self.trades.open_trades().await?;
        let open_count = open_trades.len();
        // More positions than the core cap implies a sniper slot is in use.
        let sniper_open = open_count > config.risk.max_positions;

        let available_slots = config.risk.max_positions.saturating_sub(open_count);
        if available_slots == 0 {
            info!("[{cycle_id}] no free slots ({open_count} open), skipping cycle");
            self.finish_cycle(metrics, cycle_start, 0);
            return Ok(());
        }

        // Scan.
        let stage = Instant::now();
        let scans = match tokio::time::timeout(SCAN_STAGE_CAP, self.scanner.scan()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("[{cycle_id}] scan stage exceeded {:?}", SCAN_STAGE_CAP);
                anyhow::bail!("scan stage timeout");
            }
        };
        metrics.scan_ms = stage.elapsed().as_millis();
        metrics.scanned = scans.len();
        if scans.is_empty() {
            warn!("[{cycle_id}] scanner returned nothing, skipping cycle");
            self.finish_cycle(metrics, cycle_start, 0);
            return Ok(());
        }

        // Signals.
        let stage = Instant::now();
        let signals = match tokio::time::timeout(
            SIGNAL_STAGE_CAP,
            self.signals.generate(&scans, Some(sentiment.score)),
        )
        .await
        {
            Ok(signals) => signals,
            Err(_) => {
                warn!("[{cycle_id}] signal stage exceeded {:?}", SIGNAL_STAGE_CAP);
                anyhow::bail!("signal stage timeout");
            }
        };
        metrics.signal_ms = stage.elapsed().as_millis();
        metrics.signals = signals.len();

        // Filters: macro regime, correlation/sector, blacklist.
        let stage = Instant::now();
        let signals = self.market_filter.apply(&sentiment, signals);
        metrics.after_market_filter = signals.len();

        let open_symbols: Vec<String> =
            open_trades.iter().map(|t| t.symbol.clone()).collect();
        let signals = match tokio::time::timeout(
            FILTER_STAGE_CAP,
            self.correlation_filter.filter(signals, &open_symbols, None),
        )
        .await
        {
            Ok(signals) => signals,
            Err(_) => {
                warn!("[{cycle_id}] filter stage exceeded {:?}", FILTER_STAGE_CAP);
                anyhow::bail!("filter stage timeout");
            }
        };
        metrics.after_correlation = signals.len();

        let signals: Vec<_> = signals
            .into_iter()
            .filter(|s| !self.blacklist.is_blacklisted(&s.symbol))
            .collect();
        metrics.after_blacklist = signals.len();
        metrics.filter_ms = stage.elapsed().as_millis();

        // Execute best-first into the free slots.
        let stage = Instant::now();
        let mut executed = 0usize;
        for signal in signals.into_iter().take(available_slots) {
            if stage.elapsed() > EXECUTION_STAGE_CAP {
                warn!(
                    "[{cycle_id}] execution stage exceeded {:?}",
                    EXECUTION_STAGE_CAP
                );
                break;
            }
            match self
                .executor
                .execute_signal(&signal, balance.total, open_count + executed, sniper_open)
                .await
            {
                Ok(outcome) => {
                    executed += 1;
                    info!(
                        "[{cycle_id}] executed {} {} qty {} @ {} (score {})",
                        signal.direction,
                        signal.symbol,
                        outcome.quantity,
                        outcome.avg_fill,
                        signal.score
                    );
                }
                Err(e) => {
                    *metrics
                        .rejections
                        .entry(e.reason_key().to_string())
                        .or_default() += 1;
                    info!("[{cycle_id}] {} rejected: {e}", signal.symbol);
                }
            }
        }
        metrics.execution_ms = stage.elapsed().as_millis();
        metrics.executed = executed;

        self.finish_cycle(metrics, cycle_start, executed);
        Ok(())
    }

    fn finish_cycle(&self, mut metrics: CycleMetrics, cycle_start: Instant, executed: usize) {
        metrics.total_ms = cycle_start.elapsed().as_millis();
        if cycle_start.elapsed() > CYCLE_CAP {
            error!(
                "[{}] cycle exceeded hard cap {:?} ({}ms)",
                metrics.cycle_id,
                CYCLE_CAP,
                metrics.total_ms
            );
        }
        let rejected: usize = metrics.rejections.values().sum();
        info!(
            cycle_id = %metrics.cycle_id,
            scanned = metrics.scanned,
            signals = metrics.signals,
            after_market = metrics.after_market_filter,
            after_correlation = metrics.after_correlation,
            after_blacklist = metrics.after_blacklist,
            executed = metrics.executed,
            rejected = rejected,
            scan_ms = metrics.scan_ms as u64,
            signal_ms = metrics.signal_ms as u64,
            filter_ms = metrics.filter_ms as u64,
            execution_ms = metrics.execution_ms as u64,
            total_ms = metrics.total_ms as u64,
            "cycle complete"
        );
        self.events.publish(BotEvent::CycleEnded {
            cycle_id: metrics.cycle_id.clone(),
            executed,
            rejected,
        });
        self.dashboard.record(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_rolling_window() {
        let dashboard = CycleDashboard::default();
        for i in 0..60 {
            dashboard.record(CycleMetrics {
                cycle_id: format!("c{i}"),
                total_ms: 100,
                ..Default::default()
            });
        }
        assert_eq!(dashboard.cycles_recorded(), 50);
        assert!((dashboard.rolling_avg_total_ms() - 100.0).abs() < 1e-9);
    }
}
