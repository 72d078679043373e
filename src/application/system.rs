//! Application wiring: builds every component against the shared context
//! (config handle, exchange client, trade store, cache, event bus, notifier)
//! and hands the loops to the supervisor.

use crate::application::events::EventBus;
use crate::application::execution::{ExecutionMetrics, OrderExecutor};
use crate::application::filters::{CorrelationFilter, MarketFilter};
use crate::application::loops::{DcaLoop, PeriodicSyncLoop, PyramidingLoop, SniperLoop, TimeExitLoop};
use crate::application::monitor::{Blacklist, PositionMonitor};
use crate::application::orchestrator::Orchestrator;
use crate::application::risk::{RiskManager, TradingCircuitBreaker};
use crate::application::scanner::MarketScanner;
use crate::application::signals::{DerivativesGate, SignalGenerator};
use crate::application::supervisor::{HeartbeatRegistry, Supervisor};
use crate::config::{Config, ConfigHandle};
use crate::domain::ports::{ExchangeClient, KvCache, Notifier, TradeRepository};
use crate::infrastructure::binance::{BinanceClient, MiniTickerStream, UserDataStream};
use crate::infrastructure::cache::MemoryCache;
use crate::infrastructure::persistence::{Database, SqliteTradeStore};
use crate::infrastructure::telegram::TelegramNotifier;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

pub struct Application {
    pub config: ConfigHandle,
    running: Arc<AtomicBool>,
    exchange: Arc<BinanceClient>,
    cache: Arc<dyn KvCache>,
    supervisor: Arc<Supervisor>,
    orchestrator: Arc<Orchestrator>,
    monitor: Arc<PositionMonitor>,
    dca: Arc<DcaLoop>,
    pyramiding: Arc<PyramidingLoop>,
    time_exit: Arc<TimeExitLoop>,
    sniper: Arc<SniperLoop>,
    periodic_sync: Arc<PeriodicSyncLoop>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let testnet = config.binance.testnet;
        let database_url = config.database_url.clone();
        let config = ConfigHandle::new(config);
        let snapshot = config.snapshot();

        let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::new());
        let exchange = Arc::new(BinanceClient::new(&snapshot.binance, cache.clone()));
        let exchange_dyn: Arc<dyn ExchangeClient> = exchange.clone();

        let db = Database::new(&database_url).await?;
        let trades: Arc<dyn TradeRepository> = Arc::new(SqliteTradeStore::new(db));

        let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&snapshot.telegram));
        let events = EventBus::default();
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let running = Arc::new(AtomicBool::new(true));

        let breaker = Arc::new(TradingCircuitBreaker::new(
            snapshot.risk.consecutive_loss_limit as u32,
            Duration::from_secs(snapshot.risk.circuit_breaker_cooldown_secs),
        ));
        let blacklist = Arc::new(Blacklist::new());
        let risk_manager = Arc::new(RiskManager::new(
            cache.clone(),
            config.clone(),
            breaker.clone(),
            blacklist.clone(),
        ));

        let scanner = Arc::new(MarketScanner::new(
            exchange_dyn.clone(),
            cache.clone(),
            config.clone(),
            testnet,
        ));
        let signals = Arc::new(SignalGenerator::new(
            config.clone(),
            DerivativesGate::new(exchange_dyn.clone()),
        ));
        let market_filter = Arc::new(MarketFilter::new(exchange_dyn.clone()));
        let correlation_filter = Arc::new(CorrelationFilter::new(
            exchange_dyn.clone(),
            cache.clone(),
            config.clone(),
        ));

        let metrics = Arc::new(ExecutionMetrics::new());
        let executor = Arc::new(OrderExecutor::new(
            exchange_dyn.clone(),
            trades.clone(),
            risk_manager.clone(),
            notifier.clone(),
            config.clone(),
            metrics,
            events.clone(),
        ));

        let monitor = Arc::new(PositionMonitor::new(
            exchange_dyn.clone(),
            trades.clone(),
            risk_manager.clone(),
            blacklist.clone(),
            notifier.clone(),
            config.clone(),
            events.clone(),
            heartbeats.clone(),
        ));

        let dca = Arc::new(DcaLoop::new(
            exchange_dyn.clone(),
            trades.clone(),
            cache.clone(),
            notifier.clone(),
            config.clone(),
            heartbeats.clone(),
        ));
        let pyramiding = Arc::new(PyramidingLoop::new(
            exchange_dyn.clone(),
            trades.clone(),
            notifier.clone(),
            config.clone(),
            heartbeats.clone(),
        ));
        let time_exit = Arc::new(TimeExitLoop::new(
            trades.clone(),
            monitor.clone(),
            config.clone(),
            heartbeats.clone(),
        ));
        let sniper = Arc::new(SniperLoop::new(
            exchange_dyn.clone(),
            trades.clone(),
            scanner.clone(),
            executor.clone(),
            config.clone(),
            heartbeats.clone(),
        ));
        let periodic_sync = Arc::new(PeriodicSyncLoop::new(
            exchange_dyn.clone(),
            trades.clone(),
            blacklist.clone(),
            config.clone(),
            heartbeats.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            exchange_dyn.clone(),
            trades.clone(),
            scanner,
            signals,
            market_filter,
            correlation_filter,
            executor,
            risk_manager,
            blacklist,
            config.clone(),
            events.clone(),
            heartbeats.clone(),
        ));

        let supervisor = Arc::new(Supervisor::new(
            heartbeats,
            events,
            trades,
            notifier,
            Duration::from_secs(30),
            Duration::from_secs(snapshot.monitor.inactive_mins * 60),
        ));

        Ok(Self {
            config,
            running,
            exchange,
            cache,
            supervisor,
            orchestrator,
            monitor,
            dca,
            pyramiding,
            time_exit,
            sniper,
            periodic_sync,
        })
    }

    /// Spawn every loop under supervision plus the two WebSocket streams.
    pub async fn start(&self) -> Result<()> {
        // One-way position mode is assumed throughout the executor.
        if let Err(e) = ExchangeClient::ensure_position_mode(&*self.exchange, false).await {
            info!("position mode check: {e}");
        }

        let running = self.running.clone();

        macro_rules! supervise {
            ($name:expr, $threshold_secs:expr, $loop_arc:expr) => {{
                let loop_arc = $loop_arc.clone();
                let running = running.clone();
                self.supervisor.register(
                    $name,
                    Duration::from_secs($threshold_secs),
                    Box::new(move || {
                        let l = loop_arc.clone();
                        let r = running.clone();
                        tokio::spawn(async move { l.run(r).await })
                    }),
                );
            }};
        }

        supervise!("trading", 1800, self.orchestrator);
        supervise!("monitor", 60, self.monitor);
        supervise!("dca", 300, self.dca);
        supervise!("pyramiding", 600, self.pyramiding);
        supervise!("time_exit", 1200, self.time_exit);
        supervise!("sniper", 600, self.sniper);
        supervise!("periodic_sync", 3600, self.periodic_sync);

        // Streams reconnect internally; the supervisor does not respawn them.
        let (user_events_tx, mut user_events_rx) = tokio::sync::mpsc::channel(64);
        let user_stream =
            UserDataStream::new(self.exchange.clone(), running.clone(), user_events_tx);
        tokio::spawn(user_stream.run());
        tokio::spawn(async move {
            while let Some(event) = user_events_rx.recv().await {
                tracing::debug!("user stream event: {event:?}");
            }
        });

        let mini_ticker = MiniTickerStream::new(
            self.exchange.ws_base().to_string(),
            self.cache.clone(),
            running.clone(),
        );
        tokio::spawn(mini_ticker.run());

        let supervisor = self.supervisor.clone();
        tokio::spawn(supervisor.run(running));

        info!("all loops started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("shutdown requested, loops will stop after their current iteration");
    }
}
