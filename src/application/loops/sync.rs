//! Periodic reconciliation: a strict exchange-vs-store pass on a slow
//! cadence, plus a history-analysis sweep that blacklists symbols bleeding
//! repeated losses.

use crate::application::monitor::Blacklist;
use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, TradeRepository};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Losses on one symbol inside the lookback that trigger a blacklist.
const LOSS_STREAK_FOR_BLACKLIST: usize = 2;
const HISTORY_LOOKBACK_HOURS: i64 = 24;
const HISTORY_SAMPLE: usize = 50;

pub struct PeriodicSyncLoop {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    blacklist: Arc<Blacklist>,
    config: ConfigHandle,
    heartbeats: Arc<HeartbeatRegistry>,
}

impl PeriodicSyncLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        blacklist: Arc<Blacklist>,
        config: ConfigHandle,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            blacklist,
            config,
            heartbeats,
        }
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let minutes = self.config.snapshot().monitor.positions_auto_sync_minutes;
        let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("periodic_sync");
            if let Err(e) = self.tick().await {
                error!("periodic sync error: {e}");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        self.report_divergences().await?;

        // History pass runs detached: it is advisory and must not delay the
        // reconcile cadence.
        let trades = self.trades.clone();
        let blacklist = self.blacklist.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = analyze_history(&*trades, &blacklist, &config).await {
                error!("history analysis failed: {e}");
            }
        });
        Ok(())
    }

    /// Surface exchange-vs-store mismatches. The position monitor heals them
    /// on its own cadence; this pass makes them visible at a glance.
    async fn report_divergences(&self) -> Result<()> {
        let positions = self.exchange.open_positions().await?;
        let open_trades = self.trades.open_trades().await?;

        let venue: HashMap<&str, Decimal> = positions
            .iter()
            .map(|p| (p.symbol.as_str(), p.quantity()))
            .collect();

        for trade in &open_trades {
            match venue.get(trade.symbol.as_str()) {
                None => warn!(
                    "sync: open trade {} ({}) has no venue position",
                    trade.id, trade.symbol
                ),
                Some(qty) if (*qty - trade.quantity).abs() > trade.quantity * Decimal::new(5, 2) => {
                    warn!(
                        "sync: quantity drift on {}: store {} vs venue {}",
                        trade.symbol, trade.quantity, qty
                    )
                }
                _ => {}
            }
        }
        for position in &positions {
            if !open_trades.iter().any(|t| t.symbol == position.symbol) {
                warn!("sync: venue position {} untracked in store", position.symbol);
            }
        }

        info!(
            "sync: {} venue positions, {} open trades",
            positions.len(),
            open_trades.len()
        );
        Ok(())
    }
}

async fn analyze_history(
    trades: &dyn TradeRepository,
    blacklist: &Blacklist,
    config: &ConfigHandle,
) -> Result<()> {
    let cutoff = Utc::now() - ChronoDuration::hours(HISTORY_LOOKBACK_HOURS);
    let recent = trades.recent_closed(HISTORY_SAMPLE).await?;

    let mut losses: HashMap<String, usize> = HashMap::new();
    for trade in recent {
        let closed_recently = trade.closed_at.map(|t| t > cutoff).unwrap_or(false);
        if closed_recently && trade.pnl < Decimal::ZERO {
            *losses.entry(trade.symbol).or_default() += 1;
        }
    }

    let ttl = Duration::from_secs(config.snapshot().risk.blacklist_hours * 3600);
    for (symbol, count) in losses {
        if count >= LOSS_STREAK_FOR_BLACKLIST && !blacklist.is_blacklisted(&symbol) {
            warn!(
                "history analysis: {} lost {} times in {}h, blacklisting",
                symbol, count, HISTORY_LOOKBACK_HOURS
            );
            blacklist.insert(&symbol, ttl);
        }
    }
    Ok(())
}
