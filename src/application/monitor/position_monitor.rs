//! Position monitor: revalues every open trade against the venue on a short
//! cadence and enforces the dynamic exits (kill switch, trailing stop,
//! partial take, emergency stop, max loss with blacklist, funding-aware
//! exit) plus exchange-to-store reconciliation.

use crate::application::events::{BotEvent, EventBus};
use crate::application::monitor::blacklist::Blacklist;
use crate::application::monitor::excursion::ExcursionTracker;
use crate::application::risk::RiskManager;
use crate::application::supervisor::HeartbeatRegistry;
use crate::config::{Config, ConfigHandle};
use crate::domain::indicators;
use crate::domain::ports::{ExchangeClient, Notifier, TradeRepository};
use crate::domain::types::{
    Direction, ExchangePosition, Interval, NewTrade, OrderParams, Trade, TradeStatus,
};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct PositionMonitor {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    risk_manager: Arc<RiskManager>,
    blacklist: Arc<Blacklist>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    events: EventBus,
    heartbeats: Arc<HeartbeatRegistry>,
    initial_balance: Mutex<Option<Decimal>>,
    excursions: Mutex<ExcursionTracker>,
    warnings: Mutex<HashMap<(String, String), Instant>>,
    halted: AtomicBool,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        risk_manager: Arc<RiskManager>,
        blacklist: Arc<Blacklist>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
        events: EventBus,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            risk_manager,
            blacklist,
            notifier,
            config,
            events,
            heartbeats,
            initial_balance: Mutex::new(None),
            excursions: Mutex::new(ExcursionTracker::new()),
            warnings: Mutex::new(HashMap::new()),
            halted: AtomicBool::new(false),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let interval_secs = self.config.snapshot().monitor.monitor_interval_secs;
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("monitor");
            // A halted monitor keeps its heartbeat but does no work until a
            // manual reset.
            if self.is_halted() {
                continue;
            }
            if let Err(e) = self.tick().await {
                error!("position monitor cycle failed: {e}");
                self.events.publish(BotEvent::ErrorReported {
                    source: "monitor".into(),
                    message: e.to_string(),
                });
            }
        }
        info!("position monitor stopped");
    }

    /// One monitor cycle. Public so scenario tests can drive it directly.
    pub async fn tick(&self) -> Result<()> {
        let config = self.config.snapshot();

        // 1. Kill switch on account drawdown.
        let balance = self.exchange.account_balance().await?;
        let initial = {
            let mut guard = self.initial_balance.lock().await;
            *guard.get_or_insert(balance.total)
        };
        if initial > Decimal::ZERO {
            let drawdown = ((initial - balance.total) / initial)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0;
            if drawdown >= config.risk.max_drawdown_pct {
                warn!(
                    "KILL SWITCH: drawdown {:.2}% >= {:.2}%, halting",
                    drawdown, config.risk.max_drawdown_pct
                );
                self.halted.store(true, Ordering::Relaxed);
                // Halting the breaker blocks all future admissions until a
                // manual reset.
                self.risk_manager.breaker().halt();
                self.events
                    .publish(BotEvent::KillSwitchFired { drawdown_pct: drawdown });
                self.notifier.notify(format!(
                    "KILL SWITCH: account drawdown {:.2}% exceeded {:.2}%. Manual reset required.",
                    drawdown, config.risk.max_drawdown_pct
                ));
                return Ok(());
            }
            if drawdown >= config.risk.max_drawdown_pct / 2.0 {
                self.events
                    .publish(BotEvent::DrawdownWarning { drawdown_pct: drawdown });
            }
        }

        // 2-4. Reconcile venue and store.
        let positions = self.exchange.open_positions().await?;
        let open_trades = self.trades.open_trades().await?;
        let by_symbol: HashMap<String, ExchangePosition> = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        self.sync_missing(&config, &by_symbol, &open_trades).await;

        // 5. Per-trade management.
        for trade in open_trades {
            match by_symbol.get(&trade.symbol) {
                Some(position) => {
                    if let Err(e) = self.manage_trade(&config, trade, position).await {
                        error!("trade management failed: {e}");
                    }
                }
                // Venue shows no position: the protective orders did their
                // job out-of-band. Heal the record.
                None => self.heal_closed_externally(trade).await,
            }
        }

        Ok(())
    }

    /// Exchange positions with no matching open trade become reconstructed
    /// records; open trades with no venue position get closed.
    async fn sync_missing(
        &self,
        config: &Config,
        positions: &HashMap<String, ExchangePosition>,
        open_trades: &[Trade],
    ) {
        for (symbol, position) in positions {
            if open_trades.iter().any(|t| &t.symbol == symbol) {
                continue;
            }
            let Some(direction) = position.direction() else {
                continue;
            };
            let entry = position.entry_price;
            let sl_pct = Decimal::from_f64(config.monitor.resync_default_sl_pct / 100.0)
                .unwrap_or_default();
            let tp_pct = Decimal::from_f64(config.monitor.resync_default_tp_pct / 100.0)
                .unwrap_or_default();
            let (stop_loss, take_profit) = match direction {
                Direction::Long => (entry * (Decimal::ONE - sl_pct), entry * (Decimal::ONE + tp_pct)),
                Direction::Short => (entry * (Decimal::ONE + sl_pct), entry * (Decimal::ONE - tp_pct)),
            };
            let reconstructed = NewTrade {
                symbol: symbol.clone(),
                direction,
                entry_price: entry,
                quantity: position.quantity(),
                leverage: position.leverage,
                stop_loss,
                take_profit_1: take_profit,
                take_profit_2: None,
                take_profit_3: None,
                order_id: None,
            };
            match self.trades.insert(&reconstructed).await {
                Ok(id) => {
                    info!("reconstructed untracked position {symbol} as trade {id}");
                    self.notifier
                        .notify(format!("Synced untracked position {symbol} into the store"));
                }
                Err(e) => error!("failed to reconstruct trade for {symbol}: {e}"),
            }
        }
    }

    async fn heal_closed_externally(&self, mut trade: Trade) {
        info!(
            "{}: no venue position for open trade {}, marking closed",
            trade.symbol, trade.id
        );
        let exit_price = trade.current_price;
        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(Utc::now());
        trade.exit_price = Some(exit_price);
        trade.exit_time = trade.closed_at;
        if let Err(e) = self.trades.update(&trade).await {
            error!("failed to heal trade {}: {e}", trade.id);
            return;
        }
        let win = trade.pnl_percentage > 0.0;
        if let Ok(balance) = self.exchange.account_balance().await {
            self.risk_manager.on_trade_closed(win, balance.total).await;
        }
        self.events.publish(BotEvent::TradeClosed {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            pnl_pct: trade.pnl_percentage,
            reason: "Sync".into(),
        });
        self.excursions.lock().await.clear(&trade.symbol);
    }

    async fn manage_trade(
        &self,
        config: &Config,
        mut trade: Trade,
        position: &ExchangePosition,
    ) -> Result<()> {
        let current_price = if position.mark_price > Decimal::ZERO {
            position.mark_price
        } else {
            self.exchange.symbol_price(&trade.symbol).await?
        };

        // Division-by-zero guard: fall back through exchange entry to the
        // live price.
        let effective_entry = if trade.entry_price > Decimal::ZERO {
            trade.entry_price
        } else if position.entry_price > Decimal::ZERO {
            position.entry_price
        } else {
            current_price
        };

        let quantity = trade.quantity.min(position.quantity());
        let pnl_pct = if effective_entry > Decimal::ZERO && quantity > Decimal::ZERO {
            (position.unrealized_pnl / (effective_entry * quantity))
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
        } else {
            0.0
        };

        self.excursions.lock().await.observe(&trade.symbol, pnl_pct);

        trade.current_price = current_price;
        trade.pnl_percentage = pnl_pct;
        trade.pnl = position.unrealized_pnl;
        if pnl_pct > trade.max_pnl_percentage {
            trade.max_pnl_percentage = pnl_pct;
            trade.trailing_peak_price = Some(current_price);
        }

        // Funding-aware exit for profitable positions just before an adverse
        // funding event.
        if config.monitor.enable_funding_exits
            && pnl_pct >= config.monitor.funding_exit_min_profit_pct
            && self.funding_is_adverse(config, &trade).await
        {
            return self.close_trade(trade, current_price, "Funding Exit").await;
        }

        // Trailing stop with an ATR-adaptive retracement threshold.
        if trade.max_pnl_percentage > config.monitor.trailing_activation_pct {
            let threshold = self.trailing_threshold(config, &trade.symbol).await;
            let retracement = if trade.max_pnl_percentage > 0.0 {
                (trade.max_pnl_percentage - pnl_pct) / trade.max_pnl_percentage * 100.0
            } else {
                0.0
            };
            if retracement > threshold {
                return self.close_trade(trade, current_price, "Trailing Stop").await;
            }
        }

        // Partial take with the stop moved to breakeven.
        if pnl_pct >= config.monitor.partial_tp_threshold_pct && !trade.partial_taken {
            return self.partial_take(config, trade, current_price).await;
        }

        // Hard exits.
        if pnl_pct <= config.monitor.emergency_stop_pct {
            return self.close_trade(trade, current_price, "Emergency Stop").await;
        }
        if pnl_pct <= config.monitor.max_loss_pct {
            return self.close_trade(trade, current_price, "Max Loss").await;
        }

        self.trades.update(&trade).await
    }

    async fn funding_is_adverse(&self, config: &Config, trade: &Trade) -> bool {
        match self.exchange.premium_index(&trade.symbol).await {
            Ok(premium) => {
                let now_ms = Utc::now().timestamp_millis();
                let within_window = premium.minutes_to_funding(now_ms)
                    <= config.signals.funding_block_window_minutes;
                let adverse = match trade.direction {
                    Direction::Long => {
                        premium.last_funding_rate >= config.monitor.funding_exit_threshold
                    }
                    Direction::Short => {
                        premium.last_funding_rate <= -config.monitor.funding_exit_threshold
                    }
                };
                within_window && adverse
            }
            Err(_) => false,
        }
    }

    /// Retracement threshold: the configured floor, widened to the current
    /// 1h ATR% within the callback band.
    async fn trailing_threshold(&self, config: &Config, symbol: &str) -> f64 {
        let exec = &config.execution;
        let atr_pct = match self.exchange.klines(symbol, Interval::H1, 20).await {
            Ok(klines) => indicators::atr_pct(&klines, 14).unwrap_or(exec.tsl_callback_pct_min),
            Err(_) => exec.tsl_callback_pct_min,
        };
        exec.tsl_callback_pct_min
            .max(atr_pct.clamp(exec.tsl_callback_pct_min, exec.tsl_callback_pct_max))
    }

    async fn partial_take(
        &self,
        config: &Config,
        mut trade: Trade,
        current_price: Decimal,
    ) -> Result<()> {
        // Gauge recent volatility to size the partial.
        let volatility = match self.exchange.klines(&trade.symbol, Interval::H1, 15).await {
            Ok(klines) if klines.len() >= 14 => {
                let window = &klines[klines.len() - 14..];
                window
                    .iter()
                    .filter(|k| k.low_f64() > 0.0)
                    .map(|k| (k.high_f64() - k.low_f64()) / k.low_f64() * 100.0)
                    .sum::<f64>()
                    / 14.0
            }
            _ => 5.0,
        };
        let fraction = if volatility > 8.0 {
            0.30
        } else if volatility < 3.0 {
            0.70
        } else {
            0.50
        };

        let info = self.exchange.symbol_info(&trade.symbol).await?;
        let part_qty = info.round_qty_down(
            trade.quantity * Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO),
        );
        if part_qty <= Decimal::ZERO {
            return self.trades.update(&trade).await;
        }

        let order = OrderParams::market(&trade.symbol, trade.direction.exit_side(), part_qty)
            .reduce_only();
        self.exchange.create_order(order).await?;

        trade.quantity -= part_qty;
        trade.partial_taken = true;
        // Breakeven: the remainder can no longer lose.
        trade.stop_loss = trade.entry_price;
        trade.current_price = current_price;
        self.trades.update(&trade).await?;

        info!(
            "{}: partial take {} ({}%) at {:.2}% profit, stop to breakeven",
            trade.symbol,
            part_qty,
            fraction * 100.0,
            trade.pnl_percentage
        );
        self.notifier.notify(format!(
            "Partial TP on {}: sold {} at {}, stop moved to entry",
            trade.symbol, part_qty, current_price
        ));
        Ok(())
    }

    /// Close a trade at market: cancel protections, reduce-only MARKET for
    /// the remaining quantity, persist the terminal state, update streaks
    /// and the blacklist.
    pub async fn close_trade(
        &self,
        mut trade: Trade,
        current_price: Decimal,
        reason: &str,
    ) -> Result<()> {
        let config = self.config.snapshot();

        if let Err(e) = self.exchange.cancel_all_open_orders(&trade.symbol).await {
            self.warn_limited(&trade.symbol, "cancel_all", &e.to_string())
                .await;
        }

        let order = OrderParams::market(&trade.symbol, trade.direction.exit_side(), trade.quantity)
            .reduce_only();
        let ack = self.exchange.create_order(order).await?;
        let exit_price = if ack.avg_price > Decimal::ZERO {
            ack.avg_price
        } else {
            current_price
        };

        let direction_sign = match trade.direction {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        };
        let pnl = (exit_price - trade.entry_price) * trade.quantity * direction_sign;
        let pnl_pct = if trade.entry_price > Decimal::ZERO {
            ((exit_price - trade.entry_price) / trade.entry_price * Decimal::ONE_HUNDRED
                * direction_sign)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(Utc::now());
        trade.exit_price = Some(exit_price);
        trade.exit_time = trade.closed_at;
        trade.current_price = exit_price;
        trade.pnl = pnl;
        trade.pnl_percentage = pnl_pct;
        self.trades.update(&trade).await?;

        let win = pnl > Decimal::ZERO;
        let balance = self
            .exchange
            .account_balance()
            .await
            .map(|b| b.total)
            .unwrap_or(Decimal::ZERO);
        self.risk_manager.on_trade_closed(win, balance).await;

        if reason == "Max Loss" {
            let ttl = Duration::from_secs(config.risk.blacklist_hours * 3600);
            self.blacklist.insert(&trade.symbol, ttl);
            info!(
                "{} blacklisted for {}h after max-loss close",
                trade.symbol, config.risk.blacklist_hours
            );
        }

        let excursion = self.excursions.lock().await.get(&trade.symbol);
        self.excursions.lock().await.clear(&trade.symbol);

        info!(
            "{} closed ({reason}): exit {}, pnl {:.2}% (mae {:.2}%, mfe {:.2}%)",
            trade.symbol,
            exit_price,
            pnl_pct,
            excursion.map(|e| e.mae_pct).unwrap_or(0.0),
            excursion.map(|e| e.mfe_pct).unwrap_or(0.0),
        );
        self.events.publish(BotEvent::TradeClosed {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            pnl_pct,
            reason: reason.to_string(),
        });
        self.notifier.notify(format!(
            "{} {} closed: {} -> {} ({:+.2}%) [{reason}]",
            trade.direction, trade.symbol, trade.entry_price, exit_price, pnl_pct
        ));
        Ok(())
    }

    /// Per-(symbol, kind) warning with a suppression window.
    async fn warn_limited(&self, symbol: &str, kind: &str, message: &str) {
        let window = Duration::from_secs(self.config.snapshot().monitor.warning_window_secs);
        let key = (symbol.to_string(), kind.to_string());
        let mut warnings = self.warnings.lock().await;
        let now = Instant::now();
        let should_warn = warnings
            .get(&key)
            .map(|last| now.duration_since(*last) > window)
            .unwrap_or(true);
        if should_warn {
            warnings.insert(key, now);
            warn!("{symbol} [{kind}]: {message}");
        }
    }
}
