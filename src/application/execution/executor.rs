//! Order executor. Fail-fast pipeline: spread check, sizing, leverage
//! bracket cap, risk admission, margin/leverage setup, then the entry itself
//! (LIMIT with re-quoting, MARKET fallback, ICEBERG chunking for large
//! notionals), protective orders, optional trailing stop and a post-open
//! liquidation-headroom trim.

use crate::application::events::{BotEvent, EventBus};
use crate::application::execution::metrics::{ExecPath, ExecSample, ExecutionMetrics};
use crate::application::risk::{RiskCalculator, RiskManager, SizingRequest};
use crate::config::{Config, ConfigHandle};
use crate::domain::errors::ExecutionError;
use crate::domain::ports::{ExchangeClient, Notifier, TradeRepository};
use crate::domain::types::{
    Direction, NewTrade, OrderAck, OrderBookTop, OrderParams, OrderStatus, Signal, SymbolInfo,
    TimeInForce, WorkingType, bracket_max_leverage,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const ICEBERG_CHUNK_DELAY: Duration = Duration::from_secs(1);
/// Passive price offset used for post-only entries.
const MAKER_EPSILON: f64 = 0.0001;
const HEADROOM_TRIM_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub trade_id: Option<i64>,
    pub order_ids: Vec<i64>,
    pub avg_fill: Decimal,
    pub quantity: Decimal,
    pub slippage_pct: f64,
    pub maker: bool,
}

struct FillResult {
    order_ids: Vec<i64>,
    avg_price: Decimal,
    quantity: Decimal,
    maker: bool,
    path: ExecPath,
    requotes: u32,
}

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    risk_manager: Arc<RiskManager>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    metrics: Arc<ExecutionMetrics>,
    events: EventBus,
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        risk_manager: Arc<RiskManager>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
        metrics: Arc<ExecutionMetrics>,
        events: EventBus,
    ) -> Self {
        Self {
            exchange,
            trades,
            risk_manager,
            notifier,
            config,
            metrics,
            events,
        }
    }

    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        self.metrics.clone()
    }

    /// Run the full admission-to-protection pipeline for one signal.
    pub async fn execute_signal(
        &self,
        signal: &Signal,
        balance: Decimal,
        open_positions: usize,
        sniper_open: bool,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let config = self.config.snapshot();
        let started = Instant::now();

        // 1. Spread gate.
        let book = self.exchange.order_book(&signal.symbol, 5).await?;
        let spread = book.spread_pct();
        let max_spread = if signal.sniper {
            config.sniper.max_spread_pct
        } else {
            config.execution.max_spread_pct_core
        };
        if spread > max_spread {
            return Err(ExecutionError::SpreadTooWide {
                spread,
                max: max_spread,
            });
        }

        // 2. Venue trading rules.
        let info = self.exchange.symbol_info(&signal.symbol).await?;
        if info.max_qty <= Decimal::ZERO {
            return Err(ExecutionError::MaxQtyUnavailable {
                symbol: signal.symbol.clone(),
            });
        }

        // 3. Size, then cap leverage by the venue bracket for the implied
        // notional and re-size if the cap bites.
        let sizing_balance =
            if config.execution.virtual_balance_enabled && config.execution.virtual_balance > 0.0 {
                Decimal::from_f64(config.execution.virtual_balance).unwrap_or(balance)
            } else {
                balance
            };
        let open_margin = self.open_margin().await?;
        let perf = self.risk_manager.performance_snapshot();
        let atr_pct = if signal.entry_price > Decimal::ZERO {
            signal.enrichment.atr
                / signal.entry_price.to_f64().unwrap_or(f64::INFINITY)
                * 100.0
        } else {
            0.0
        };

        let mut leverage = signal.leverage.max(1);
        let size = |lev: u32| SizingRequest {
            symbol_info: &info,
            direction: signal.direction,
            entry: signal.entry_price,
            stop_loss: signal.stop_loss,
            leverage: lev,
            balance: sizing_balance,
            open_margin,
            score: signal.score,
            atr_pct,
            max_total_capital_usage: config.risk.max_total_capital_usage,
        };
        let mut sized = RiskCalculator::position_size(&perf, &size(leverage))
            .map_err(|e| ExecutionError::Sizing(e.to_string()))?;

        let brackets = self.exchange.leverage_brackets(&signal.symbol).await?;
        let notional = sized.quantity * signal.entry_price;
        if let Some(cap) = bracket_max_leverage(&brackets, notional) {
            if cap < leverage {
                info!(
                    "{}: bracket caps leverage {} -> {} at notional {}",
                    signal.symbol, leverage, cap, notional
                );
                leverage = cap;
                sized = RiskCalculator::position_size(&perf, &size(leverage))
                    .map_err(|e| ExecutionError::Sizing(e.to_string()))?;
            }
        }

        // 4. Risk admission (forced signals may bypass when configured).
        let bypass = signal.force && config.execution.allow_risk_bypass_for_force;
        let mut admitted = false;
        if !bypass {
            self.risk_manager
                .validate_trade(signal, balance, open_positions, sniper_open)
                .await
                .map_err(ExecutionError::Risk)?;
            admitted = true;
        }

        let result = self
            .execute_admitted(&config, signal, &info, &sized.quantity, sized.stop_loss, leverage, book)
            .await;

        if admitted {
            self.risk_manager.release_admission(&signal.symbol).await;
        }

        let outcome = result?;
        let latency = started.elapsed().as_millis() as u64;
        debug!(
            "{}: executed in {}ms, avg fill {}, slippage {:.3}%",
            signal.symbol, latency, outcome.avg_fill, outcome.slippage_pct
        );
        Ok(outcome)
    }

    /// Everything after admission: margin mode, leverage, the entry itself,
    /// protections and persistence.
    async fn execute_admitted(
        &self,
        config: &Config,
        signal: &Signal,
        info: &SymbolInfo,
        quantity: &Decimal,
        stop_loss: Decimal,
        leverage: u32,
        book: OrderBookTop,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let quantity = *quantity;
        if config.execution.dry_run {
            info!(
                "[dry-run] {} {} qty {} lev {}x entry {} sl {}",
                signal.direction, signal.symbol, quantity, leverage, signal.entry_price, stop_loss
            );
            return Ok(ExecutionOutcome {
                trade_id: None,
                order_ids: Vec::new(),
                avg_fill: signal.entry_price,
                quantity,
                slippage_pct: 0.0,
                maker: false,
            });
        }

        // Margin mode and leverage before any order hits the book. The
        // isolate decision follows the leverage the signal asked for, not
        // the bracket-capped value the venue will actually grant.
        let isolate = signal.leverage >= config.execution.auto_isolate_min_leverage
            || !config.execution.default_margin_crossed;
        if config.execution.allow_margin_mode_override {
            self.exchange
                .ensure_margin_type(&signal.symbol, isolate)
                .await?;
        }
        self.exchange
            .change_leverage(&signal.symbol, leverage)
            .await?;

        // Entry: iceberg above the notional threshold, LIMIT path otherwise.
        let notional = (quantity * signal.entry_price).to_f64().unwrap_or(0.0);
        let fill = if notional > config.execution.iceberg_threshold {
            self.execute_iceberg(config, signal, info, quantity).await?
        } else {
            self.execute_limit_with_fallback(config, signal, info, quantity, book)
                .await?
        };

        let slippage_pct = if signal.entry_price > Decimal::ZERO {
            ((fill.avg_price - signal.entry_price).abs() / signal.entry_price)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
        } else {
            0.0
        };
        self.metrics.record(ExecSample {
            path: fill.path,
            maker: fill.maker,
            slippage_pct,
            latency_ms: 0,
            requotes: fill.requotes,
        });

        // Protective orders and trailing stop.
        self.attach_protections(config, signal, info, fill.quantity, stop_loss)
            .await;
        if config.execution.enable_trailing_stop {
            self.attach_trailing_stop(config, signal, fill.quantity).await;
        }

        // Post-open headroom trim.
        let final_qty = self
            .trim_to_headroom(config, signal, info, fill.quantity)
            .await;

        let trade = NewTrade {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: fill.avg_price,
            quantity: final_qty,
            leverage,
            stop_loss,
            take_profit_1: signal.take_profit_1,
            take_profit_2: signal.take_profit_2,
            take_profit_3: signal.take_profit_3,
            order_id: fill.order_ids.first().map(|id| id.to_string()),
        };
        let trade_id = self
            .trades
            .insert(&trade)
            .await
            .map_err(|e| ExecutionError::Unfilled(format!("persist failed: {e}")))?;

        self.events.publish(BotEvent::TradeOpened {
            trade_id,
            symbol: signal.symbol.clone(),
        });
        self.notifier.notify(format!(
            "Opened {} {} qty {} @ {} ({}x, score {})",
            signal.direction, signal.symbol, final_qty, fill.avg_price, leverage, signal.score
        ));

        Ok(ExecutionOutcome {
            trade_id: Some(trade_id),
            order_ids: fill.order_ids,
            avg_fill: fill.avg_price,
            quantity: final_qty,
            slippage_pct,
            maker: fill.maker,
        })
    }

    /// LIMIT with up to `limit_max_attempts` re-quotes, then MARKET.
    async fn execute_limit_with_fallback(
        &self,
        config: &Config,
        signal: &Signal,
        info: &SymbolInfo,
        quantity: Decimal,
        mut book: OrderBookTop,
    ) -> Result<FillResult, ExecutionError> {
        let exec = &config.execution;
        let side = signal.direction.entry_side();
        let spread_bps = book.spread_pct() * 100.0;
        let maker_mode = exec.use_post_only_entries
            || (exec.auto_post_only_entries && spread_bps >= exec.auto_maker_spread_bps);

        let mut requotes = 0u32;
        for attempt in 1..=exec.limit_max_attempts {
            let price = if maker_mode {
                // Sit inside the passive side of the book.
                let passive = match signal.direction {
                    Direction::Long => book.bid.to_f64().unwrap_or(0.0) * (1.0 - MAKER_EPSILON),
                    Direction::Short => book.ask.to_f64().unwrap_or(0.0) * (1.0 + MAKER_EPSILON),
                };
                Decimal::from_f64(passive).unwrap_or(signal.entry_price)
            } else if attempt == 1 {
                // Slightly improved over the signalled entry.
                let buffer = exec.limit_buffer_pct / 100.0;
                let improved = match signal.direction {
                    Direction::Long => signal.entry_price.to_f64().unwrap_or(0.0) * (1.0 + buffer),
                    Direction::Short => signal.entry_price.to_f64().unwrap_or(0.0) * (1.0 - buffer),
                };
                Decimal::from_f64(improved).unwrap_or(signal.entry_price)
            } else {
                // Re-quote toward the mid.
                (book.bid + book.ask) / Decimal::TWO
            };
            let price = info.round_price(price);
            let tif = if maker_mode {
                TimeInForce::Gtx
            } else {
                TimeInForce::Gtc
            };

            let ack = self
                .exchange
                .create_order(OrderParams::limit(&signal.symbol, side, quantity, price, tif))
                .await?;

            if let Some(fill) = self
                .await_limit_fill(config, signal, &ack)
                .await?
            {
                return Ok(FillResult {
                    order_ids: vec![ack.order_id],
                    avg_price: fill.0,
                    quantity: fill.1,
                    maker: maker_mode,
                    path: ExecPath::Limit,
                    requotes,
                });
            }

            // Timed out: cancel and re-quote with a fresh book.
            if let Err(e) = self.exchange.cancel_order(&signal.symbol, ack.order_id).await {
                debug!("cancel of stale limit order failed (may have filled): {e}");
            }
            requotes += 1;
            book = self.exchange.order_book(&signal.symbol, 5).await?;
        }

        // Final fallback: take the market.
        let ack = self
            .exchange
            .create_order(OrderParams::market(&signal.symbol, side, quantity))
            .await?;
        let avg_price = self.true_avg_fill(&signal.symbol, &ack).await;
        Ok(FillResult {
            order_ids: vec![ack.order_id],
            avg_price,
            quantity: if ack.executed_qty > Decimal::ZERO {
                ack.executed_qty
            } else {
                quantity
            },
            maker: false,
            path: ExecPath::Market,
            requotes,
        })
    }

    /// Poll an open LIMIT order until filled or the timeout elapses. Partial
    /// fills at timeout are accepted as final.
    async fn await_limit_fill(
        &self,
        config: &Config,
        signal: &Signal,
        ack: &OrderAck,
    ) -> Result<Option<(Decimal, Decimal)>, ExecutionError> {
        if ack.status == OrderStatus::Filled {
            return Ok(Some((ack.avg_price, ack.executed_qty)));
        }
        if ack.status == OrderStatus::Expired {
            // Post-only order would have crossed; caller re-quotes.
            return Ok(None);
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(config.execution.order_timeout_sec);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            let current = self
                .exchange
                .get_order(&signal.symbol, ack.order_id)
                .await?;
            match current.status {
                OrderStatus::Filled => {
                    return Ok(Some((current.avg_price, current.executed_qty)));
                }
                OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                    return Ok(None);
                }
                _ => {}
            }
        }

        // Timeout: keep whatever part filled.
        let current = self
            .exchange
            .get_order(&signal.symbol, ack.order_id)
            .await?;
        if current.executed_qty > Decimal::ZERO {
            warn!(
                "{}: limit order partially filled {} at timeout, accepting",
                signal.symbol, current.executed_qty
            );
            let _ = self
                .exchange
                .cancel_order(&signal.symbol, ack.order_id)
                .await;
            return Ok(Some((current.avg_price, current.executed_qty)));
        }
        Ok(None)
    }

    /// Split a large entry into sequential LIMIT-path chunks and aggregate
    /// the fills. A failed chunk stops further chunks; earlier fills stand.
    async fn execute_iceberg(
        &self,
        config: &Config,
        signal: &Signal,
        info: &SymbolInfo,
        quantity: Decimal,
    ) -> Result<FillResult, ExecutionError> {
        let chunk_notional = Decimal::from_f64(config.execution.iceberg_chunk_size)
            .unwrap_or(Decimal::ONE);
        let chunk_qty = info.round_qty_down(chunk_notional / signal.entry_price);
        if chunk_qty <= Decimal::ZERO {
            return Err(ExecutionError::Sizing(
                "iceberg chunk rounds to zero".to_string(),
            ));
        }

        let mut remaining = quantity;
        let mut order_ids = Vec::new();
        let mut filled_qty = Decimal::ZERO;
        let mut notional_sum = Decimal::ZERO;
        let mut requotes = 0;
        let mut any_maker = false;

        while remaining > Decimal::ZERO {
            let this_chunk = remaining.min(chunk_qty);
            let book = self.exchange.order_book(&signal.symbol, 5).await?;
            match self
                .execute_limit_with_fallback(config, signal, info, this_chunk, book)
                .await
            {
                Ok(fill) => {
                    order_ids.extend(fill.order_ids);
                    filled_qty += fill.quantity;
                    notional_sum += fill.avg_price * fill.quantity;
                    requotes += fill.requotes;
                    any_maker |= fill.maker;
                }
                Err(e) => {
                    warn!(
                        "{}: iceberg chunk failed after {} filled: {e}",
                        signal.symbol, filled_qty
                    );
                    break;
                }
            }
            remaining -= this_chunk;
            if remaining > Decimal::ZERO {
                tokio::time::sleep(ICEBERG_CHUNK_DELAY).await;
            }
        }

        if filled_qty <= Decimal::ZERO {
            return Err(ExecutionError::Unfilled("no iceberg chunk filled".into()));
        }
        Ok(FillResult {
            avg_price: notional_sum / filled_qty,
            quantity: filled_qty,
            order_ids,
            maker: any_maker,
            path: ExecPath::Iceberg,
            requotes,
        })
    }

    /// Market fills sometimes come back with avgPrice = 0; recover the real
    /// average from trade history.
    async fn true_avg_fill(&self, symbol: &str, ack: &OrderAck) -> Decimal {
        if ack.avg_price > Decimal::ZERO {
            return ack.avg_price;
        }
        if ack.executed_qty > Decimal::ZERO && ack.cum_quote > Decimal::ZERO {
            return ack.cum_quote / ack.executed_qty;
        }
        match self.exchange.recent_user_trades(symbol, 10).await {
            Ok(trades) if !trades.is_empty() => {
                let notional: Decimal = trades.iter().map(|t| t.price * t.qty).sum();
                let qty: Decimal = trades.iter().map(|t| t.qty).sum();
                if qty > Decimal::ZERO {
                    notional / qty
                } else {
                    Decimal::ZERO
                }
            }
            _ => Decimal::ZERO,
        }
    }

    /// SL as STOP_MARKET plus the reduce-only TP ladder split by the
    /// configured parts. Protection failures never unwind the entry; they
    /// are reported instead.
    async fn attach_protections(
        &self,
        config: &Config,
        signal: &Signal,
        info: &SymbolInfo,
        quantity: Decimal,
        stop_loss: Decimal,
    ) {
        let exit_side = signal.direction.exit_side();
        let working_type = if config.execution.use_mark_price_for_stops {
            WorkingType::MarkPrice
        } else {
            WorkingType::ContractPrice
        };

        let mut orders = vec![OrderParams::stop_market(
            &signal.symbol,
            exit_side,
            info.round_price(stop_loss),
            working_type,
        )];

        let tps = [
            Some(signal.take_profit_1),
            signal.take_profit_2,
            signal.take_profit_3,
        ];
        for (tp, part) in tps.iter().zip(config.execution.take_profit_parts.iter()) {
            let Some(tp) = tp else { continue };
            let part_qty =
                info.round_qty_down(quantity * Decimal::from_f64(*part).unwrap_or(Decimal::ZERO));
            if part_qty <= Decimal::ZERO {
                continue;
            }
            orders.push(
                OrderParams::limit(
                    &signal.symbol,
                    exit_side,
                    part_qty,
                    info.round_price(*tp),
                    TimeInForce::Gtc,
                )
                .reduce_only(),
            );
        }

        if config.execution.enable_bracket_batch {
            let futures: Vec<_> = orders
                .into_iter()
                .map(|o| self.exchange.create_order(o))
                .collect();
            for result in futures::future::join_all(futures).await {
                if let Err(e) = result {
                    warn!("{}: protective order failed: {e}", signal.symbol);
                    self.notifier
                        .notify(format!("{}: protective order failed: {e}", signal.symbol));
                }
            }
        } else {
            for order in orders {
                if let Err(e) = self.exchange.create_order(order).await {
                    warn!("{}: protective order failed: {e}", signal.symbol);
                    self.notifier
                        .notify(format!("{}: protective order failed: {e}", signal.symbol));
                }
            }
        }
    }

    /// Callback rate from ATR on the configured lookback interval, clamped
    /// and rounded to 0.1.
    async fn attach_trailing_stop(&self, config: &Config, signal: &Signal, quantity: Decimal) {
        let exec = &config.execution;
        let callback = match self
            .exchange
            .klines(&signal.symbol, exec.tsl_atr_lookback_interval, 100)
            .await
        {
            Ok(klines) => crate::domain::indicators::atr_pct(&klines, 14)
                .unwrap_or(exec.tsl_callback_pct_min),
            Err(_) => exec.tsl_callback_pct_min,
        };
        let callback = (callback.clamp(exec.tsl_callback_pct_min, exec.tsl_callback_pct_max) * 10.0)
            .round()
            / 10.0;

        let order = OrderParams::trailing_stop(
            &signal.symbol,
            signal.direction.exit_side(),
            quantity,
            callback,
        );
        if let Err(e) = self.exchange.create_order(order).await {
            warn!("{}: trailing stop attach failed: {e}", signal.symbol);
        }
    }

    /// Reduce the fresh position until the liquidation headroom clears the
    /// floor, up to three steps.
    async fn trim_to_headroom(
        &self,
        config: &Config,
        signal: &Signal,
        info: &SymbolInfo,
        quantity: Decimal,
    ) -> Decimal {
        let mut remaining = quantity;
        for attempt in 0..HEADROOM_TRIM_ATTEMPTS {
            let position = match self.exchange.position_risk(&signal.symbol).await {
                Ok(Some(p)) => p,
                _ => return remaining,
            };
            let headroom = position.headroom_pct().unwrap_or(f64::MAX);
            if headroom >= config.execution.headroom_min_pct {
                return remaining;
            }

            let step = Decimal::from_f64(config.execution.reduce_step_pct / 100.0)
                .unwrap_or(Decimal::ZERO);
            let trim_qty = info.round_qty_down(remaining * step);
            if trim_qty <= Decimal::ZERO {
                return remaining;
            }
            warn!(
                "{}: headroom {:.1}% below {:.1}%, trim {} (attempt {})",
                signal.symbol,
                headroom,
                config.execution.headroom_min_pct,
                trim_qty,
                attempt + 1
            );
            let order = OrderParams::market(&signal.symbol, signal.direction.exit_side(), trim_qty)
                .reduce_only();
            match self.exchange.create_order(order).await {
                Ok(_) => remaining -= trim_qty,
                Err(e) => {
                    warn!("{}: headroom trim failed: {e}", signal.symbol);
                    return remaining;
                }
            }
        }
        remaining
    }

    /// Aggregate margin currently committed on the venue.
    async fn open_margin(&self) -> Result<Decimal, ExecutionError> {
        let positions = self.exchange.open_positions().await?;
        let mut margin = Decimal::ZERO;
        for p in positions {
            let leverage = Decimal::from(p.leverage.max(1));
            margin += p.quantity() * p.entry_price / leverage;
        }
        Ok(margin)
    }
}

/// Convenience used by the sniper loop: synthetic signals carry percent
/// stops rather than ATR-derived levels.
pub fn sniper_signal(
    symbol: &str,
    price: Decimal,
    leverage: u32,
    tp_pct: f64,
    sl_pct: f64,
    risk_pct: f64,
) -> Signal {
    let tp_mult = Decimal::from_f64(1.0 + tp_pct / 100.0).unwrap_or(Decimal::ONE);
    let sl_mult = Decimal::from_f64(1.0 - sl_pct / 100.0).unwrap_or(Decimal::ONE);
    Signal {
        symbol: symbol.to_string(),
        // Observed behavior of the source system: sniper entries are always
        // long-side scalps.
        direction: Direction::Long,
        entry_price: price,
        stop_loss: price * sl_mult,
        take_profit_1: price * tp_mult,
        take_profit_2: None,
        take_profit_3: None,
        leverage,
        score: 0,
        risk_pct,
        force: true,
        sniper: true,
        enrichment: Default::default(),
    }
}
