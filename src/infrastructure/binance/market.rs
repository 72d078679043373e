//! Market-data endpoints: klines, tickers, order book, derivatives snapshots.
//! Price and symbol-info getters go cache-first with the TTLs from the cache
//! key layout.

use super::client::{BinanceClient, require_decimal, require_positive_decimal};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{cache_get, cache_set};
use crate::domain::types::{
    Interval, Kline, OpenInterestPoint, OrderBookTop, PremiumIndex, SymbolInfo, TakerRatioPoint,
    Ticker24h,
};
use crate::infrastructure::cache::keys;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const PRICE_TTL: Duration = Duration::from_secs(2);
const SYMBOL_INFO_TTL: Duration = Duration::from_secs(3600);

impl BinanceClient {
    pub(super) async fn fetch_symbol_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let key = keys::price(symbol);
        if let Some(price) = cache_get::<Decimal>(self.cache.as_ref(), &key).await {
            return Ok(price);
        }

        #[derive(Deserialize)]
        struct PriceTicker {
            price: String,
        }

        let ticker: PriceTicker = self
            .get_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let price = require_positive_decimal(&ticker.price, "price")?;
        cache_set(self.cache.as_ref(), &key, &price, PRICE_TTL).await;
        Ok(price)
    }

    pub(super) async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let rows: Vec<Vec<Value>> = self
            .get_public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter().map(parse_kline_row).collect()
    }

    pub(super) async fn fetch_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        let key = keys::symbol_info(symbol);
        if let Some(info) = cache_get::<SymbolInfo>(self.cache.as_ref(), &key).await {
            return Ok(info);
        }

        let all = self.fetch_exchange_symbols().await?;
        let info = all
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::DataQuality(format!("unknown symbol {symbol}")))?;
        cache_set(self.cache.as_ref(), &key, &info, SYMBOL_INFO_TTL).await;
        Ok(info)
    }

    pub(super) async fn fetch_exchange_symbols(&self) -> Result<Vec<SymbolInfo>, ExchangeError> {
        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<RawSymbol>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawSymbol {
            symbol: String,
            status: String,
            #[serde(default)]
            contract_type: String,
            quote_asset: String,
            quantity_precision: u32,
            price_precision: u32,
            filters: Vec<Value>,
        }

        let info: ExchangeInfo = self.get_public("/fapi/v1/exchangeInfo", &[]).await?;
        let mut out = Vec::with_capacity(info.symbols.len());
        for raw in info.symbols {
            let mut tick_size = Decimal::ZERO;
            let mut step_size = Decimal::ZERO;
            let mut min_qty = Decimal::ZERO;
            let mut max_qty = Decimal::ZERO;
            let mut min_notional = Decimal::ZERO;

            for filter in &raw.filters {
                match filter.get("filterType").and_then(Value::as_str) {
                    Some("PRICE_FILTER") => {
                        tick_size = filter_decimal(filter, "tickSize")?;
                    }
                    Some("LOT_SIZE") => {
                        step_size = filter_decimal(filter, "stepSize")?;
                        min_qty = filter_decimal(filter, "minQty")?;
                        max_qty = filter_decimal(filter, "maxQty")?;
                    }
                    Some("MIN_NOTIONAL") => {
                        min_notional = filter_decimal(filter, "notional")?;
                    }
                    _ => {}
                }
            }

            out.push(SymbolInfo {
                symbol: raw.symbol,
                status: raw.status,
                contract_type: raw.contract_type,
                quote_asset: raw.quote_asset,
                tick_size,
                step_size,
                min_qty,
                max_qty,
                min_notional,
                quantity_precision: raw.quantity_precision,
                price_precision: raw.price_precision,
            });
        }
        Ok(out)
    }

    pub(super) async fn fetch_ticker_24h_all(&self) -> Result<Vec<Ticker24h>, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawTicker {
            symbol: String,
            last_price: String,
            price_change_percent: String,
            quote_volume: String,
        }

        let raw: Vec<RawTicker> = self.get_public("/fapi/v1/ticker/24hr", &[]).await?;
        raw.into_iter()
            .map(|t| {
                Ok(Ticker24h {
                    last_price: require_decimal(&t.last_price, "lastPrice")?,
                    price_change_pct: t
                        .price_change_percent
                        .parse::<f64>()
                        .map_err(|_| ExchangeError::DataQuality("priceChangePercent".into()))?,
                    quote_volume: require_decimal(&t.quote_volume, "quoteVolume")?,
                    symbol: t.symbol,
                })
            })
            .collect()
    }

    pub(super) async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<OrderBookTop, ExchangeError> {
        #[derive(Deserialize)]
        struct Depth {
            bids: Vec<(String, String)>,
            asks: Vec<(String, String)>,
        }

        let depth: Depth = self
            .get_public(
                "/fapi/v1/depth",
                &[
                    ("symbol", symbol.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let best_bid = depth
            .bids
            .first()
            .ok_or_else(|| ExchangeError::DataQuality("empty bid side".into()))?;
        let best_ask = depth
            .asks
            .first()
            .ok_or_else(|| ExchangeError::DataQuality("empty ask side".into()))?;

        Ok(OrderBookTop {
            bid: require_positive_decimal(&best_bid.0, "bid")?,
            ask: require_positive_decimal(&best_ask.0, "ask")?,
        })
    }

    pub(super) async fn fetch_premium_index(
        &self,
        symbol: &str,
    ) -> Result<PremiumIndex, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawPremium {
            symbol: String,
            mark_price: String,
            index_price: String,
            last_funding_rate: String,
            next_funding_time: i64,
        }

        let raw: RawPremium = self
            .get_public("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        Ok(PremiumIndex {
            mark_price: require_positive_decimal(&raw.mark_price, "markPrice")?,
            index_price: require_positive_decimal(&raw.index_price, "indexPrice")?,
            last_funding_rate: raw
                .last_funding_rate
                .parse::<f64>()
                .map_err(|_| ExchangeError::DataQuality("lastFundingRate".into()))?,
            next_funding_time: raw.next_funding_time,
            symbol: raw.symbol,
        })
    }

    pub(super) async fn fetch_open_interest_history(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<OpenInterestPoint>, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawOi {
            sum_open_interest: String,
            timestamp: i64,
        }

        let raw: Vec<RawOi> = self
            .get_public(
                "/futures/data/openInterestHist",
                &[
                    ("symbol", symbol.to_string()),
                    ("period", period.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        raw.into_iter()
            .map(|p| {
                Ok(OpenInterestPoint {
                    open_interest: require_decimal(&p.sum_open_interest, "sumOpenInterest")?,
                    timestamp: p.timestamp,
                })
            })
            .collect()
    }

    pub(super) async fn fetch_taker_ratio(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<TakerRatioPoint>, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawRatio {
            buy_sell_ratio: String,
            timestamp: i64,
        }

        let raw: Vec<RawRatio> = self
            .get_public(
                "/futures/data/takerlongshortRatio",
                &[
                    ("symbol", symbol.to_string()),
                    ("period", period.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        raw.into_iter()
            .map(|p| {
                Ok(TakerRatioPoint {
                    buy_sell_ratio: p
                        .buy_sell_ratio
                        .parse::<f64>()
                        .map_err(|_| ExchangeError::DataQuality("buySellRatio".into()))?,
                    timestamp: p.timestamp,
                })
            })
            .collect()
    }
}

fn filter_decimal(filter: &Value, field: &str) -> Result<Decimal, ExchangeError> {
    let raw = filter
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::DataQuality(format!("filter missing {field}")))?;
    require_decimal(raw, field)
}

/// Binance kline rows are positional arrays.
fn parse_kline_row(row: &Vec<Value>) -> Result<Kline, ExchangeError> {
    if row.len() < 9 {
        return Err(ExchangeError::DataQuality(format!(
            "kline row too short: {} fields",
            row.len()
        )));
    }
    let num = |v: &Value, field: &str| -> Result<Decimal, ExchangeError> {
        let raw = v
            .as_str()
            .ok_or_else(|| ExchangeError::DataQuality(format!("kline {field} not a string")))?;
        require_decimal(raw, field)
    };

    Ok(Kline {
        open_time: row[0]
            .as_i64()
            .ok_or_else(|| ExchangeError::DataQuality("kline openTime".into()))?,
        open: num(&row[1], "open")?,
        high: num(&row[2], "high")?,
        low: num(&row[3], "low")?,
        close: num(&row[4], "close")?,
        volume: num(&row[5], "volume")?,
        quote_volume: num(&row[7], "quoteVolume")?,
        trades: row[8].as_u64().unwrap_or(0),
    })
}
