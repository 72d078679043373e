//! Order endpoints: create, cancel, query, and user-trade history used to
//! recover average fill prices when the venue reports avgPrice = 0.

use super::client::{BinanceClient, require_decimal};
use crate::domain::errors::ExchangeError;
use crate::domain::types::{OrderAck, OrderParams, OrderStatus, UserTrade};
use reqwest::Method;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: i64,
    client_order_id: String,
    symbol: String,
    status: String,
    #[serde(default)]
    avg_price: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    cum_quote: String,
}

impl RawOrder {
    fn into_ack(self) -> Result<OrderAck, ExchangeError> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| ExchangeError::DataQuality(format!("order status {}", self.status)))?;
        let opt_decimal = |raw: &str, field: &str| -> Result<rust_decimal::Decimal, ExchangeError> {
            if raw.is_empty() {
                Ok(rust_decimal::Decimal::ZERO)
            } else {
                require_decimal(raw, field)
            }
        };
        Ok(OrderAck {
            order_id: self.order_id,
            client_order_id: self.client_order_id,
            status,
            avg_price: opt_decimal(&self.avg_price, "avgPrice")?,
            executed_qty: opt_decimal(&self.executed_qty, "executedQty")?,
            cum_quote: opt_decimal(&self.cum_quote, "cumQuote")?,
            symbol: self.symbol,
        })
    }
}

impl BinanceClient {
    pub(super) async fn submit_order(&self, params: OrderParams) -> Result<OrderAck, ExchangeError> {
        let mut form: Vec<(&str, String)> = vec![
            ("symbol", params.symbol.clone()),
            ("side", params.side.to_string()),
            ("type", params.order_type.to_string()),
        ];
        if let Some(qty) = params.quantity {
            form.push(("quantity", qty.normalize().to_string()));
        }
        if let Some(price) = params.price {
            form.push(("price", price.normalize().to_string()));
        }
        if let Some(stop) = params.stop_price {
            form.push(("stopPrice", stop.normalize().to_string()));
        }
        if let Some(tif) = params.time_in_force {
            form.push(("timeInForce", tif.to_string()));
        }
        if params.close_position {
            form.push(("closePosition", "true".to_string()));
        } else if params.reduce_only {
            form.push(("reduceOnly", "true".to_string()));
        }
        if let Some(wt) = params.working_type {
            form.push(("workingType", wt.to_string()));
        }
        if let Some(rate) = params.callback_rate {
            form.push(("callbackRate", format!("{:.1}", rate)));
        }
        if let Some(id) = &params.new_client_order_id {
            form.push(("newClientOrderId", id.clone()));
        }

        let raw: RawOrder = self.send_signed(Method::POST, "/fapi/v1/order", &form).await?;
        raw.into_ack()
    }

    pub(super) async fn do_cancel_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub(super) async fn do_cancel_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    pub(super) async fn fetch_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> Result<OrderAck, ExchangeError> {
        let raw: RawOrder = self
            .send_signed(
                Method::GET,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        raw.into_ack()
    }

    pub(super) async fn fetch_user_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<UserTrade>, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawTrade {
            price: String,
            qty: String,
            commission: String,
            maker: bool,
            time: i64,
        }

        let raw: Vec<RawTrade> = self
            .send_signed(
                Method::GET,
                "/fapi/v1/userTrades",
                &[
                    ("symbol", symbol.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        raw.into_iter()
            .map(|t| {
                Ok(UserTrade {
                    price: require_decimal(&t.price, "price")?,
                    qty: require_decimal(&t.qty, "qty")?,
                    commission: require_decimal(&t.commission, "commission")?,
                    maker: t.maker,
                    time: t.time,
                })
            })
            .collect()
    }

    pub(super) async fn start_user_stream(&self) -> Result<String, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ListenKey {
            listen_key: String,
        }

        let key: ListenKey = self
            .send_signed(Method::POST, "/fapi/v1/listenKey", &[])
            .await?;
        Ok(key.listen_key)
    }

    pub(super) async fn keepalive_user_stream(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .send_signed(Method::PUT, "/fapi/v1/listenKey", &[])
            .await?;
        Ok(())
    }

    pub(super) async fn close_user_stream(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .send_signed(Method::DELETE, "/fapi/v1/listenKey", &[])
            .await?;
        Ok(())
    }
}
