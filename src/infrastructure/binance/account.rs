//! Account endpoints: balance, positions, leverage and margin management.

use super::client::{BinanceClient, require_decimal, require_non_negative_decimal};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{cache_get, cache_set};
use crate::domain::types::{AccountBalance, ExchangePosition, LeverageBracket};
use crate::infrastructure::cache::keys;
use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;

const BALANCE_TTL: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
    leverage: String,
    margin_type: String,
    liquidation_price: String,
    #[serde(default)]
    isolated_margin: String,
}

impl RawPosition {
    fn into_position(self) -> Result<ExchangePosition, ExchangeError> {
        Ok(ExchangePosition {
            position_amt: require_decimal(&self.position_amt, "positionAmt")?,
            entry_price: require_decimal(&self.entry_price, "entryPrice")?,
            mark_price: require_decimal(&self.mark_price, "markPrice")?,
            unrealized_pnl: require_decimal(&self.un_realized_profit, "unRealizedProfit")?,
            leverage: self
                .leverage
                .parse::<u32>()
                .map_err(|_| ExchangeError::DataQuality("leverage".into()))?,
            isolated: self.margin_type.eq_ignore_ascii_case("isolated"),
            liquidation_price: require_decimal(&self.liquidation_price, "liquidationPrice")?,
            isolated_margin: if self.isolated_margin.is_empty() {
                rust_decimal::Decimal::ZERO
            } else {
                require_decimal(&self.isolated_margin, "isolatedMargin")?
            },
            symbol: self.symbol,
        })
    }
}

impl BinanceClient {
    pub(super) async fn fetch_account_balance(&self) -> Result<AccountBalance, ExchangeError> {
        if let Some(balance) =
            cache_get::<AccountBalance>(self.cache.as_ref(), keys::ACCOUNT_BALANCE).await
        {
            return Ok(balance);
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawAccount {
            total_wallet_balance: String,
            available_balance: String,
        }

        let raw: RawAccount = self
            .send_signed(Method::GET, "/fapi/v2/account", &[])
            .await?;
        let balance = AccountBalance {
            total: require_non_negative_decimal(&raw.total_wallet_balance, "totalWalletBalance")?,
            available: require_non_negative_decimal(&raw.available_balance, "availableBalance")?,
        };
        cache_set(
            self.cache.as_ref(),
            keys::ACCOUNT_BALANCE,
            &balance,
            BALANCE_TTL,
        )
        .await;
        Ok(balance)
    }

    pub(super) async fn fetch_open_positions(
        &self,
    ) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let raw: Vec<RawPosition> = self
            .send_signed(Method::GET, "/fapi/v2/positionRisk", &[])
            .await?;
        let mut out = Vec::new();
        for p in raw {
            let position = p.into_position()?;
            if position.position_amt != rust_decimal::Decimal::ZERO {
                out.push(position);
            }
        }
        Ok(out)
    }

    pub(super) async fn fetch_position_risk(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePosition>, ExchangeError> {
        let raw: Vec<RawPosition> = self
            .send_signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        for p in raw {
            let position = p.into_position()?;
            if position.position_amt != rust_decimal::Decimal::ZERO {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    pub(super) async fn fetch_leverage_brackets(
        &self,
        symbol: &str,
    ) -> Result<Vec<LeverageBracket>, ExchangeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawBracket {
            notional_floor: f64,
            notional_cap: f64,
            initial_leverage: u32,
        }

        #[derive(Deserialize)]
        struct RawEntry {
            brackets: Vec<RawBracket>,
        }

        let raw: Vec<RawEntry> = self
            .send_signed(
                Method::GET,
                "/fapi/v1/leverageBracket",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        let entry = raw
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::DataQuality("empty leverage bracket reply".into()))?;

        let mut brackets: Vec<LeverageBracket> = entry
            .brackets
            .into_iter()
            .map(|b| {
                Ok(LeverageBracket {
                    notional_floor: rust_decimal::Decimal::try_from(b.notional_floor)
                        .map_err(|_| ExchangeError::DataQuality("notionalFloor".into()))?,
                    notional_cap: rust_decimal::Decimal::try_from(b.notional_cap)
                        .map_err(|_| ExchangeError::DataQuality("notionalCap".into()))?,
                    max_initial_leverage: b.initial_leverage,
                })
            })
            .collect::<Result<_, ExchangeError>>()?;
        brackets.sort_by(|a, b| a.notional_floor.cmp(&b.notional_floor));
        Ok(brackets)
    }

    pub(super) async fn do_change_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .send_signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub(super) async fn do_ensure_margin_type(
        &self,
        symbol: &str,
        isolated: bool,
    ) -> Result<(), ExchangeError> {
        let margin_type = if isolated { "ISOLATED" } else { "CROSSED" };
        self.send_signed_idempotent(
            Method::POST,
            "/fapi/v1/marginType",
            &[
                ("symbol", symbol.to_string()),
                ("marginType", margin_type.to_string()),
            ],
        )
        .await
    }

    pub(super) async fn do_ensure_position_mode(
        &self,
        dual_side: bool,
    ) -> Result<(), ExchangeError> {
        self.send_signed_idempotent(
            Method::POST,
            "/fapi/v1/positionSide/dual",
            &[("dualSidePosition", dual_side.to_string())],
        )
        .await
    }
}
