//! Signed REST core for Binance USDT-M futures.
//!
//! Transient failures (timeouts, 5xx) are retried by the middleware with
//! exponential backoff. Fatal venue codes short-circuit: a rate ban (-1003)
//! raises a process-wide ban flag the orchestrator observes, configuration
//! errors surface immediately.

use crate::config::BinanceConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::ports::KvCache;
use crate::infrastructure::http_client::{HttpClientFactory, build_url_with_query};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Binance error codes that must never be retried.
const CODE_BANNED: i64 = -1003;
const CODE_POSITION_MODE_NO_CHANGE: i64 = -4059;
const CODE_MARGIN_TYPE_NO_CHANGE: i64 = -4046;

pub struct BinanceClient {
    pub(super) http: ClientWithMiddleware,
    pub(super) cache: Arc<dyn KvCache>,
    api_key: String,
    api_secret: String,
    base_url: String,
    pub(super) ws_base_url: String,
    banned_until_ms: AtomicI64,
}

impl BinanceClient {
    pub fn new(config: &BinanceConfig, cache: Arc<dyn KvCache>) -> Self {
        Self {
            http: HttpClientFactory::create_client(),
            cache,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: config.rest_base_url().to_string(),
            ws_base_url: config.ws_base_url().to_string(),
            banned_until_ms: AtomicI64::new(0),
        }
    }

    pub fn ban_remaining_duration(&self) -> Option<Duration> {
        let until = self.banned_until_ms.load(Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_millis();
        if until > now {
            Some(Duration::from_millis((until - now) as u64))
        } else {
            None
        }
    }

    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Public (unsigned) GET, JSON-decoded.
    pub(super) async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.check_ban()?;
        let url = build_url_with_query(&format!("{}{}", self.base_url, path), params);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        self.decode(response).await
    }

    /// Signed request with `timestamp` and HMAC signature appended.
    pub(super) async fn send_signed<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.check_ban()?;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("timestamp={timestamp}"));
        query.push("recvWindow=5000".to_string());
        let query_string = query.join("&");
        let signature = self.sign(&query_string);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        self.decode(response).await
    }

    /// Signed request where "no change needed" venue answers count as
    /// success (margin type / position mode toggles).
    pub(super) async fn send_signed_idempotent(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(), ExchangeError> {
        match self
            .send_signed::<serde_json::Value>(method, path, params)
            .await
        {
            Ok(_) => Ok(()),
            Err(ExchangeError::Fatal { code, .. })
                if code == CODE_MARGIN_TYPE_NO_CHANGE || code == CODE_POSITION_MODE_NO_CHANGE =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn check_ban(&self) -> Result<(), ExchangeError> {
        if let Some(remaining) = self.ban_remaining_duration() {
            return Err(ExchangeError::Banned {
                remaining_secs: remaining.as_secs() as i64,
            });
        }
        Ok(())
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if !status.is_success() {
            return Err(self.classify_error(status, &body));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            ExchangeError::DataQuality(format!("decode failed: {e}; body head: {:.120}", body))
        })
    }

    fn classify_error(&self, status: reqwest::StatusCode, body: &str) -> ExchangeError {
        #[derive(serde::Deserialize)]
        struct VenueError {
            code: i64,
            msg: String,
        }

        if let Ok(err) = serde_json::from_str::<VenueError>(body) {
            if err.code == CODE_BANNED {
                let until = parse_ban_until(&err.msg)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() + 60_000);
                self.banned_until_ms.store(until, Ordering::Relaxed);
                let remaining_secs =
                    ((until - chrono::Utc::now().timestamp_millis()) / 1000).max(0);
                warn!("Binance ban detected, pausing for {}s", remaining_secs);
                return ExchangeError::Banned { remaining_secs };
            }
            return ExchangeError::Fatal {
                code: err.code,
                message: err.msg,
            };
        }
        ExchangeError::Transient(format!("HTTP {status}: {:.200}", body))
    }
}

/// Extract the "banned until <millis>" timestamp Binance embeds in -1003
/// messages.
fn parse_ban_until(msg: &str) -> Option<i64> {
    let idx = msg.find("until ")?;
    let tail = &msg[idx + 6..];
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse a required decimal field, rejecting non-numeric and non-positive
/// values where positivity is required.
pub(super) fn require_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    raw.parse::<Decimal>()
        .map_err(|_| ExchangeError::DataQuality(format!("{field} is not numeric: {raw}")))
}

pub(super) fn require_positive_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    let value = require_decimal(raw, field)?;
    if value <= Decimal::ZERO {
        return Err(ExchangeError::DataQuality(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(value)
}

pub(super) fn require_non_negative_decimal(
    raw: &str,
    field: &str,
) -> Result<Decimal, ExchangeError> {
    let value = require_decimal(raw, field)?;
    if value < Decimal::ZERO {
        return Err(ExchangeError::DataQuality(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ban_until() {
        let msg = "Way too many requests; IP banned until 1700000000000.";
        assert_eq!(parse_ban_until(msg), Some(1_700_000_000_000));
        assert_eq!(parse_ban_until("no timestamp here"), None);
    }

    #[test]
    fn test_require_positive_decimal() {
        assert!(require_positive_decimal("1.5", "price").is_ok());
        assert!(require_positive_decimal("0", "price").is_err());
        assert!(require_positive_decimal("abc", "price").is_err());
    }

    #[test]
    fn test_require_non_negative_decimal() {
        assert!(require_non_negative_decimal("0", "balance").is_ok());
        assert!(require_non_negative_decimal("-1", "balance").is_err());
    }
}
