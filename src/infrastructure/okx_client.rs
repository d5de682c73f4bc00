//! OKX REST Client
//!
//! Signed HTTPS access to the venue's v5 API. Every private call carries
//! the key id, a base64 HMAC-SHA256 signature over
//! `timestamp + method + path + body`, the passphrase, and a millisecond
//! ISO-8601 UTC timestamp ending in `Z`. Transient transport failures
//! (429/5xx, connection errors) are retried with bounded exponential
//! backoff; venue-level order rejections are surfaced as values, never
//! retried.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::domain::entities::candle::Candle;
use crate::domain::entities::order::OrderAck;
use crate::domain::errors::BrokerError;

pub const OKX_API_BASE: &str = "https://www.okx.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

const RETRYABLE_STATUS: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

/// Standard OKX response envelope.
#[derive(Debug, Deserialize)]
pub struct OkxEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceDetail {
    #[serde(default)]
    pub ccy: String,
    #[serde(rename = "availEq", default)]
    pub avail_eq: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceData {
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
pub struct PositionData {
    #[serde(rename = "instId", default)]
    pub inst_id: String,
    #[serde(default)]
    pub pos: String,
}

#[derive(Debug, Deserialize)]
pub struct TickerData {
    #[serde(default)]
    pub last: String,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    #[serde(rename = "ordId", default)]
    ord_id: String,
    #[serde(rename = "sCode", default)]
    s_code: String,
    #[serde(rename = "sMsg", default)]
    s_msg: String,
}

pub struct OkxClient {
    http: Client,
    base_url: String,
    credentials: Option<OkxCredentials>,
}

impl OkxClient {
    pub fn new(credentials: OkxCredentials, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            credentials: Some(credentials),
        }
    }

    /// Unauthenticated client for the public market-data endpoints.
    pub fn public(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            credentials: None,
        }
    }

    /// UTC ISO-8601 with millisecond precision and trailing Z, as the
    /// venue requires for signatures.
    fn timestamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// base64(HMAC-SHA256(secret, timestamp + method + path + body))
    fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(message.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        private: bool,
    ) -> Result<OkxEnvelope<T>, BrokerError> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let url = format!("{}{}", self.base_url, path);

        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(REQUEST_TIMEOUT)
                .header("Content-Type", "application/json");

            if private {
                let credentials = self.credentials.as_ref().ok_or_else(|| {
                    BrokerError::Venue {
                        code: "auth".to_string(),
                        message: "missing API credentials".to_string(),
                    }
                })?;
                // Re-signed per attempt so the timestamp stays fresh.
                let timestamp = Self::timestamp();
                let signature = Self::sign(
                    &credentials.secret_key,
                    &timestamp,
                    method.as_str(),
                    path,
                    &body_str,
                );
                request = request
                    .header("OK-ACCESS-KEY", &credentials.api_key)
                    .header("OK-ACCESS-SIGN", signature)
                    .header("OK-ACCESS-TIMESTAMP", timestamp)
                    .header("OK-ACCESS-PASSPHRASE", &credentials.passphrase);
            }

            if !body_str.is_empty() {
                request = request.body(body_str.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    // Connection-level failure: retryable
                    last_error = e.to_string();
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        path, attempt, MAX_ATTEMPTS, last_error
                    );
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    continue;
                }
            };

            let status = response.status();
            if RETRYABLE_STATUS.contains(&status) {
                last_error = format!("HTTP {}", status);
                warn!(
                    "Request to {} returned {} (attempt {}/{})",
                    path, status, attempt, MAX_ATTEMPTS
                );
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                continue;
            }

            let text = response
                .text()
                .await
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            debug!("okx response {} {}: {}", status, path, text);

            return serde_json::from_str(&text)
                .map_err(|e| BrokerError::InvalidResponse(format!("{}: {}", e, text)));
        }

        Err(BrokerError::Transport(format!(
            "request to {} failed after {} attempts: {}",
            path, MAX_ATTEMPTS, last_error
        )))
    }

    fn expect_ok<T>(envelope: OkxEnvelope<T>) -> Result<Vec<T>, BrokerError> {
        if envelope.code != "0" {
            return Err(BrokerError::Venue {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }

    pub async fn account_balance(&self) -> Result<Vec<BalanceData>, BrokerError> {
        let envelope = self
            .send(Method::GET, "/api/v5/account/balance", None, true)
            .await?;
        Self::expect_ok(envelope)
    }

    pub async fn positions(&self) -> Result<Vec<PositionData>, BrokerError> {
        let envelope = self
            .send(Method::GET, "/api/v5/account/positions", None, true)
            .await?;
        Self::expect_ok(envelope)
    }

    pub async fn ticker(&self, inst_id: &str) -> Result<Option<TickerData>, BrokerError> {
        let path = format!("/api/v5/market/ticker?instId={}", inst_id);
        let envelope = self.send(Method::GET, &path, None, false).await?;
        Ok(Self::expect_ok(envelope)?.into_iter().next())
    }

    /// Place an order. Venue rejections (envelope `code != 0` on the
    /// trade endpoint, or per-order `sCode != 0`) return a `Rejected` ack
    /// and are never retried.
    pub async fn place_order(
        &self,
        inst_id: &str,
        td_mode: &str,
        side: &str,
        ord_type: &str,
        size: &str,
        price: Option<&str>,
    ) -> Result<OrderAck, BrokerError> {
        let mut body = serde_json::json!({
            "instId": inst_id,
            "tdMode": td_mode,
            "side": side,
            "ordType": ord_type,
            "sz": size,
        });
        if let (Some(px), "limit") = (price, ord_type) {
            body["px"] = serde_json::Value::String(px.to_string());
        }

        debug!("Placing order: {}", body);

        let envelope: OkxEnvelope<OrderData> = self
            .send(Method::POST, "/api/v5/trade/order", Some(body), true)
            .await?;

        if envelope.code != "0" {
            return Ok(OrderAck::rejected(None, envelope.msg));
        }

        let order = envelope.data.into_iter().next().ok_or_else(|| {
            BrokerError::InvalidResponse("order response carried no data".to_string())
        })?;

        let order_id = if order.ord_id.is_empty() {
            None
        } else {
            Some(order.ord_id)
        };

        if order.s_code == "0" {
            match order_id {
                Some(id) => Ok(OrderAck::submitted(id)),
                None => Err(BrokerError::InvalidResponse(
                    "order accepted without an order id".to_string(),
                )),
            }
        } else {
            Ok(OrderAck::rejected(order_id, order.s_msg))
        }
    }

    /// Historical candles, public endpoint. Returns newest-first rows, up
    /// to 100 per page; `after` pages backward in time.
    pub async fn history_candles(
        &self,
        inst_id: &str,
        bar: &str,
        after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Candle>, BrokerError> {
        let mut path = format!(
            "/api/v5/market/history-candles?instId={}&bar={}&limit={}",
            inst_id, bar, limit
        );
        if let Some(after) = after {
            path.push_str(&format!("&after={}", after));
        }

        let envelope: OkxEnvelope<Vec<String>> =
            self.send(Method::GET, &path, None, false).await?;
        let rows = Self::expect_ok(envelope)?;

        rows.iter().map(|row| parse_candle_row(row)).collect()
    }

    /// Decimal size string with trailing zeros stripped, as the order
    /// endpoint requires (never scientific notation).
    pub fn format_size(size: f64) -> String {
        let formatted = format!("{:.8}", size);
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }

    /// 2-decimal price string for limit orders.
    pub fn format_price(price: f64) -> String {
        format!("{:.2}", price)
    }
}

/// Venue candle rows are positional string arrays:
/// [ts, open, high, low, close, vol, ...].
fn parse_candle_row(row: &[String]) -> Result<Candle, BrokerError> {
    if row.len() < 6 {
        return Err(BrokerError::InvalidResponse(format!(
            "candle row has {} fields",
            row.len()
        )));
    }
    let field = |i: usize| -> Result<f64, BrokerError> {
        row[i]
            .parse::<f64>()
            .map_err(|e| BrokerError::InvalidResponse(format!("bad candle field {}: {}", i, e)))
    };
    Ok(Candle {
        ts: row[0]
            .parse::<i64>()
            .map_err(|e| BrokerError::InvalidResponse(format!("bad candle timestamp: {}", e)))?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
