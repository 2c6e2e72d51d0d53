use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Credentials;
use crate::types::OrderSide;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

// ── Error types ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum VenueError {
    /// Rate limited (HTTP 429 / 418, or code -1003). retry_after in seconds.
    RateLimit { retry_after: u64 },
    /// Transient error: network, timeout, HTTP 5xx, unknown execution status (-1007).
    Transient(String),
    /// Permanent error: invalid params, insufficient balance, HTTP 4xx.
    Permanent(String),
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenueError::RateLimit { retry_after } => {
                write!(f, "rate limited (retry after {}s)", retry_after)
            }
            VenueError::Transient(msg) => write!(f, "transient error: {}", msg),
            VenueError::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

impl std::error::Error for VenueError {}

/// Classify a Binance error code + HTTP status into a VenueError.
fn classify_error(code: i64, http_status: u16, msg: &str, retry_after: Option<u64>) -> VenueError {
    match (code, http_status) {
        (-1003, _) | (_, 429) | (_, 418) => VenueError::RateLimit { retry_after: retry_after.unwrap_or(10) },
        (-1007, _) | (-1001, _) | (_, 500..=599) => VenueError::Transient(msg.to_string()),
        _ => VenueError::Permanent(format!("code={} msg={}", code, msg)),
    }
}

/// Venue acknowledgement of a market order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: i64,
    pub status: String,
    pub executed_qty: f64,
    /// Quantity-weighted fill price, when the venue returned fills.
    pub avg_price: Option<f64>,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, credentials: &Credentials) -> Result<Self, VenueError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| VenueError::Permanent(format!("HTTP client build failed: {}", e)))?;

        Ok(BinanceClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
        })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC takes keys of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Query string for a MARKET order, signature appended.
    fn signed_order_query(&self, symbol: &str, side: OrderSide, quantity: f64, timestamp: u64) -> String {
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newOrderRespType=FULL&recvWindow={}&timestamp={}",
            symbol,
            side.as_str(),
            format_quantity(quantity),
            RECV_WINDOW_MS,
            timestamp
        );
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    /// Place a spot market order. No retry: a resent market order may double fill.
    pub async fn place_market_order(
        &self,
        side: OrderSide,
        symbol: &str,
        quantity: f64,
    ) -> Result<OrderFill, VenueError> {
        let query = self.signed_order_query(symbol, side, quantity, Self::timestamp_ms());
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Transient(format!("HTTP error: {}", e)))?;

        let http_status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::Transient(format!("Parse error: {}", e)))?;

        if (200..300).contains(&http_status) {
            let fill = parse_order_fill(&json)?;
            log::info!(
                "Order placed: {} {} qty={} orderId={} status={}",
                side.as_str(), symbol, format_quantity(quantity), fill.order_id, fill.status
            );
            Ok(fill)
        } else {
            let code = json["code"].as_i64().unwrap_or(-1);
            let msg = json["msg"].as_str().unwrap_or("unknown");
            Err(classify_error(code, http_status, msg, retry_after))
        }
    }
}

/// Binance rejects scientific notation and trailing zeros are harmless.
fn format_quantity(qty: f64) -> String {
    let s = format!("{:.8}", qty);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn parse_order_fill(json: &serde_json::Value) -> Result<OrderFill, VenueError> {
    let order_id = json["orderId"]
        .as_i64()
        .ok_or_else(|| VenueError::Transient("missing orderId in order response".into()))?;
    let status = json["status"].as_str().unwrap_or("UNKNOWN").to_string();
    let executed_qty = json["executedQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);

    let (notional, qty) = json["fills"]
        .as_array()
        .map(|fills| {
            fills.iter().fold((0.0, 0.0), |(n, q), f| {
                let price: f64 = f["price"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                let fq: f64 = f["qty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                (n + price * fq, q + fq)
            })
        })
        .unwrap_or((0.0, 0.0));
    let avg_price = if qty > 0.0 { Some(notional / qty) } else { None };

    Ok(OrderFill { order_id, status, executed_qty, avg_price })
}
