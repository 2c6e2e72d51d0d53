use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::store::DepthSink;
use crate::types::Observation;

const PING_INTERVAL_SECS: u64 = 20;

/// Binance diff-depth event (`<symbol>@depth`). Levels are [price, qty] strings.
#[derive(Debug, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

impl DepthUpdate {
    /// First bid and first ask level. None if either side is empty or unparsable.
    pub fn best_quote(&self) -> Option<Observation> {
        let (bid_price, bid_qty) = parse_level(self.bids.first()?)?;
        let (ask_price, ask_qty) = parse_level(self.asks.first()?)?;
        Some(Observation::quoted(self.event_time, bid_price, ask_price, bid_qty, ask_qty))
    }
}

fn parse_level(level: &[String; 2]) -> Option<(f64, f64)> {
    Some((level[0].parse().ok()?, level[1].parse().ok()?))
}

/// Parses one text frame into a quote ready for the store.
pub fn parse_depth_message(text: &str) -> Result<Option<Observation>, serde_json::Error> {
    let update: DepthUpdate = serde_json::from_str(text)?;
    if update.event_type != "depthUpdate" {
        return Ok(None);
    }
    Ok(update.best_quote())
}

pub struct BinanceDepthStream {
    url: String,
    symbol: String,
}

impl BinanceDepthStream {
    /// `base_url` is the raw-stream endpoint, e.g. `wss://stream.binance.com:9443/ws`.
    pub fn new(base_url: &str, symbol: &str) -> Self {
        BinanceDepthStream {
            url: format!("{}/{}@depth", base_url.trim_end_matches('/'), symbol.to_lowercase()),
            symbol: symbol.to_uppercase(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Streams quotes into `sink` until the connection drops (Err) or
    /// `shutdown` fires (Ok).
    pub async fn connect<S: DepthSink>(
        &self,
        sink: &S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("WebSocket connected to Binance ({})", self.url);

        let (mut write, mut read) = ws_stream.split();
        let mut ping_timer = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_timer.tick().await; // consume the immediate first tick

        let drop_reason: String = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        log::info!("[{}] Depth stream stopped", self.symbol);
                        return Ok(());
                    }
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        log::error!("WebSocket ping error: {}", e);
                        break format!("ping failed: {e}");
                    }
                    log::debug!("WebSocket ping sent");
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_depth_message(&text) {
                            Ok(Some(obs)) => match sink.insert_observation(&obs) {
                                Ok(()) => log::debug!(
                                    "[{}] E={} bid={:?} ask={:?}",
                                    self.symbol, obs.timestamp, obs.bid_price, obs.ask_price
                                ),
                                Err(e) => log::error!("[{}] Failed to store depth update: {}", self.symbol, e),
                            },
                            Ok(None) => {}
                            Err(e) => log::error!("[{}] Bad depth message: {}", self.symbol, e),
                        },
                        Some(Ok(Message::Pong(_))) => log::debug!("WebSocket pong received"),
                        Some(Ok(Message::Close(_))) => {
                            log::warn!("WebSocket closed by server");
                            break "closed by server".to_string();
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error: {}", e);
                            break e.to_string();
                        }
                        None => {
                            log::warn!("WebSocket stream ended");
                            break "stream ended".to_string();
                        }
                        _ => {}
                    }
                }
            }
        };

        // Always Err so reconnect_with_backoff reconnects
        Err(drop_reason.into())
    }
}

/// Keeps the stream alive across drops with exponential backoff. Returns Ok
/// on shutdown, Err after `max_retries` consecutive failures.
pub async fn reconnect_with_backoff<S: DepthSink>(
    stream: &BinanceDepthStream,
    sink: &S,
    mut shutdown: watch::Receiver<bool>,
    max_retries: u32,
    initial_delay_secs: u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut retries = 0;
    let mut delay = initial_delay_secs;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        match stream.connect(sink, &mut shutdown).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                retries += 1;
                if retries >= max_retries {
                    return Err(format!("WS failed after {} retries: {}", retries, e).into());
                }
                log::warn!("WS error: {}. Reconnect in {}s… ({}/{})", e, delay, retries, max_retries);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
                delay = (delay * 2).min(300);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_depth_update_best_levels() {
        let text = r#"{
            "e": "depthUpdate", "E": 1700000000123, "s": "BTCUSDT", "U": 157, "u": 160,
            "b": [["64000.10", "0.500"], ["63999.00", "1.0"]],
            "a": [["64000.50", "0.250"]]
        }"#;
        let obs = parse_depth_message(text).unwrap().unwrap();
        assert_eq!(obs.timestamp, 1_700_000_000_123);
        assert_eq!(obs.bid_price, Some(64000.10));
        assert_eq!(obs.bid_qty, Some(0.5));
        assert_eq!(obs.ask_price, Some(64000.50));
        assert_eq!(obs.ask_qty, Some(0.25));
    }

    #[test]
    fn test_one_sided_update_is_dropped() {
        let text = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","b":[["1.0","1.0"]],"a":[]}"#;
        assert_eq!(parse_depth_message(text).unwrap(), None);
    }

    #[test]
    fn test_other_events_ignored_and_garbage_rejected() {
        let text = r#"{"e":"trade","E":1,"s":"BTCUSDT"}"#;
        assert_eq!(parse_depth_message(text).unwrap(), None);
        assert!(parse_depth_message("{\"result\":null,\"id\":1}").is_err());
        assert!(parse_depth_message("not json").is_err());
    }

    #[test]
    fn test_unparsable_level_is_dropped() {
        let text = r#"{"e":"depthUpdate","E":1,"b":[["abc","1"]],"a":[["2","1"]]}"#;
        assert_eq!(parse_depth_message(text).unwrap(), None);
    }

    #[test]
    fn test_stream_url() {
        let s = BinanceDepthStream::new("wss://stream.binance.com:9443/ws/", "BTCUSDT");
        assert_eq!(s.url(), "wss://stream.binance.com:9443/ws/btcusdt@depth");
    }

    #[tokio::test]
    async fn test_connect_stores_quotes_until_server_closes() {
        use crate::store::{MarketData, SqliteStore};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let update = r#"{"e":"depthUpdate","E":42,"s":"BTCUSDT","b":[["100.0","2.0"]],"a":[["101.0","3.0"]]}"#;
            ws.send(Message::Text(update.to_string())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let store = SqliteStore::open_in_memory().unwrap();
        let stream = BinanceDepthStream::new(&format!("ws://{}", addr), "btcusdt");
        let (_tx, mut rx) = watch::channel(false);

        let err = stream.connect(&store, &mut rx).await.unwrap_err();
        assert_eq!(err.to_string(), "closed by server");

        let rows = store.fetch_recent_observations(10).unwrap();
        assert_eq!(rows, vec![Observation::quoted(42, 100.0, 101.0, 2.0, 3.0)]);
    }
}
