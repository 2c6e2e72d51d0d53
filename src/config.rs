use std::time::Duration;

// ─── Binance ──────────────────────────────────────────────────────────────────
pub const BINANCE_REST_URL: &str = "https://api.binance.com";
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";
// BINANCE_API_KEY, BINANCE_API_SECRET are read from environment variables at
// runtime and are only required when USE_BINANCE=true (see .env.example)

// ─── Strategy defaults ────────────────────────────────────────────────────────
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_MOMENTUM_THRESHOLD: f64 = 0.01; // % ROC
pub const DEFAULT_TAKE_PROFIT_PCT: f64 = 0.003;   // 0.3 %
pub const DEFAULT_STOP_LOSS_PCT: f64 = 0.001;     // 0.1 %
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Fixed notional used for PnL reporting. No position sizing is modeled.
pub const DEFAULT_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_ORDER_QUANTITY: f64 = 0.001;

// ─── Windows ──────────────────────────────────────────────────────────────────
pub const DEFAULT_VWAP_WINDOW: usize = 60;
pub const DEFAULT_ENVELOPE_WINDOW: usize = 200;
/// Observations back used for rate of change.
pub const MOMENTUM_LAG: usize = 10;
/// A breakout must persist longer than this before the envelope moves.
pub const ENVELOPE_BREAK_SECS: i64 = 10;

pub const DEFAULT_DB_PATH: &str = "htf.db";

/// Quote assets stripped from the symbol to build the summary ticker.
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "BTC", "ETH"];

#[derive(Debug)]
pub enum ConfigError {
    /// Required variable absent (live credentials).
    Missing(&'static str),
    /// Present but unparsable or out of range.
    Invalid { key: &'static str, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {} env var not set", key),
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "invalid configuration: {}={:?} ({})", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Threshold parameters of the decision engine.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyParams {
    pub momentum_threshold: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            momentum_threshold: DEFAULT_MOMENTUM_THRESHOLD,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraderConfig {
    pub symbol: String,
    pub strategy: StrategyParams,
    pub poll_interval: Duration,
    pub vwap_window: usize,
    pub envelope_window: usize,
    pub capital: f64,
    pub order_quantity: f64,
    pub db_path: String,
    pub use_live_venue: bool,
    pub rest_url: String,
    pub ws_url: String,
    /// Present only when `use_live_venue` is set.
    pub credentials: Option<Credentials>,
}

impl Default for TraderConfig {
    fn default() -> Self {
        TraderConfig {
            symbol: DEFAULT_SYMBOL.to_string(),
            strategy: StrategyParams::default(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            vwap_window: DEFAULT_VWAP_WINDOW,
            envelope_window: DEFAULT_ENVELOPE_WINDOW,
            capital: DEFAULT_CAPITAL,
            order_quantity: DEFAULT_ORDER_QUANTITY,
            db_path: DEFAULT_DB_PATH.to_string(),
            use_live_venue: false,
            rest_url: BINANCE_REST_URL.to_string(),
            ws_url: BINANCE_WS_URL.to_string(),
            credentials: None,
        }
    }
}

impl TraderConfig {
    /// Load from the process environment (after `.env` has been applied).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let symbol = get("SYMBOL")
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

        let strategy = StrategyParams {
            momentum_threshold: parse_or(&get, "MOMENTUM_THRESHOLD", DEFAULT_MOMENTUM_THRESHOLD)?,
            take_profit_pct: parse_or(&get, "TAKE_PROFIT_PCT", DEFAULT_TAKE_PROFIT_PCT)?,
            stop_loss_pct: parse_or(&get, "STOP_LOSS_PCT", DEFAULT_STOP_LOSS_PCT)?,
        };
        if !strategy.momentum_threshold.is_finite() || strategy.momentum_threshold < 0.0 {
            return Err(invalid("MOMENTUM_THRESHOLD", strategy.momentum_threshold, "must be finite and >= 0"));
        }
        if !(strategy.take_profit_pct > 0.0 && strategy.take_profit_pct < 1.0) {
            return Err(invalid("TAKE_PROFIT_PCT", strategy.take_profit_pct, "must be in (0, 1)"));
        }
        if !(strategy.stop_loss_pct > 0.0 && strategy.stop_loss_pct < 1.0) {
            return Err(invalid("STOP_LOSS_PCT", strategy.stop_loss_pct, "must be in (0, 1)"));
        }

        let poll_secs: u64 = parse_or(&get, "SLEEP_TIME", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(invalid("SLEEP_TIME", poll_secs, "must be at least 1 second"));
        }

        let vwap_window: usize = parse_or(&get, "VWAP_WINDOW", DEFAULT_VWAP_WINDOW)?;
        if vwap_window == 0 {
            return Err(invalid("VWAP_WINDOW", vwap_window, "must be positive"));
        }
        let envelope_window: usize = parse_or(&get, "ENVELOPE_WINDOW", DEFAULT_ENVELOPE_WINDOW)?;

        let capital: f64 = parse_or(&get, "CAPITAL", DEFAULT_CAPITAL)?;
        if !capital.is_finite() || capital <= 0.0 {
            return Err(invalid("CAPITAL", capital, "must be finite and positive"));
        }
        let order_quantity: f64 = parse_or(&get, "ORDER_QUANTITY", DEFAULT_ORDER_QUANTITY)?;
        if !order_quantity.is_finite() || order_quantity <= 0.0 {
            return Err(invalid("ORDER_QUANTITY", order_quantity, "must be finite and positive"));
        }

        let use_live_venue = match get("USE_BINANCE") {
            None => false,
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                key: "USE_BINANCE",
                value: v.clone(),
                reason: "expected true/false".into(),
            })?,
        };

        let credentials = if use_live_venue {
            let api_key = get("BINANCE_API_KEY").ok_or(ConfigError::Missing("BINANCE_API_KEY"))?;
            let api_secret = get("BINANCE_API_SECRET").ok_or(ConfigError::Missing("BINANCE_API_SECRET"))?;
            Some(Credentials { api_key, api_secret })
        } else {
            None
        };

        Ok(TraderConfig {
            symbol,
            strategy,
            poll_interval: Duration::from_secs(poll_secs),
            vwap_window,
            envelope_window,
            capital,
            order_quantity,
            db_path: get("TRADER_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            use_live_venue,
            rest_url: get("BINANCE_REST_URL").unwrap_or_else(|| BINANCE_REST_URL.to_string()),
            ws_url: get("BINANCE_WS_URL").unwrap_or_else(|| BINANCE_WS_URL.to_string()),
            credentials,
        })
    }

    /// Rows fetched per tick: enough for both the indicators and the envelope.
    pub fn fetch_limit(&self) -> usize {
        self.vwap_window.max(self.envelope_window)
    }

    /// Summary ticker, e.g. "BTCUSDT" → "BTC".
    pub fn ticker(&self) -> String {
        ticker_for(&self.symbol)
    }
}

pub fn ticker_for(symbol: &str) -> String {
    QUOTE_ASSETS
        .iter()
        .find_map(|q| symbol.strip_suffix(q).filter(|base| !base.is_empty()))
        .unwrap_or(symbol)
        .to_string()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn invalid<V: std::fmt::Display>(key: &'static str, value: V, reason: &str) -> ConfigError {
    ConfigError::Invalid { key, value: value.to_string(), reason: reason.to_string() }
}
