/// Depth stream ingestor: writes Binance best bid/ask updates into the
/// depth_updates table read by the trader.
/// Run: cargo run --bin depth_stream --release
use vwap_trader::config::TraderConfig;
use vwap_trader::shutdown::listen_for_termination;
use vwap_trader::store::{DepthSink, SqliteStore};
use vwap_trader::websocket_handler::{reconnect_with_backoff, BinanceDepthStream};

const MAX_RECONNECTS: u32 = 20;
const INITIAL_BACKOFF_SECS: u64 = 5;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TraderConfig::from_env()?;
    let store = SqliteStore::open(&config.db_path)?;
    let stream = BinanceDepthStream::new(&config.ws_url, &config.symbol);

    let shutdown_rx = listen_for_termination()?;

    log::info!("Streaming {} from {}", config.symbol, stream.url());
    let result = reconnect_with_backoff(&stream, &store, shutdown_rx, MAX_RECONNECTS, INITIAL_BACKOFF_SECS).await;
    if let Err(e) = &result {
        log::error!("Depth stream failed permanently: {}", e);
    }

    log::info!("Stopping depth stream… clearing session depth updates.");
    match store.clear_depth_updates() {
        Ok(n) => log::info!("Deleted {} depth updates.", n),
        Err(e) => log::error!("Error deleting depth updates: {}", e),
    }
    store.close()?;
    log::info!("Streaming stopped.");
    result.map_err(|e| e as Box<dyn std::error::Error>)
}
