#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[cfg(feature = "jemalloc")]
fn jemalloc_purge() {
    use tikv_jemalloc_ctl::epoch;
    if let Ok(e) = epoch::mib() {
        let _ = e.advance();
    }
    log::debug!("jemalloc: epoch advanced — dirty pages scheduled for release");
}

#[cfg(feature = "jemalloc")]
const PURGE_INTERVAL_SECS: u64 = 3600;

use vwap_trader::binance_api::BinanceClient;
use vwap_trader::config::{ConfigError, TraderConfig};
use vwap_trader::execution::{LiveExecutor, OrderExecutor, SimulatedExecutor};
use vwap_trader::shutdown::listen_for_termination;
use vwap_trader::store::SqliteStore;
use vwap_trader::ControlLoop;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TraderConfig::from_env().map_err(|e| {
        log::error!("{}", e);
        e
    })?;

    let executor: Box<dyn OrderExecutor> = if config.use_live_venue {
        let creds = config
            .credentials
            .as_ref()
            .ok_or(ConfigError::Missing("BINANCE_API_KEY"))?;
        let client = BinanceClient::new(&config.rest_url, creds)?;
        log::warn!("LIVE mode — market orders of {} {} will be sent to {}", config.order_quantity, config.symbol, config.rest_url);
        Box::new(LiveExecutor::new(client, &config.symbol, config.order_quantity))
    } else {
        Box::new(SimulatedExecutor)
    };

    let store = SqliteStore::open(&config.db_path)?;

    let shutdown_rx = listen_for_termination()?;

    #[cfg(feature = "jemalloc")]
    tokio::spawn(async {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(PURGE_INTERVAL_SECS));
        timer.tick().await;
        loop {
            timer.tick().await;
            jemalloc_purge();
        }
    });

    let mut trader = ControlLoop::new(config, store, executor);
    trader.run(shutdown_rx).await;

    // Fresh-session policy: this run's records are discarded on exit
    if let Err(e) = trader.shutdown() {
        log::error!("Error clearing session tables: {}", e);
    }
    trader.into_store().close()?;
    log::info!("Trader stopped.");
    Ok(())
}
