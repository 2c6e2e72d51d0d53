//! Polling loop: fetch window → indicators → entry/exit decision → persistence.
//!
//! One tick runs to completion (evaluation, transition, trade log, snapshot)
//! before the next fetch. Shutdown is only observed between ticks.

use chrono::{Local, Utc};
use tokio::sync::watch;

use crate::accounting::TradeAccountant;
use crate::config::TraderConfig;
use crate::envelope::SupportResistance;
use crate::execution::OrderExecutor;
use crate::indicators::{chronological, Indicators};
use crate::position_manager::{OpenPosition, PositionError, PositionStateMachine};
use crate::signals::evaluate_entry;
use crate::store::{MarketData, StoreError, TradeLog};
use crate::types::{EntrySignal, ExitReason, OrderSide, TradeAction, TradeEvent, TradeSummary};

#[derive(Debug)]
pub enum TickError {
    Store(StoreError),
    Position(PositionError),
}

impl std::fmt::Display for TickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickError::Store(e) => write!(f, "persistence failure: {}", e),
            TickError::Position(e) => write!(f, "position error: {}", e),
        }
    }
}

impl std::error::Error for TickError {}

impl From<StoreError> for TickError {
    fn from(e: StoreError) -> Self {
        TickError::Store(e)
    }
}

impl From<PositionError> for TickError {
    fn from(e: PositionError) -> Self {
        TickError::Position(e)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// No usable price or VWAP; nothing changed.
    Skipped,
    /// Flat and no entry signal.
    Idle(Indicators),
    /// In a position and neither TP nor SL reached.
    Holding(Indicators),
    Opened(OpenPosition),
    Closed(TradeSummary),
}

/// Mutable state owned by one trading session.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub position: PositionStateMachine,
    pub envelope: SupportResistance,
    pub trades_closed: u32,
    pub wins: u32,
    pub realized_pnl: f64,
}

impl SessionContext {
    pub fn new(config: &TraderConfig) -> Self {
        SessionContext {
            position: PositionStateMachine::new(config.strategy.clone()),
            envelope: SupportResistance::new(),
            trades_closed: 0,
            wins: 0,
            realized_pnl: 0.0,
        }
    }

    fn record(&mut self, summary: &TradeSummary) {
        self.trades_closed += 1;
        if summary.pnl > 0.0 {
            self.wins += 1;
        }
        self.realized_pnl += summary.pnl;
    }
}

pub struct ControlLoop<S> {
    config: TraderConfig,
    store: S,
    executor: Box<dyn OrderExecutor>,
    accountant: TradeAccountant,
    session: SessionContext,
}

impl<S: MarketData + TradeLog> ControlLoop<S> {
    pub fn new(config: TraderConfig, store: S, executor: Box<dyn OrderExecutor>) -> Self {
        let accountant = TradeAccountant::new(&config.ticker(), config.capital);
        let session = SessionContext::new(&config);
        ControlLoop { config, store, executor, accountant, session }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Runs ticks every `poll_interval` until `shutdown` flips to true or its
    /// sender is dropped. Tick failures are logged and the loop continues.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Trader started — {} | mode={} | interval={}s | θ={} tp={} sl={}",
            self.config.symbol,
            self.executor.mode(),
            self.config.poll_interval.as_secs(),
            self.config.strategy.momentum_threshold,
            self.config.strategy.take_profit_pct,
            self.config.strategy.stop_loss_pct,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(TickOutcome::Skipped) => log::debug!("No price/VWAP available — tick skipped"),
                Ok(_) => {}
                Err(e) => log::error!("Tick failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Shutdown requested — leaving control loop");
    }

    pub async fn tick(&mut self) -> Result<TickOutcome, TickError> {
        let window = chronological(self.store.fetch_recent_observations(self.config.fetch_limit())?);

        let from = window.len().saturating_sub(self.config.vwap_window);
        let ind = match Indicators::from_window(&window[from..]) {
            Some(ind) => ind,
            None => return Ok(TickOutcome::Skipped),
        };

        if self.config.envelope_window > 0 {
            let from = window.len().saturating_sub(self.config.envelope_window);
            if let Some(env) = self.session.envelope.observe(&window[from..], Utc::now()) {
                log::debug!("Envelope support={:.2} resistance={:.2}", env.support, env.resistance);
            }
        }

        log::info!("Price={:.2}, VWAP={:.2}, Momentum={:.2}%", ind.price, ind.vwap, ind.momentum);

        if self.session.position.is_flat() {
            let threshold = self.config.strategy.momentum_threshold;
            match evaluate_entry(ind.price, ind.vwap, ind.momentum, threshold) {
                Some(signal) => self.enter(signal, ind.price).await,
                None => Ok(TickOutcome::Idle(ind)),
            }
        } else {
            match self.session.position.evaluate_exit(ind.price) {
                Some(reason) => self.exit(reason, ind.price).await,
                None => Ok(TickOutcome::Holding(ind)),
            }
        }
    }

    async fn enter(&mut self, signal: EntrySignal, price: f64) -> Result<TickOutcome, TickError> {
        let position = self.session.position.open(signal, price)?;
        log::info!(
            "[{}] Opening {} @ {:.2} | tp={:.2} sl={:.2}",
            TradeAction::from(signal).as_str(),
            position.direction.as_str(),
            price,
            position.take_profit,
            position.stop_loss
        );

        self.submit(OrderSide::opening(position.direction), price).await;
        first_failure([
            self.log_trade(TradeAction::from(signal), price),
            self.persist_snapshot(),
        ])?;
        Ok(TickOutcome::Opened(position))
    }

    async fn exit(&mut self, reason: ExitReason, price: f64) -> Result<TickOutcome, TickError> {
        let closed = self.session.position.close(reason, price)?;
        let direction = closed.position.direction;
        match reason {
            ExitReason::TakeProfit => log::info!("[TP] Closing {} with profit", direction.as_str()),
            ExitReason::StopLoss => log::info!("[SL] Closing {} with loss", direction.as_str()),
        }

        self.submit(OrderSide::closing(direction), price).await;

        let summary = self.accountant.summarize(&closed, Local::now());
        self.session.record(&summary);
        log::info!(
            "Trade closed: {} {} entry={:.2} exit={:.2} R={:.2}/{:.2} PnL={:+.2}",
            summary.ticker,
            direction.as_str(),
            summary.entry_price,
            summary.exit_price,
            summary.r_final,
            summary.r_expected,
            summary.pnl
        );

        // Already flat in memory: attempt every write, report the first failure.
        first_failure([
            self.log_trade(TradeAction::from(reason), price),
            self.store.insert_trade_summary(&summary).map_err(|e| {
                log::error!("Failed to store trade summary: {}", e);
                e
            }),
            self.persist_snapshot(),
        ])?;

        Ok(TickOutcome::Closed(summary))
    }

    /// Venue failures are not fatal: the trade event is still recorded at the
    /// intended price, so a logged action does not guarantee a fill in live mode.
    async fn submit(&self, side: OrderSide, price: f64) {
        match self.executor.execute(side, price).await {
            Ok(execution) => log::debug!("Execution: {:?}", execution),
            Err(e) => log::error!("Order {} failed: {}", side.as_str(), e),
        }
    }

    fn log_trade(&self, action: TradeAction, price: f64) -> Result<(), StoreError> {
        let event = TradeEvent { timestamp: Utc::now().timestamp_millis(), action, price };
        match self.store.insert_trade_event(&event) {
            Ok(()) => {
                log::info!("Trade logged: {} @ {:.2}", action.as_str(), price);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to log trade {} @ {:.2}: {}", action.as_str(), price, e);
                Err(e)
            }
        }
    }

    fn persist_snapshot(&self) -> Result<(), StoreError> {
        let snapshot = self.session.position.snapshot(Utc::now().timestamp_millis());
        self.store.insert_position_snapshot(&snapshot).map_err(|e| {
            log::error!("Failed to persist position snapshot: {}", e);
            e
        })
    }

    /// Ends the session: logs its totals and deletes the session's trade log,
    /// snapshots and summaries. Calling it more than once is harmless.
    pub fn shutdown(&mut self) -> Result<(), StoreError> {
        let s = &self.session;
        log::info!(
            "Session totals: {} trades | {} wins | PnL {:+.2} | open position: {}",
            s.trades_closed,
            s.wins,
            s.realized_pnl,
            s.position.side().as_str()
        );
        log::info!("Clearing session tables…");
        self.store.clear_session()?;
        log::info!("Session tables cleared.");
        Ok(())
    }
}

/// First error of a batch of writes that were all attempted.
fn first_failure<const N: usize>(results: [Result<(), StoreError>; N]) -> Result<(), StoreError> {
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance_api::VenueError;
    use crate::execution::{Execution, SimulatedExecutor};
    use crate::store::{DepthSink, SqliteStore};
    use crate::types::{Direction, Observation, PositionSide, PositionSnapshot};
    use async_trait::async_trait;
    use std::cell::Cell;
    use std::time::Duration;

    fn obs(ts: i64, mid: f64, qty: f64) -> Observation {
        Observation::quoted(ts, mid - 0.5, mid + 0.5, qty / 2.0, qty / 2.0)
    }

    fn trader() -> ControlLoop<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        ControlLoop::new(TraderConfig::default(), store, Box::new(SimulatedExecutor))
    }

    /// Eleven quotes whose last mid sits on the far side of a heavy VWAP block,
    /// with 1 % momentum in the direction of entry.
    fn seed(store: &SqliteStore, first: f64, block: f64, last: f64) {
        store.insert_observation(&obs(1, first, 1.0)).unwrap();
        for ts in 2..=10 {
            store.insert_observation(&obs(ts, block, 10.0)).unwrap();
        }
        store.insert_observation(&obs(11, last, 1.0)).unwrap();
    }

    #[tokio::test]
    async fn test_skips_without_data() {
        let mut t = trader();
        assert_eq!(t.tick().await.unwrap(), TickOutcome::Skipped);

        // quotes without volume give no VWAP
        let mut o = obs(1, 100.0, 1.0);
        o.bid_qty = None;
        t.store().insert_observation(&o).unwrap();
        t.store().insert_observation(&obs(2, 100.0, 0.0)).unwrap();
        assert_eq!(t.tick().await.unwrap(), TickOutcome::Skipped);

        assert!(t.session().position.is_flat());
        assert!(t.session().envelope.state().is_none());
        assert_eq!(t.store().session_row_counts().unwrap(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_long_entry_then_take_profit() {
        let mut t = trader();
        seed(t.store(), 100.0, 110.0, 101.0);

        let opened = match t.tick().await.unwrap() {
            TickOutcome::Opened(p) => p,
            other => panic!("expected entry, got {:?}", other),
        };
        assert_eq!(opened.direction, Direction::Long);
        assert_eq!(opened.entry_price, 101.0);
        let snap = t.store().latest_position_snapshot().unwrap().unwrap();
        assert!(snap.has_position);
        assert_eq!(snap.side, PositionSide::Long);
        assert_eq!(snap.entry_price, Some(101.0));

        // same window again: still inside the band
        assert!(matches!(t.tick().await.unwrap(), TickOutcome::Holding(_)));

        t.store().insert_observation(&obs(12, 102.0, 1.0)).unwrap();
        let summary = match t.tick().await.unwrap() {
            TickOutcome::Closed(s) => s,
            other => panic!("expected exit, got {:?}", other),
        };
        assert_eq!(summary.tipo, Direction::Long);
        assert_eq!(summary.ticker, "BTC");
        assert_eq!((summary.r_expected, summary.r_final, summary.pnl), (3.0, 9.9, 99.01));

        let events: Vec<_> = t.store().recent_trade_events(10).unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(events, vec![TradeAction::TakeProfit, TradeAction::Buy]);
        let snap = t.store().latest_position_snapshot().unwrap().unwrap();
        assert!(!snap.has_position);
        assert_eq!(snap.side, PositionSide::Flat);
        assert_eq!(t.store().session_row_counts().unwrap(), (2, 2, 1));

        assert!(t.session().position.is_flat());
        assert_eq!(t.session().trades_closed, 1);
        assert_eq!(t.session().wins, 1);
    }

    #[tokio::test]
    async fn test_short_entry_then_stop_loss() {
        let mut t = trader();
        seed(t.store(), 100.0, 90.0, 99.0);

        match t.tick().await.unwrap() {
            TickOutcome::Opened(p) => assert_eq!(p.direction, Direction::Short),
            other => panic!("expected entry, got {:?}", other),
        }

        t.store().insert_observation(&obs(12, 100.0, 1.0)).unwrap();
        let summary = match t.tick().await.unwrap() {
            TickOutcome::Closed(s) => s,
            other => panic!("expected exit, got {:?}", other),
        };
        assert_eq!(summary.tipo, Direction::Short);
        assert_eq!((summary.r_expected, summary.r_final, summary.pnl), (3.0, -10.1, -101.01));
        assert_eq!(t.store().recent_trade_events(1).unwrap()[0].action, TradeAction::StopLoss);
        assert_eq!(t.session().wins, 0);
    }

    #[tokio::test]
    async fn test_flat_without_signal_is_idle() {
        let mut t = trader();
        for ts in 1..=20 {
            t.store().insert_observation(&obs(ts, 100.0, 1.0)).unwrap();
        }
        assert!(matches!(t.tick().await.unwrap(), TickOutcome::Idle(_)));
        assert_eq!(t.store().session_row_counts().unwrap(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_shutdown_clears_session_and_is_idempotent() {
        let mut t = trader();
        seed(t.store(), 100.0, 110.0, 101.0);
        t.tick().await.unwrap();
        assert_ne!(t.store().session_row_counts().unwrap(), (0, 0, 0));

        t.shutdown().unwrap();
        t.shutdown().unwrap();
        assert_eq!(t.store().session_row_counts().unwrap(), (0, 0, 0));
        t.into_store().close().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let mut config = TraderConfig::default();
        config.poll_interval = Duration::from_secs(30);
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, 100.0, 110.0, 101.0);
        let mut t = ControlLoop::new(config, store, Box::new(SimulatedExecutor));

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        tokio::time::timeout(Duration::from_secs(5), t.run(rx)).await.unwrap();
        // exactly one tick ran before the signal
        assert_eq!(t.session().position.side(), PositionSide::Long);
        assert_eq!(t.store().session_row_counts().unwrap(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_run_exits_immediately_when_already_signalled() {
        let mut t = trader();
        seed(t.store(), 100.0, 110.0, 101.0);
        let (_tx, rx) = watch::channel(true);
        t.run(rx).await;
        assert!(t.session().position.is_flat());
    }

    /// Venue that rejects every order.
    struct RejectingExecutor;

    #[async_trait]
    impl OrderExecutor for RejectingExecutor {
        async fn execute(&self, _side: OrderSide, _price: f64) -> Result<Execution, VenueError> {
            Err(VenueError::Permanent("code=-2010 msg=Account has insufficient balance".into()))
        }

        fn mode(&self) -> &'static str {
            "rejecting"
        }
    }

    /// SQLite store whose trading_log writes can be switched off.
    struct FlakyStore {
        inner: SqliteStore,
        trade_log_down: Cell<bool>,
    }

    impl MarketData for FlakyStore {
        fn fetch_recent_observations(&self, limit: usize) -> Result<Vec<Observation>, StoreError> {
            self.inner.fetch_recent_observations(limit)
        }
    }

    impl TradeLog for FlakyStore {
        fn insert_trade_event(&self, event: &TradeEvent) -> Result<(), StoreError> {
            if self.trade_log_down.get() {
                return Err(StoreError::Corrupt("trading_log unavailable".into()));
            }
            self.inner.insert_trade_event(event)
        }

        fn insert_position_snapshot(&self, snapshot: &PositionSnapshot) -> Result<(), StoreError> {
            self.inner.insert_position_snapshot(snapshot)
        }

        fn insert_trade_summary(&self, summary: &TradeSummary) -> Result<(), StoreError> {
            self.inner.insert_trade_summary(summary)
        }

        fn clear_session(&self) -> Result<(), StoreError> {
            self.inner.clear_session()
        }
    }

    #[tokio::test]
    async fn test_rejected_orders_still_record_intent() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, 100.0, 110.0, 101.0);
        let mut t = ControlLoop::new(TraderConfig::default(), store, Box::new(RejectingExecutor));

        assert!(matches!(t.tick().await.unwrap(), TickOutcome::Opened(_)));
        assert_eq!(t.session().position.side(), PositionSide::Long);
        assert_eq!(t.store().session_row_counts().unwrap(), (1, 1, 0));

        t.store().insert_observation(&obs(12, 102.0, 1.0)).unwrap();
        assert!(matches!(t.tick().await.unwrap(), TickOutcome::Closed(_)));
        assert_eq!(t.store().session_row_counts().unwrap(), (2, 2, 1));
    }

    #[tokio::test]
    async fn test_failed_trade_log_does_not_leave_stale_position() {
        let inner = SqliteStore::open_in_memory().unwrap();
        seed(&inner, 100.0, 110.0, 101.0);
        let store = FlakyStore { inner, trade_log_down: Cell::new(false) };
        let mut t = ControlLoop::new(TraderConfig::default(), store, Box::new(SimulatedExecutor));

        assert!(matches!(t.tick().await.unwrap(), TickOutcome::Opened(_)));

        t.store().trade_log_down.set(true);
        t.store().inner.insert_observation(&obs(12, 102.0, 1.0)).unwrap();
        assert!(matches!(t.tick().await, Err(TickError::Store(_))));

        // the close still reached the snapshot and summary tables
        assert!(t.session().position.is_flat());
        assert_eq!(t.session().trades_closed, 1);
        let snap = t.store().inner.latest_position_snapshot().unwrap().unwrap();
        assert!(!snap.has_position);
        assert_eq!(snap.side, PositionSide::Flat);
        let summaries = t.store().inner.recent_trade_summaries(10).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].r_final, 9.9);
        assert_eq!(t.store().inner.session_row_counts().unwrap(), (1, 2, 1));

        // next tick runs normally once the log is back
        t.store().trade_log_down.set(false);
        assert!(t.tick().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_entry_log_still_snapshots_position() {
        let inner = SqliteStore::open_in_memory().unwrap();
        seed(&inner, 100.0, 110.0, 101.0);
        let store = FlakyStore { inner, trade_log_down: Cell::new(true) };
        let mut t = ControlLoop::new(TraderConfig::default(), store, Box::new(SimulatedExecutor));

        assert!(matches!(t.tick().await, Err(TickError::Store(_))));
        assert_eq!(t.session().position.side(), PositionSide::Long);
        let snap = t.store().inner.latest_position_snapshot().unwrap().unwrap();
        assert_eq!(snap.side, PositionSide::Long);
        assert_eq!(t.store().inner.session_row_counts().unwrap(), (0, 1, 0));
    }
}
