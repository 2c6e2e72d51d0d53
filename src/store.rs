//! SQLite persistence for depth updates and the trading session tables.
//!
//! Tables:
//! - `depth_updates`   best bid/ask observations written by the depth stream
//! - `trading_log`     BUY / SELL / TP / SL events
//! - `position_state`  snapshot after every position transition
//! - `trade_summary`   one row per closed trade
//!
//! All calls are synchronous and block the caller.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{
    Direction, Observation, PositionSide, PositionSnapshot, TradeAction, TradeEvent, TradeSummary,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS depth_updates (
        E            INTEGER NOT NULL,
        bid_price    REAL,
        bid_quantity REAL,
        ask_price    REAL,
        ask_quantity REAL
    );
    CREATE INDEX IF NOT EXISTS idx_depth_updates_e ON depth_updates (E);
    CREATE TABLE IF NOT EXISTS trading_log (
        timestamp INTEGER NOT NULL,
        action    TEXT NOT NULL,
        price     REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS position_state (
        timestamp    INTEGER NOT NULL,
        has_position INTEGER NOT NULL,
        side         TEXT NOT NULL,
        entry_price  REAL,
        take_profit  REAL,
        stop_loss    REAL
    );
    CREATE TABLE IF NOT EXISTS trade_summary (
        timestamp   INTEGER NOT NULL,
        fecha       TEXT NOT NULL,
        ticker      TEXT NOT NULL,
        tipo        TEXT NOT NULL,
        stop_loss   REAL NOT NULL,
        entry_price REAL NOT NULL,
        take_profit REAL NOT NULL,
        r_esperado  REAL NOT NULL,
        exit_price  REAL NOT NULL,
        r_final     REAL NOT NULL,
        pnl         REAL NOT NULL
    );
";

/// Lock wait when the stream and the trader share one database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// A stored row could not be mapped back to a domain value.
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Corrupt(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

/// Read side of the market data store.
pub trait MarketData {
    /// The `limit` most recent quoted observations, most recent first.
    fn fetch_recent_observations(&self, limit: usize) -> Result<Vec<Observation>, StoreError>;
}

/// Append-only sink for the trading session.
pub trait TradeLog {
    fn insert_trade_event(&self, event: &TradeEvent) -> Result<(), StoreError>;
    fn insert_position_snapshot(&self, snapshot: &PositionSnapshot) -> Result<(), StoreError>;
    fn insert_trade_summary(&self, summary: &TradeSummary) -> Result<(), StoreError>;
    /// Deletes every row of the three session tables. Safe to call repeatedly.
    fn clear_session(&self) -> Result<(), StoreError>;
}

/// Write side of the market data store, used by the depth stream.
pub trait DepthSink {
    fn insert_observation(&self, obs: &Observation) -> Result<(), StoreError>;
    fn clear_depth_updates(&self) -> Result<usize, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the trader read while the stream writes
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        log::info!("[DB] Opened {}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    pub fn recent_trade_events(&self, limit: usize) -> Result<Vec<TradeEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, action, price FROM trading_log
             ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (timestamp, action, price) = row?;
            let action = TradeAction::parse(&action)
                .ok_or_else(|| StoreError::Corrupt(format!("trade action {:?}", action)))?;
            events.push(TradeEvent { timestamp, action, price });
        }
        Ok(events)
    }

    pub fn latest_position_snapshot(&self) -> Result<Option<PositionSnapshot>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT timestamp, has_position, side, entry_price, take_profit, stop_loss
                 FROM position_state ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(timestamp, has_position, side, entry_price, take_profit, stop_loss)| {
            let side = match side.as_str() {
                "FLAT" => PositionSide::Flat,
                "LONG" => PositionSide::Long,
                "SHORT" => PositionSide::Short,
                other => return Err(StoreError::Corrupt(format!("position side {:?}", other))),
            };
            Ok(PositionSnapshot { timestamp, has_position, side, entry_price, take_profit, stop_loss })
        })
        .transpose()
    }

    pub fn recent_trade_summaries(&self, limit: usize) -> Result<Vec<TradeSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, fecha, ticker, tipo, stop_loss, entry_price,
                    take_profit, r_esperado, exit_price, r_final, pnl
             FROM trade_summary ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(3)?,
                TradeSummary {
                    timestamp: row.get(0)?,
                    date: row.get(1)?,
                    ticker: row.get(2)?,
                    tipo: Direction::Long,
                    stop_loss: row.get(4)?,
                    entry_price: row.get(5)?,
                    take_profit: row.get(6)?,
                    r_expected: row.get(7)?,
                    exit_price: row.get(8)?,
                    r_final: row.get(9)?,
                    pnl: row.get(10)?,
                },
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (tipo, mut summary) = row?;
            summary.tipo = match tipo.as_str() {
                "LONG" => Direction::Long,
                "SHORT" => Direction::Short,
                other => return Err(StoreError::Corrupt(format!("trade tipo {:?}", other))),
            };
            out.push(summary);
        }
        Ok(out)
    }

    fn count(&self, table: &str) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Row counts of (trading_log, position_state, trade_summary).
    pub fn session_row_counts(&self) -> Result<(usize, usize, usize), StoreError> {
        Ok((self.count("trading_log")?, self.count("position_state")?, self.count("trade_summary")?))
    }
}

impl MarketData for SqliteStore {
    fn fetch_recent_observations(&self, limit: usize) -> Result<Vec<Observation>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT E, bid_price, ask_price, bid_quantity, ask_quantity
             FROM depth_updates
             WHERE bid_price IS NOT NULL AND ask_price IS NOT NULL
             ORDER BY E DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(Observation {
                timestamp: row.get(0)?,
                bid_price: row.get(1)?,
                ask_price: row.get(2)?,
                bid_qty: row.get(3)?,
                ask_qty: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl TradeLog for SqliteStore {
    fn insert_trade_event(&self, event: &TradeEvent) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO trading_log (timestamp, action, price) VALUES (?1, ?2, ?3)",
            params![event.timestamp, event.action.as_str(), event.price],
        )?;
        Ok(())
    }

    fn insert_position_snapshot(&self, s: &PositionSnapshot) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO position_state (timestamp, has_position, side, entry_price, take_profit, stop_loss)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![s.timestamp, s.has_position, s.side.as_str(), s.entry_price, s.take_profit, s.stop_loss],
        )?;
        Ok(())
    }

    fn insert_trade_summary(&self, s: &TradeSummary) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO trade_summary (
                timestamp, fecha, ticker, tipo, stop_loss,
                entry_price, take_profit, r_esperado,
                exit_price, r_final, pnl
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                s.timestamp,
                s.date,
                s.ticker,
                s.tipo.as_str(),
                s.stop_loss,
                s.entry_price,
                s.take_profit,
                s.r_expected,
                s.exit_price,
                s.r_final,
                s.pnl,
            ],
        )?;
        Ok(())
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "BEGIN;
             DELETE FROM trading_log;
             DELETE FROM position_state;
             DELETE FROM trade_summary;
             COMMIT;",
        )?;
        Ok(())
    }
}

impl DepthSink for SqliteStore {
    fn insert_observation(&self, o: &Observation) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO depth_updates (E, bid_price, bid_quantity, ask_price, ask_quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![o.timestamp, o.bid_price, o.bid_qty, o.ask_price, o.ask_qty])?;
        Ok(())
    }

    fn clear_depth_updates(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM depth_updates", [])?)
    }
}
