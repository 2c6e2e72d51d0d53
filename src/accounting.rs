//! Risk multiples and PnL for closed trades.
//!
//! The R shapes below are reported as-is to the trade summary table, including
//! the SHORT variant which keeps the LONG numerator/denominator shape for
//! `r_expected`. Changing them changes historical reports.

use chrono::{DateTime, Local};

use crate::position_manager::ClosedTrade;
use crate::types::{Direction, TradeSummary};

/// Turns closed trades into summary rows on a fixed notional.
#[derive(Clone, Debug, PartialEq)]
pub struct TradeAccountant {
    ticker: String,
    capital: f64,
}

impl TradeAccountant {
    pub fn new(ticker: &str, capital: f64) -> Self {
        TradeAccountant { ticker: ticker.to_string(), capital }
    }

    pub fn summarize(&self, trade: &ClosedTrade, now: DateTime<Local>) -> TradeSummary {
        let p = &trade.position;
        TradeSummary {
            timestamp: now.timestamp_millis(),
            date: now.format("%d/%m/%Y").to_string(),
            ticker: self.ticker.clone(),
            tipo: p.direction,
            stop_loss: p.stop_loss,
            entry_price: p.entry_price,
            take_profit: p.take_profit,
            r_expected: r_expected(p.entry_price, p.take_profit, p.stop_loss),
            exit_price: trade.exit_price,
            r_final: r_final(p.direction, p.entry_price, p.stop_loss, trade.exit_price),
            pnl: pnl(p.direction, p.entry_price, trade.exit_price, self.capital),
        }
    }
}

/// Rounds to 2 decimals, ties to even.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

/// Planned reward-to-risk ratio: (tp − entry) / (entry − sl).
pub fn r_expected(entry: f64, take_profit: f64, stop_loss: f64) -> f64 {
    round2((take_profit - entry) / (entry - stop_loss))
}

/// Realized multiple of the initial risk distance.
pub fn r_final(direction: Direction, entry: f64, stop_loss: f64, exit: f64) -> f64 {
    match direction {
        Direction::Long => round2((exit - entry) / (entry - stop_loss)),
        Direction::Short => round2((entry - exit) / (stop_loss - entry)),
    }
}

/// PnL on a fixed notional `capital`.
pub fn pnl(direction: Direction, entry: f64, exit: f64, capital: f64) -> f64 {
    let change = match direction {
        Direction::Long => exit - entry,
        Direction::Short => entry - exit,
    };
    round2(capital * change / entry)
}
