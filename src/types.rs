use serde::{Deserialize, Serialize};

/// Best bid/ask snapshot taken from the depth stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: i64, // event time, ms
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub bid_qty: Option<f64>,
    pub ask_qty: Option<f64>,
}

impl Observation {
    /// Both sides quoted with quantities. Convenient for tests and the stream parser.
    pub fn quoted(timestamp: i64, bid: f64, ask: f64, bid_qty: f64, ask_qty: f64) -> Self {
        Observation {
            timestamp,
            bid_price: Some(bid),
            ask_price: Some(ask),
            bid_qty: Some(bid_qty),
            ask_qty: Some(ask_qty),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Flat => "FLAT",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl From<Direction> for PositionSide {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Long => PositionSide::Long,
            Direction::Short => PositionSide::Short,
        }
    }
}

/// Entry decision produced by the signal evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntrySignal {
    Buy,
    Sell,
}

impl EntrySignal {
    pub fn direction(&self) -> Direction {
        match self {
            EntrySignal::Buy => Direction::Long,
            EntrySignal::Sell => Direction::Short,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

/// Market order side sent to the venue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Side that opens a position in `direction`.
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that flattens a position in `direction`.
    pub fn closing(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

/// Action column of the trade log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    TakeProfit,
    StopLoss,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::TakeProfit => "TP",
            TradeAction::StopLoss => "SL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeAction::Buy),
            "SELL" => Some(TradeAction::Sell),
            "TP" => Some(TradeAction::TakeProfit),
            "SL" => Some(TradeAction::StopLoss),
            _ => None,
        }
    }
}

impl From<EntrySignal> for TradeAction {
    fn from(s: EntrySignal) -> Self {
        match s {
            EntrySignal::Buy => TradeAction::Buy,
            EntrySignal::Sell => TradeAction::Sell,
        }
    }
}

impl From<ExitReason> for TradeAction {
    fn from(r: ExitReason) -> Self {
        match r {
            ExitReason::TakeProfit => TradeAction::TakeProfit,
            ExitReason::StopLoss => TradeAction::StopLoss,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: i64,
    pub action: TradeAction,
    pub price: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub timestamp: i64,
    pub has_position: bool,
    pub side: PositionSide,
    pub entry_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub timestamp: i64,
    pub date: String, // dd/mm/YYYY
    pub ticker: String,
    pub tipo: Direction,
    pub stop_loss: f64,
    pub entry_price: f64,
    pub take_profit: f64,
    pub r_expected: f64,
    pub exit_price: f64,
    pub r_final: f64,
    pub pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closing_side_is_opposite_of_opening() {
        for d in [Direction::Long, Direction::Short] {
            assert_ne!(OrderSide::opening(d), OrderSide::closing(d));
        }
        assert_eq!(OrderSide::closing(Direction::Long), OrderSide::Sell);
    }

    #[test]
    fn test_trade_action_labels() {
        for a in [TradeAction::Buy, TradeAction::Sell, TradeAction::TakeProfit, TradeAction::StopLoss] {
            assert_eq!(TradeAction::parse(a.as_str()), Some(a));
        }
        assert_eq!(TradeAction::from(ExitReason::StopLoss).as_str(), "SL");
        assert_eq!(TradeAction::parse("HOLD"), None);
    }
}
