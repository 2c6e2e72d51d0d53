use crate::config::StrategyParams;
use crate::types::{Direction, EntrySignal, ExitReason, PositionSide, PositionSnapshot};

/// Slack on the percentage-change comparisons so a price sitting exactly on a
/// configured level (100.3 for +0.3 % from 100) counts as reaching it.
const CHANGE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

impl OpenPosition {
    /// LONG: tp > entry > sl. SHORT: tp < entry < sl.
    pub fn is_well_ordered(&self) -> bool {
        match self.direction {
            Direction::Long => self.take_profit > self.entry_price && self.entry_price > self.stop_loss,
            Direction::Short => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        }
    }
}

/// Position record at the moment it was closed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosedTrade {
    pub position: OpenPosition,
    pub exit_price: f64,
    pub reason: ExitReason,
}

#[derive(Debug)]
pub enum PositionError {
    /// An entry arrived while a position is open.
    AlreadyOpen(Direction),
    /// Exit requested while flat.
    NotOpen,
    /// Entry price would produce mis-ordered levels (non-positive or non-finite).
    InvalidLevels { price: f64 },
}

impl std::fmt::Display for PositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionError::AlreadyOpen(d) => write!(f, "{} position already open", d.as_str()),
            PositionError::NotOpen => write!(f, "no open position"),
            PositionError::InvalidLevels { price } => {
                write!(f, "cannot derive TP/SL levels from entry price {}", price)
            }
        }
    }
}

impl std::error::Error for PositionError {}

/// FLAT / LONG / SHORT lifecycle. A flat machine carries no price levels, so the
/// "flat with prices" state cannot be represented.
#[derive(Clone, Debug)]
pub struct PositionStateMachine {
    params: StrategyParams,
    current: Option<OpenPosition>,
}

impl PositionStateMachine {
    pub fn new(params: StrategyParams) -> Self {
        PositionStateMachine { params, current: None }
    }

    pub fn side(&self) -> PositionSide {
        match self.current {
            None => PositionSide::Flat,
            Some(p) => p.direction.into(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&OpenPosition> {
        self.current.as_ref()
    }

    /// FLAT → LONG on BUY, FLAT → SHORT on SELL.
    pub fn open(&mut self, signal: EntrySignal, price: f64) -> Result<OpenPosition, PositionError> {
        if let Some(p) = self.current {
            return Err(PositionError::AlreadyOpen(p.direction));
        }

        let tp = self.params.take_profit_pct;
        let sl = self.params.stop_loss_pct;
        let direction = signal.direction();
        let (take_profit, stop_loss) = match direction {
            Direction::Long => (price * (1.0 + tp), price * (1.0 - sl)),
            Direction::Short => (price * (1.0 - tp), price * (1.0 + sl)),
        };

        let position = OpenPosition { direction, entry_price: price, take_profit, stop_loss };
        if !price.is_finite() || !position.is_well_ordered() {
            return Err(PositionError::InvalidLevels { price });
        }

        self.current = Some(position);
        Ok(position)
    }

    /// TP / SL / hold decision for `price`. Always `None` while flat.
    pub fn evaluate_exit(&self, price: f64) -> Option<ExitReason> {
        let p = self.current?;
        let change = match p.direction {
            Direction::Long => (price - p.entry_price) / p.entry_price,
            Direction::Short => (p.entry_price - price) / p.entry_price,
        };

        if change >= self.params.take_profit_pct - CHANGE_EPSILON {
            Some(ExitReason::TakeProfit)
        } else if change <= -self.params.stop_loss_pct + CHANGE_EPSILON {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }

    /// LONG/SHORT → FLAT, returning what was closed.
    pub fn close(&mut self, reason: ExitReason, exit_price: f64) -> Result<ClosedTrade, PositionError> {
        let position = self.current.take().ok_or(PositionError::NotOpen)?;
        Ok(ClosedTrade { position, exit_price, reason })
    }

    pub fn snapshot(&self, timestamp: i64) -> PositionSnapshot {
        PositionSnapshot {
            timestamp,
            has_position: self.current.is_some(),
            side: self.side(),
            entry_price: self.current.map(|p| p.entry_price),
            take_profit: self.current.map(|p| p.take_profit),
            stop_loss: self.current.map(|p| p.stop_loss),
        }
    }
}
