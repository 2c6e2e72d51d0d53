use chrono::{DateTime, Duration, Utc};

use crate::config::ENVELOPE_BREAK_SECS;
use crate::types::Observation;

/// Support/resistance band over recent bid/ask extremes with breakout hysteresis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SupportResistance {
    state: Option<EnvelopeState>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeState {
    pub support: f64,
    pub resistance: f64,
    pub last_break: DateTime<Utc>,
}

impl SupportResistance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&EnvelopeState> {
        self.state.as_ref()
    }

    /// Feed a window of quotes. The band moves only when it is broken and the
    /// previous break is more than `ENVELOPE_BREAK_SECS` old; a window inside the
    /// band refreshes the break time.
    pub fn observe(&mut self, window: &[Observation], now: DateTime<Utc>) -> Option<&EnvelopeState> {
        let min_bid = window.iter().filter_map(|o| o.bid_price).reduce(f64::min);
        let max_ask = window.iter().filter_map(|o| o.ask_price).reduce(f64::max);
        let (support, resistance) = match (min_bid, max_ask) {
            (Some(s), Some(r)) => (s, r),
            _ => return self.state.as_ref(),
        };

        match self.state.as_mut() {
            None => {
                self.state = Some(EnvelopeState { support, resistance, last_break: now });
            }
            Some(st) => {
                let broken = support < st.support || resistance > st.resistance;
                if !broken {
                    st.last_break = now;
                } else if now - st.last_break > Duration::seconds(ENVELOPE_BREAK_SECS) {
                    log::debug!(
                        "Envelope moved: support {:.2} → {:.2}, resistance {:.2} → {:.2}",
                        st.support, support, st.resistance, resistance
                    );
                    st.support = support;
                    st.resistance = resistance;
                    st.last_break = now;
                }
            }
        }
        self.state.as_ref()
    }
}
