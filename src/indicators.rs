use crate::config::MOMENTUM_LAG;
use crate::types::Observation;

/// Indicator values for one tick. Built only when both price and VWAP exist.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Indicators {
    pub price: f64,
    pub vwap: f64,
    pub momentum: f64,
}

impl Indicators {
    /// `window` must be chronological (oldest first).
    pub fn from_window(window: &[Observation]) -> Option<Self> {
        let price = latest_price(window)?;
        let vwap = vwap(window)?;
        Some(Indicators { price, vwap, momentum: momentum(window) })
    }
}

/// (bid + ask) / 2, or None when either side is missing.
pub fn mid_price(obs: &Observation) -> Option<f64> {
    match (obs.bid_price, obs.ask_price) {
        (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
        _ => None,
    }
}

/// bid_qty + ask_qty, or None when either side is missing.
pub fn volume(obs: &Observation) -> Option<f64> {
    match (obs.bid_qty, obs.ask_qty) {
        (Some(b), Some(a)) => Some(b + a),
        _ => None,
    }
}

/// Sorts a store result (most recent first) into processing order.
pub fn chronological(mut window: Vec<Observation>) -> Vec<Observation> {
    window.sort_by_key(|o| o.timestamp);
    window
}

/// Mid-price of the most recent quoted observation.
pub fn latest_price(window: &[Observation]) -> Option<f64> {
    window.iter().rev().find_map(mid_price)
}

pub fn vwap(window: &[Observation]) -> Option<f64> {
    let (pv, vol) = window
        .iter()
        .filter_map(|o| Some((mid_price(o)?, volume(o)?)))
        .fold((0.0, 0.0), |(pv, vol), (p, v)| (pv + p * v, vol + v));

    if vol > 0.0 {
        Some(pv / vol)
    } else {
        None
    }
}

/// Rate of change (%) between the latest mid-price and the one `MOMENTUM_LAG`
/// usable observations earlier. Returns 0.0 as the "no signal" value when there
/// is not enough history or the lagged price is zero.
pub fn momentum(window: &[Observation]) -> f64 {
    let prices: Vec<f64> = window.iter().filter_map(mid_price).collect();
    let n = prices.len();
    if n < MOMENTUM_LAG + 1 {
        return 0.0;
    }

    let prev = prices[n - 1 - MOMENTUM_LAG];
    let curr = prices[n - 1];
    if prev == 0.0 {
        return 0.0;
    }
    (curr - prev) / prev * 100.0
}
