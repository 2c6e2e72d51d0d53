use crate::types::EntrySignal;

/// Mean reversion toward VWAP, confirmed by momentum in the direction of entry.
///
/// BUY below VWAP with momentum above `threshold`, SELL above VWAP with momentum
/// below `-threshold`. A price sitting exactly on VWAP never triggers.
pub fn evaluate_entry(price: f64, vwap: f64, momentum: f64, threshold: f64) -> Option<EntrySignal> {
    if price < vwap && momentum > threshold {
        Some(EntrySignal::Buy)
    } else if price > vwap && momentum < -threshold {
        Some(EntrySignal::Sell)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THETA: f64 = 0.01;

    #[test]
    fn test_buy_below_vwap_with_positive_momentum() {
        assert_eq!(evaluate_entry(99.0, 100.0, 0.02, THETA), Some(EntrySignal::Buy));
        assert_eq!(evaluate_entry(99.0, 100.0, 0.01, THETA), None);
        assert_eq!(evaluate_entry(99.0, 100.0, -0.5, THETA), None);
    }

    #[test]
    fn test_sell_above_vwap_with_negative_momentum() {
        assert_eq!(evaluate_entry(101.0, 100.0, -0.02, THETA), Some(EntrySignal::Sell));
        assert_eq!(evaluate_entry(101.0, 100.0, -0.01, THETA), None);
        assert_eq!(evaluate_entry(101.0, 100.0, 0.5, THETA), None);
    }

    #[test]
    fn test_price_on_vwap_never_triggers() {
        for m in [-10.0, -0.02, 0.0, 0.02, 10.0] {
            assert_eq!(evaluate_entry(100.0, 100.0, m, THETA), None);
        }
    }

    #[test]
    fn test_zero_threshold_still_needs_strict_momentum() {
        assert_eq!(evaluate_entry(99.0, 100.0, 0.0, 0.0), None);
        assert_eq!(evaluate_entry(101.0, 100.0, 0.0, 0.0), None);
        assert_eq!(evaluate_entry(99.0, 100.0, 1e-6, 0.0), Some(EntrySignal::Buy));
    }
}
