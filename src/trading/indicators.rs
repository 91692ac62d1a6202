//! EMA and ATR over kline history.
//!
//! Indicator math runs in f64 and is converted back to decimals at the
//! boundary; balances and order quantities never pass through here.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::api::Kline;

/// Exponentially weighted average of the last `window` prices, newest price
/// weighted heaviest. Returns `None` when there is not enough history.
pub fn ema(prices: &[Decimal], window: usize) -> Option<Decimal> {
    if window == 0 || prices.len() < window {
        return None;
    }

    let tail = &prices[prices.len() - window..];
    let mut weighted_sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for (i, price) in tail.iter().enumerate() {
        // Weights span exp(-1)..exp(0) across the window.
        let t = if window == 1 {
            0.0
        } else {
            -1.0 + i as f64 / (window - 1) as f64
        };
        let weight = t.exp();
        weighted_sum += price.to_f64()? * weight;
        weight_sum += weight;
    }

    // Rounded so averages over a flat series compare equal across window
    // sizes despite f64 noise.
    Decimal::from_f64(weighted_sum / weight_sum).map(|d| d.round_dp(8))
}

/// Average True Range over the trailing `window` candles. The first candle's
/// true range is zero for lack of a previous close. Returns `None` when
/// there is not enough history.
pub fn atr(klines: &[Kline], window: usize) -> Option<Decimal> {
    if window == 0 || klines.len() < window {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(klines.len());
    true_ranges.push(Decimal::ZERO);
    for pair in klines.windows(2) {
        let prev_close = pair[0].close;
        let k = &pair[1];
        let tr = (k.high - k.low)
            .max((k.high - prev_close).abs())
            .max((k.low - prev_close).abs());
        true_ranges.push(tr);
    }

    let tail = &true_ranges[true_ranges.len() - window..];
    let sum: Decimal = tail.iter().sum();
    Some(sum / Decimal::from(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::klines_from_closes;
    use rust_decimal_macros::dec;

    #[test]
    fn ema_of_constant_series() {
        let prices = vec![dec!(100); 30];
        let value = ema(&prices, 5).unwrap();
        assert!((value - dec!(100)).abs() < dec!(0.0001));
    }

    #[test]
    fn ema_requires_enough_history() {
        let prices = vec![dec!(100); 3];
        assert!(ema(&prices, 5).is_none());
        assert!(ema(&prices, 0).is_none());
    }

    #[test]
    fn short_ema_reacts_faster_on_uptrend() {
        let prices: Vec<Decimal> = (1..=30).map(|i| Decimal::from(i * 10)).collect();
        let short = ema(&prices, 5).unwrap();
        let long = ema(&prices, 20).unwrap();
        assert!(short > long, "short {} should lead long {}", short, long);
    }

    #[test]
    fn atr_of_flat_market_equals_range() {
        // Constant closes with a +/-5 spread: every true range is 10.
        let klines = klines_from_closes(&vec![dec!(100); 50], dec!(5));
        let value = atr(&klines, 14).unwrap();
        assert_eq!(value, dec!(10));
    }

    #[test]
    fn atr_requires_enough_history() {
        let klines = klines_from_closes(&vec![dec!(100); 5], dec!(5));
        assert!(atr(&klines, 14).is_none());
    }
}
