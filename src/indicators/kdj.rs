// =============================================================================
// KDJ Oscillator (Stochastic K/D with J-line)
// =============================================================================
//
// A 9-period stochastic with 3-period smoothing on both K and D:
//
//   RSV = (close - low_9) / (high_9 - low_9) * 100
//   K_t = (2/3) * K_{t-1} + (1/3) * RSV
//   D_t = (2/3) * D_{t-1} + (1/3) * K_t
//   J   = 3*K - 2*D
//
// Only the J-line is consumed by the oscillator score; J < 20 reinforces an
// oversold reading, J > 80 an overbought one. K and D seed at 50.
// =============================================================================

use crate::market_data::Candle;

/// Most recent KDJ J-line value.
///
/// Returns `None` when:
/// - Fewer than `period` candles.
/// - A window is degenerate (high == low) for every bar (no RSV computable).
/// - Any intermediate value is non-finite.
pub fn latest_kdj_j(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let mut k = 50.0_f64;
    let mut d = 50.0_f64;
    let mut seen_rsv = false;

    for end in period..=candles.len() {
        let window = &candles[end - period..end];
        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = window[window.len() - 1].close;

        if !high.is_finite() || !low.is_finite() || !close.is_finite() {
            return None;
        }

        // Degenerate window: carry K/D forward unchanged.
        if high <= low {
            continue;
        }
        seen_rsv = true;

        let rsv = (close - low) / (high - low) * 100.0;
        k = (2.0 / 3.0) * k + (1.0 / 3.0) * rsv;
        d = (2.0 / 3.0) * d + (1.0 / 3.0) * k;
    }

    if !seen_rsv {
        return None;
    }

    let j = 3.0 * k - 2.0 * d;
    if j.is_finite() {
        Some(j)
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_candle;

    #[test]
    fn kdj_insufficient_data() {
        let candles = vec![test_candle(100.0, 101.0, 99.0, 100.0); 5];
        assert!(latest_kdj_j(&candles, 9).is_none());
    }

    #[test]
    fn kdj_flat_market_none() {
        // Every window is degenerate (high == low): no RSV ever computed.
        let candles = vec![test_candle(100.0, 100.0, 100.0, 100.0); 30];
        assert!(latest_kdj_j(&candles, 9).is_none());
    }

    #[test]
    fn kdj_strong_uptrend_overbought() {
        // Closes pinned at the top of each bar drive J well above 80.
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                test_candle(base, base + 2.0, base - 1.0, base + 2.0)
            })
            .collect();
        let j = latest_kdj_j(&candles, 9).unwrap();
        assert!(j > 80.0, "expected overbought J, got {j}");
    }

    #[test]
    fn kdj_strong_downtrend_oversold() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 200.0 - i as f64 * 2.0;
                test_candle(base, base + 1.0, base - 2.0, base - 2.0)
            })
            .collect();
        let j = latest_kdj_j(&candles, 9).unwrap();
        assert!(j < 20.0, "expected oversold J, got {j}");
    }
}
