// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   MACD line = EMA(12) - EMA(26)
//   Signal    = EMA(9) of the MACD line
//   Histogram = MACD - Signal
//
// The histogram sign is the momentum input for regime classification and the
// prophet predictor.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// Result of a MACD calculation (most recent values only).
#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Calculate MACD(12, 26, 9) over the given closing prices.
///
/// Returns `None` when:
/// - Fewer than 26 closes (slow EMA not computable).
/// - The MACD series is shorter than the 9-period signal span.
/// - Any value is non-finite.
pub fn calculate_macd(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd_with(closes, 12, 26, 9)
}

/// MACD with explicit spans; the standard call sites use 12/26/9.
pub fn calculate_macd_with(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_span: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_span == 0 || fast >= slow || closes.len() < slow {
        return None;
    }

    let fast_series = calculate_ema(closes, fast);
    let slow_series = calculate_ema(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Both series end at the final close; align tails.
    let len = slow_series.len().min(fast_series.len());
    if len == 0 {
        return None;
    }
    let fast_tail = &fast_series[fast_series.len() - len..];
    let slow_tail = &slow_series[slow_series.len() - len..];

    let macd_series: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_series, signal_span);
    let signal = *signal_series.last()?;
    let macd = *macd_series.last()?;
    let histogram = macd - signal;

    if macd.is_finite() && signal.is_finite() && histogram.is_finite() {
        Some(MacdResult {
            macd,
            signal,
            histogram,
        })
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

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes).is_none());
    }

    #[test]
    fn macd_needs_signal_span_of_macd_values() {
        // 26 closes yields a single MACD point; the 9-period signal needs 9.
        let closes: Vec<f64> = (1..=26).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes).is_none());
    }

    #[test]
    fn macd_uptrend_positive() {
        let closes: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        let result = calculate_macd(&closes).unwrap();
        // In a steady uptrend the fast EMA leads the slow one.
        assert!(result.macd > 0.0);
        assert!(result.signal > 0.0);
    }

    #[test]
    fn macd_downtrend_negative() {
        let closes: Vec<f64> = (1..=120).rev().map(|x| x as f64).collect();
        let result = calculate_macd(&closes).unwrap();
        assert!(result.macd < 0.0);
    }

    #[test]
    fn macd_flat_is_zero() {
        let closes = vec![100.0; 120];
        let result = calculate_macd(&closes).unwrap();
        assert!(result.macd.abs() < 1e-10);
        assert!(result.signal.abs() < 1e-10);
        assert!(result.histogram.abs() < 1e-10);
    }

    #[test]
    fn macd_histogram_identity() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let result = calculate_macd(&closes).unwrap();
        assert!((result.histogram - (result.macd - result.signal)).abs() < 1e-12);
    }

    #[test]
    fn macd_rejects_bad_spans() {
        let closes: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        assert!(calculate_macd_with(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd_with(&closes, 0, 26, 9).is_none());
    }
}
