// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// ATR measures volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR here is the rolling mean of the last `period` TR values, matching how
// the rest of the pipeline consumes it (5m ATR for stop distances, 1h ATR
// percentage for regime classification).
// =============================================================================

use crate::market_data::Candle;

/// Compute the most recent ATR value from a slice of OHLCV candles.
///
/// # Arguments
/// - `candles` — slice of OHLCV candles (oldest first).
/// - `period`  — look-back window for the rolling mean.
///
/// # Returns
/// `None` when:
/// - `period` is zero.
/// - There are fewer than `period + 1` candles (we need `period` TR values,
///   each requiring a previous candle for the True Range calculation).
/// - Any contributing value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    // TR over the trailing `period` bar pairs only.
    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        let tr = hl.max(hc).max(lc);
        if !tr.is_finite() {
            return None;
        }
        sum += tr;
    }

    let atr = sum / period as f64;
    if atr.is_finite() {
        Some(atr)
    } else {
        None
    }
}

/// ATR as a percentage of the last close.
///
/// Useful for comparing volatility across instruments with different price
/// scales; this is the regime detector's volatility input.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    let pct = (atr / last_close) * 100.0;
    if pct.is_finite() {
        Some(pct)
    } else {
        None
    }
}
