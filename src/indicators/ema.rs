// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (span + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `span` closes.
// =============================================================================

/// Compute the EMA series for the given `closes` slice and look-back `span`.
///
/// Returns an empty `Vec` when the input is too short or the span is zero.
/// Each output element corresponds to a close starting at index `span - 1`.
///
/// # Edge cases
/// - `span == 0` => empty vec (division by zero guard)
/// - `closes.len() < span` => empty vec
/// - Non-finite intermediate values stop the series; downstream consumers
///   should not trust a broken tail.
pub fn calculate_ema(closes: &[f64], span: usize) -> Vec<f64> {
    if span == 0 || closes.len() < span {
        return Vec::new();
    }

    let multiplier = 2.0 / (span + 1) as f64;

    // Seed: SMA of the first `span` values.
    let sma: f64 = closes[..span].iter().sum::<f64>() / span as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - span + 1);
    result.push(sma);

    let mut prev_ema = sma;
    for &close in &closes[span..] {
        let ema = close * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Most recent EMA value, or `None` when the series is not computable.
pub fn latest_ema(closes: &[f64], span: usize) -> Option<f64> {
    calculate_ema(closes, span).last().copied()
}
