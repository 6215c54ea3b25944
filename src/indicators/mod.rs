// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators
// used by the trading engine.  Every public function returns `Option<T>` (or
// an empty series) so callers are forced to handle insufficient-data and
// numerical-edge-case scenarios.
//
// `IndicatorBundle` assembles the full per-(symbol, timeframe) indicator set
// the decision pipeline consumes.  A series with fewer than
// `MIN_BARS_FOR_BUNDLE` candles yields an empty bundle, which downstream
// components must treat as neutral.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod kdj;
pub mod macd;
pub mod rsi;
pub mod volume;

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Minimum closed bars before any indicator in the bundle is trusted.
pub const MIN_BARS_FOR_BUNDLE: usize = 20;

/// Coarse trend direction derived from close vs EMA21.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendLabel {
    Bullish,
    Bearish,
}

/// Coarse momentum strength derived from RSI distance to the midline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumLabel {
    Strong,
    Weak,
}

/// Full indicator set for one symbol on one timeframe.
///
/// Every scalar is `Option<f64>`: `None` is the explicit "not computable"
/// sentinel and propagates through the scoring logic as a neutral
/// contribution, never as an accidental zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub volume_sma_20: Option<f64>,
    pub relative_volume: Option<f64>,
    pub kdj_j: Option<f64>,
    pub trend: Option<TrendLabel>,
    pub momentum: Option<MomentumLabel>,
}

impl IndicatorBundle {
    /// The "not computable" bundle emitted for series with too few bars.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the core of the bundle (EMAs + RSI) was computable.
    pub fn is_computable(&self) -> bool {
        self.ema_9.is_some() && self.ema_21.is_some() && self.rsi_14.is_some()
    }
}

/// Compute the full indicator bundle from a candle series (oldest first).
///
/// Bars below [`MIN_BARS_FOR_BUNDLE`] produce [`IndicatorBundle::empty`].
/// EMA(50) additionally requires 50 bars and is `None` below that, matching
/// the rest of the pipeline which treats a missing EMA(50) as a weaker trend
/// reading rather than an error.
pub fn compute_bundle(candles: &[Candle]) -> IndicatorBundle {
    if candles.len() < MIN_BARS_FOR_BUNDLE {
        return IndicatorBundle::empty();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<u64> = candles.iter().map(|c| c.volume).collect();

    let ema_9 = ema::latest_ema(&closes, 9);
    let ema_21 = ema::latest_ema(&closes, 21);
    let ema_50 = if closes.len() >= 50 {
        ema::latest_ema(&closes, 50)
    } else {
        None
    };
    let rsi_14 = rsi::latest_rsi(&closes, 14);

    let macd_result = macd::calculate_macd(&closes);
    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0);
    let atr_14 = atr::calculate_atr(candles, 14);
    let volume_sma_20 = volume::volume_sma(&volumes, 20);
    let relative_volume = volume::relative_volume(&volumes, 20);
    let kdj_j = kdj::latest_kdj_j(candles, 9);

    let last_close = closes.last().copied();
    let trend = match (last_close, ema_21) {
        (Some(close), Some(e21)) => Some(if close > e21 {
            TrendLabel::Bullish
        } else {
            TrendLabel::Bearish
        }),
        _ => None,
    };
    let momentum = rsi_14.map(|rsi| {
        if (rsi - 50.0).abs() > 20.0 {
            MomentumLabel::Strong
        } else {
            MomentumLabel::Weak
        }
    });

    IndicatorBundle {
        ema_9,
        ema_21,
        ema_50,
        rsi_14,
        macd: macd_result.map(|m| m.macd),
        macd_signal: macd_result.map(|m| m.signal),
        macd_histogram: macd_result.map(|m| m.histogram),
        bb_upper: bb.map(|b| b.upper),
        bb_middle: bb.map(|b| b.middle),
        bb_lower: bb.map(|b| b.lower),
        atr_14,
        volume_sma_20,
        relative_volume,
        kdj_j,
        trend,
        momentum,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_candle;

    fn rising_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                test_candle(base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect()
    }

    #[test]
    fn bundle_below_min_bars_is_empty() {
        let candles = rising_series(19);
        let bundle = compute_bundle(&candles);
        assert!(!bundle.is_computable());
        assert!(bundle.ema_9.is_none());
        assert!(bundle.rsi_14.is_none());
        assert!(bundle.trend.is_none());
    }

    #[test]
    fn bundle_at_min_bars_computes_core() {
        let candles = rising_series(20);
        let bundle = compute_bundle(&candles);
        assert!(bundle.is_computable());
        assert!(bundle.bb_middle.is_some());
        assert!(bundle.atr_14.is_some());
        // EMA(50) and MACD(26) need longer series.
        assert!(bundle.ema_50.is_none());
        assert!(bundle.macd.is_none());
    }

    #[test]
    fn bundle_full_series() {
        let candles = rising_series(120);
        let bundle = compute_bundle(&candles);
        assert!(bundle.ema_50.is_some());
        assert!(bundle.macd.is_some());
        assert!(bundle.macd_histogram.is_some());
        assert!(bundle.kdj_j.is_some());
        assert_eq!(bundle.trend, Some(TrendLabel::Bullish));
    }

    #[test]
    fn bundle_trend_bearish_in_downtrend() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 200.0 - i as f64;
                test_candle(base, base + 1.0, base - 1.0, base - 0.5)
            })
            .collect();
        let bundle = compute_bundle(&candles);
        assert_eq!(bundle.trend, Some(TrendLabel::Bearish));
    }

    #[test]
    fn bundle_momentum_strong_on_persistent_rise() {
        // All gains push RSI to 100, well past the |RSI-50| > 20 cut.
        let bundle = compute_bundle(&rising_series(60));
        assert_eq!(bundle.momentum, Some(MomentumLabel::Strong));
    }
}
