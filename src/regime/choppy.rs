// =============================================================================
// Choppy Market Analysis
// =============================================================================
//
// When the regime reads as choppy, a deeper look at the range tells the
// strategy whether to fade the extremes or stand aside waiting for a squeeze
// to resolve:
//
//   1. Squeeze detection — current BB width under 70% of its 20-bar mean
//   2. Support / resistance from the recent window
//   3. Breakout probability from squeeze intensity, range position, volume
//   4. Mean reversion signal at the range extremes
//   5. Consolidation bar count
//   6. A textual strategy hint

use serde::{Deserialize, Serialize};

use crate::indicators::bollinger::calculate_bollinger;
use crate::market_data::Candle;

const LOOKBACK: usize = 20;

/// Mean-reversion stance inside the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanReversionSignal {
    BuyDip,
    SellRally,
    Neutral,
}

/// Expected breakout direction out of a squeeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutDirection {
    Up,
    Down,
    Unknown,
}

/// Deep analysis of a range-bound market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoppyAnalysis {
    pub squeeze_active: bool,
    /// How far below the average width the bands have contracted, [0, 100].
    pub squeeze_intensity: f64,
    pub support: f64,
    pub resistance: f64,
    /// Height of the range as a percentage of price, clipped to [0, 20].
    pub range_pct: f64,
    pub breakout_probability: f64,
    pub breakout_direction: BreakoutDirection,
    pub mean_reversion_signal: MeanReversionSignal,
    pub consolidation_bars: u32,
    pub strategy_hint: String,
}

/// Analyze a choppy market from its candle series and current BB width %.
pub fn analyze_choppy_market(candles: &[Candle], current_bb_width: f64) -> ChoppyAnalysis {
    let lookback = LOOKBACK.min(candles.len());
    let window = &candles[candles.len() - lookback..];

    // --- 1. Squeeze detection -----------------------------------------------
    let (squeeze_active, squeeze_intensity) = detect_squeeze(candles, current_bb_width);

    // --- 2. Support / resistance --------------------------------------------
    let resistance = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let support = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let current_price = window.last().map(|c| c.close).unwrap_or(0.0);

    let range_pct = if current_price > 0.0 && resistance > support {
        (((resistance - support) / current_price) * 100.0).clamp(0.0, 20.0)
    } else {
        0.0
    };

    // --- 3. Position in range and mean-reversion signal ---------------------
    let position_pct = if resistance > support {
        ((current_price - support) / (resistance - support) * 100.0).clamp(0.0, 100.0)
    } else {
        50.0
    };

    let mean_reversion_signal = if position_pct <= 20.0 {
        MeanReversionSignal::BuyDip
    } else if position_pct >= 80.0 {
        MeanReversionSignal::SellRally
    } else {
        MeanReversionSignal::Neutral
    };

    // --- 4. Breakout probability --------------------------------------------
    let mut breakout_probability = 0.0;
    let mut breakout_direction = BreakoutDirection::Unknown;

    if squeeze_active {
        breakout_probability += squeeze_intensity * 0.5;
        if position_pct >= 85.0 {
            breakout_probability += 30.0;
            breakout_direction = BreakoutDirection::Up;
        } else if position_pct <= 15.0 {
            breakout_probability += 30.0;
            breakout_direction = BreakoutDirection::Down;
        } else {
            breakout_probability += 10.0;
        }
    }

    // Volume surge: last 5 bars vs the window average.
    if window.len() >= 5 {
        let recent_vol: f64 =
            window[window.len() - 5..].iter().map(|c| c.volume as f64).sum::<f64>() / 5.0;
        let avg_vol: f64 =
            window.iter().map(|c| c.volume as f64).sum::<f64>() / window.len() as f64;
        if avg_vol > 0.0 && recent_vol > avg_vol * 1.5 {
            breakout_probability += 20.0;
        }
    }
    breakout_probability = breakout_probability.min(100.0);

    // --- 5. Consolidation bar count -----------------------------------------
    let mut consolidation_bars = 0u32;
    for candle in candles.iter().rev().take(50) {
        if candle.close <= 0.0 {
            break;
        }
        let bar_range = (candle.high - candle.low) / candle.close * 100.0;
        if bar_range < 1.5 {
            consolidation_bars += 1;
        } else {
            break;
        }
    }

    // --- 6. Strategy hint ----------------------------------------------------
    let strategy_hint = if squeeze_active && breakout_probability >= 60.0 {
        match breakout_direction {
            BreakoutDirection::Up => {
                "SQUEEZE_BREAKOUT_LONG: prepare for upside breakout, set alerts at resistance"
            }
            BreakoutDirection::Down => {
                "SQUEEZE_BREAKOUT_SHORT: prepare for downside breakout, set alerts at support"
            }
            BreakoutDirection::Unknown => {
                "SQUEEZE_IMMINENT: volatility expansion expected, wait for direction confirmation"
            }
        }
    } else {
        match mean_reversion_signal {
            MeanReversionSignal::BuyDip => {
                "MEAN_REVERSION_LONG: price near support, consider long with tight stop below support"
            }
            MeanReversionSignal::SellRally => {
                "MEAN_REVERSION_SHORT: price near resistance, consider booking profits"
            }
            MeanReversionSignal::Neutral => {
                "RANGE_WAIT: no clear edge, wait for price to reach range extremes"
            }
        }
    }
    .to_string();

    ChoppyAnalysis {
        squeeze_active,
        squeeze_intensity: squeeze_intensity.clamp(0.0, 100.0),
        support: if support.is_finite() { support } else { 0.0 },
        resistance: if resistance.is_finite() { resistance } else { 0.0 },
        range_pct,
        breakout_probability,
        breakout_direction,
        mean_reversion_signal,
        consolidation_bars,
        strategy_hint,
    }
}

/// Compare the current band width against its mean over the last 20 bars.
fn detect_squeeze(candles: &[Candle], current_bb_width: f64) -> (bool, f64) {
    if candles.len() < 20 + LOOKBACK {
        return (false, 0.0);
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut widths = Vec::with_capacity(LOOKBACK);
    for end in (closes.len() - LOOKBACK + 1)..=closes.len() {
        if let Some(bb) = calculate_bollinger(&closes[..end], 20, 2.0) {
            if bb.middle > 0.0 {
                widths.push((bb.upper - bb.lower) / bb.middle * 100.0);
            }
        }
    }

    if widths.is_empty() {
        return (false, 0.0);
    }

    let avg_width: f64 = widths.iter().sum::<f64>() / widths.len() as f64;
    if avg_width <= 0.0 {
        return (false, 0.0);
    }

    let ratio = current_bb_width / avg_width;
    if ratio < 0.7 {
        (true, (1.0 - ratio) * 100.0)
    } else {
        (false, 0.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_candle;

    fn flat_range(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                // Oscillate inside a 100-104 band.
                let base = 100.0 + ((i % 5) as f64);
                test_candle(base, base + 0.5, base - 0.5, base)
            })
            .collect()
    }

    #[test]
    fn range_extremes_found() {
        let analysis = analyze_choppy_market(&flat_range(60), 2.0);
        assert!(analysis.resistance > analysis.support);
        assert!(analysis.support >= 99.0);
        assert!(analysis.resistance <= 105.0);
    }

    #[test]
    fn near_support_is_buy_dip() {
        let mut candles = flat_range(60);
        // Pin the last close onto the low of the range. A width near the
        // window average keeps the squeeze branch out of the way.
        let last = candles.last_mut().unwrap();
        last.close = 99.6;
        last.low = 99.5;
        let analysis = analyze_choppy_market(&candles, 10.0);
        assert!(!analysis.squeeze_active);
        assert_eq!(analysis.mean_reversion_signal, MeanReversionSignal::BuyDip);
        assert!(analysis.strategy_hint.starts_with("MEAN_REVERSION_LONG"));
    }

    #[test]
    fn near_resistance_is_sell_rally() {
        let mut candles = flat_range(60);
        let last = candles.last_mut().unwrap();
        last.close = 104.4;
        last.high = 104.5;
        let analysis = analyze_choppy_market(&candles, 10.0);
        assert_eq!(analysis.mean_reversion_signal, MeanReversionSignal::SellRally);
    }

    #[test]
    fn tight_bars_count_as_consolidation() {
        // Every bar spans 1 point on a 100 base: 1% < 1.5% threshold.
        let candles = vec![test_candle(100.0, 100.5, 99.5, 100.0); 60];
        let analysis = analyze_choppy_market(&candles, 2.0);
        assert_eq!(analysis.consolidation_bars, 50);
    }

    #[test]
    fn squeeze_raises_breakout_probability() {
        let candles = flat_range(60);
        // A width far below the window average reads as an active squeeze.
        let squeezed = analyze_choppy_market(&candles, 0.1);
        let relaxed = analyze_choppy_market(&candles, 10.0);
        assert!(squeezed.breakout_probability >= relaxed.breakout_probability);
        assert!(squeezed.squeeze_active);
        assert!(!relaxed.squeeze_active);
    }

    #[test]
    fn short_series_has_no_squeeze() {
        let candles = flat_range(25);
        let analysis = analyze_choppy_market(&candles, 0.1);
        assert!(!analysis.squeeze_active);
        assert!((analysis.squeeze_intensity - 0.0).abs() < f64::EPSILON);
    }
}
