// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the prevailing market state for one symbol from its 1h
// indicator bundle and candle series.
//
// Classification hierarchy (evaluated top-to-bottom; first match wins):
//
//   1. VOLATILE               — ATR% > 2.0 (high volatility, dangerous)
//   2. TRENDING_UP / _DOWN    — TSS >= 70 with an aligned direction
//   3. weak TRENDING_UP/_DOWN — TSS >= 30 with an aligned direction
//   4. CHOPPY                 — ADX < 20 (range-bound)
//   5. VOLATILE_DIRECTIONLESS — ADX elevated but no trend alignment
//
// Trend Strength Score (TSS, 0-100):
//   ADX contribution: > 25 -> +40, > 20 -> +20
//   EMA alignment:    direction up or down -> +30
//   MACD momentum:    histogram sign matches direction -> +30
//
// ADX is taken from a proxy when no real value exists: the EMA12/EMA26
// spread normalised by price and scaled into an ADX-like range.  All outputs
// are clipped to finite documented ranges; non-finite inputs fall back to
// neutral defaults (ADX 20, BB width 2%, ATR 0.5%).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::ema::latest_ema;
use crate::indicators::IndicatorBundle;
use crate::market_data::Candle;
use crate::regime::choppy::{analyze_choppy_market, ChoppyAnalysis};

// =============================================================================
// Types
// =============================================================================

/// High-level market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    /// Clear uptrend.
    TrendingUp,
    /// Clear downtrend.
    TrendingDown,
    /// Range-bound sideways action.
    Choppy,
    /// High volatility, elevated risk.
    Volatile,
    /// Elevated ADX but no directional alignment.
    VolatileDirectionless,
    /// Cannot determine (insufficient or broken data).
    Unknown,
}

impl MarketRegime {
    pub fn is_trending(self) -> bool {
        matches!(self, Self::TrendingUp | Self::TrendingDown)
    }

    pub fn is_directionless(self) -> bool {
        matches!(self, Self::Choppy | Self::VolatileDirectionless)
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Choppy => "choppy",
            Self::Volatile => "volatile",
            Self::VolatileDirectionless => "volatile_directionless",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

/// Where the current price sits within the recent range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceLocation {
    Low,
    Middle,
    High,
    Unknown,
}

/// Price position within the last 50 bars, 0 = at the low, 100 = at the high.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricePosition {
    pub pct: f64,
    pub location: PriceLocation,
}

impl PricePosition {
    pub fn unknown() -> Self {
        Self {
            pct: 50.0,
            location: PriceLocation::Unknown,
        }
    }
}

/// Complete snapshot of the detected regime plus contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    /// Confidence in the classification, [0, 100].
    pub confidence: f64,
    pub adx: f64,
    pub bb_width_pct: f64,
    pub atr_pct: f64,
    pub trend_direction: TrendDirection,
    pub reason: String,
    pub position: PricePosition,
    /// Populated only when regime == Choppy.
    pub choppy_analysis: Option<ChoppyAnalysis>,
}

impl RegimeSnapshot {
    /// Neutral snapshot for symbols without enough data.
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            regime: MarketRegime::Unknown,
            confidence: 0.0,
            adx: 20.0,
            bb_width_pct: 2.0,
            atr_pct: 0.5,
            trend_direction: TrendDirection::Neutral,
            reason: reason.into(),
            position: PricePosition::unknown(),
            choppy_analysis: None,
        }
    }
}

// =============================================================================
// RegimeDetector
// =============================================================================

/// Regime detector with tunable thresholds.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    pub adx_trend_threshold: f64,
    pub adx_choppy_threshold: f64,
    pub atr_high_threshold: f64,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            adx_trend_threshold: 25.0,
            adx_choppy_threshold: 20.0,
            atr_high_threshold: 2.0,
        }
    }
}

impl RegimeDetector {
    /// Classify the market state from the 1h bundle and candle series.
    pub fn detect(&self, bundle: &IndicatorBundle, candles: &[Candle]) -> RegimeSnapshot {
        if candles.len() < 10 || !bundle.is_computable() {
            let mut snapshot = RegimeSnapshot::unknown("Insufficient data for regime detection");
            snapshot.position = price_position(candles, 50);
            return snapshot;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let last_close = closes[closes.len() - 1];

        let adx = clip_or(self.adx_proxy(&closes, last_close), 0.0, 100.0, 20.0);
        let bb_width_pct = clip_or(bb_width_pct(bundle), 0.0, 50.0, 2.0);
        let atr_pct = clip_or(atr_pct(bundle, last_close), 0.0, 20.0, 0.5);
        let trend_direction = trend_direction(bundle);

        let (regime, confidence, reason) =
            self.classify(adx, atr_pct, trend_direction, bundle.macd_histogram);

        let position = price_position(candles, 50);

        let choppy_analysis = if regime == MarketRegime::Choppy {
            Some(analyze_choppy_market(candles, bb_width_pct))
        } else {
            None
        };

        debug!(
            regime = %regime,
            adx = format!("{adx:.1}"),
            bb_width_pct = format!("{bb_width_pct:.2}"),
            atr_pct = format!("{atr_pct:.2}"),
            confidence = format!("{confidence:.0}"),
            "regime detected"
        );

        RegimeSnapshot {
            regime,
            confidence: clip_or(Some(confidence), 0.0, 100.0, 50.0),
            adx,
            bb_width_pct,
            atr_pct,
            trend_direction,
            reason,
            position,
            choppy_analysis,
        }
    }

    /// ADX-like trend strength from the normalised EMA12/EMA26 spread.
    fn adx_proxy(&self, closes: &[f64], last_close: f64) -> Option<f64> {
        if closes.len() < 26 || last_close <= 0.0 {
            return None;
        }
        let ema12 = latest_ema(closes, 12)?;
        let ema26 = latest_ema(closes, 26)?;
        Some((ema12 - ema26).abs() / last_close * 100.0 * 10.0)
    }

    fn classify(
        &self,
        adx: f64,
        atr_pct: f64,
        direction: TrendDirection,
        macd_histogram: Option<f64>,
    ) -> (MarketRegime, f64, String) {
        // 1. High volatility dominates everything else.
        if atr_pct > self.atr_high_threshold {
            return (
                MarketRegime::Volatile,
                80.0,
                format!(
                    "High volatility market (ATR {atr_pct:.2}% > {:.1}%)",
                    self.atr_high_threshold
                ),
            );
        }

        // 2. Trend Strength Score.
        let mut tss = 0u32;
        if adx > self.adx_trend_threshold {
            tss += 40;
        } else if adx > self.adx_choppy_threshold {
            tss += 20;
        }
        let directional = !matches!(direction, TrendDirection::Neutral);
        if directional {
            tss += 30;
        }
        if let Some(hist) = macd_histogram {
            let momentum_aligned = match direction {
                TrendDirection::Up => hist > 0.0,
                TrendDirection::Down => hist < 0.0,
                TrendDirection::Neutral => false,
            };
            if momentum_aligned {
                tss += 30;
            }
        }

        if tss >= 70 && directional {
            let regime = match direction {
                TrendDirection::Up => MarketRegime::TrendingUp,
                _ => MarketRegime::TrendingDown,
            };
            let label = if regime == MarketRegime::TrendingUp {
                "uptrend"
            } else {
                "downtrend"
            };
            return (regime, 85.0, format!("Strong {label} (TSS:{tss})"));
        }

        if tss >= 30 && directional {
            let regime = match direction {
                TrendDirection::Up => MarketRegime::TrendingUp,
                _ => MarketRegime::TrendingDown,
            };
            let label = if regime == MarketRegime::TrendingUp {
                "uptrend"
            } else {
                "downtrend"
            };
            return (regime, 60.0, format!("Weak {label} (TSS:{tss})"));
        }

        // 4. Low ADX: range-bound.
        if adx < self.adx_choppy_threshold {
            return (
                MarketRegime::Choppy,
                70.0,
                format!(
                    "Range-bound market (ADX {adx:.1} < {:.0})",
                    self.adx_choppy_threshold
                ),
            );
        }

        // 5. ADX elevated but nothing lines up.
        (
            MarketRegime::VolatileDirectionless,
            65.0,
            format!("Directionless volatility (ADX {adx:.1}, trend not aligned)"),
        )
    }
}

// =============================================================================
// Derived metrics
// =============================================================================

fn bb_width_pct(bundle: &IndicatorBundle) -> Option<f64> {
    let upper = bundle.bb_upper?;
    let lower = bundle.bb_lower?;
    let middle = bundle.bb_middle?;
    if middle <= 0.0 {
        return None;
    }
    Some((upper - lower) / middle * 100.0)
}

fn atr_pct(bundle: &IndicatorBundle, last_close: f64) -> Option<f64> {
    let atr = bundle.atr_14?;
    if last_close <= 0.0 {
        return None;
    }
    Some(atr / last_close * 100.0)
}

fn trend_direction(bundle: &IndicatorBundle) -> TrendDirection {
    match (bundle.ema_9, bundle.ema_21) {
        (Some(e9), Some(e21)) if e9 > e21 => TrendDirection::Up,
        (Some(e9), Some(e21)) if e9 < e21 => TrendDirection::Down,
        _ => TrendDirection::Neutral,
    }
}

/// Price position within the last `lookback` bars, clipped to [0, 100].
///
/// A degenerate range (high == low) reads as 50 / Middle so it never skews a
/// decision; an empty series reads as 50 / Unknown.
pub fn price_position(candles: &[Candle], lookback: usize) -> PricePosition {
    if candles.is_empty() {
        return PricePosition::unknown();
    }
    let lookback = lookback.min(candles.len());
    let window = &candles[candles.len() - lookback..];

    let recent_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let recent_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let current = window[window.len() - 1].close;

    if !recent_high.is_finite() || !recent_low.is_finite() || !current.is_finite() {
        return PricePosition::unknown();
    }

    let pct = if recent_high <= recent_low {
        50.0
    } else {
        ((current - recent_low) / (recent_high - recent_low) * 100.0).clamp(0.0, 100.0)
    };

    let location = if recent_high <= recent_low {
        PriceLocation::Middle
    } else if pct <= 25.0 {
        PriceLocation::Low
    } else if pct >= 75.0 {
        PriceLocation::High
    } else {
        PriceLocation::Middle
    };

    PricePosition { pct, location }
}

/// Clip to a range, substituting `default` for missing or non-finite values.
fn clip_or(value: Option<f64>, min: f64, max: f64, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => default,
    }
}
