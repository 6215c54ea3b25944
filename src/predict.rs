// =============================================================================
// Prophet — rule-based probability predictor
// =============================================================================
//
// Pure function of an indicator feature map to a probability that price goes
// up over the next cycle.  Each feature awards a signed weight; the net
// tilts the probability away from 0.5.
//
// Confidence is intentionally capped at 0.70: a rule stack has no business
// claiming more certainty than that, and the weighted vote treats the
// prophet as a small tie-breaker anyway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Hard ceiling on rule-based confidence.
pub const CONFIDENCE_CAP: f64 = 0.70;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Bounded history of past predictions kept for observability.
const MAX_HISTORY: usize = 500;

/// Indicator features feeding the predictor.
///
/// Callers populate what they have; [`PredictFeatures::sanitized`] replaces
/// missing or non-finite values with documented neutral defaults before any
/// scoring happens.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictFeatures {
    /// Multi-timeframe trend score, [-100, 100].
    pub trend_score: f64,
    /// RSI(14), [0, 100].
    pub rsi: f64,
    /// Position within the Bollinger bands, [0, 100].
    pub bb_position: f64,
    /// EMA9 vs EMA21 spread as a percentage of EMA21.
    pub ema_cross_strength: f64,
    /// Current volume over its 20-period average.
    pub volume_ratio: f64,
    /// MACD histogram value.
    pub macd_histogram: f64,
}

impl PredictFeatures {
    /// Replace non-finite fields with neutral defaults.
    pub fn sanitized(mut self) -> Self {
        if !self.trend_score.is_finite() {
            self.trend_score = 0.0;
        }
        if !self.rsi.is_finite() {
            self.rsi = 50.0;
        }
        if !self.bb_position.is_finite() {
            self.bb_position = 50.0;
        }
        if !self.ema_cross_strength.is_finite() {
            self.ema_cross_strength = 0.0;
        }
        if !self.volume_ratio.is_finite() {
            self.volume_ratio = 1.0;
        }
        if !self.macd_histogram.is_finite() {
            self.macd_histogram = 0.0;
        }
        self
    }
}

/// Directional label derived from the probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictSignal {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl std::fmt::Display for PredictSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongBullish => "strong_bullish",
            Self::Bullish => "bullish",
            Self::Neutral => "neutral",
            Self::Bearish => "bearish",
            Self::StrongBearish => "strong_bearish",
        };
        write!(f, "{s}")
    }
}

/// Prediction output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub probability_up: f64,
    pub probability_down: f64,
    /// Capped at [`CONFIDENCE_CAP`].
    pub confidence: f64,
    /// Named factor contributions (signed).
    pub factors: BTreeMap<String, f64>,
}

impl Prediction {
    pub fn signal(&self) -> PredictSignal {
        if self.probability_up > 0.65 {
            PredictSignal::StrongBullish
        } else if self.probability_up > 0.55 {
            PredictSignal::Bullish
        } else if self.probability_down > 0.65 {
            PredictSignal::StrongBearish
        } else if self.probability_down > 0.55 {
            PredictSignal::Bearish
        } else {
            PredictSignal::Neutral
        }
    }
}

/// The Prophet: stateless scoring with a bounded result history.
#[derive(Debug, Default)]
pub struct PredictAgent {
    history: Vec<Prediction>,
}

impl PredictAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predict price direction from indicator features.
    pub fn predict(&mut self, features: PredictFeatures) -> Prediction {
        let result = predict_rules(features.sanitized());
        self.history.push(result.clone());
        while self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
        result
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Pure rule-based scoring.
fn predict_rules(f: PredictFeatures) -> Prediction {
    let mut bullish: f64 = 0.0;
    let mut bearish: f64 = 0.0;
    let mut factors: BTreeMap<String, f64> = BTreeMap::new();

    let add = |factors: &mut BTreeMap<String, f64>, name: &str, weight: f64| {
        factors.insert(name.to_string(), weight);
    };

    // 1. Trend score.
    if f.trend_score >= 40.0 {
        bullish += 0.15;
        add(&mut factors, "trend_strong_bull", 0.15);
    } else if f.trend_score >= 20.0 {
        bullish += 0.08;
        add(&mut factors, "trend_bull", 0.08);
    } else if f.trend_score <= -40.0 {
        bearish += 0.15;
        add(&mut factors, "trend_strong_bear", -0.15);
    } else if f.trend_score <= -20.0 {
        bearish += 0.08;
        add(&mut factors, "trend_bear", -0.08);
    }

    // 2. RSI.
    if f.rsi < RSI_OVERSOLD {
        bullish += 0.12;
        add(&mut factors, "rsi_oversold", 0.12);
    } else if f.rsi < 40.0 {
        bullish += 0.06;
        add(&mut factors, "rsi_low", 0.06);
    } else if f.rsi > RSI_OVERBOUGHT {
        bearish += 0.12;
        add(&mut factors, "rsi_overbought", -0.12);
    } else if f.rsi > 60.0 {
        bearish += 0.06;
        add(&mut factors, "rsi_high", -0.06);
    }

    // 3. Bollinger position.
    if f.bb_position < 20.0 {
        bullish += 0.10;
        add(&mut factors, "bb_low", 0.10);
    } else if f.bb_position > 80.0 {
        bearish += 0.10;
        add(&mut factors, "bb_high", -0.10);
    }

    // 4. EMA cross strength.
    if f.ema_cross_strength > 0.5 {
        bullish += 0.08;
        add(&mut factors, "ema_bull", 0.08);
    } else if f.ema_cross_strength < -0.5 {
        bearish += 0.08;
        add(&mut factors, "ema_bear", -0.08);
    }

    // 5. Volume confirmation reinforces whichever side is leading.
    if f.volume_ratio > 1.5 {
        if bullish > bearish {
            bullish += 0.05;
            add(&mut factors, "vol_confirm_up", 0.05);
        } else if bearish > bullish {
            bearish += 0.05;
            add(&mut factors, "vol_confirm_down", -0.05);
        }
    }

    // 6. MACD histogram.
    if f.macd_histogram > 0.0 {
        bullish += 0.05;
        add(&mut factors, "macd_bull", 0.05);
    } else if f.macd_histogram < 0.0 {
        bearish += 0.05;
        add(&mut factors, "macd_bear", -0.05);
    }

    let total = bullish + bearish;
    let probability_up = if total == 0.0 {
        0.5
    } else {
        (0.5 + (bullish - bearish) / 2.0).clamp(0.0, 1.0)
    };

    let confidence = (total / 0.5).min(CONFIDENCE_CAP);

    Prediction {
        probability_up: round4(probability_up),
        probability_down: round4(1.0 - probability_up),
        confidence: round4(confidence),
        factors,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_features_give_even_odds() {
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            rsi: 50.0,
            bb_position: 50.0,
            volume_ratio: 1.0,
            ..Default::default()
        });
        assert!((p.probability_up - 0.5).abs() < 1e-10);
        assert!((p.confidence - 0.0).abs() < 1e-10);
        assert_eq!(p.signal(), PredictSignal::Neutral);
    }

    #[test]
    fn strongly_bullish_stack() {
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            trend_score: 80.0,
            rsi: 25.0,
            bb_position: 10.0,
            ema_cross_strength: 1.0,
            volume_ratio: 2.0,
            macd_histogram: 0.5,
        });
        // 0.15 + 0.12 + 0.10 + 0.08 + 0.05 + 0.05 = 0.55 bullish, 0 bearish.
        assert!((p.probability_up - 0.775).abs() < 1e-9);
        assert_eq!(p.signal(), PredictSignal::StrongBullish);
        assert!((p.confidence - CONFIDENCE_CAP).abs() < 1e-10);
    }

    #[test]
    fn strongly_bearish_stack() {
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            trend_score: -80.0,
            rsi: 78.0,
            bb_position: 90.0,
            ema_cross_strength: -1.0,
            volume_ratio: 2.0,
            macd_histogram: -0.5,
        });
        assert!(p.probability_down > 0.65);
        assert_eq!(p.signal(), PredictSignal::StrongBearish);
    }

    #[test]
    fn confidence_never_exceeds_cap() {
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            trend_score: 100.0,
            rsi: 5.0,
            bb_position: 1.0,
            ema_cross_strength: 5.0,
            volume_ratio: 5.0,
            macd_histogram: 10.0,
        });
        assert!(p.confidence <= CONFIDENCE_CAP);
    }

    #[test]
    fn non_finite_features_fall_back_to_defaults() {
        let f = PredictFeatures {
            trend_score: f64::NAN,
            rsi: f64::INFINITY,
            bb_position: f64::NEG_INFINITY,
            ema_cross_strength: f64::NAN,
            volume_ratio: f64::NAN,
            macd_histogram: f64::NAN,
        }
        .sanitized();
        assert!((f.rsi - 50.0).abs() < f64::EPSILON);
        assert!((f.bb_position - 50.0).abs() < f64::EPSILON);
        assert!((f.volume_ratio - 1.0).abs() < f64::EPSILON);
        assert!((f.trend_score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            trend_score: 30.0,
            rsi: 45.0,
            bb_position: 50.0,
            volume_ratio: 1.0,
            ..Default::default()
        });
        assert!((p.probability_up + p.probability_down - 1.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded() {
        let mut agent = PredictAgent::new();
        for _ in 0..600 {
            agent.predict(PredictFeatures::default());
        }
        assert_eq!(agent.history_len(), 500);
    }

    #[test]
    fn volume_needs_a_leading_side() {
        // Volume surge with a perfectly balanced book adds nothing.
        let mut agent = PredictAgent::new();
        let p = agent.predict(PredictFeatures {
            rsi: 50.0,
            bb_position: 50.0,
            volume_ratio: 3.0,
            ..Default::default()
        });
        assert!((p.probability_up - 0.5).abs() < 1e-10);
    }
}
