// =============================================================================
// Quant Scoring — multi-timeframe trend/oscillator scores and the vote
// =============================================================================
//
// Step 1 of the decision core: each timeframe contributes a trend score from
// EMA stacking and an oscillator score from RSI (plus the KDJ J-line when
// available), both in [-100, 100].  A missing bundle contributes 0, never an
// accidental directional reading.
//
// Step 2 combines the six scores plus the prophet into a single weighted
// score; step 3 checks multi-period alignment; step 4 maps the score to an
// action with regime-adjusted thresholds.

use crate::indicators::IndicatorBundle;
use crate::predict::Prediction;
use crate::regime::{MarketRegime, RegimeSnapshot};
use crate::runtime_config::VoteWeights;
use crate::types::Action;

/// Per-timeframe quant scores for one symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantScores {
    pub trend_1h: f64,
    pub trend_15m: f64,
    pub trend_5m: f64,
    pub osc_1h: f64,
    pub osc_15m: f64,
    pub osc_5m: f64,
}

/// Outcome of the weighted vote.
#[derive(Debug, Clone, Copy)]
pub struct VoteResult {
    pub weighted_score: f64,
    /// The prophet's contribution before weighting, [-100, 100].
    pub prophet_score: f64,
}

/// Trend score in [-100, 100] from EMA ordering vs the live price.
///
/// Bullish stacking (ltp > EMA9 > EMA21, with EMA21 > EMA50) scores 80;
/// weaker bullish orderings 60 or 20; mirrored for bearish.  Missing EMAs
/// default to the price itself, which collapses their comparison to neutral.
pub fn trend_score(bundle: &IndicatorBundle, ltp: f64) -> f64 {
    if !bundle.is_computable() || ltp <= 0.0 {
        return 0.0;
    }
    let e9 = bundle.ema_9.unwrap_or(ltp);
    let e21 = bundle.ema_21.unwrap_or(ltp);
    let e50 = bundle.ema_50.unwrap_or(ltp);

    if ltp > e9 && e9 > e21 {
        if e21 > e50 {
            80.0
        } else {
            60.0
        }
    } else if ltp < e9 && e9 < e21 {
        if e21 < e50 {
            -80.0
        } else {
            -60.0
        }
    } else if ltp > e21 {
        20.0
    } else if ltp < e21 {
        -20.0
    } else {
        0.0
    }
}

/// Oscillator score in [-100, 100] from RSI and (when present) KDJ-J.
pub fn oscillator_score(bundle: &IndicatorBundle) -> f64 {
    if !bundle.is_computable() {
        return 0.0;
    }
    let mut score: f64 = 0.0;

    let rsi = bundle.rsi_14.unwrap_or(50.0);
    if rsi < 30.0 {
        score += 40.0;
    } else if rsi > 70.0 {
        score -= 40.0;
    } else if rsi < 40.0 {
        score += 15.0;
    } else if rsi > 60.0 {
        score -= 15.0;
    }

    if let Some(j) = bundle.kdj_j {
        if j < 20.0 {
            score += 30.0;
        } else if j > 80.0 {
            score -= 30.0;
        }
    }

    score.clamp(-100.0, 100.0)
}

/// Weighted vote across all timeframe scores plus the prophet.
pub fn weighted_vote(
    scores: &QuantScores,
    prediction: Option<&Prediction>,
    weights: &VoteWeights,
) -> VoteResult {
    let prophet_score = prediction
        .map(|p| (p.probability_up - 0.5) * 200.0)
        .unwrap_or(0.0);

    let weighted_score = scores.trend_5m * weights.trend_5m
        + scores.trend_15m * weights.trend_15m
        + scores.trend_1h * weights.trend_1h
        + scores.osc_5m * weights.oscillator_5m
        + scores.osc_15m * weights.oscillator_15m
        + scores.osc_1h * weights.oscillator_1h
        + prophet_score * weights.prophet;

    VoteResult {
        weighted_score,
        prophet_score,
    }
}

/// Multi-period alignment check.
///
/// Signs are taken at thresholds ±25 (1h), ±18 (15m), ±12 (5m).  Full 3-way
/// agreement or 1h+15m agreement counts as aligned.
pub fn check_alignment(scores: &QuantScores) -> (bool, String) {
    let sign = |value: f64, threshold: f64| -> i8 {
        if value >= threshold {
            1
        } else if value <= -threshold {
            -1
        } else {
            0
        }
    };

    let s1h = sign(scores.trend_1h, 25.0);
    let s15m = sign(scores.trend_15m, 18.0);
    let s5m = sign(scores.trend_5m, 12.0);

    if s1h == s15m && s15m == s5m && s1h != 0 {
        let d = if s1h > 0 { "bullish" } else { "bearish" };
        return (true, format!("3-period {d} alignment"));
    }
    if s1h == s15m && s1h != 0 {
        let d = if s1h > 0 { "bullish" } else { "bearish" };
        return (true, format!("1h+15m {d} alignment"));
    }
    (false, format!("Divergence (1h:{s1h}, 15m:{s15m}, 5m:{s5m})"))
}

/// Map the weighted score to an action with a base confidence.
///
/// Thresholds start at long 20 / short 18 and shift with the regime:
/// trending_down raises the long bar to 32; trending_up raises the short bar
/// to 32 and nudges the long bar to 22; choppy and directionless markets
/// raise both to 30.  Alignment relaxes both by 2 (floor 12).
pub fn score_to_action(score: f64, aligned: bool, regime: &RegimeSnapshot) -> (Action, f64) {
    let (mut long_th, mut short_th): (f64, f64) = match regime.regime {
        MarketRegime::TrendingDown => (32.0, 18.0),
        MarketRegime::TrendingUp => (22.0, 32.0),
        MarketRegime::Choppy | MarketRegime::VolatileDirectionless => (30.0, 30.0),
        _ => (20.0, 18.0),
    };

    if aligned {
        long_th = (long_th - 2.0).max(12.0);
        short_th = (short_th - 2.0).max(12.0);
    }

    if score > long_th + 15.0 && aligned {
        return (Action::Buy, 0.85);
    }
    if score < -(short_th + 15.0) && aligned {
        return (Action::Sell, 0.85);
    }
    if score > long_th {
        return (Action::Buy, (0.55 + (score - long_th) * 0.01).min(0.75));
    }
    if score < -short_th {
        return (Action::Sell, (0.55 + (score.abs() - short_th) * 0.01).min(0.75));
    }
    (Action::Hold, score.abs() / 100.0)
}

/// Mean-reversion override for choppy / directionless regimes.
///
/// Replaces the trend mapping: buy near range lows with an oversold 15m RSI,
/// sell near range highs with an overbought one, otherwise stand aside.
pub fn choppy_override(
    bundle_15m: &IndicatorBundle,
    position_pct: f64,
) -> (Action, f64, String) {
    let rsi = bundle_15m.rsi_14.unwrap_or(50.0);

    if rsi < 35.0 && position_pct < 40.0 {
        return (
            Action::Buy,
            0.65,
            format!("Choppy mean-reversion BUY (RSI {rsi:.0}, pos {position_pct:.0}%)"),
        );
    }
    if rsi > 65.0 && position_pct > 60.0 {
        return (
            Action::Sell,
            0.65,
            format!("Choppy mean-reversion SELL (RSI {rsi:.0}, pos {position_pct:.0}%)"),
        );
    }
    (
        Action::Hold,
        0.3,
        format!("Choppy, no edge (pos {position_pct:.0}%)"),
    )
}
