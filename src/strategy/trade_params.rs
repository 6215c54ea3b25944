// =============================================================================
// Dynamic Trade Parameters — regime-aware SL/TP and confidence calibration
// =============================================================================
//
// Stop-loss and take-profit distances derive from the 5m ATR(14), scaled by
// regime: volatile markets get wider stops, trends get room to run, chop
// gets tight brackets.  When the ATR is missing or degenerate the distances
// fall back to the configured percentage of entry.
//
// Confidence calibration happens in the percent domain and is clamped to
// [5, 100] before converting back to a fraction.

use crate::regime::{MarketRegime, PriceLocation, RegimeSnapshot};
use crate::types::Action;

/// SL/TP multipliers for a regime: `(sl_mul, tp_mul)`.
fn atr_multipliers(regime: MarketRegime) -> (f64, f64) {
    match regime {
        MarketRegime::Volatile => (2.0, 3.5),
        MarketRegime::TrendingUp | MarketRegime::TrendingDown => (1.5, 4.0),
        MarketRegime::Choppy | MarketRegime::VolatileDirectionless => (1.0, 1.5),
        MarketRegime::Unknown => (1.5, 3.0),
    }
}

/// Compute `(stop_loss, take_profit)` for an order at `ltp`.
///
/// With a usable ATR: BUY sets sl = ltp - sl_mul*atr, tp = ltp + tp_mul*atr;
/// SELL mirrors. With no ATR (or ATR <= 0) both distances fall back to
/// `default_stop_loss_pct` of entry. Values are rounded to two decimals.
pub fn dynamic_trade_params(
    regime: &RegimeSnapshot,
    action: Action,
    ltp: f64,
    atr_5m: Option<f64>,
    default_stop_loss_pct: f64,
) -> (f64, f64) {
    let fallback = ltp * default_stop_loss_pct / 100.0;

    let (sl_dist, tp_dist) = match atr_5m {
        Some(atr) if atr > 0.0 && atr.is_finite() => {
            let (sl_mul, tp_mul) = atr_multipliers(regime.regime);
            (sl_mul * atr, tp_mul * atr)
        }
        _ => (fallback, fallback),
    };

    let (sl, tp) = match action {
        Action::Buy => (ltp - sl_dist, ltp + tp_dist),
        Action::Sell => (ltp + sl_dist, ltp - tp_dist),
        // HOLD never reaches order placement; keep a sane bracket anyway.
        Action::Hold => (ltp * 0.98, ltp * 1.04),
    };

    (round2(sl), round2(tp))
}

/// Calibrate a confidence value given regime, price position and alignment.
///
/// Input and output are fractions in [0, 1]; the adjustments run in the
/// percent domain: +15 aligned, +10 clear trend, -25 choppy, -20 volatile,
/// -15 middle zone, clamped to [5, 100].
pub fn calibrate_confidence(
    confidence: f64,
    regime: &RegimeSnapshot,
    aligned: bool,
) -> f64 {
    let mut conf = confidence * 100.0;

    if aligned {
        conf += 15.0;
    }
    match regime.regime {
        MarketRegime::TrendingUp | MarketRegime::TrendingDown => conf += 10.0,
        MarketRegime::Choppy => conf -= 25.0,
        MarketRegime::Volatile => conf -= 20.0,
        _ => {}
    }
    if regime.position.location == PriceLocation::Middle {
        conf -= 15.0;
    }

    conf.clamp(5.0, 100.0) / 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{PricePosition, TrendDirection};

    fn regime_with(regime: MarketRegime, location: PriceLocation) -> RegimeSnapshot {
        RegimeSnapshot {
            regime,
            confidence: 80.0,
            adx: 25.0,
            bb_width_pct: 2.0,
            atr_pct: 1.0,
            trend_direction: TrendDirection::Neutral,
            reason: String::new(),
            position: PricePosition {
                pct: 50.0,
                location,
            },
            choppy_analysis: None,
        }
    }

    #[test]
    fn trending_buy_brackets() {
        let regime = regime_with(MarketRegime::TrendingUp, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Buy, 102.0, Some(1.0), 2.0);
        // sl_mul 1.5, tp_mul 4.0 on ATR 1.0.
        assert!((sl - 100.5).abs() < 1e-9);
        assert!((tp - 106.0).abs() < 1e-9);
    }

    #[test]
    fn volatile_widens_the_stop() {
        let regime = regime_with(MarketRegime::Volatile, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Buy, 100.0, Some(2.0), 2.0);
        assert!((sl - 96.0).abs() < 1e-9); // 2.0 * 2.0
        assert!((tp - 107.0).abs() < 1e-9); // 3.5 * 2.0
    }

    #[test]
    fn choppy_tightens_the_bracket() {
        let regime = regime_with(MarketRegime::Choppy, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Buy, 100.0, Some(2.0), 2.0);
        assert!((sl - 98.0).abs() < 1e-9);
        assert!((tp - 103.0).abs() < 1e-9);
    }

    #[test]
    fn sell_mirrors_the_bracket() {
        let regime = regime_with(MarketRegime::Unknown, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Sell, 100.0, Some(1.0), 2.0);
        assert!(sl > 100.0);
        assert!(tp < 100.0);
        assert!((sl - 101.5).abs() < 1e-9);
        assert!((tp - 97.0).abs() < 1e-9);
    }

    #[test]
    fn missing_atr_falls_back_to_percent_bracket() {
        let regime = regime_with(MarketRegime::TrendingUp, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Buy, 200.0, None, 2.0);
        assert!((sl - 196.0).abs() < 1e-9);
        assert!((tp - 204.0).abs() < 1e-9);
    }

    #[test]
    fn zero_atr_falls_back_to_percent_bracket() {
        let regime = regime_with(MarketRegime::TrendingUp, PriceLocation::Middle);
        let (sl, tp) = dynamic_trade_params(&regime, Action::Buy, 200.0, Some(0.0), 2.0);
        assert!((sl - 196.0).abs() < 1e-9);
        assert!((tp - 204.0).abs() < 1e-9);
    }

    #[test]
    fn calibration_rewards_trend_and_alignment() {
        let regime = regime_with(MarketRegime::TrendingUp, PriceLocation::Low);
        let conf = calibrate_confidence(0.60, &regime, true);
        // 60 + 15 + 10 = 85.
        assert!((conf - 0.85).abs() < 1e-9);
    }

    #[test]
    fn calibration_punishes_chop_and_middle() {
        let regime = regime_with(MarketRegime::Choppy, PriceLocation::Middle);
        let conf = calibrate_confidence(0.60, &regime, false);
        // 60 - 25 - 15 = 20.
        assert!((conf - 0.20).abs() < 1e-9);
    }

    #[test]
    fn calibration_clamps_at_floor() {
        let regime = regime_with(MarketRegime::Choppy, PriceLocation::Middle);
        let conf = calibrate_confidence(0.10, &regime, false);
        assert!((conf - 0.05).abs() < 1e-9);
    }

    #[test]
    fn calibration_clamps_at_ceiling() {
        let regime = regime_with(MarketRegime::TrendingUp, PriceLocation::Low);
        let conf = calibrate_confidence(0.95, &regime, true);
        assert!((conf - 1.0).abs() < 1e-9);
    }
}
