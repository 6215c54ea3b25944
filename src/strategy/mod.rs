// =============================================================================
// Strategy Agent — the decision core
// =============================================================================
//
// Per symbol, per cycle:
//   1. Regime detection on the 1h bundle + series
//   2. Quant analysis (trend + oscillator scores per timeframe)
//   3. Trap detection
//   4. Prophet prediction
//   5. Weighted vote
//   6. Multi-period alignment
//   7. Score -> action mapping (regime-adjusted thresholds)
//   8. Mean-reversion override in choppy / directionless regimes
//   9. Overtrading guard
//  10. Trap filters (ordered, multiplicative)
//  11. Confidence calibration
//  12. Dynamic SL/TP from the 5m ATR
//
// At most one SIGNAL per symbol per cycle, and only when the action is
// tradeable and the calibrated confidence clears the configured floor.

pub mod guard;
pub mod scoring;
pub mod trade_params;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::ErrorLog;
use crate::execution::ExecutionRecord;
use crate::indicators::IndicatorBundle;
use crate::market_data::{CandleHistory, MarketSnapshot, Quote, SeriesKey};
use crate::message::{AgentMessage, MessagePayload};
use crate::predict::{PredictAgent, PredictFeatures, Prediction};
use crate::regime::{PricePosition, RegimeDetector, RegimeSnapshot};
use crate::runtime_config::EngineConfig;
use crate::strategy::guard::OvertradingGuard;
use crate::strategy::scoring::{
    check_alignment, choppy_override, oscillator_score, score_to_action, trend_score, QuantScores,
};
use crate::strategy::trade_params::{calibrate_confidence, dynamic_trade_params};
use crate::traps::{detect_traps, TrapFlags};
use crate::types::{Action, SymbolKey, Timeframe};

const AGENT_NAME: &str = "StrategyAgent";

/// How a signal was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    RuleBased,
}

/// A candidate trade, ready for the risk audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    pub symbol: SymbolKey,
    /// Calibrated confidence in [0, 1].
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Requested quantity; the risk verdict may shrink it.
    pub quantity: u32,
    pub regime: RegimeSnapshot,
    pub position: PricePosition,
    pub traps: TrapFlags,
    pub reasoning: String,
    pub source: SignalSource,
}

/// The Strategist: regime + quant + prophet + guard, combined.
pub struct StrategyAgent {
    history: Arc<CandleHistory>,
    regime_detector: RegimeDetector,
    predictor: PredictAgent,
    guard: OvertradingGuard,
    errors: ErrorLog,
}

impl StrategyAgent {
    pub fn new(history: Arc<CandleHistory>) -> Self {
        Self {
            history,
            regime_detector: RegimeDetector::default(),
            predictor: PredictAgent::new(),
            guard: OvertradingGuard::new(),
            errors: ErrorLog::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.guard.consecutive_losses()
    }

    /// Feed back an executed trade so the overtrading guard sees it.
    pub fn record_execution(&mut self, record: &ExecutionRecord, cycle: u64, now: DateTime<Utc>) {
        if record.success {
            self.guard
                .record_trade(record.symbol.clone(), record.action, record.pnl, cycle, now);
        }
    }

    /// Evaluate every symbol in the snapshot. Emits at most one SIGNAL per
    /// symbol plus progress STATE_UPDATEs.
    pub fn process_cycle(
        &mut self,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
        cycle: u64,
    ) -> Vec<AgentMessage> {
        let mut messages = Vec::new();

        messages.push(AgentMessage::state_update(
            AGENT_NAME,
            "analyzing",
            format!(
                "Analyzing {} symbols ({:?})",
                snapshot.quotes.len(),
                snapshot.source
            ),
        ));

        for (key_str, quote) in &snapshot.quotes {
            if quote.ltp <= 0.0 {
                self.errors.push(format!("{key_str}: non-positive ltp"));
                continue;
            }
            let bundles = match snapshot.indicators.get(key_str) {
                Some(b) => b.clone(),
                None => Default::default(),
            };
            self.evaluate_symbol(quote, &bundles, config, cycle, snapshot.timestamp, &mut messages);
        }

        messages
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_symbol(
        &mut self,
        quote: &Quote,
        bundles: &crate::market_data::agent::TimeframeBundles,
        config: &EngineConfig,
        cycle: u64,
        now: DateTime<Utc>,
        messages: &mut Vec<AgentMessage>,
    ) {
        let key = &quote.key;
        let ltp = quote.ltp;

        // --- 1. Regime detection -------------------------------------------
        let h1_candles = self
            .history
            .series(&SeriesKey::new(key.clone(), Timeframe::H1));
        let regime = self.regime_detector.detect(&bundles.h1, &h1_candles);
        let position = regime.position;

        // --- 2. Quant analysis ---------------------------------------------
        let scores = QuantScores {
            trend_1h: trend_score(&bundles.h1, ltp),
            trend_15m: trend_score(&bundles.m15, ltp),
            trend_5m: trend_score(&bundles.m5, ltp),
            osc_1h: oscillator_score(&bundles.h1),
            osc_15m: oscillator_score(&bundles.m15),
            osc_5m: oscillator_score(&bundles.m5),
        };

        // --- 3. Trap detection ---------------------------------------------
        let traps = detect_traps(&bundles.h1, ltp);

        // --- 4. Prophet prediction -----------------------------------------
        let prediction = self.run_prediction(&bundles.m15, scores.trend_1h, ltp);

        // --- 5. Weighted vote ----------------------------------------------
        let vote = scoring::weighted_vote(&scores, prediction.as_ref(), &config.vote_weights);

        // --- 6. Alignment ---------------------------------------------------
        let (aligned, mut align_reason) = check_alignment(&scores);

        // --- 7. Score to action --------------------------------------------
        let (mut action, mut confidence) = score_to_action(vote.weighted_score, aligned, &regime);

        // --- 8. Choppy override --------------------------------------------
        if regime.regime.is_directionless() {
            let (a, c, reason) = choppy_override(&bundles.m15, position.pct);
            action = a;
            confidence = c;
            align_reason = reason;
        }

        // --- 9. Overtrading guard ------------------------------------------
        if action.is_tradeable() {
            let (allowed, guard_reason) = self.guard.can_open(key, cycle, now);
            if !allowed {
                messages.push(AgentMessage::state_update(
                    AGENT_NAME,
                    "guard",
                    format!("{key}: {guard_reason}"),
                ));
                action = Action::Hold;
                confidence = 0.1;
                align_reason = guard_reason;
            }
        }

        // --- 10. Trap filters ----------------------------------------------
        let (action, confidence, trap_note) = apply_trap_filters(action, confidence, &traps);
        if let Some(note) = trap_note {
            align_reason = format!("{align_reason} | {note}");
        }

        // --- 11. Confidence calibration ------------------------------------
        let final_confidence = calibrate_confidence(confidence, &regime, aligned);

        // --- 12. Dynamic trade parameters ----------------------------------
        let (stop_loss, take_profit) = dynamic_trade_params(
            &regime,
            action,
            ltp,
            bundles.m5.atr_14,
            config.default_stop_loss_pct,
        );

        let prophet_label = prediction
            .as_ref()
            .map(|p| p.signal().to_string())
            .unwrap_or_else(|| "n/a".to_string());

        messages.push(AgentMessage::state_update(
            AGENT_NAME,
            "analysis",
            format!(
                "{key}: regime={} vote={:.1} aligned={} prophet={} action={} conf={:.0}%",
                regime.regime,
                vote.weighted_score,
                aligned,
                prophet_label,
                action,
                final_confidence * 100.0
            ),
        ));

        if action == Action::Hold || final_confidence < config.min_confidence {
            debug!(symbol = %key, action = %action, confidence = final_confidence, "holding");
            return;
        }

        let reasoning = format!(
            "Regime:{} | Score:{:.1} | Aligned:{} | Prophet:{} | {}",
            regime.regime,
            vote.weighted_score,
            aligned,
            prophet_label,
            &align_reason[..align_reason.len().min(80)]
        );

        info!(
            symbol = %key,
            action = %action,
            confidence = format!("{:.2}", final_confidence),
            entry = ltp,
            stop_loss,
            take_profit,
            "signal emitted"
        );

        let signal = Signal {
            action,
            symbol: key.clone(),
            confidence: final_confidence,
            entry_price: ltp,
            stop_loss,
            take_profit,
            quantity: 1,
            regime,
            position,
            traps,
            reasoning,
            source: SignalSource::RuleBased,
        };

        messages.push(AgentMessage::new(AGENT_NAME, MessagePayload::Signal(signal)).with_priority(2));
    }

    /// Build prophet features from the 15m bundle.
    fn run_prediction(
        &mut self,
        bundle_15m: &IndicatorBundle,
        trend_1h: f64,
        ltp: f64,
    ) -> Option<Prediction> {
        if !bundle_15m.is_computable() {
            return None;
        }

        let bb_position = match (bundle_15m.bb_upper, bundle_15m.bb_lower) {
            (Some(upper), Some(lower)) if upper > lower => {
                ((ltp - lower) / (upper - lower) * 100.0).clamp(0.0, 100.0)
            }
            _ => 50.0,
        };

        let ema_cross_strength = match (bundle_15m.ema_9, bundle_15m.ema_21) {
            (Some(e9), Some(e21)) if e21 > 0.0 => (e9 - e21) / e21 * 100.0,
            _ => 0.0,
        };

        let features = PredictFeatures {
            trend_score: trend_1h,
            rsi: bundle_15m.rsi_14.unwrap_or(50.0),
            bb_position,
            ema_cross_strength,
            volume_ratio: bundle_15m.relative_volume.unwrap_or(1.0),
            macd_histogram: bundle_15m.macd_histogram.unwrap_or(0.0),
        };

        Some(self.predictor.predict(features))
    }
}

/// Apply the trap filters in their documented order, mutating action and
/// confidence multiplicatively.  Later rules see the effect of earlier ones.
fn apply_trap_filters(
    mut action: Action,
    mut confidence: f64,
    traps: &TrapFlags,
) -> (Action, f64, Option<&'static str>) {
    let mut note = None;

    if action == Action::Buy && traps.bull_trap_risk {
        action = Action::Hold;
        confidence = 0.1;
        note = Some("bull trap detected");
    }
    if action == Action::Buy && traps.weak_rebound {
        confidence *= 0.5;
        if confidence < 0.5 {
            action = Action::Hold;
            note = Some("weak rebound, standing aside");
        }
    }
    if action == Action::Buy && traps.volume_divergence {
        confidence *= 0.7;
        note = Some("volume divergence at highs");
    }
    if action == Action::Buy && traps.accumulation {
        confidence = (confidence * 1.2).min(0.95);
        note = Some("accumulation detected");
    }
    if action == Action::Buy && traps.panic_bottom {
        confidence = (confidence * 1.3).min(0.95);
        note = Some("panic bottom, contrarian entry");
    }
    if action == Action::Sell && traps.panic_bottom {
        action = Action::Hold;
        confidence = 0.1;
        note = Some("panic bottom, not selling the low");
    }
    if action == Action::Sell && traps.fomo_top {
        confidence = (confidence * 1.3).min(0.95);
        note = Some("fomo top, exit confirmed");
    }
    if action == Action::Buy && traps.fomo_top {
        action = Action::Hold;
        confidence = 0.1;
        note = Some("fomo top, not chasing");
    }

    (action, confidence, note)
}
