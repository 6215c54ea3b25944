// =============================================================================
// Risk Guardian — the ordered audit with veto authority
// =============================================================================
//
// Every SIGNAL passes through a short-circuiting audit before it may become
// a DECISION.  The audit order is fixed:
//
//    1. Kill switch                      -> critical block
//    2. Daily loss limit                 -> trips the kill switch, critical
//    3. Daily trade count                -> high
//    4. Drawdown from peak capital       -> critical
//    5. Regime gates (volatile/choppy/unknown vs confidence)
//    6. Price-zone gates (middle zone, buying highs, selling lows)
//    7. Trap gates (buying into traps, selling panic bottoms)
//    8. Duplicate position (same symbol + side)
//    9. Stop-loss auto-correction (direction + width)
//   10. Risk/reward policy (block below 0.8, warn below 1.2)
//   11. Position sizing against the per-order cap
//   12. Confidence -> risk level mapping
//
// The kill switch is sticky: it survives until a new trading day begins in
// the engine's local timezone or an operator deactivates it.  Every audit,
// pass or block, lands in a bounded audit log.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::execution::ExecutionRecord;
use crate::message::{AgentMessage, MessagePayload};
use crate::regime::{MarketRegime, PriceLocation};
use crate::runtime_config::EngineConfig;
use crate::strategy::Signal;
use crate::types::{Action, SymbolKey};

const AGENT_NAME: &str = "RiskGuardian";

/// Maximum retained audit entries.
const MAX_AUDIT_LOG: usize = 500;

/// Severity attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Result of the audit for one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reason: String,
    pub risk_level: RiskLevel,
    /// Approved size. A value of at least 1 is a share count; a fraction
    /// below 1 means a percentage of the per-order value cap, resolved by
    /// the execution adapter.
    pub position_size: f64,
    pub adjusted_stop_loss: Option<f64>,
    pub adjusted_take_profit: Option<f64>,
    pub warnings: Vec<String>,
}

/// An approved signal with its audit annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    pub verdict: RiskVerdict,
}

/// A denied signal with the blocking reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Veto {
    pub signal: Signal,
    pub reason: String,
    pub risk_level: RiskLevel,
}

/// Out-of-band risk notification (currently only kill-switch activation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_type: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Counters for the status surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockStats {
    pub total_checks: u64,
    pub total_blocks: u64,
    pub regime_blocks: u64,
    pub position_blocks: u64,
    pub trap_blocks: u64,
    pub sl_corrections: u64,
}

/// Snapshot of the guardian's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStatus {
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub open_positions: usize,
    pub peak_capital: f64,
    pub current_capital: f64,
    pub drawdown_pct: f64,
    pub kill_switch: bool,
    pub block_stats: BlockStats,
}

#[derive(Debug, Clone, Serialize)]
struct AuditEntry {
    timestamp: DateTime<Utc>,
    symbol: String,
    action: String,
    confidence: f64,
    result: &'static str,
    detail: String,
}

/// The Guardian.
pub struct RiskGuardian {
    max_position_size: f64,
    max_daily_loss: f64,
    max_trades_per_day: u32,
    max_drawdown_pct: f64,
    default_stop_loss_pct: f64,
    min_risk_reward_block: f64,
    min_risk_reward_warn: f64,

    daily_pnl: f64,
    daily_trades: u32,
    current_date: NaiveDate,
    open_positions: HashMap<SymbolKey, Action>,
    peak_capital: f64,
    current_capital: f64,
    kill_switch_active: bool,

    audit_log: Vec<AuditEntry>,
    block_stats: BlockStats,
}

impl RiskGuardian {
    pub fn new(config: &EngineConfig) -> Self {
        info!(
            max_daily_loss = config.max_daily_loss,
            max_trades_per_day = config.max_trades_per_day,
            max_drawdown_pct = config.max_drawdown_pct,
            "risk guardian initialised"
        );
        Self {
            max_position_size: config.max_position_size,
            max_daily_loss: config.max_daily_loss,
            max_trades_per_day: config.max_trades_per_day,
            max_drawdown_pct: config.max_drawdown_pct,
            default_stop_loss_pct: config.default_stop_loss_pct,
            min_risk_reward_block: config.min_risk_reward_block,
            min_risk_reward_warn: config.min_risk_reward_warn,
            daily_pnl: 0.0,
            daily_trades: 0,
            current_date: Local::now().date_naive(),
            open_positions: HashMap::new(),
            peak_capital: config.initial_capital,
            current_capital: config.initial_capital,
            kill_switch_active: false,
            audit_log: Vec::new(),
            block_stats: BlockStats::default(),
        }
    }

    /// Audit a batch of signals, producing DECISION / VETO / RISK_ALERT
    /// messages in input order.
    pub fn process_signals(&mut self, signals: Vec<Signal>) -> Vec<AgentMessage> {
        let mut messages = Vec::new();
        for signal in signals {
            let (verdict, alert) = self.evaluate_signal(&signal);
            if let Some(alert) = alert {
                messages.push(
                    AgentMessage::new(AGENT_NAME, MessagePayload::RiskAlert(alert))
                        .with_priority(1),
                );
            }
            if verdict.approved {
                messages.push(
                    AgentMessage::new(
                        AGENT_NAME,
                        MessagePayload::Decision(Decision { signal, verdict }),
                    )
                    .with_priority(2),
                );
            } else {
                messages.push(
                    AgentMessage::new(
                        AGENT_NAME,
                        MessagePayload::Veto(Veto {
                            reason: verdict.reason.clone(),
                            risk_level: verdict.risk_level,
                            signal,
                        }),
                    )
                    .with_priority(1),
                );
            }
        }
        messages
    }

    /// Run the full audit for one signal.
    ///
    /// Returns the verdict plus a kill-switch alert when this evaluation
    /// tripped it.  Running the audit twice against unchanged guardian state
    /// yields the same verdict.
    pub fn evaluate_signal(&mut self, signal: &Signal) -> (RiskVerdict, Option<RiskAlert>) {
        self.maybe_reset_daily(Local::now().date_naive());
        self.block_stats.total_checks += 1;

        let action = signal.action;
        let confidence = signal.confidence;
        let entry = signal.entry_price;

        // --- 1. Kill switch -------------------------------------------------
        if self.kill_switch_active {
            return (self.block(signal, "Kill switch active", RiskLevel::Critical), None);
        }

        // --- 2. Daily loss limit -------------------------------------------
        if self.daily_pnl <= -self.max_daily_loss {
            let alert = self.activate_kill_switch("Daily loss limit exceeded");
            let verdict = self.block(
                signal,
                format!("Daily loss limit: {:.2}", self.daily_pnl.abs()),
                RiskLevel::Critical,
            );
            return (verdict, Some(alert));
        }

        // --- 3. Daily trade limit ------------------------------------------
        if self.daily_trades >= self.max_trades_per_day {
            return (
                self.block(
                    signal,
                    format!("Daily trade limit: {}", self.daily_trades),
                    RiskLevel::High,
                ),
                None,
            );
        }

        // --- 4. Drawdown ----------------------------------------------------
        if self.peak_capital > 0.0 {
            let dd = (self.peak_capital - self.current_capital) / self.peak_capital * 100.0;
            if dd >= self.max_drawdown_pct {
                return (
                    self.block(signal, format!("Max drawdown: {dd:.2}%"), RiskLevel::Critical),
                    None,
                );
            }
        }

        // --- 5. Regime gates ------------------------------------------------
        let regime = signal.regime.regime;
        let pct = confidence * 100.0;
        let regime_block = match regime {
            MarketRegime::Volatile if confidence < 0.70 => Some((
                format!("Volatile market + low confidence ({pct:.0}%)"),
                RiskLevel::High,
            )),
            MarketRegime::Choppy if confidence < 0.65 => Some((
                format!("Choppy market + low confidence ({pct:.0}%)"),
                RiskLevel::High,
            )),
            MarketRegime::Unknown if confidence < 0.60 => Some((
                format!("Unknown regime + low confidence ({pct:.0}%)"),
                RiskLevel::Medium,
            )),
            MarketRegime::VolatileDirectionless if confidence < 0.70 => Some((
                format!("Directionless market ({pct:.0}%)"),
                RiskLevel::High,
            )),
            _ => None,
        };
        if let Some((reason, level)) = regime_block {
            self.block_stats.regime_blocks += 1;
            return (self.block(signal, reason, level), None);
        }

        // --- 6. Price-zone gates -------------------------------------------
        let pos_pct = signal.position.pct;
        let location = signal.position.location;
        if location == PriceLocation::Middle && confidence < 0.70 {
            self.block_stats.position_blocks += 1;
            return (
                self.block(
                    signal,
                    format!("Price in middle zone ({pos_pct:.0}%), poor R/R"),
                    RiskLevel::Medium,
                ),
                None,
            );
        }
        if action == Action::Buy && pos_pct > 80.0 && confidence < 0.75 {
            self.block_stats.position_blocks += 1;
            return (
                self.block(
                    signal,
                    format!("BUY at high position ({pos_pct:.0}%), pullback risk"),
                    RiskLevel::High,
                ),
                None,
            );
        }
        if action == Action::Sell && pos_pct < 20.0 && confidence < 0.75 {
            self.block_stats.position_blocks += 1;
            return (
                self.block(
                    signal,
                    format!("SELL at low position ({pos_pct:.0}%), bounce risk"),
                    RiskLevel::High,
                ),
                None,
            );
        }

        // --- 7. Trap gates --------------------------------------------------
        let traps = &signal.traps;
        let trap_block = if action == Action::Buy && traps.bull_trap_risk {
            Some("Bull trap detected - rapid rise slow fall pattern")
        } else if action == Action::Buy && traps.volume_divergence {
            Some("Volume divergence at high - possible distribution")
        } else if action == Action::Buy && traps.fomo_top {
            Some("FOMO top detected - overbought + high volume")
        } else if action == Action::Sell && traps.panic_bottom {
            Some("Panic bottom detected - oversold + high volume")
        } else {
            None
        };
        if let Some(reason) = trap_block {
            self.block_stats.trap_blocks += 1;
            return (self.block(signal, reason, RiskLevel::High), None);
        }

        // --- 8. Duplicate position -----------------------------------------
        if let Some(existing) = self.open_positions.get(&signal.symbol) {
            if *existing == action {
                return (
                    self.block(
                        signal,
                        format!("Already have {action} position in {}", signal.symbol),
                        RiskLevel::Medium,
                    ),
                    None,
                );
            }
        }

        let mut warnings = Vec::new();
        let mut risk_level = RiskLevel::Low;

        // --- 9. Stop-loss auto-correction ----------------------------------
        let mut adjusted_sl = signal.stop_loss;
        if entry > 0.0 && action.is_tradeable() {
            let corrected = self.fix_sl_direction(action, entry, adjusted_sl);
            if (corrected - adjusted_sl).abs() > f64::EPSILON {
                warnings.push(format!("SL corrected: {adjusted_sl:.2} → {corrected:.2}"));
                self.block_stats.sl_corrections += 1;
                adjusted_sl = corrected;
            }

            // Excessively wide stops get pulled in.
            let sl_pct = (entry - adjusted_sl).abs() / entry * 100.0;
            if sl_pct > self.default_stop_loss_pct * 2.5 {
                let capped_pct = self.default_stop_loss_pct * 2.0;
                adjusted_sl = match action {
                    Action::Buy => entry * (1.0 - capped_pct / 100.0),
                    _ => entry * (1.0 + capped_pct / 100.0),
                };
                warnings.push(format!("SL too wide ({sl_pct:.1}%), auto-corrected"));
            }
        }

        // --- 10. Risk/reward ------------------------------------------------
        let tp = signal.take_profit;
        if entry > 0.0 && tp > 0.0 {
            let risk = (entry - adjusted_sl).abs();
            let reward = (tp - entry).abs();
            if risk > 0.0 {
                let rr = reward / risk;
                if rr < self.min_risk_reward_block {
                    return (
                        self.block(signal, format!("R/R ratio too low ({rr:.2})"), RiskLevel::Medium),
                        None,
                    );
                }
                if rr < self.min_risk_reward_warn {
                    warnings.push(format!("Poor R/R ratio ({rr:.2})"));
                }
            }
        }

        // --- 11. Position sizing -------------------------------------------
        let mut position_size = signal.quantity.max(1) as f64;
        if entry > 0.0 && entry * position_size > self.max_position_size {
            position_size = (self.max_position_size / entry).floor().max(1.0);
            risk_level = risk_level.max(RiskLevel::Medium);
            warnings.push(format!("Position shrunk to {position_size} by value cap"));
        }

        // --- 12. Confidence mapping ----------------------------------------
        if confidence < 0.5 {
            risk_level = risk_level.max(RiskLevel::High);
        } else if confidence < 0.7 {
            risk_level = risk_level.max(RiskLevel::Medium);
        }

        self.log_audit(signal, "PASSED", warnings.join("; "));

        (
            RiskVerdict {
                approved: true,
                reason: String::new(),
                risk_level,
                position_size,
                adjusted_stop_loss: Some(adjusted_sl),
                adjusted_take_profit: Some(tp),
                warnings,
            },
            None,
        )
    }

    /// Track an executed trade: counters, capital, open-position set.
    pub fn record_execution(&mut self, record: &ExecutionRecord) {
        self.maybe_reset_daily(Local::now().date_naive());
        if !record.success {
            return;
        }

        self.daily_trades += 1;
        self.daily_pnl += record.pnl;
        self.current_capital += record.pnl;
        if self.current_capital > self.peak_capital {
            self.peak_capital = self.current_capital;
        }

        if record.is_open {
            self.open_positions
                .insert(record.symbol.clone(), record.action);
        } else {
            self.open_positions.remove(&record.symbol);
        }
    }

    /// Operator control: clear the kill switch without waiting for rollover.
    pub fn deactivate_kill_switch(&mut self) {
        self.kill_switch_active = false;
        info!("kill switch deactivated by operator");
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch_active
    }

    pub fn status(&self) -> RiskStatus {
        let drawdown_pct = if self.peak_capital > 0.0 {
            (self.peak_capital - self.current_capital) / self.peak_capital * 100.0
        } else {
            0.0
        };
        RiskStatus {
            daily_pnl: self.daily_pnl,
            daily_trades: self.daily_trades,
            open_positions: self.open_positions.len(),
            peak_capital: self.peak_capital,
            current_capital: self.current_capital,
            drawdown_pct,
            kill_switch: self.kill_switch_active,
            block_stats: self.block_stats.clone(),
        }
    }

    pub fn audit_log_len(&self) -> usize {
        self.audit_log.len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn fix_sl_direction(&self, action: Action, entry: f64, sl: f64) -> f64 {
        match action {
            Action::Buy if sl >= entry => entry * (1.0 - self.default_stop_loss_pct / 100.0),
            Action::Sell if sl <= entry => entry * (1.0 + self.default_stop_loss_pct / 100.0),
            _ => sl,
        }
    }

    fn activate_kill_switch(&mut self, reason: &str) -> RiskAlert {
        self.kill_switch_active = true;
        warn!(reason, "KILL SWITCH ACTIVATED");
        RiskAlert {
            alert_type: "kill_switch".to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn block(
        &mut self,
        signal: &Signal,
        reason: impl Into<String>,
        risk_level: RiskLevel,
    ) -> RiskVerdict {
        let reason = reason.into();
        self.block_stats.total_blocks += 1;
        self.log_audit(signal, "BLOCKED", reason.clone());
        warn!(symbol = %signal.symbol, reason = %reason, level = ?risk_level, "signal vetoed");
        RiskVerdict {
            approved: false,
            reason,
            risk_level,
            position_size: 0.0,
            adjusted_stop_loss: None,
            adjusted_take_profit: None,
            warnings: Vec::new(),
        }
    }

    fn log_audit(&mut self, signal: &Signal, result: &'static str, detail: String) {
        self.audit_log.push(AuditEntry {
            timestamp: Utc::now(),
            symbol: signal.symbol.to_string(),
            action: signal.action.to_string(),
            confidence: signal.confidence,
            result,
            detail,
        });
        while self.audit_log.len() > MAX_AUDIT_LOG {
            self.audit_log.remove(0);
        }
    }

    /// Reset daily counters when the local calendar date rolls over.  The
    /// kill switch clears with the new day.
    fn maybe_reset_daily(&mut self, today: NaiveDate) {
        if self.current_date == today {
            return;
        }
        info!(
            old_date = %self.current_date,
            new_date = %today,
            "date rolled, resetting daily risk counters"
        );
        self.current_date = today;
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        self.kill_switch_active = false;
    }

    #[cfg(test)]
    fn set_current_date_for_test(&mut self, date: NaiveDate) {
        self.current_date = date;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{PricePosition, RegimeSnapshot, TrendDirection};
    use crate::strategy::SignalSource;
    use crate::traps::TrapFlags;

    fn regime(kind: MarketRegime, confidence: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            regime: kind,
            confidence,
            adx: 25.0,
            bb_width_pct: 2.0,
            atr_pct: 1.0,
            trend_direction: TrendDirection::Up,
            reason: String::new(),
            position: PricePosition {
                pct: 55.0,
                location: PriceLocation::Middle,
            },
            choppy_analysis: None,
        }
    }

    fn signal(action: Action, confidence: f64) -> Signal {
        Signal {
            action,
            symbol: SymbolKey::nse("RELIANCE"),
            confidence,
            entry_price: 100.0,
            stop_loss: 98.5,
            take_profit: 104.0,
            quantity: 1,
            regime: regime(MarketRegime::TrendingUp, 85.0),
            position: PricePosition {
                pct: 55.0,
                location: PriceLocation::Middle,
            },
            traps: TrapFlags::default(),
            reasoning: String::new(),
            source: SignalSource::RuleBased,
        }
    }

    fn guardian() -> RiskGuardian {
        RiskGuardian::new(&EngineConfig::default())
    }

    fn exec_record(pnl: f64, is_open: bool) -> ExecutionRecord {
        ExecutionRecord {
            trade_id: "t1".into(),
            success: true,
            order_id: Some("o1".into()),
            symbol: SymbolKey::nse("RELIANCE"),
            action: Action::Buy,
            fill_price: 100.0,
            quantity: 1,
            status: "FILLED".into(),
            timestamp: Utc::now(),
            sl_order_id: None,
            pnl,
            is_open,
            error: None,
        }
    }

    #[test]
    fn healthy_signal_is_approved() {
        let mut g = guardian();
        let (verdict, alert) = g.evaluate_signal(&signal(Action::Buy, 0.85));
        assert!(verdict.approved, "{}", verdict.reason);
        assert!(alert.is_none());
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!((verdict.position_size - 1.0).abs() < f64::EPSILON);
        assert_eq!(verdict.adjusted_stop_loss, Some(98.5));
    }

    #[test]
    fn volatile_regime_blocks_low_confidence() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.65);
        s.regime = regime(MarketRegime::Volatile, 80.0);
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Volatile market + low confidence"));
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[test]
    fn buy_at_high_position_is_blocked() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.72);
        s.position = PricePosition {
            pct: 88.0,
            location: PriceLocation::High,
        };
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("BUY at high position (88%)"), "{}", verdict.reason);
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[test]
    fn middle_zone_blocks_below_070() {
        let mut g = guardian();
        let s = signal(Action::Buy, 0.65);
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("middle zone"));
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn sl_direction_is_auto_corrected() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.entry_price = 200.0;
        s.stop_loss = 210.0; // wrong side for a BUY
        s.take_profit = 220.0;
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved, "{}", verdict.reason);
        assert_eq!(verdict.adjusted_stop_loss, Some(196.0));
        assert!(verdict
            .warnings
            .iter()
            .any(|w| w == "SL corrected: 210.00 → 196.00"));
        // RR recalculated against the corrected SL: 20 / 4 = 5.0, no warning.
        assert!(!verdict.warnings.iter().any(|w| w.contains("Poor R/R")));
    }

    #[test]
    fn wide_sl_is_tightened() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.entry_price = 100.0;
        s.stop_loss = 90.0; // 10% away; cap is 2.5 * 2% = 5%
        s.take_profit = 112.0;
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved, "{}", verdict.reason);
        // Tightened to 2 * 2% = 4% below entry.
        assert_eq!(verdict.adjusted_stop_loss, Some(96.0));
        assert!(verdict.warnings.iter().any(|w| w.contains("SL too wide")));
    }

    #[test]
    fn poor_rr_blocks() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.entry_price = 100.0;
        s.stop_loss = 95.0;
        s.take_profit = 102.0; // reward 2, risk 5: rr 0.4 < 0.8
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("R/R ratio too low"));
    }

    #[test]
    fn marginal_rr_warns() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.entry_price = 100.0;
        s.stop_loss = 98.0;
        s.take_profit = 102.0; // rr 1.0: above block, below warn
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved);
        assert!(verdict.warnings.iter().any(|w| w.contains("Poor R/R")));
    }

    #[test]
    fn kill_switch_trips_on_daily_loss_and_stays() {
        let mut g = guardian();
        g.record_execution(&exec_record(-10_050.0, false));

        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let (verdict, alert) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
        let alert = alert.expect("kill switch alert");
        assert_eq!(alert.alert_type, "kill_switch");

        // Subsequent evaluations block on the sticky switch, no new alert.
        let (verdict, alert) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert_eq!(verdict.reason, "Kill switch active");
        assert!(alert.is_none());
        assert!(g.kill_switch_active());
    }

    #[test]
    fn operator_can_clear_kill_switch() {
        let mut g = guardian();
        g.record_execution(&exec_record(-10_050.0, false));
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let _ = g.evaluate_signal(&s);
        assert!(g.kill_switch_active());

        g.deactivate_kill_switch();
        assert!(!g.kill_switch_active());
        // Still blocked by the daily loss limit itself (PnL unchanged), which
        // re-trips the switch.
        let (verdict, alert) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(alert.is_some());
    }

    #[test]
    fn day_rollover_resets_counters_and_kill_switch() {
        let mut g = guardian();
        g.record_execution(&exec_record(-10_050.0, false));
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let _ = g.evaluate_signal(&s);
        assert!(g.kill_switch_active());
        assert_eq!(g.status().daily_trades, 1);

        // Pretend the guardian last saw yesterday.
        g.set_current_date_for_test(
            Local::now().date_naive().pred_opt().expect("yesterday exists"),
        );
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved, "{}", verdict.reason);
        assert_eq!(g.status().daily_trades, 0);
        assert!(!g.kill_switch_active());
    }

    #[test]
    fn trade_limit_blocks() {
        let mut g = guardian();
        for _ in 0..20 {
            g.record_execution(&exec_record(10.0, false));
        }
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Daily trade limit"));
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[test]
    fn drawdown_blocks_critically() {
        // Lose 6% of capital without tripping the daily loss first.
        let config = EngineConfig {
            max_daily_loss: 1_000_000.0,
            ..Default::default()
        };
        let mut g = RiskGuardian::new(&config);
        g.record_execution(&exec_record(-60_000.0, false));

        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Max drawdown"));
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn duplicate_position_blocks() {
        let mut g = guardian();
        g.record_execution(&exec_record(0.0, true));

        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Already have BUY position"));

        // Opposite side (an exit) is not a duplicate.
        let mut s = signal(Action::Sell, 0.85);
        s.position = PricePosition {
            pct: 55.0,
            location: PriceLocation::Low,
        };
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved, "{}", verdict.reason);
    }

    #[test]
    fn buying_into_fomo_top_blocks() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        s.traps.fomo_top = true;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("FOMO top"));
    }

    #[test]
    fn oversized_order_is_shrunk() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.entry_price = 2_500.0;
        s.stop_loss = 2_450.0;
        s.take_profit = 2_650.0;
        s.quantity = 100; // 250_000 value > 100_000 cap
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        assert!(verdict.approved, "{}", verdict.reason);
        assert!((verdict.position_size - 40.0).abs() < f64::EPSILON);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn unknown_regime_with_decent_confidence_passes_the_gate() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.62);
        s.regime = regime(MarketRegime::Unknown, 30.0);
        s.position.location = PriceLocation::Low;
        let (verdict, _) = g.evaluate_signal(&s);
        // 0.62 >= 0.60: not blocked by the regime gate; approved with a
        // medium level from the confidence mapping.
        assert!(verdict.approved, "{}", verdict.reason);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn verdict_is_stable_for_same_inputs() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        let (v1, _) = g.evaluate_signal(&s);
        let (v2, _) = g.evaluate_signal(&s);
        assert_eq!(v1.approved, v2.approved);
        assert_eq!(v1.risk_level, v2.risk_level);
        assert_eq!(v1.adjusted_stop_loss, v2.adjusted_stop_loss);
        assert_eq!(v1.position_size, v2.position_size);
    }

    #[test]
    fn audit_log_is_bounded() {
        let mut g = guardian();
        let mut s = signal(Action::Buy, 0.85);
        s.position.location = PriceLocation::Low;
        for _ in 0..600 {
            let _ = g.evaluate_signal(&s);
        }
        assert_eq!(g.audit_log_len(), 500);
    }
}
