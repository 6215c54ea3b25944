// =============================================================================
// Reflection — rule-based trade retrospection
// =============================================================================
//
// Every N executed trades the supervisor hands the most recent records to
// the reflection agent, which distills win rate, average win/loss, and net
// PnL into winning/losing pattern notes and recommendations.  Output is
// commentary only: it is broadcast as a STATE_UPDATE and never feeds back
// into the current cycle.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::execution::ExecutionRecord;

/// Minimum trades before a reflection is worth producing.
const MIN_TRADES: usize = 3;

/// Result of one retrospection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub reflection_id: String,
    pub trades_analyzed: usize,
    pub timestamp: String,
    pub summary: String,
    pub winning_conditions: Vec<String>,
    pub losing_conditions: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence_calibration: String,
}

/// The Philosopher.
pub struct ReflectionAgent {
    trigger_count: u32,
    reflection_count: u32,
    last_reflected_count: u64,
    last_reflection: Option<ReflectionResult>,
}

impl ReflectionAgent {
    pub fn new(trigger_count: u32) -> Self {
        Self {
            trigger_count,
            reflection_count: 0,
            last_reflected_count: 0,
            last_reflection: None,
        }
    }

    /// Whether enough new trades have executed since the last reflection.
    pub fn should_reflect(&self, total_trades: u64) -> bool {
        total_trades.saturating_sub(self.last_reflected_count) >= self.trigger_count as u64
    }

    pub fn latest(&self) -> Option<&ReflectionResult> {
        self.last_reflection.as_ref()
    }

    /// Analyze the given trades (most recent window, oldest first).
    ///
    /// Returns `None` when fewer than three trades are available.
    pub fn generate_reflection(&mut self, trades: &[ExecutionRecord]) -> Option<ReflectionResult> {
        if trades.len() < MIN_TRADES {
            return None;
        }

        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut win_pnls = Vec::new();
        let mut loss_pnls = Vec::new();
        let mut total_pnl = 0.0;

        for trade in trades {
            let pnl = trade.pnl;
            total_pnl += pnl;
            if pnl > 0.0 {
                wins += 1;
                win_pnls.push(pnl);
            } else if pnl < 0.0 {
                losses += 1;
                loss_pnls.push(pnl.abs());
            }
        }

        let decided = wins + losses;
        let total = if decided > 0 { decided } else { trades.len() };
        let win_rate = if total > 0 {
            wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let avg_win = mean(&win_pnls);
        let avg_loss = mean(&loss_pnls);

        let mut winning = Vec::new();
        let mut losing = Vec::new();
        let mut recommendations = Vec::new();

        if win_rate >= 55.0 {
            winning.push("Win rate above 55%, current filters are effective".to_string());
        }
        if avg_win > avg_loss && avg_win > 0.0 {
            winning.push("Average win exceeds average loss, healthy risk-reward".to_string());
        }

        if win_rate <= 45.0 {
            losing.push("Win rate below 45%, edge is weak".to_string());
        }
        if avg_loss > avg_win {
            losing.push("Average loss exceeds average win, tighten stops".to_string());
        }
        if total_pnl < 0.0 {
            losing.push("Net negative PnL in recent trades".to_string());
        }

        if win_rate < 50.0 {
            recommendations.push("Tighten entry filters, reduce low-confidence trades".to_string());
        }
        if avg_loss > avg_win {
            recommendations
                .push("Improve risk-reward: trim size or wait for cleaner setups".to_string());
        }
        if recommendations.is_empty() {
            recommendations
                .push("Maintain discipline; prioritize high-conviction setups".to_string());
        }

        let summary = format!(
            "{total} trades: win rate {win_rate:.1}%, avg win {avg_win:.2}, \
             avg loss {avg_loss:.2}, total PnL {total_pnl:.2}"
        );

        let confidence_calibration = if total < 10 {
            "Calibration requires more data".to_string()
        } else if win_rate > 50.0 {
            "Confidence aligned".to_string()
        } else {
            "Confidence needs recalibration".to_string()
        };

        self.reflection_count += 1;
        self.last_reflected_count += trades.len() as u64;

        let result = ReflectionResult {
            reflection_id: format!("ref_{:03}", self.reflection_count),
            trades_analyzed: trades.len(),
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            summary: summary.clone(),
            winning_conditions: winning,
            losing_conditions: losing,
            recommendations,
            confidence_calibration,
        };

        info!(id = %result.reflection_id, summary = %summary, "reflection complete");
        self.last_reflection = Some(result.clone());
        Some(result)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, SymbolKey};

    fn trade(pnl: f64) -> ExecutionRecord {
        ExecutionRecord {
            trade_id: "t".into(),
            success: true,
            order_id: Some("o".into()),
            symbol: SymbolKey::nse("TCS"),
            action: Action::Buy,
            fill_price: 100.0,
            quantity: 1,
            status: "FILLED".into(),
            timestamp: Utc::now(),
            sl_order_id: None,
            pnl,
            is_open: false,
            error: None,
        }
    }

    #[test]
    fn trigger_counts_new_trades_only() {
        let mut agent = ReflectionAgent::new(10);
        assert!(!agent.should_reflect(9));
        assert!(agent.should_reflect(10));

        let trades: Vec<ExecutionRecord> = (0..10).map(|_| trade(5.0)).collect();
        agent.generate_reflection(&trades).unwrap();
        // 10 trades consumed: the next reflection needs 10 more.
        assert!(!agent.should_reflect(15));
        assert!(agent.should_reflect(20));
    }

    #[test]
    fn too_few_trades_yields_none() {
        let mut agent = ReflectionAgent::new(10);
        assert!(agent.generate_reflection(&[trade(1.0), trade(2.0)]).is_none());
    }

    #[test]
    fn winning_run_produces_positive_patterns() {
        let mut agent = ReflectionAgent::new(10);
        let trades: Vec<ExecutionRecord> =
            (0..10).map(|i| trade(if i < 7 { 50.0 } else { -20.0 })).collect();
        let result = agent.generate_reflection(&trades).unwrap();
        assert!(result.summary.contains("win rate 70.0%"));
        assert!(!result.winning_conditions.is_empty());
        assert_eq!(result.confidence_calibration, "Confidence aligned");
        assert_eq!(result.reflection_id, "ref_001");
    }

    #[test]
    fn losing_run_recommends_tightening() {
        let mut agent = ReflectionAgent::new(10);
        let trades: Vec<ExecutionRecord> =
            (0..10).map(|i| trade(if i < 3 { 20.0 } else { -60.0 })).collect();
        let result = agent.generate_reflection(&trades).unwrap();
        assert!(result.losing_conditions.iter().any(|c| c.contains("edge is weak")));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("Tighten entry filters")));
        assert_eq!(result.confidence_calibration, "Confidence needs recalibration");
    }

    #[test]
    fn reflection_ids_increment() {
        let mut agent = ReflectionAgent::new(5);
        let trades: Vec<ExecutionRecord> = (0..5).map(|_| trade(5.0)).collect();
        let first = agent.generate_reflection(&trades).unwrap();
        let second = agent.generate_reflection(&trades).unwrap();
        assert_eq!(first.reflection_id, "ref_001");
        assert_eq!(second.reflection_id, "ref_002");
        assert!(agent.latest().is_some());
    }

    #[test]
    fn small_sample_flags_calibration() {
        let mut agent = ReflectionAgent::new(10);
        let trades: Vec<ExecutionRecord> = (0..4).map(|_| trade(5.0)).collect();
        let result = agent.generate_reflection(&trades).unwrap();
        assert_eq!(result.confidence_calibration, "Calibration requires more data");
    }
}
