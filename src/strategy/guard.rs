// =============================================================================
// Overtrading Guard — open-frequency limits and loss cool-downs
// =============================================================================
//
// Prevents frequent trading and consecutive-loss spiraling.  The cycle
// number is the logical clock for all cool-down arithmetic; wall-clock time
// is only consulted for the rolling 6-hour open cap.
//
// Rules:
//   - at least 4 cycles between opens on the same symbol
//   - at most 3 opens in any rolling 6-hour window
//   - after 2 consecutive losing trades, no opens for the next 6 cycles

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::types::{Action, SymbolKey};

/// Minimum cycles between opens on the same symbol.
pub const MIN_CYCLES_SAME_SYMBOL: u64 = 4;
/// Maximum opens in any rolling 6-hour window.
pub const MAX_OPENS_6H: usize = 3;
/// Cycles of cool-down after a loss streak.
pub const LOSS_STREAK_COOLDOWN: u64 = 6;
/// Consecutive losses that trigger the cool-down.
pub const CONSECUTIVE_LOSS_THRESHOLD: u32 = 2;

/// Retained trade records (the 6-hour window never needs more).
const MAX_TRADE_RECORDS: usize = 100;

#[derive(Debug, Clone)]
struct TradeRecord {
    #[allow(dead_code)]
    symbol: SymbolKey,
    #[allow(dead_code)]
    action: Action,
    timestamp: DateTime<Utc>,
    pnl: f64,
}

/// Guard state. One instance per strategy agent.
#[derive(Debug, Default)]
pub struct OvertradingGuard {
    trade_history: Vec<TradeRecord>,
    consecutive_losses: u32,
    last_trade_cycle: HashMap<SymbolKey, u64>,
    cooldown_until_cycle: u64,
}

impl OvertradingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed trade and update the loss streak.
    pub fn record_trade(
        &mut self,
        symbol: SymbolKey,
        action: Action,
        pnl: f64,
        current_cycle: u64,
        now: DateTime<Utc>,
    ) {
        self.trade_history.push(TradeRecord {
            symbol: symbol.clone(),
            action,
            timestamp: now,
            pnl,
        });
        self.prune(now);

        self.last_trade_cycle.insert(symbol, current_cycle);

        if pnl < 0.0 {
            self.consecutive_losses += 1;
            if self.consecutive_losses >= CONSECUTIVE_LOSS_THRESHOLD {
                self.cooldown_until_cycle = current_cycle + LOSS_STREAK_COOLDOWN;
                warn!(
                    consecutive_losses = self.consecutive_losses,
                    cooldown_until_cycle = self.cooldown_until_cycle,
                    "loss streak cool-down engaged"
                );
            }
        } else {
            self.consecutive_losses = 0;
        }
    }

    /// Whether a new open on `symbol` is allowed at `current_cycle`.
    ///
    /// Returns `(allowed, reason)`; the reason explains the first rule that
    /// blocked the open.
    pub fn can_open(
        &self,
        symbol: &SymbolKey,
        current_cycle: u64,
        now: DateTime<Utc>,
    ) -> (bool, String) {
        if current_cycle <= self.cooldown_until_cycle && self.cooldown_until_cycle > 0 {
            let remaining = self.cooldown_until_cycle - current_cycle + 1;
            return (false, format!("Loss cooldown: {remaining} cycles remaining"));
        }

        if let Some(&last) = self.last_trade_cycle.get(symbol) {
            let since = current_cycle.saturating_sub(last);
            if since < MIN_CYCLES_SAME_SYMBOL {
                return (
                    false,
                    format!("{symbol} traded too recently ({since}/{MIN_CYCLES_SAME_SYMBOL} cycles)"),
                );
            }
        }

        let six_h_ago = now - Duration::hours(6);
        let recent = self
            .trade_history
            .iter()
            .filter(|t| t.timestamp > six_h_ago)
            .count();
        if recent >= MAX_OPENS_6H {
            return (
                false,
                format!("Max positions in 6h reached ({recent}/{MAX_OPENS_6H})"),
            );
        }

        (true, "OK".to_string())
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Drop records past the rolling window, and cap the buffer.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(6);
        self.trade_history.retain(|t| t.timestamp > cutoff);
        while self.trade_history.len() > MAX_TRADE_RECORDS {
            self.trade_history.remove(0);
        }
    }
}
