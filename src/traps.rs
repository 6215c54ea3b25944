// =============================================================================
// Trap Detection — reversal patterns against the apparent trend
// =============================================================================
//
// Inspects the 1h indicator bundle together with the live price for patterns
// that historically punish trend-followers:
//
//   panic_bottom      — price under the lower band, RSI < 25, volume > 2x
//                       (capitulation; fading the panic beats selling it)
//   fomo_top          — price over the upper band, RSI > 75, volume > 2x
//   volume_divergence — pressing the upper band on < 0.7x volume
//                       (possible distribution)
//   weak_rebound      — RSI recovering through the 30s on < 0.8x volume
//
// `accumulation` and `bull_trap_risk` are reserved flags a richer analyzer
// may set; consumers treat unset flags as false.

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorBundle;

/// Boolean trap flags for one symbol.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrapFlags {
    pub bull_trap_risk: bool,
    pub weak_rebound: bool,
    pub volume_divergence: bool,
    pub accumulation: bool,
    pub panic_bottom: bool,
    pub fomo_top: bool,
}

impl TrapFlags {
    pub fn any(&self) -> bool {
        self.bull_trap_risk
            || self.weak_rebound
            || self.volume_divergence
            || self.accumulation
            || self.panic_bottom
            || self.fomo_top
    }

    /// Names of the active flags, for log lines and signal reasoning.
    pub fn active(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.bull_trap_risk {
            flags.push("bull_trap_risk");
        }
        if self.weak_rebound {
            flags.push("weak_rebound");
        }
        if self.volume_divergence {
            flags.push("volume_divergence");
        }
        if self.accumulation {
            flags.push("accumulation");
        }
        if self.panic_bottom {
            flags.push("panic_bottom");
        }
        if self.fomo_top {
            flags.push("fomo_top");
        }
        flags
    }
}

/// Detect trap patterns from the 1h bundle and the last traded price.
///
/// An empty bundle yields no flags; every threshold needs its inputs present.
pub fn detect_traps(bundle: &IndicatorBundle, ltp: f64) -> TrapFlags {
    let mut traps = TrapFlags::default();
    if ltp <= 0.0 {
        return traps;
    }

    let rsi = bundle.rsi_14;
    let rel_vol = bundle.relative_volume;

    if let (Some(lower), Some(rsi), Some(vol)) = (bundle.bb_lower, rsi, rel_vol) {
        if ltp < lower && rsi < 25.0 && vol > 2.0 {
            traps.panic_bottom = true;
        }
    }

    if let (Some(upper), Some(rsi), Some(vol)) = (bundle.bb_upper, rsi, rel_vol) {
        if ltp > upper && rsi > 75.0 && vol > 2.0 {
            traps.fomo_top = true;
        }
    }

    if let (Some(upper), Some(vol)) = (bundle.bb_upper, rel_vol) {
        if ltp > upper * 0.98 && vol < 0.7 {
            traps.volume_divergence = true;
        }
    }

    if let (Some(rsi), Some(vol)) = (rsi, rel_vol) {
        if rsi > 30.0 && rsi < 40.0 && vol < 0.8 {
            traps.weak_rebound = true;
        }
    }

    traps
}
