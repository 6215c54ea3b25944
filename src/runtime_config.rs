// =============================================================================
// Engine Configuration — Hot-reloadable settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian engine.  Every tunable lives
// here so the engine can be reconfigured at runtime without a restart.
// The supervisor snapshots the config once at the start of each cycle, so a
// concurrent edit never tears a cycle.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{SymbolKey, Timeframe, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_max_position_size() -> f64 {
    100_000.0
}

fn default_max_daily_loss() -> f64 {
    10_000.0
}

fn default_max_trades_per_day() -> u32 {
    20
}

fn default_max_drawdown_pct() -> f64 {
    5.0
}

fn default_stop_loss_pct() -> f64 {
    2.0
}

fn default_reflection_trigger() -> u32 {
    10
}

fn default_min_risk_reward_block() -> f64 {
    0.8
}

fn default_min_risk_reward_warn() -> f64 {
    1.2
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_quote_timeout_secs() -> u64 {
    30
}

fn default_historical_timeout_secs() -> u64 {
    60
}

fn default_sim_seed() -> u64 {
    7
}

fn default_symbols() -> Vec<SymbolKey> {
    ["RELIANCE", "TCS", "INFY", "HDFCBANK", "ICICIBANK"]
        .iter()
        .map(|s| SymbolKey::nse(*s))
        .collect()
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M5, Timeframe::M15, Timeframe::H1]
}

// =============================================================================
// VoteWeights
// =============================================================================

/// Fixed weights for the multi-timeframe weighted vote.
///
/// The 1h trend dominates by design; the prophet (rule-based predictor) is a
/// small tie-breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteWeights {
    #[serde(default = "VoteWeights::w_trend_5m")]
    pub trend_5m: f64,
    #[serde(default = "VoteWeights::w_trend_15m")]
    pub trend_15m: f64,
    #[serde(default = "VoteWeights::w_trend_1h")]
    pub trend_1h: f64,
    #[serde(default = "VoteWeights::w_osc_5m")]
    pub oscillator_5m: f64,
    #[serde(default = "VoteWeights::w_osc_15m")]
    pub oscillator_15m: f64,
    #[serde(default = "VoteWeights::w_osc_1h")]
    pub oscillator_1h: f64,
    #[serde(default = "VoteWeights::w_prophet")]
    pub prophet: f64,
}

impl VoteWeights {
    fn w_trend_5m() -> f64 {
        0.03
    }
    fn w_trend_15m() -> f64 {
        0.12
    }
    fn w_trend_1h() -> f64 {
        0.30
    }
    fn w_osc_5m() -> f64 {
        0.03
    }
    fn w_osc_15m() -> f64 {
        0.07
    }
    fn w_osc_1h() -> f64 {
        0.10
    }
    fn w_prophet() -> f64 {
        0.05
    }
}

impl Default for VoteWeights {
    fn default() -> Self {
        Self {
            trend_5m: Self::w_trend_5m(),
            trend_15m: Self::w_trend_15m(),
            trend_1h: Self::w_trend_1h(),
            oscillator_5m: Self::w_osc_5m(),
            oscillator_15m: Self::w_osc_15m(),
            oscillator_1h: Self::w_osc_1h(),
            prophet: Self::w_prophet(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Operational mode ----------------------------------------------------

    /// Whether orders go to a live broker or the paper broker.
    #[serde(default)]
    pub trading_mode: TradingMode,

    // --- Watchlist -----------------------------------------------------------

    /// Symbols the engine watches and trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolKey>,

    /// Candle intervals maintained per symbol.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    // --- Supervisor ----------------------------------------------------------

    /// Supervisor tick period in seconds.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Number of executed trades between retrospection runs.
    #[serde(default = "default_reflection_trigger")]
    pub reflection_trigger: u32,

    // --- Strategy ------------------------------------------------------------

    /// Minimum calibrated confidence for a SIGNAL to be emitted.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Weights for the multi-timeframe weighted vote.
    #[serde(default)]
    pub vote_weights: VoteWeights,

    // --- Risk ----------------------------------------------------------------

    /// Per-order value cap in INR.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Cumulative daily loss (INR) that trips the kill switch.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Maximum executed trades per day.
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,

    /// Peak-to-trough drawdown percentage that blocks new opens.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Baseline stop-loss distance as a percentage of entry.
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,

    /// Reward/risk below this is vetoed outright.
    #[serde(default = "default_min_risk_reward_block")]
    pub min_risk_reward_block: f64,

    /// Reward/risk below this passes with a warning.
    #[serde(default = "default_min_risk_reward_warn")]
    pub min_risk_reward_warn: f64,

    /// Starting capital for paper fills and drawdown tracking.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    // --- External I/O deadlines ----------------------------------------------

    /// Deadline for a single quote fetch.
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,

    /// Deadline for a historical candle fetch.
    #[serde(default = "default_historical_timeout_secs")]
    pub historical_timeout_secs: u64,

    // --- Simulation ----------------------------------------------------------

    /// Seed for the simulated random-walk generator. Identical seeds replay
    /// identical market snapshots.
    #[serde(default = "default_sim_seed")]
    pub sim_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paper,
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            cycle_interval_secs: default_cycle_interval_secs(),
            reflection_trigger: default_reflection_trigger(),
            min_confidence: default_min_confidence(),
            vote_weights: VoteWeights::default(),
            max_position_size: default_max_position_size(),
            max_daily_loss: default_max_daily_loss(),
            max_trades_per_day: default_max_trades_per_day(),
            max_drawdown_pct: default_max_drawdown_pct(),
            default_stop_loss_pct: default_stop_loss_pct(),
            min_risk_reward_block: default_min_risk_reward_block(),
            min_risk_reward_warn: default_min_risk_reward_warn(),
            initial_capital: default_initial_capital(),
            quote_timeout_secs: default_quote_timeout_secs(),
            historical_timeout_secs: default_historical_timeout_secs(),
            sim_seed: default_sim_seed(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            trading_mode = %config.trading_mode,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
