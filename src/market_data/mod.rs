// =============================================================================
// Market Data Module
// =============================================================================
//
// Everything the snapshot stage needs:
// - Bounded per-(symbol, timeframe) candle history (single writer)
// - Deterministic random-walk simulator for symbols without live data
// - The snapshot agent that assembles quotes + indicator bundles per cycle

pub mod agent;
pub mod history;
pub mod simulator;

pub use agent::{MarketDataAgent, MarketSnapshot, SnapshotSource};
pub use history::{Candle, CandleHistory, SeriesKey, DEFAULT_MAX_BARS};
pub use simulator::MarketSimulator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SymbolKey;

/// Full market quote for one symbol.
///
/// `bid <= ltp <= ask` holds whenever both sides are populated; `simulated`
/// flags synthetic data so downstream consumers can annotate their output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub key: SymbolKey,
    pub ltp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
    pub simulated: bool,
}

/// Test helper: a candle with the given OHLC, epoch timestamp and a fixed
/// volume. Shared by the indicator and strategy test modules.
#[cfg(test)]
pub fn test_candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp: Utc::now(),
        open,
        high,
        low,
        close,
        volume: 100_000,
    }
}
