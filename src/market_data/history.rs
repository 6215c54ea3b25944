// =============================================================================
// Candle History — bounded per-(symbol, timeframe) OHLCV series
// =============================================================================
//
// Thread-safe store for the most recent candles per series.  The Market
// Snapshot agent is the single writer; every other component reads copies.
// Series are append-only with strictly increasing timestamps and are trimmed
// to `max_bars` (200 by default) so memory stays bounded regardless of
// uptime.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{SymbolKey, Timeframe};

/// Default tail length kept per series.
pub const DEFAULT_MAX_BARS: usize = 200;

/// A single OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: SymbolKey,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: SymbolKey, timeframe: Timeframe) -> Self {
        Self { symbol, timeframe }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Thread-safe bounded history store.
pub struct CandleHistory {
    series: RwLock<HashMap<SeriesKey, VecDeque<Candle>>>,
    max_bars: usize,
}

impl CandleHistory {
    pub fn new(max_bars: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Replace a whole series (bulk historical fetch or synthetic backfill).
    /// The tail beyond `max_bars` is dropped.
    pub fn replace(&self, key: SeriesKey, candles: Vec<Candle>) {
        let mut map = self.series.write();
        let mut ring: VecDeque<Candle> = candles.into();
        while ring.len() > self.max_bars {
            ring.pop_front();
        }
        map.insert(key, ring);
    }

    /// Append one candle and trim to the bound.
    ///
    /// A candle whose timestamp does not advance past the current tail is
    /// dropped, preserving the strictly-increasing-timestamp invariant.
    pub fn append(&self, key: SeriesKey, candle: Candle) {
        let mut map = self.series.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_bars + 1));

        if let Some(last) = ring.back() {
            if candle.timestamp <= last.timestamp {
                return;
            }
        }

        ring.push_back(candle);
        while ring.len() > self.max_bars {
            ring.pop_front();
        }
    }

    /// Copy of the series for a key (oldest first); empty when unknown.
    pub fn series(&self, key: &SeriesKey) -> Vec<Candle> {
        let map = self.series.read();
        map.get(key).map_or_else(Vec::new, |ring| ring.iter().cloned().collect())
    }

    /// Number of bars currently stored for a key.
    pub fn len(&self, key: &SeriesKey) -> usize {
        let map = self.series.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// Whether any bars exist for a key.
    pub fn is_empty(&self, key: &SeriesKey) -> bool {
        self.len(key) == 0
    }

    /// Timestamp of the newest bar, if any.
    pub fn last_timestamp(&self, key: &SeriesKey) -> Option<DateTime<Utc>> {
        let map = self.series.read();
        map.get(key).and_then(|ring| ring.back()).map(|c| c.timestamp)
    }
}

impl Default for CandleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BARS)
    }
}
