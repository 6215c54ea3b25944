// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Indian market exchanges the engine knows about.
///
/// The core decision path only reasons about cash equity on NSE/BSE; the
/// remaining segments exist so broker payloads round-trip without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Exchange {
    NSE,
    BSE,
    NFO,
    BFO,
    MCX,
    CDS,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::NSE
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NSE => "NSE",
            Self::BSE => "BSE",
            Self::NFO => "NFO",
            Self::BFO => "BFO",
            Self::MCX => "MCX",
            Self::CDS => "CDS",
        };
        write!(f, "{s}")
    }
}

/// Canonical symbol identifier: `(exchange, symbol)`.
///
/// Ordered so that per-cycle fan-out can iterate symbols deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub exchange: Exchange,
    pub symbol: String,
}

impl SymbolKey {
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
        }
    }

    /// NSE shorthand, the common case for the default watchlist.
    pub fn nse(symbol: impl Into<String>) -> Self {
        Self::new(Exchange::NSE, symbol)
    }
}

impl std::fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Candle interval. The decision path uses M5 / M15 / H1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M10,
    M15,
    M30,
    H1,
    D1,
}

impl Timeframe {
    /// Interval length in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M10 => 10,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::D1 => 1440,
        }
    }

    /// Timeframes consumed by the strategy pipeline, slowest first.
    pub fn decision_set() -> [Timeframe; 3] {
        [Self::H1, Self::M15, Self::M5]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M10 => "10m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

/// Strategy verdict for one symbol in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn is_tradeable(self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Whether the engine routes orders to a live broker or the paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paper,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paper => write!(f, "Paper"),
        }
    }
}
