// =============================================================================
// Regime Module
// =============================================================================
//
// Market-state classification for the 1h timeframe:
// - Regime detector (trend strength score, volatility, price position)
// - Choppy-market deep analysis (squeeze, range, breakout probability)

pub mod choppy;
pub mod detector;

pub use choppy::{analyze_choppy_market, ChoppyAnalysis};
pub use detector::{
    MarketRegime, PriceLocation, PricePosition, RegimeDetector, RegimeSnapshot, TrendDirection,
};
