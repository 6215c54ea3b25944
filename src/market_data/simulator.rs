// =============================================================================
// Market Simulator — deterministic per-symbol random walks
// =============================================================================
//
// Generates realistic synthetic quotes and historical candles for any symbol
// the engine cannot source from a live broker.  Each symbol owns a ChaCha8
// RNG seeded from the engine seed plus the symbol name, so two engines with
// the same configuration observe byte-identical market snapshots — the
// property the determinism tests rely on.
//
// Walk parameters follow observed intraday behaviour of Indian large caps:
// ~0.3% per-step drift sigma, ~0.5% intraday range, ~0.05% spread.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::market_data::{Candle, Quote};
use crate::types::{SymbolKey, Timeframe};

/// Realistic base prices for Indian blue-chip stocks.
const BASE_PRICES: &[(&str, f64)] = &[
    ("RELIANCE", 2450.0),
    ("TCS", 3850.0),
    ("INFY", 1580.0),
    ("HDFCBANK", 1620.0),
    ("ICICIBANK", 1050.0),
    ("SBIN", 780.0),
    ("KOTAKBANK", 1750.0),
    ("TATAMOTORS", 720.0),
    ("ONGC", 260.0),
    ("HINDUNILVR", 2350.0),
];

/// Per-step percentage sigma of the random walk.
const WALK_SIGMA_PCT: f64 = 0.3;
/// Intraday range as a fraction of price.
const RANGE_FRACTION: f64 = 0.005;
/// Half-spread as a fraction of price.
const SPREAD_FRACTION: f64 = 0.0005;

/// Historical backfill depth per timeframe.
fn backfill_bars(timeframe: Timeframe) -> usize {
    match timeframe {
        Timeframe::M1 => 60,
        Timeframe::M5 => 100,
        Timeframe::M15 => 80,
        Timeframe::H1 => 50,
        Timeframe::D1 => 30,
        _ => 50,
    }
}

struct SymbolWalk {
    rng: ChaCha8Rng,
    price: f64,
}

/// Persistent random-walk state for all simulated symbols.
pub struct MarketSimulator {
    seed: u64,
    walks: HashMap<SymbolKey, SymbolWalk>,
}

impl MarketSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            walks: HashMap::new(),
        }
    }

    /// Pin a symbol's walk to an externally observed price, so simulated
    /// fallbacks stay continuous with the last live quote.
    pub fn sync_price(&mut self, key: &SymbolKey, price: f64) {
        if price > 0.0 {
            self.walk_for(key.clone()).price = price;
        }
    }

    /// Advance the walk one step and produce a quote.
    pub fn next_quote(&mut self, key: &SymbolKey, now: DateTime<Utc>) -> Quote {
        let walk = self.walk_for(key.clone());

        let change_pct = gauss(&mut walk.rng) * WALK_SIGMA_PCT / 100.0;
        let new_price = round2(walk.price * (1.0 + change_pct));
        walk.price = new_price;

        let volatility = new_price * RANGE_FRACTION;
        let high = round2(new_price + gauss(&mut walk.rng).abs() * volatility);
        let low = round2((new_price - gauss(&mut walk.rng).abs() * volatility).max(0.01));
        let open = round2(new_price + gauss(&mut walk.rng) * volatility * 0.3);
        let volume = 50_000 + (walk.rng.gen::<f64>() * 450_000.0) as u64;

        let spread = new_price * SPREAD_FRACTION;

        Quote {
            key: key.clone(),
            ltp: new_price,
            open,
            high: high.max(new_price),
            low: low.min(new_price),
            close: new_price,
            volume,
            bid: round2(new_price - spread),
            ask: round2(new_price + spread),
            timestamp: now,
            simulated: true,
        }
    }

    /// Generate a historical series ending just before `now`, used to seed a
    /// fresh candle history when no broker data exists.
    pub fn backfill(
        &mut self,
        key: &SymbolKey,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Vec<Candle> {
        let bars = backfill_bars(timeframe);
        let interval = Duration::minutes(timeframe.minutes());
        let walk = self.walk_for(key.clone());

        // Start slightly below the current price so the tail reconnects.
        let mut price = walk.price * (1.0 - 0.02 - walk.rng.gen::<f64>() * 0.03);

        let mut candles = Vec::with_capacity(bars);
        for i in 0..bars {
            let ts = now - interval * ((bars - i) as i32);
            let change = gauss(&mut walk.rng) * WALK_SIGMA_PCT / 100.0;
            price *= 1.0 + change;
            let vol_factor = price * RANGE_FRACTION;
            let high = price + gauss(&mut walk.rng).abs() * vol_factor;
            let low = (price - gauss(&mut walk.rng).abs() * vol_factor).max(0.01);
            let open = price + gauss(&mut walk.rng) * vol_factor * 0.3;
            let volume = 10_000 + (walk.rng.gen::<f64>() * 190_000.0) as u64;

            candles.push(Candle {
                timestamp: ts,
                open: round2(open),
                high: round2(high.max(price)),
                low: round2(low.min(price)),
                close: round2(price),
                volume,
            });
        }
        candles
    }

    fn walk_for(&mut self, key: SymbolKey) -> &mut SymbolWalk {
        let seed = self.seed;
        self.walks.entry(key.clone()).or_insert_with(|| {
            let rng = ChaCha8Rng::seed_from_u64(seed ^ symbol_hash(&key));
            let price = base_price(&key);
            SymbolWalk { rng, price }
        })
    }
}

/// Base price for a symbol: the blue-chip table, or a deterministic value
/// derived from the symbol hash for anything unknown.
fn base_price(key: &SymbolKey) -> f64 {
    for (name, price) in BASE_PRICES {
        if key.symbol == *name {
            return *price;
        }
    }
    800.0 + (symbol_hash(key) % 400) as f64
}

/// Stable per-symbol hash (DefaultHasher with fixed keys is deterministic).
fn symbol_hash(key: &SymbolKey) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Standard-normal sample via Box-Muller.
fn gauss(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
