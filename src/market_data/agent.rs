// =============================================================================
// Market Snapshot Agent — quotes, history, indicators, paper price sync
// =============================================================================
//
// One pass per cycle:
//   1. Obtain a Quote per watched symbol: live broker first (under a
//      deadline), demoting that symbol to the simulator on any failure.
//   2. Maintain the bounded per-timeframe candle history (bulk fetch or
//      synthetic backfill on first sight, append-per-cycle afterwards).
//   3. Compute the indicator bundle per timeframe.
//   4. Push observed prices into the paper broker so paper fills use the
//      same prices the strategy saw.
//   5. Emit exactly one MARKET_UPDATE message.
//
// Symbols are processed in sorted key order so the snapshot is assembled
// deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::agent::ErrorLog;
use crate::broker::{Broker, PaperBroker, PriceTick};
use crate::indicators::{compute_bundle, IndicatorBundle};
use crate::market_data::{CandleHistory, MarketSimulator, Quote, SeriesKey};
use crate::message::{AgentMessage, MessagePayload};
use crate::runtime_config::EngineConfig;
use crate::types::{SymbolKey, Timeframe};

const AGENT_NAME: &str = "MarketDataAgent";

/// Where this cycle's quotes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Broker,
    Simulated,
    Mixed,
}

/// Indicator bundles for the three decision timeframes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeframeBundles {
    pub m5: IndicatorBundle,
    pub m15: IndicatorBundle,
    pub h1: IndicatorBundle,
}

impl TimeframeBundles {
    pub fn get(&self, timeframe: Timeframe) -> Option<&IndicatorBundle> {
        match timeframe {
            Timeframe::M5 => Some(&self.m5),
            Timeframe::M15 => Some(&self.m15),
            Timeframe::H1 => Some(&self.h1),
            _ => None,
        }
    }
}

/// The per-cycle market snapshot, keyed by the symbol's display form
/// (`NSE:RELIANCE`) so the maps iterate and serialise deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub quotes: BTreeMap<String, Quote>,
    pub indicators: BTreeMap<String, TimeframeBundles>,
    pub source: SnapshotSource,
    pub timestamp: chrono::DateTime<Utc>,
}

/// The Oracle: assembles the per-cycle market snapshot.
pub struct MarketDataAgent {
    history: Arc<CandleHistory>,
    simulator: MarketSimulator,
    /// Live data source, when one is injected and connected.
    data_broker: Option<Arc<dyn Broker>>,
    /// Paper broker to keep in sync with observed prices.
    paper_sink: Option<Arc<PaperBroker>>,
    errors: ErrorLog,
}

impl MarketDataAgent {
    pub fn new(
        history: Arc<CandleHistory>,
        sim_seed: u64,
        data_broker: Option<Arc<dyn Broker>>,
        paper_sink: Option<Arc<PaperBroker>>,
    ) -> Self {
        Self {
            history,
            simulator: MarketSimulator::new(sim_seed),
            data_broker,
            paper_sink,
            errors: ErrorLog::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Run one snapshot pass and emit the MARKET_UPDATE message.
    pub async fn process_cycle(&mut self, config: &EngineConfig) -> Result<Vec<AgentMessage>> {
        let now = Utc::now();
        let broker = self.usable_data_broker().await;

        let mut quotes = BTreeMap::new();
        let mut indicators = BTreeMap::new();
        let mut live_count = 0usize;
        let mut sim_count = 0usize;

        let mut symbols = config.symbols.clone();
        symbols.sort();

        for key in &symbols {
            let quote = match &broker {
                Some(b) => match self.fetch_live_quote(b.as_ref(), key, config).await {
                    Some(q) => {
                        self.simulator.sync_price(key, q.ltp);
                        live_count += 1;
                        q
                    }
                    None => {
                        sim_count += 1;
                        self.simulator.next_quote(key, now)
                    }
                },
                None => {
                    sim_count += 1;
                    self.simulator.next_quote(key, now)
                }
            };

            // Maintain history and compute bundles for each timeframe.
            let mut bundles = TimeframeBundles::default();
            for timeframe in &config.timeframes {
                let series_key = SeriesKey::new(key.clone(), *timeframe);
                self.maintain_series(&series_key, &quote, broker.as_deref(), config)
                    .await;

                let candles = self.history.series(&series_key);
                let bundle = compute_bundle(&candles);
                match timeframe {
                    Timeframe::M5 => bundles.m5 = bundle,
                    Timeframe::M15 => bundles.m15 = bundle,
                    Timeframe::H1 => bundles.h1 = bundle,
                    _ => {}
                }
            }

            indicators.insert(key.to_string(), bundles);
            quotes.insert(key.to_string(), quote);
        }

        // Paper price sync: fills must happen at the prices we just observed.
        if let Some(paper) = &self.paper_sink {
            let prices: HashMap<SymbolKey, PriceTick> = quotes
                .values()
                .map(|q| {
                    (
                        q.key.clone(),
                        PriceTick {
                            ltp: q.ltp,
                            bid: q.bid,
                            ask: q.ask,
                            open: q.open,
                            high: q.high,
                            low: q.low,
                            close: q.close,
                            volume: q.volume,
                        },
                    )
                })
                .collect();
            paper.update_prices(prices);
        }

        let source = if live_count > 0 && sim_count > 0 {
            SnapshotSource::Mixed
        } else if live_count > 0 {
            SnapshotSource::Broker
        } else {
            SnapshotSource::Simulated
        };

        debug!(
            symbols = quotes.len(),
            source = ?source,
            "market snapshot assembled"
        );

        let snapshot = MarketSnapshot {
            quotes,
            indicators,
            source,
            timestamp: now,
        };

        Ok(vec![AgentMessage::new(
            AGENT_NAME,
            MessagePayload::MarketUpdate(snapshot),
        )
        .with_priority(1)])
    }

    /// The injected broker, if it is connected and can source market data.
    async fn usable_data_broker(&self) -> Option<Arc<dyn Broker>> {
        let broker = self.data_broker.as_ref()?;
        if !broker.provides_market_data() {
            return None;
        }
        if broker.is_connected().await {
            Some(broker.clone())
        } else {
            None
        }
    }

    async fn fetch_live_quote(
        &mut self,
        broker: &dyn Broker,
        key: &SymbolKey,
        config: &EngineConfig,
    ) -> Option<Quote> {
        let deadline = StdDuration::from_secs(config.quote_timeout_secs);
        match timeout(deadline, broker.get_quote(key)).await {
            Ok(Ok(quote)) if quote.ltp > 0.0 => Some(quote),
            Ok(Ok(_)) => {
                self.errors.push(format!("{key}: broker returned zero ltp"));
                None
            }
            Ok(Err(e)) => {
                warn!(symbol = %key, error = %e, "quote fetch failed, simulating symbol");
                self.errors.push(format!("{key}: quote fetch failed: {e}"));
                None
            }
            Err(_) => {
                warn!(symbol = %key, "quote fetch deadline expired, simulating symbol");
                self.errors.push(format!("{key}: quote fetch timed out"));
                None
            }
        }
    }

    /// Initialise or extend one candle series.
    ///
    /// First sight of a series triggers a bulk historical fetch (broker) or
    /// synthetic backfill (simulator); afterwards the cycle's quote is
    /// appended once the series' interval has elapsed since the last bar.
    async fn maintain_series(
        &mut self,
        series_key: &SeriesKey,
        quote: &Quote,
        broker: Option<&dyn Broker>,
        config: &EngineConfig,
    ) {
        let now = quote.timestamp;

        if self.history.is_empty(series_key) {
            let candles = match broker {
                Some(b) => {
                    let lookback = historical_lookback(series_key.timeframe);
                    let deadline = StdDuration::from_secs(config.historical_timeout_secs);
                    match timeout(
                        deadline,
                        b.get_historical_data(&series_key.symbol, series_key.timeframe, now - lookback, now),
                    )
                    .await
                    {
                        Ok(Ok(candles)) if !candles.is_empty() => candles,
                        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                            info!(series = %series_key, "historical fetch unavailable, backfilling synthetically");
                            self.simulator
                                .backfill(&series_key.symbol, series_key.timeframe, now)
                        }
                    }
                }
                None => self
                    .simulator
                    .backfill(&series_key.symbol, series_key.timeframe, now),
            };
            self.history.replace(series_key.clone(), candles);
        }

        // Append one bar per elapsed interval.
        let due = self
            .history
            .last_timestamp(series_key)
            .map_or(true, |last| {
                now - last >= Duration::minutes(series_key.timeframe.minutes())
            });
        if due {
            self.history.append(
                series_key.clone(),
                crate::market_data::Candle {
                    timestamp: now,
                    open: quote.open,
                    high: quote.high,
                    low: quote.low,
                    close: quote.close,
                    volume: quote.volume,
                },
            );
        }
    }
}

fn historical_lookback(timeframe: Timeframe) -> Duration {
    match timeframe {
        Timeframe::M1 => Duration::days(1),
        Timeframe::M5 => Duration::days(5),
        Timeframe::M15 => Duration::days(15),
        Timeframe::H1 => Duration::days(30),
        Timeframe::D1 => Duration::days(365),
        _ => Duration::days(5),
    }
}
