// =============================================================================
// Meridian Equity Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Paper mode for safety. Live trading requires a wire
// broker injected in place of the paper broker, which is outside this
// binary's scope.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meridian_engine::broker::{Broker, PaperBroker};
use meridian_engine::runtime_config::EngineConfig;
use meridian_engine::supervisor::Supervisor;
use meridian_engine::types::{SymbolKey, TradingMode};

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Equity Engine starting up");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // SAFETY: always come up in paper mode; an operator must flip to live.
    config.trading_mode = TradingMode::Paper;

    // Override symbols from env if available.
    if let Ok(symbols) = std::env::var("MERIDIAN_SYMBOLS") {
        let parsed: Vec<SymbolKey> = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .map(SymbolKey::nse)
            .collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }

    info!(
        symbols = config.symbols.len(),
        cycle_interval_secs = config.cycle_interval_secs,
        mode = %config.trading_mode,
        "engine configured"
    );

    // ── 2. Broker wiring ─────────────────────────────────────────────────
    // Paper mode: one paper broker serves as both the execution venue and
    // the price sink the snapshot stage keeps in sync. No live data broker
    // is wired here; quotes come from the deterministic simulator.
    let paper = Arc::new(PaperBroker::new(config.initial_capital));
    paper.connect().await?;

    // ── 3. Supervisor ────────────────────────────────────────────────────
    let config_to_save = config.clone();
    let mut supervisor = Supervisor::new(config, None, paper.clone(), Some(paper));
    let handle = supervisor.handle();

    // ── 4. Graceful shutdown on ctrl-c ───────────────────────────────────
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, stopping after the current stage");
            handle.stop();
        }
    });

    // ── 5. Run the cycle loop ────────────────────────────────────────────
    supervisor.run().await;
    supervisor.shutdown().await;

    if let Err(e) = config_to_save.save(CONFIG_PATH) {
        warn!(error = %e, "Failed to save engine config on shutdown");
    }

    info!("Meridian Equity Engine shut down complete");
    Ok(())
}
