// =============================================================================
// Supervisor — the cycle orchestrator
// =============================================================================
//
// Drives the staged pipeline on a fixed wall-clock cadence:
//
//   Idle -> Snapshot -> Strategy -> Risk -> Execution -> Reflection? -> Idle
//
// Transitions are unconditional except Strategy -> Risk (skipped with zero
// signals) and Risk -> Execution (skipped when everything was vetoed).  A
// stage failure never aborts the cycle: the error is counted, buffered, and
// emitted as an ERROR message, and downstream stages run with whatever
// inputs exist.
//
// Within a cycle MARKET_UPDATE precedes all SIGNALs, every SIGNAL precedes
// its DECISION or VETO, and every DECISION precedes its EXECUTION.  The
// cycle number is strictly increasing and is the logical clock for all
// cool-down arithmetic.
//
// Successful executions are routed back into the Risk Guardian (daily
// counters, open positions) and the Strategy agent's overtrading guard
// (trade records, loss streaks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::agent::ErrorLog;
use crate::broker::{Broker, PaperBroker};
use crate::execution::{ExecutionAgent, ExecutionRecord};
use crate::market_data::{CandleHistory, MarketDataAgent, MarketSnapshot};
use crate::message::{AgentMessage, MessagePayload};
use crate::reflection::ReflectionAgent;
use crate::risk::{Decision, RiskGuardian, RiskStatus};
use crate::runtime_config::EngineConfig;
use crate::strategy::{Signal, StrategyAgent};
use crate::types::TradingMode;

const AGENT_NAME: &str = "Supervisor";

/// Retained recent trade records for reflection.
const MAX_RECENT_TRADES: usize = 100;

/// Run/error counters for one stage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageCounter {
    pub runs: u64,
    pub errors: u64,
}

/// Counters for every stage of the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageCounters {
    pub snapshot: StageCounter,
    pub strategy: StageCounter,
    pub risk: StageCounter,
    pub execution: StageCounter,
    pub reflection: StageCounter,
}

/// Status surface returned by [`Supervisor::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub cycle_number: u64,
    pub running: bool,
    pub mode: TradingMode,
    pub stages: StageCounters,
    pub total_executed_trades: u64,
    pub last_errors: Vec<String>,
    pub risk: RiskStatus,
}

/// Handle for cooperative cancellation from another task.
#[derive(Clone)]
pub struct SupervisorHandle {
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl SupervisorHandle {
    /// Request the loop to stop. Takes effect between stages, never
    /// mid-stage: an in-flight stage runs to completion. Idempotent.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The Controller: owns every agent and the cycle clock.
pub struct Supervisor {
    config: EngineConfig,
    market: MarketDataAgent,
    strategy: StrategyAgent,
    guardian: RiskGuardian,
    execution: ExecutionAgent,
    reflection: ReflectionAgent,

    cycle_number: u64,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    counters: StageCounters,
    errors: ErrorLog,
    total_executed_trades: u64,
    recent_trades: Vec<ExecutionRecord>,
}

impl Supervisor {
    /// Wire up the full agent pipeline.
    ///
    /// `data_broker` is the optional live market data source; `exec_broker`
    /// receives orders; `paper_sink` (usually the same object as
    /// `exec_broker` in paper mode) gets per-cycle price pushes.
    pub fn new(
        config: EngineConfig,
        data_broker: Option<Arc<dyn Broker>>,
        exec_broker: Arc<dyn Broker>,
        paper_sink: Option<Arc<PaperBroker>>,
    ) -> Self {
        let history = Arc::new(CandleHistory::default());
        let market = MarketDataAgent::new(history.clone(), config.sim_seed, data_broker, paper_sink);
        let strategy = StrategyAgent::new(history);
        let guardian = RiskGuardian::new(&config);
        let execution = ExecutionAgent::new(exec_broker);
        let reflection = ReflectionAgent::new(config.reflection_trigger);

        Self {
            config,
            market,
            strategy,
            guardian,
            execution,
            reflection,
            cycle_number: 0,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            counters: StageCounters::default(),
            errors: ErrorLog::new(),
            total_executed_trades: 0,
            recent_trades: Vec::new(),
        }
    }

    /// Handle for stopping the loop from elsewhere.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            running: self.running.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Operator control passthrough.
    pub fn deactivate_kill_switch(&mut self) {
        self.guardian.deactivate_kill_switch();
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            cycle_number: self.cycle_number,
            running: self.running.load(Ordering::SeqCst),
            mode: self.config.trading_mode,
            stages: self.counters,
            total_executed_trades: self.total_executed_trades,
            last_errors: self.errors.recent(10),
            risk: self.guardian.status(),
        }
    }

    /// Run the cycle loop until stopped. Idempotent: a second concurrent
    /// start request is ignored.
    pub async fn run(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            interval_secs = self.config.cycle_interval_secs,
            mode = %self.config.trading_mode,
            "trading loop started"
        );

        while !self.stop_requested() {
            let started = std::time::Instant::now();
            let _ = self.run_once().await;

            // Long cycles delay the next tick; they are never preempted.
            let interval = std::time::Duration::from_secs(self.config.cycle_interval_secs);
            let elapsed = started.elapsed();
            if !self.stop_requested() && elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("trading loop stopped");
    }

    /// Execute exactly one cycle. Returns every message the cycle produced,
    /// in emission order.
    pub async fn run_once(&mut self) -> Vec<AgentMessage> {
        self.cycle_number += 1;
        let cycle = self.cycle_number;
        let config = self.config.clone();
        let mut messages: Vec<AgentMessage> = Vec::new();

        info!(cycle, "cycle start");

        // --- Stage 1: Market Snapshot --------------------------------------
        self.counters.snapshot.runs += 1;
        let market_messages = match self.market.process_cycle(&config).await {
            Ok(msgs) => msgs,
            Err(e) => {
                self.counters.snapshot.errors += 1;
                self.record_stage_error("MarketDataAgent", &e, &mut messages);
                Vec::new()
            }
        };

        let snapshot: Option<MarketSnapshot> = market_messages.iter().find_map(|m| match &m.payload {
            MessagePayload::MarketUpdate(s) => Some(s.clone()),
            _ => None,
        });
        messages.extend(market_messages);

        let Some(snapshot) = snapshot else {
            messages.push(AgentMessage::state_update(
                AGENT_NAME,
                "waiting",
                "Waiting for market data",
            ));
            return messages;
        };

        if self.stop_requested() {
            return messages;
        }

        // --- Stage 2: Strategy ---------------------------------------------
        self.counters.strategy.runs += 1;
        let strategy_messages = self.strategy.process_cycle(&snapshot, &config, cycle);
        let signals: Vec<Signal> = strategy_messages
            .iter()
            .filter_map(|m| match &m.payload {
                MessagePayload::Signal(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        messages.extend(strategy_messages);

        if signals.is_empty() {
            messages.push(AgentMessage::state_update(
                AGENT_NAME,
                "hold",
                "No actionable signals, holding",
            ));
            self.maybe_reflect(&mut messages);
            return messages;
        }

        // --- Stage 3: Risk --------------------------------------------------
        self.counters.risk.runs += 1;
        let risk_messages = self.guardian.process_signals(signals);
        let decisions: Vec<Decision> = risk_messages
            .iter()
            .filter_map(|m| match &m.payload {
                MessagePayload::Decision(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        for message in &risk_messages {
            if let MessagePayload::Veto(veto) = &message.payload {
                messages.push(AgentMessage::state_update(
                    AGENT_NAME,
                    "vetoed",
                    format!("Vetoed {}: {}", veto.signal.symbol, veto.reason),
                ));
            }
        }
        messages.extend(risk_messages);

        if decisions.is_empty() || self.stop_requested() {
            self.maybe_reflect(&mut messages);
            return messages;
        }

        // --- Stage 4: Execution --------------------------------------------
        self.counters.execution.runs += 1;
        let execution_messages = self.execution.process_decisions(decisions, &config).await;

        let now = Utc::now();
        for message in &execution_messages {
            if let MessagePayload::Execution(record) = &message.payload {
                if record.success {
                    self.total_executed_trades += 1;
                    self.recent_trades.push(record.clone());
                    while self.recent_trades.len() > MAX_RECENT_TRADES {
                        self.recent_trades.remove(0);
                    }
                }
                // Feedback edges: guardian counters and the overtrading guard.
                self.guardian.record_execution(record);
                self.strategy.record_execution(record, cycle, now);
            }
        }
        messages.extend(execution_messages);

        // --- Stage 5: Reflection -------------------------------------------
        self.maybe_reflect(&mut messages);

        messages
    }

    /// Trigger a retrospection pass when enough new trades have executed.
    fn maybe_reflect(&mut self, messages: &mut Vec<AgentMessage>) {
        if !self.reflection.should_reflect(self.total_executed_trades)
            || self.recent_trades.len() < 3
        {
            return;
        }

        self.counters.reflection.runs += 1;
        let window_start = self.recent_trades.len().saturating_sub(20);
        let window = &self.recent_trades[window_start..];

        if let Some(result) = self.reflection.generate_reflection(window) {
            messages.push(AgentMessage::state_update(
                AGENT_NAME,
                "reflection",
                format!("Reflection {}: {}", result.reflection_id, result.summary),
            ));
            for recommendation in result.recommendations.iter().take(2) {
                messages.push(AgentMessage::state_update(
                    AGENT_NAME,
                    "recommendation",
                    recommendation.clone(),
                ));
            }
        }
    }

    fn record_stage_error(
        &mut self,
        agent: &str,
        error: &anyhow::Error,
        messages: &mut Vec<AgentMessage>,
    ) {
        error!(agent, error = %error, "stage failed, cycle continues");
        self.errors.push(format!("{agent}: {error}"));
        messages.push(AgentMessage::error(agent, error.to_string()));
    }

    /// Graceful teardown: cancel resting orders.
    pub async fn shutdown(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.execution.shutdown().await;
        warn!("supervisor shut down");
    }
}

// =============================================================================
// End-to-end cycle tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::types::SymbolKey;
    use std::collections::HashMap;

    async fn paper_supervisor(seed: u64) -> (Supervisor, Arc<PaperBroker>) {
        let config = EngineConfig {
            symbols: vec![
                SymbolKey::nse("RELIANCE"),
                SymbolKey::nse("TCS"),
                SymbolKey::nse("INFY"),
            ],
            sim_seed: seed,
            ..Default::default()
        };
        let paper = Arc::new(PaperBroker::new(config.initial_capital));
        paper.connect().await.unwrap();
        let supervisor = Supervisor::new(config, None, paper.clone(), Some(paper.clone()));
        (supervisor, paper)
    }

    fn type_sequence(messages: &[AgentMessage]) -> Vec<MessageType> {
        messages.iter().map(|m| m.message_type()).collect()
    }

    #[tokio::test]
    async fn cycle_numbers_strictly_increase() {
        let (mut supervisor, _) = paper_supervisor(7).await;
        assert_eq!(supervisor.status().cycle_number, 0);
        supervisor.run_once().await;
        assert_eq!(supervisor.status().cycle_number, 1);
        supervisor.run_once().await;
        assert_eq!(supervisor.status().cycle_number, 2);
    }

    #[tokio::test]
    async fn market_update_precedes_everything() {
        let (mut supervisor, _) = paper_supervisor(7).await;
        for _ in 0..5 {
            let messages = supervisor.run_once().await;
            let types = type_sequence(&messages);
            let market_idx = types
                .iter()
                .position(|t| *t == MessageType::MarketUpdate)
                .expect("every cycle emits a market update");
            for (i, t) in types.iter().enumerate() {
                if matches!(
                    t,
                    MessageType::Signal
                        | MessageType::Decision
                        | MessageType::Veto
                        | MessageType::Execution
                ) {
                    assert!(i > market_idx, "{t:?} before MARKET_UPDATE");
                }
            }
        }
    }

    #[tokio::test]
    async fn at_most_one_signal_per_symbol_per_cycle() {
        let (mut supervisor, _) = paper_supervisor(41).await;
        for _ in 0..10 {
            let messages = supervisor.run_once().await;
            let mut seen: HashMap<String, usize> = HashMap::new();
            for message in &messages {
                if let MessagePayload::Signal(signal) = &message.payload {
                    *seen.entry(signal.symbol.to_string()).or_default() += 1;
                }
            }
            for (symbol, count) in seen {
                assert_eq!(count, 1, "{symbol} emitted {count} signals in one cycle");
            }
        }
    }

    #[tokio::test]
    async fn every_signal_is_answered_and_ordered() {
        let (mut supervisor, _) = paper_supervisor(41).await;
        for _ in 0..10 {
            let messages = supervisor.run_once().await;
            let types = type_sequence(&messages);
            let signals = types.iter().filter(|t| **t == MessageType::Signal).count();
            let answers = types
                .iter()
                .filter(|t| matches!(t, MessageType::Decision | MessageType::Veto))
                .count();
            assert_eq!(signals, answers, "every SIGNAL gets a DECISION or VETO");

            // Executions follow only decisions.
            let executions = types
                .iter()
                .filter(|t| **t == MessageType::Execution)
                .count();
            let decisions = types
                .iter()
                .filter(|t| **t == MessageType::Decision)
                .count();
            assert!(executions <= decisions);

            if let (Some(last_signal), Some(first_decision)) = (
                types.iter().rposition(|t| *t == MessageType::Signal),
                types
                    .iter()
                    .position(|t| matches!(t, MessageType::Decision | MessageType::Veto)),
            ) {
                assert!(first_decision > last_signal, "risk output before signals");
            }
        }
    }

    #[tokio::test]
    async fn identical_seeds_yield_identical_cycles() {
        let (mut a, _) = paper_supervisor(123).await;
        let (mut b, _) = paper_supervisor(123).await;

        for _ in 0..5 {
            let ma = a.run_once().await;
            let mb = b.run_once().await;
            assert_eq!(type_sequence(&ma), type_sequence(&mb));

            // Signals, when present, match in every decision-relevant field.
            let sa: Vec<&Signal> = ma
                .iter()
                .filter_map(|m| match &m.payload {
                    MessagePayload::Signal(s) => Some(s),
                    _ => None,
                })
                .collect();
            let sb: Vec<&Signal> = mb
                .iter()
                .filter_map(|m| match &m.payload {
                    MessagePayload::Signal(s) => Some(s),
                    _ => None,
                })
                .collect();
            assert_eq!(sa.len(), sb.len());
            for (x, y) in sa.iter().zip(sb.iter()) {
                assert_eq!(x.symbol, y.symbol);
                assert_eq!(x.action, y.action);
                assert_eq!(x.confidence, y.confidence);
                assert_eq!(x.stop_loss, y.stop_loss);
                assert_eq!(x.take_profit, y.take_profit);
            }
        }
    }

    #[tokio::test]
    async fn kill_switch_suppresses_decisions() {
        let (mut supervisor, _) = paper_supervisor(7).await;

        // Preload a catastrophic day: the guardian trips on the next audit.
        let loss = ExecutionRecord {
            trade_id: "preload".into(),
            success: true,
            order_id: Some("o".into()),
            symbol: SymbolKey::nse("RELIANCE"),
            action: crate::types::Action::Buy,
            fill_price: 100.0,
            quantity: 1,
            status: "FILLED".into(),
            timestamp: Utc::now(),
            sl_order_id: None,
            pnl: -10_050.0,
            is_open: false,
            error: None,
        };
        supervisor.guardian.record_execution(&loss);

        for _ in 0..5 {
            let messages = supervisor.run_once().await;
            let decisions = messages
                .iter()
                .filter(|m| m.message_type() == MessageType::Decision)
                .count();
            assert_eq!(decisions, 0, "no DECISION may pass while the switch is armed");
        }
        assert!(supervisor.status().risk.kill_switch || supervisor.status().risk.daily_pnl <= -10_000.0);
    }

    #[tokio::test]
    async fn stop_handle_is_idempotent_and_cooperative() {
        let (supervisor, _) = paper_supervisor(7).await;
        let handle = supervisor.handle();
        assert!(!handle.is_running());
        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn status_reports_stage_counters() {
        let (mut supervisor, _) = paper_supervisor(7).await;
        supervisor.run_once().await;
        let status = supervisor.status();
        assert_eq!(status.stages.snapshot.runs, 1);
        assert_eq!(status.stages.strategy.runs, 1);
        assert_eq!(status.stages.snapshot.errors, 0);
        assert_eq!(status.mode, TradingMode::Paper);
    }

    #[tokio::test]
    async fn reflection_triggers_after_enough_trades() {
        let (mut supervisor, _) = paper_supervisor(7).await;

        // Simulate ten executed trades flowing through the feedback path.
        for i in 0..10 {
            let record = ExecutionRecord {
                trade_id: format!("t{i}"),
                success: true,
                order_id: Some("o".into()),
                symbol: SymbolKey::nse("TCS"),
                action: crate::types::Action::Buy,
                fill_price: 100.0,
                quantity: 1,
                status: "FILLED".into(),
                timestamp: Utc::now(),
                sl_order_id: None,
                pnl: if i % 2 == 0 { 25.0 } else { -10.0 },
                is_open: false,
                error: None,
            };
            supervisor.total_executed_trades += 1;
            supervisor.recent_trades.push(record);
        }

        let mut messages = Vec::new();
        supervisor.maybe_reflect(&mut messages);
        assert!(
            messages.iter().any(|m| matches!(
                &m.payload,
                MessagePayload::StateUpdate(s) if s.status == "reflection"
            )),
            "reflection summary should be broadcast"
        );
        assert_eq!(supervisor.counters.reflection.runs, 1);

        // Immediately after, the trigger is spent.
        let mut more = Vec::new();
        supervisor.maybe_reflect(&mut more);
        assert!(more.is_empty());
    }
}
