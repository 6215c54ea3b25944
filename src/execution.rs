// =============================================================================
// Execution Adapter — turns DECISIONs into broker orders
// =============================================================================
//
// The adapter does not know (or care) whether the injected broker is live or
// paper.  For each approved decision it:
//
//   1. Resolves the quantity (a fractional size below one is a percentage
//      of the per-order value cap, floor-divided by the entry price)
//   2. Places a MARKET INTRADAY order for the decision's side
//   3. Places a protective SL-M order for the opposite side at the
//      corrected stop; a failure there is a warning, never a rollback
//   4. Emits an EXECUTION message with the fill details
//
// Pending (non-terminal) orders are reconciled once per cycle; terminal
// orders leave the pending set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::ErrorLog;
use crate::broker::{Broker, OrderRequest, OrderSide, OrderType};
use crate::message::{AgentMessage, MessagePayload};
use crate::risk::Decision;
use crate::runtime_config::EngineConfig;
use crate::types::{Action, SymbolKey};

const AGENT_NAME: &str = "ExecutionAgent";

/// Outcome of executing one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub trade_id: String,
    pub success: bool,
    pub order_id: Option<String>,
    pub symbol: SymbolKey,
    pub action: Action,
    pub fill_price: f64,
    pub quantity: u32,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub sl_order_id: Option<String>,
    /// Realised PnL attributed to this execution (0 for fresh opens).
    pub pnl: f64,
    /// Whether this execution opens a position (true) or exits one (false).
    pub is_open: bool,
    pub error: Option<String>,
}

impl ExecutionRecord {
    fn failed(symbol: SymbolKey, action: Action, error: impl Into<String>) -> Self {
        Self {
            trade_id: new_trade_id(),
            success: false,
            order_id: None,
            symbol,
            action,
            fill_price: 0.0,
            quantity: 0,
            status: "FAILED".to_string(),
            timestamp: Utc::now(),
            sl_order_id: None,
            pnl: 0.0,
            is_open: false,
            error: Some(error.into()),
        }
    }
}

fn new_trade_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// The Executor.
pub struct ExecutionAgent {
    broker: Arc<dyn Broker>,
    pending_orders: HashSet<String>,
    errors: ErrorLog,
}

impl ExecutionAgent {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            pending_orders: HashSet::new(),
            errors: ErrorLog::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn pending_order_count(&self) -> usize {
        self.pending_orders.len()
    }

    /// Execute a batch of decisions and reconcile pending orders.
    pub async fn process_decisions(
        &mut self,
        decisions: Vec<Decision>,
        config: &EngineConfig,
    ) -> Vec<AgentMessage> {
        let mut messages = Vec::new();

        for decision in decisions {
            let (record, sl_warning) = self.execute_decision(&decision, config).await;
            if let Some(warning) = sl_warning {
                messages.push(AgentMessage::state_update(AGENT_NAME, "warning", warning));
            }
            messages.push(
                AgentMessage::new(AGENT_NAME, MessagePayload::Execution(record))
                    .with_priority(2),
            );
        }

        self.reconcile().await;
        messages
    }

    /// Place the orders for a single decision.
    ///
    /// Returns the execution record plus an optional human-readable warning
    /// (currently only a failed protective-stop placement).
    pub async fn execute_decision(
        &mut self,
        decision: &Decision,
        config: &EngineConfig,
    ) -> (ExecutionRecord, Option<String>) {
        let signal = &decision.signal;
        let verdict = &decision.verdict;
        let key = signal.symbol.clone();

        let side = match signal.action {
            Action::Buy => OrderSide::Buy,
            Action::Sell => OrderSide::Sell,
            Action::Hold => {
                return (
                    ExecutionRecord::failed(key, signal.action, "Invalid action: HOLD"),
                    None,
                );
            }
        };

        let quantity = resolve_quantity(
            verdict.position_size,
            signal.entry_price,
            config.max_position_size,
        );

        let trade_id = new_trade_id();
        let order = OrderRequest::market(&key, side, quantity).with_tag(format!("MER_{trade_id}"));

        let placed = match self.broker.place_order(order).await {
            Ok(result) => result,
            Err(e) => {
                self.errors.push(format!("{key}: order placement error: {e}"));
                return (
                    ExecutionRecord::failed(key, signal.action, format!("Order error: {e}")),
                    None,
                );
            }
        };

        if !placed.success {
            warn!(symbol = %key, message = %placed.message, "order rejected");
            return (
                ExecutionRecord::failed(key, signal.action, placed.message),
                None,
            );
        }

        if let Some(order_id) = &placed.order_id {
            if !placed.status.is_terminal() {
                self.pending_orders.insert(order_id.clone());
            }
        }

        let fill_price = if placed.average_price > 0.0 {
            placed.average_price
        } else {
            signal.entry_price
        };

        let mut record = ExecutionRecord {
            trade_id: trade_id.clone(),
            success: true,
            order_id: placed.order_id.clone(),
            symbol: key.clone(),
            action: signal.action,
            fill_price,
            quantity,
            status: placed.status.to_string(),
            timestamp: Utc::now(),
            sl_order_id: None,
            pnl: 0.0,
            is_open: signal.action == Action::Buy,
            error: None,
        };

        info!(
            symbol = %key,
            action = %signal.action,
            quantity,
            fill_price,
            order_id = ?placed.order_id,
            "order executed"
        );

        // Protective stop: never rolls back the primary fill.
        let mut sl_warning = None;
        if let Some(stop) = verdict.adjusted_stop_loss {
            let mut sl_order = OrderRequest::market(&key, side.opposite(), quantity)
                .with_tag(format!("SL_{trade_id}"));
            sl_order.order_type = OrderType::StopLossMarket;
            sl_order.trigger_price = Some(stop);

            match self.broker.place_order(sl_order).await {
                Ok(result) if result.success => {
                    record.sl_order_id = result.order_id.clone();
                    if let Some(id) = result.order_id {
                        if !result.status.is_terminal() {
                            self.pending_orders.insert(id);
                        }
                    }
                }
                Ok(result) => {
                    let text =
                        format!("{key}: protective SL not placed: {}", result.message);
                    warn!("{text}");
                    self.errors.push(text.clone());
                    sl_warning = Some(text);
                }
                Err(e) => {
                    let text = format!("{key}: protective SL not placed: {e}");
                    warn!("{text}");
                    self.errors.push(text.clone());
                    sl_warning = Some(text);
                }
            }
        }

        (record, sl_warning)
    }

    /// Refresh pending order status; terminal orders leave the set.
    pub async fn reconcile(&mut self) {
        let pending: Vec<String> = self.pending_orders.iter().cloned().collect();
        for order_id in pending {
            match self.broker.get_order_status(&order_id).await {
                Ok(status) if status.status.is_terminal() => {
                    self.pending_orders.remove(&order_id);
                }
                Ok(_) => {}
                Err(e) => {
                    self.errors
                        .push(format!("reconcile {order_id} failed: {e}"));
                }
            }
        }
    }

    /// Best-effort cancellation of anything still resting at shutdown.
    pub async fn shutdown(&mut self) {
        for order_id in self.pending_orders.drain() {
            if let Err(e) = self.broker.cancel_order(&order_id).await {
                warn!(order_id = %order_id, error = %e, "cancel on shutdown failed");
            }
        }
    }
}

/// Resolve the verdict's position size into a share count.
///
/// Sizes of one share or more are used as-is (floored); a fractional size
/// below one is a percentage of the per-order value cap.
fn resolve_quantity(position_size: f64, entry_price: f64, max_position_size: f64) -> u32 {
    let quantity = if position_size > 0.0 && position_size < 1.0 {
        if entry_price > 0.0 {
            (max_position_size * position_size / entry_price).floor()
        } else {
            1.0
        }
    } else {
        position_size.floor()
    };
    (quantity.max(1.0)) as u32
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::broker::PriceTick;
    use crate::regime::{MarketRegime, PriceLocation, PricePosition, RegimeSnapshot, TrendDirection};
    use crate::risk::{RiskLevel, RiskVerdict};
    use crate::strategy::{Signal, SignalSource};
    use crate::traps::TrapFlags;
    use std::collections::HashMap;

    fn key() -> SymbolKey {
        SymbolKey::nse("RELIANCE")
    }

    fn decision(action: Action, position_size: f64, stop: Option<f64>) -> Decision {
        Decision {
            signal: Signal {
                action,
                symbol: key(),
                confidence: 0.85,
                entry_price: 100.0,
                stop_loss: 98.5,
                take_profit: 104.0,
                quantity: 1,
                regime: RegimeSnapshot {
                    regime: MarketRegime::TrendingUp,
                    confidence: 85.0,
                    adx: 30.0,
                    bb_width_pct: 2.0,
                    atr_pct: 1.0,
                    trend_direction: TrendDirection::Up,
                    reason: String::new(),
                    position: PricePosition {
                        pct: 55.0,
                        location: PriceLocation::Middle,
                    },
                    choppy_analysis: None,
                },
                position: PricePosition {
                    pct: 55.0,
                    location: PriceLocation::Middle,
                },
                traps: TrapFlags::default(),
                reasoning: String::new(),
                source: SignalSource::RuleBased,
            },
            verdict: RiskVerdict {
                approved: true,
                reason: String::new(),
                risk_level: RiskLevel::Low,
                position_size,
                adjusted_stop_loss: stop,
                adjusted_take_profit: Some(104.0),
                warnings: Vec::new(),
            },
        }
    }

    async fn paper_with_price(ltp: f64) -> Arc<PaperBroker> {
        let paper = Arc::new(PaperBroker::new(1_000_000.0));
        paper.connect().await.unwrap();
        paper.update_prices(HashMap::from([(
            key(),
            PriceTick {
                ltp,
                bid: ltp - 0.5,
                ask: ltp + 0.5,
                open: ltp,
                high: ltp + 1.0,
                low: ltp - 1.0,
                close: ltp,
                volume: 10_000,
            },
        )]));
        paper
    }

    #[test]
    fn quantity_resolution() {
        // Whole counts pass through.
        assert_eq!(resolve_quantity(10.0, 100.0, 100_000.0), 10);
        // Fractions are a percentage of the value cap.
        assert_eq!(resolve_quantity(0.5, 100.0, 100_000.0), 500);
        // Never below one share.
        assert_eq!(resolve_quantity(0.0001, 5_000.0, 100_000.0), 1);
        assert_eq!(resolve_quantity(0.0, 100.0, 100_000.0), 1);
    }

    #[tokio::test]
    async fn buy_decision_places_order_and_protective_stop() {
        let paper = paper_with_price(100.0).await;
        let mut agent = ExecutionAgent::new(paper.clone());
        let config = EngineConfig::default();

        let messages = agent
            .process_decisions(vec![decision(Action::Buy, 10.0, Some(98.0))], &config)
            .await;

        let records: Vec<&ExecutionRecord> = messages
            .iter()
            .filter_map(|m| match &m.payload {
                MessagePayload::Execution(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(records.len(), 1);
        let record = records[0];
        assert!(record.success, "{:?}", record.error);
        assert_eq!(record.quantity, 10);
        assert!(record.order_id.is_some());
        assert!(record.sl_order_id.is_some(), "protective stop should be placed");
        assert!(record.is_open);
        assert_eq!(record.status, "FILLED");

        // The protective stop rests OPEN at the broker.
        let sl_id = record.sl_order_id.clone().unwrap();
        let status = paper.get_order_status(&sl_id).await.unwrap();
        assert_eq!(status.status, crate::broker::OrderStatus::Open);
    }

    #[tokio::test]
    async fn hold_decision_is_rejected() {
        let paper = paper_with_price(100.0).await;
        let mut agent = ExecutionAgent::new(paper);
        let (record, _) = agent
            .execute_decision(&decision(Action::Hold, 1.0, None), &EngineConfig::default())
            .await;
        assert!(!record.success);
        assert!(record.error.as_deref().unwrap_or("").contains("Invalid action"));
    }

    #[tokio::test]
    async fn rejected_order_reports_failure() {
        // No prices pushed: the paper broker rejects the order.
        let paper = Arc::new(PaperBroker::new(1_000_000.0));
        paper.connect().await.unwrap();
        let mut agent = ExecutionAgent::new(paper);
        let (record, _) = agent
            .execute_decision(&decision(Action::Buy, 1.0, None), &EngineConfig::default())
            .await;
        assert!(!record.success);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn reconcile_drops_terminal_orders() {
        let paper = paper_with_price(100.0).await;
        let mut agent = ExecutionAgent::new(paper.clone());
        let config = EngineConfig::default();

        agent
            .process_decisions(vec![decision(Action::Buy, 5.0, Some(95.0))], &config)
            .await;
        // The market order filled instantly; only the resting stop remains.
        assert_eq!(agent.pending_order_count(), 1);

        // Trigger the stop, then reconcile again.
        paper.update_prices(HashMap::from([(
            key(),
            PriceTick {
                ltp: 94.0,
                bid: 93.5,
                ask: 94.5,
                open: 94.0,
                high: 94.0,
                low: 94.0,
                close: 94.0,
                volume: 1_000,
            },
        )]));
        agent.reconcile().await;
        assert_eq!(agent.pending_order_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending() {
        let paper = paper_with_price(100.0).await;
        let mut agent = ExecutionAgent::new(paper.clone());
        agent
            .process_decisions(
                vec![decision(Action::Buy, 5.0, Some(95.0))],
                &EngineConfig::default(),
            )
            .await;
        assert_eq!(agent.pending_order_count(), 1);

        agent.shutdown().await;
        assert_eq!(agent.pending_order_count(), 0);
    }
}
