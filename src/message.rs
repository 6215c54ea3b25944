// =============================================================================
// Agent Messages — typed inter-stage communication
// =============================================================================
//
// Every stage of the cycle pipeline communicates through `AgentMessage`.
// The payload is a discriminated union with one variant per message type, so
// consumers handle every case exhaustively instead of probing an untyped
// blob.  Priority 1 is highest; inboxes are drained fully each cycle in
// priority order and an agent never enqueues to itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionRecord;
use crate::market_data::MarketSnapshot;
use crate::risk::{Decision, RiskAlert, Veto};
use crate::strategy::Signal;

/// Discriminant of a message, derivable from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    MarketUpdate,
    Signal,
    Decision,
    Veto,
    Execution,
    RiskAlert,
    StateUpdate,
    Error,
}

/// Free-form progress note surfaced to observers (held symbols, vetoes,
/// reflection summaries, stage failures that were absorbed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub status: String,
    pub message: String,
}

/// A caught stage fault. The cycle continues; this is the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub agent: String,
    pub error: String,
}

/// One payload variant per message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    MarketUpdate(MarketSnapshot),
    Signal(Signal),
    Decision(Decision),
    Veto(Veto),
    Execution(ExecutionRecord),
    RiskAlert(RiskAlert),
    StateUpdate(StateUpdate),
    Error(ErrorReport),
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::MarketUpdate(_) => MessageType::MarketUpdate,
            Self::Signal(_) => MessageType::Signal,
            Self::Decision(_) => MessageType::Decision,
            Self::Veto(_) => MessageType::Veto,
            Self::Execution(_) => MessageType::Execution,
            Self::RiskAlert(_) => MessageType::RiskAlert,
            Self::StateUpdate(_) => MessageType::StateUpdate,
            Self::Error(_) => MessageType::Error,
        }
    }
}

/// Structured message for agent communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub source: String,
    /// `None` means broadcast.
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// 1 = highest, 10 = lowest.
    pub priority: u8,
    pub requires_response: bool,
    pub correlation_id: Option<String>,
    pub payload: MessagePayload,
}

impl AgentMessage {
    /// Broadcast message with the default priority (5).
    pub fn new(source: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            target: None,
            timestamp: Utc::now(),
            priority: 5,
            requires_response: false,
            correlation_id: None,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Convenience constructor for progress notes.
    pub fn state_update(
        source: impl Into<String>,
        status: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            source,
            MessagePayload::StateUpdate(StateUpdate {
                status: status.into(),
                message: text.into(),
            }),
        )
    }

    /// Convenience constructor for absorbed stage faults.
    pub fn error(agent: impl Into<String>, error: impl Into<String>) -> Self {
        let agent = agent.into();
        Self::new(
            agent.clone(),
            MessagePayload::Error(ErrorReport {
                agent,
                error: error.into(),
            }),
        )
    }
}

/// Per-agent message queues.
///
/// The inbox is drained fully each cycle, highest priority first (stable for
/// equal priorities, preserving arrival order).  Output that a downstream
/// stage did not consume this cycle stays in the outbox and is delivered
/// next cycle in priority order.
#[derive(Debug, Default)]
pub struct Mailbox {
    inbox: Vec<AgentMessage>,
    outbox: Vec<AgentMessage>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, message: AgentMessage) {
        self.inbox.push(message);
    }

    /// Take all pending inbox messages in priority order.
    pub fn drain_inbox(&mut self) -> Vec<AgentMessage> {
        let mut messages = std::mem::take(&mut self.inbox);
        messages.sort_by_key(|m| m.priority);
        messages
    }

    pub fn send(&mut self, message: AgentMessage) {
        self.outbox.push(message);
    }

    /// Take all outgoing messages in priority order.
    pub fn drain_outbox(&mut self) -> Vec<AgentMessage> {
        let mut messages = std::mem::take(&mut self.outbox);
        messages.sort_by_key(|m| m.priority);
        messages
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }
}
