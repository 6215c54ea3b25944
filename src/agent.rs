// =============================================================================
// Agent runtime bookkeeping
// =============================================================================
//
// Every agent keeps a bounded error log and a couple of counters for the
// supervisor's status surface.  Faults never escalate past the stage
// boundary; they land here and in an ERROR message.

use chrono::Utc;

/// Maximum retained errors per agent.
pub const MAX_AGENT_ERRORS: usize = 100;

/// Bounded per-agent error buffer.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Vec<String>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timestamped error, evicting the oldest past the cap.
    pub fn push(&mut self, error: impl AsRef<str>) {
        self.entries
            .push(format!("{}: {}", Utc::now().to_rfc3339(), error.as_ref()));
        while self.entries.len() > MAX_AGENT_ERRORS {
            self.entries.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recent(&self, count: usize) -> Vec<String> {
        let start = self.entries.len().saturating_sub(count);
        self.entries[start..].to_vec()
    }
}
