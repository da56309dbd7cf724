use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of routing an inbound echo through the correlator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The echo matched a pending token; `latency` is receive minus send
    Matched { latency: Duration },
    /// No pending token for this echo — an anomaly, not a crash
    Unmatched,
}

/// Tracks in-flight published messages for one session.
///
/// Owned exclusively by the session task, so all calls are serialized with
/// respect to that session's timers and inbound handler. Tokens embed
/// `userId-clientId-sequence` and are unique per session by construction;
/// the table is therefore scoped per session rather than globally keyed.
#[derive(Debug, Default)]
pub struct MessageCorrelator {
    pending: HashMap<String, Instant>,
}

impl MessageCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully published token at the current time.
    ///
    /// Returns `false` when the token was already pending — a logic error
    /// upstream. The policy is last-write-wins: the timestamp is replaced
    /// and the caller flags the anomaly.
    pub fn on_sent(&mut self, token: impl Into<String>) -> bool {
        self.pending.insert(token.into(), Instant::now()).is_none()
    }

    /// Resolve an inbound echo against the pending table.
    pub fn on_received(&mut self, token: &str) -> CorrelationOutcome {
        match self.pending.remove(token) {
            Some(sent_at) => CorrelationOutcome::Matched {
                latency: Instant::now().saturating_duration_since(sent_at),
            },
            None => CorrelationOutcome::Unmatched,
        }
    }

    /// Number of tokens still awaiting an echo
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flush every still-pending token at session end.
    ///
    /// Each returned token is one loss observation; the table is empty
    /// afterwards, so nothing can be double counted.
    pub fn drain(&mut self) -> Vec<String> {
        self.pending.drain().map(|(token, _)| token).collect()
    }
}
