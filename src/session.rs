use crate::config::SwarmConfig;
use crate::correlator::{CorrelationOutcome, MessageCorrelator};
use crate::identity::{random_duration_between, random_item, UserIdentity};
use crate::metrics::{AnomalyKind, MetricsSink};
use crate::publish::PublishClient;
use crate::transport::{
    leave_frame, ChatFrame, StreamEvent, StreamTransport, CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of one simulated user's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Publishing,
    Draining,
    Closed,
}

/// What one iteration of the session loop decided to do next.
///
/// The `select!` arms only pick a step; the mutations happen afterwards so
/// that every effect on session state is serialized in one place.
enum Step {
    Inbound(StreamEvent),
    PublishTick,
    BeginDrain,
    ForceClose,
}

/// One simulated user: owns the streaming connection, the publish timers
/// and the correlation table for its own echoes.
///
/// All timers and the inbound handler run as arms of a single loop, so
/// their effects on the session's state never race each other. Dropping
/// the loop at close cancels every pending timer for this session.
pub struct StreamSession {
    identity: UserIdentity,
    /// Stringified own user id, compared against inbound sender ids
    own_sender: String,
    topics: Vec<String>,
    config: Arc<SwarmConfig>,
    publish: Arc<dyn PublishClient>,
    transport: Arc<dyn StreamTransport>,
    metrics: Arc<dyn MetricsSink>,
    correlator: MessageCorrelator,
    state: SessionState,
    sequence: u64,
}

impl StreamSession {
    pub fn new(
        identity: UserIdentity,
        topics: Vec<String>,
        config: Arc<SwarmConfig>,
        publish: Arc<dyn PublishClient>,
        transport: Arc<dyn StreamTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            own_sender: identity.user_id.to_string(),
            identity,
            topics,
            config,
            publish,
            transport,
            metrics,
            correlator: MessageCorrelator::new(),
            state: SessionState::Connecting,
            sequence: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session from connect to close.
    ///
    /// Connection failures end the session immediately; everything after a
    /// successful handshake is local to this session and never aborts
    /// siblings.
    pub async fn run(mut self) {
        self.metrics.record_session_started();
        let credentials = self.identity.credentials();

        let mut conn = match self.transport.connect(&credentials).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    user_id = self.identity.user_id,
                    client_id = self.identity.client_id,
                    error = %e,
                    "connect failed"
                );
                self.metrics.record_connect_failure();
                self.state = SessionState::Closed;
                self.metrics.record_session_closed();
                return;
            }
        };
        self.state = SessionState::Open;

        // optional jitter desynchronizing publish timers across sessions
        if !self.config.open_jitter_max.is_zero() {
            sleep(random_duration_between(
                std::time::Duration::ZERO,
                self.config.open_jitter_max,
            ))
            .await;
        }

        let publisher = !self.topics.is_empty()
            && rand::rng().random::<f64>() < self.config.publisher_probability;
        if publisher {
            self.state = SessionState::Publishing;
        }

        let session_duration = random_duration_between(
            self.config.session_duration_min,
            self.config.session_duration_max,
        );
        let publish_every = random_duration_between(
            self.config.publish_interval_min,
            self.config.publish_interval_max,
        );

        debug!(
            user_id = self.identity.user_id,
            client_id = self.identity.client_id,
            publisher,
            session_ms = session_duration.as_millis() as u64,
            interval_ms = publish_every.as_millis() as u64,
            "session open"
        );

        let started = Instant::now();
        let drain_at = started + session_duration;
        let close_at = drain_at + self.config.drain_grace;

        let mut publish_timer = tokio::time::interval_at(started + publish_every, publish_every);
        let drain_deadline = tokio::time::sleep_until(drain_at);
        let close_deadline = tokio::time::sleep_until(close_at);
        tokio::pin!(drain_deadline);
        tokio::pin!(close_deadline);

        let close_code = loop {
            let step = tokio::select! {
                event = conn.next_event() => Step::Inbound(event),
                _ = publish_timer.tick(), if self.state == SessionState::Publishing => {
                    Step::PublishTick
                }
                _ = &mut drain_deadline, if self.state != SessionState::Draining => {
                    Step::BeginDrain
                }
                _ = &mut close_deadline => Step::ForceClose,
            };

            match step {
                Step::Inbound(StreamEvent::Chat(frame)) => {
                    self.handle_echo(&frame);
                }
                Step::Inbound(StreamEvent::Other(payload)) => {
                    debug!(payload, "non-chat frame");
                }
                Step::Inbound(StreamEvent::Closed { code }) => {
                    debug!(?code, "peer closed");
                    break code;
                }
                Step::PublishTick => {
                    self.publish_once(&credentials).await;
                }
                Step::BeginDrain => {
                    debug!(
                        user_id = self.identity.user_id,
                        pending = self.correlator.pending(),
                        "session duration elapsed, draining"
                    );
                    self.state = SessionState::Draining;
                    // best-effort graceful-shutdown hint
                    if let Err(e) = conn.send_text(leave_frame()).await {
                        debug!(error = %e, "leave frame not delivered");
                    }
                }
                Step::ForceClose => {
                    debug!(user_id = self.identity.user_id, "drain grace elapsed, closing");
                    if let Err(e) = conn.close(CLOSE_GOING_AWAY).await {
                        debug!(error = %e, "close failed");
                    }
                    break Some(CLOSE_GOING_AWAY);
                }
            }
        };

        self.finish(close_code);
    }

    /// Route one inbound chat frame through the correlator.
    ///
    /// Echoes from other identities are not ours to measure and are
    /// filtered before correlation.
    fn handle_echo(&mut self, frame: &ChatFrame) {
        if frame.sender_id != self.own_sender {
            return;
        }

        match self.correlator.on_received(&frame.text) {
            CorrelationOutcome::Matched { latency } => {
                debug!(
                    token = frame.text,
                    latency_ms = latency.as_millis() as u64,
                    "echo matched"
                );
                self.metrics.record_latency(latency);
            }
            CorrelationOutcome::Unmatched => {
                warn!(token = frame.text, "echo without matching send");
                self.metrics.record_anomaly(AnomalyKind::UnmatchedEcho);
            }
        }
    }

    /// One publish tick: random authorized topic, fresh token, API call.
    /// A rejected publish is recorded and registers nothing; the session
    /// keeps going.
    async fn publish_once(&mut self, credentials: &crate::identity::Credentials) {
        let Some(topic) = random_item(&self.topics).cloned() else {
            return;
        };

        self.sequence += 1;
        let token = self.identity.token(self.sequence);

        match self.publish.create_message(&topic, &token, credentials).await {
            Ok(()) => {
                if !self.correlator.on_sent(token.clone()) {
                    warn!(token, "token registered twice");
                    self.metrics.record_anomaly(AnomalyKind::DuplicateToken);
                }
                self.metrics.record_publish();
            }
            Err(e) => {
                warn!(topic, token, error = %e, "publish failed");
                self.metrics.record_publish_error();
            }
        }
    }

    /// Close the books: validate the close disposition and flush every
    /// still-pending token as exactly one loss observation.
    fn finish(&mut self, close_code: Option<u16>) {
        self.state = SessionState::Closed;

        match close_code {
            Some(code @ (CLOSE_NORMAL | CLOSE_GOING_AWAY)) => {
                self.metrics.record_close_code(code);
            }
            Some(code) => {
                warn!(code, user_id = self.identity.user_id, "unexpected close code");
                self.metrics.record_close_code(code);
                self.metrics.record_anomaly(AnomalyKind::UnexpectedCloseCode);
            }
            None => {
                warn!(user_id = self.identity.user_id, "stream ended without close frame");
                self.metrics.record_anomaly(AnomalyKind::UnexpectedCloseCode);
            }
        }

        let lost = self.correlator.drain();
        if !lost.is_empty() {
            info!(
                user_id = self.identity.user_id,
                client_id = self.identity.client_id,
                lost = lost.len(),
                "pending tokens never echoed"
            );
            self.metrics.record_losses(lost.len() as u64);
        }

        self.metrics.record_session_closed();
    }
}
