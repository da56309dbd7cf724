//! End-to-end swarm runs against scripted transports.
//!
//! These tests drive whole sessions through the public API on a paused
//! clock, so randomized durations in the tens of milliseconds complete
//! instantly and deterministically.

use async_trait::async_trait;
use chatswarm::{
    AuthorizationIndex, ChatFrame, Credentials, DatasetFormat, PublishClient, Result,
    StreamConnection, StreamEvent, StreamTransport, Swarm, SwarmConfig, SwarmError,
    CLOSE_GOING_AWAY,
};
use dashmap::DashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn test_config(sessions: usize, user_space: u32, publisher_probability: f64) -> SwarmConfig {
    SwarmConfig {
        api_host: "api.test".to_string(),
        ws_host: "ws.test".to_string(),
        dataset_path: PathBuf::from("/dev/null"),
        dataset_format: DatasetFormat::Delimited,
        user_space,
        sessions,
        publish_interval_min: Duration::from_millis(10),
        publish_interval_max: Duration::from_millis(10),
        session_duration_min: Duration::from_millis(95),
        session_duration_max: Duration::from_millis(95),
        publisher_probability,
        drain_grace: Duration::from_millis(50),
        open_jitter_max: Duration::ZERO,
    }
}

/// Index granting one topic to every user in `[1, space]`
fn index_for_space(space: u32) -> AuthorizationIndex {
    let data: String = (1..=space).map(|id| format!("{},alpha\n", id)).collect();
    AuthorizationIndex::build(Cursor::new(data), DatasetFormat::Delimited.parser()).unwrap()
}

fn empty_index() -> AuthorizationIndex {
    AuthorizationIndex::build(Cursor::new(""), DatasetFormat::Delimited.parser()).unwrap()
}

/// Routes accepted publishes straight back as stream echoes, keyed by the
/// publishing user id. Models a chat service with zero fan-out delay.
#[derive(Default)]
struct EchoHub {
    inboxes: DashMap<u32, mpsc::UnboundedSender<ChatFrame>>,
}

struct EchoTransport {
    hub: Arc<EchoHub>,
}

#[async_trait]
impl StreamTransport for EchoTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StreamConnection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.inboxes.insert(credentials.user_id(), tx);
        Ok(Box::new(EchoConnection { inbox: rx }))
    }
}

struct EchoConnection {
    inbox: mpsc::UnboundedReceiver<ChatFrame>,
}

#[async_trait]
impl StreamConnection for EchoConnection {
    async fn next_event(&mut self) -> StreamEvent {
        match self.inbox.recv().await {
            Some(frame) => StreamEvent::Chat(frame),
            None => StreamEvent::Closed { code: None },
        }
    }

    async fn send_text(&mut self, _payload: String) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self, _code: u16) -> Result<()> {
        Ok(())
    }
}

struct EchoPublish {
    hub: Arc<EchoHub>,
}

#[async_trait]
impl PublishClient for EchoPublish {
    async fn create_message(
        &self,
        _topic: &str,
        token: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        if let Some(inbox) = self.hub.inboxes.get(&credentials.user_id()) {
            let _ = inbox.send(ChatFrame {
                sender_id: credentials.user_id().to_string(),
                text: token.to_string(),
            });
        }
        Ok(())
    }
}

/// Accepts every publish but never echoes anything back
struct SilentTransport;

#[async_trait]
impl StreamTransport for SilentTransport {
    async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn StreamConnection>> {
        Ok(Box::new(SilentConnection))
    }
}

struct SilentConnection;

#[async_trait]
impl StreamConnection for SilentConnection {
    async fn next_event(&mut self) -> StreamEvent {
        std::future::pending().await
    }

    async fn send_text(&mut self, _payload: String) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self, _code: u16) -> Result<()> {
        Ok(())
    }
}

struct AcceptAllPublish;

#[async_trait]
impl PublishClient for AcceptAllPublish {
    async fn create_message(
        &self,
        _topic: &str,
        _token: &str,
        _credentials: &Credentials,
    ) -> Result<()> {
        Ok(())
    }
}

struct RefuseTransport;

#[async_trait]
impl StreamTransport for RefuseTransport {
    async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn StreamConnection>> {
        Err(SwarmError::Connection("connection refused".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_publish_echoed_means_zero_loss() {
    let hub = Arc::new(EchoHub::default());
    let swarm = Swarm::new(
        // single session so the per-user echo routing is unambiguous
        test_config(1, 1, 1.0),
        index_for_space(1),
        Arc::new(EchoPublish { hub: hub.clone() }),
        Arc::new(EchoTransport { hub }),
    );

    let summary = swarm.run().await;

    assert_eq!(summary.sessions_started, 1);
    assert_eq!(summary.sessions_closed, 1);
    assert_eq!(summary.connect_failures, 0);
    // 95ms session, 10ms interval: publish timer fires several times
    assert!(summary.messages_published >= 5, "{:?}", summary);
    assert_eq!(summary.publish_errors, 0);
    assert_eq!(summary.latency.count, summary.messages_published);
    assert_eq!(summary.losses, 0);
    assert_eq!(summary.loss_rate, 0.0);
    assert!(summary.anomalies.is_empty(), "{:?}", summary.anomalies);
    assert_eq!(summary.close_codes.get(&CLOSE_GOING_AWAY), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_silent_service_counts_every_token_as_lost() {
    let swarm = Swarm::new(
        test_config(1, 1, 1.0),
        index_for_space(1),
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );

    let summary = swarm.run().await;

    assert!(summary.messages_published >= 5);
    assert_eq!(summary.latency.count, 0);
    assert_eq!(summary.losses, summary.messages_published);
    assert_eq!(summary.loss_rate, 1.0);
    assert_eq!(summary.close_codes.get(&CLOSE_GOING_AWAY), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_stay_local_to_each_session() {
    let swarm = Swarm::new(
        test_config(5, 100, 1.0),
        index_for_space(100),
        Arc::new(AcceptAllPublish),
        Arc::new(RefuseTransport),
    );

    let summary = swarm.run().await;

    assert_eq!(summary.sessions_started, 5);
    assert_eq!(summary.sessions_closed, 5);
    assert_eq!(summary.connect_failures, 5);
    assert_eq!(summary.messages_published, 0);
    assert_eq!(summary.losses, 0);
}

#[tokio::test(start_paused = true)]
async fn test_passive_sessions_hold_connections_without_publishing() {
    let swarm = Swarm::new(
        test_config(4, 1000, 0.0),
        index_for_space(1000),
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );

    let summary = swarm.run().await;

    assert_eq!(summary.sessions_closed, 4);
    assert_eq!(summary.messages_published, 0);
    assert_eq!(summary.losses, 0);
    assert_eq!(summary.close_codes.get(&CLOSE_GOING_AWAY), Some(&4));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_users_never_publish() {
    // probability 1.0, but nobody holds a grant
    let swarm = Swarm::new(
        test_config(3, 50, 1.0),
        empty_index(),
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );

    let summary = swarm.run().await;

    assert_eq!(summary.sessions_closed, 3);
    assert_eq!(summary.messages_published, 0);
    assert_eq!(summary.losses, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_dataset_lines_reach_the_summary() {
    let data = "1,alpha\nnot-a-number,beta\n2\n";
    let index =
        AuthorizationIndex::build(Cursor::new(data), DatasetFormat::Delimited.parser()).unwrap();

    let swarm = Swarm::new(
        test_config(1, 2, 0.0),
        index,
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );

    let summary = swarm.run().await;
    assert_eq!(summary.dataset_skipped_lines, 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_ids_are_distinct() {
    let first = Swarm::new(
        test_config(1, 1, 0.0),
        empty_index(),
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );
    let second = Swarm::new(
        test_config(1, 1, 0.0),
        empty_index(),
        Arc::new(AcceptAllPublish),
        Arc::new(SilentTransport),
    );
    assert_ne!(first.run_id(), second.run_id());
}
