use crate::authz::AuthorizationIndex;
use crate::config::SwarmConfig;
use crate::error::Result;
use crate::identity::IdentityRegistry;
use crate::metrics::{RunSummary, SwarmMetrics};
use crate::publish::{HttpPublishClient, PublishClient};
use crate::session::StreamSession;
use crate::transport::{StreamTransport, WsTransport};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Orchestrates one load-generation run: builds the shared collaborators
/// once, spawns one task per session, and aggregates the outcome.
pub struct Swarm {
    run_id: String,
    config: Arc<SwarmConfig>,
    index: Arc<AuthorizationIndex>,
    registry: Arc<IdentityRegistry>,
    publish: Arc<dyn PublishClient>,
    transport: Arc<dyn StreamTransport>,
    metrics: Arc<SwarmMetrics>,
}

impl Swarm {
    /// Wire a swarm from explicit collaborators. Tests use this entry
    /// point with scripted transports and publish clients.
    pub fn new(
        config: SwarmConfig,
        index: AuthorizationIndex,
        publish: Arc<dyn PublishClient>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let metrics = Arc::new(SwarmMetrics::new());
        metrics.record_dataset_skipped_lines(index.skipped_lines() as u64);

        Self {
            run_id: Uuid::new_v4().to_string(),
            config: Arc::new(config),
            index: Arc::new(index),
            registry: Arc::new(IdentityRegistry::new()),
            publish,
            transport,
            metrics,
        }
    }

    /// Wire a swarm against the real chat service from environment
    /// configuration. Any error here is fatal for the run.
    pub fn from_env() -> Result<Self> {
        let config = SwarmConfig::from_env()?;
        let index =
            AuthorizationIndex::load(&config.dataset_path, config.dataset_format.parser())?;
        let publish = Arc::new(HttpPublishClient::new(&config.api_host)?);
        let transport = Arc::new(WsTransport::new(&config.ws_host));

        Ok(Self::new(config, index, publish, transport))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn metrics(&self) -> Arc<SwarmMetrics> {
        self.metrics.clone()
    }

    /// Run every session to completion and return the aggregated summary.
    ///
    /// Sessions are independent: one failing, or finding itself without
    /// publish grants, never stops its siblings.
    pub async fn run(&self) -> RunSummary {
        info!(
            run_id = %self.run_id,
            sessions = self.config.sessions,
            user_space = self.config.user_space,
            authorized_users = self.index.user_count(),
            "starting run"
        );

        let mut handles = Vec::with_capacity(self.config.sessions);
        for _ in 0..self.config.sessions {
            let identity = self.registry.next_identity(self.config.user_space);
            let topics = self.index.topics_for(identity.user_id).to_vec();

            let session = StreamSession::new(
                identity,
                topics,
                self.config.clone(),
                self.publish.clone(),
                self.transport.clone(),
                self.metrics.clone(),
            );
            handles.push(tokio::spawn(session.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                // a panicking session is a bug in the generator, not the
                // target; surface it without taking down the run
                error!(run_id = %self.run_id, error = %e, "session task failed");
            }
        }

        let summary = self.metrics.summary();
        info!(
            run_id = %self.run_id,
            sessions_closed = summary.sessions_closed,
            published = summary.messages_published,
            matched = summary.latency.count,
            losses = summary.losses,
            "run complete"
        );
        summary
    }
}
