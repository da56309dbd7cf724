//! Chatswarm Load Generator
//!
//! Async load generator for a topic-based pub/sub chat service: publishes
//! messages over HTTP, observes echoes over WebSocket streams, and
//! correlates the two into end-to-end latency and loss measurements.

pub mod authz;
pub mod config;
pub mod correlator;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod publish;
pub mod session;
pub mod swarm;
pub mod transport;

pub use authz::{AuthorizationIndex, AuthorizationRecord, DatasetFormat, DatasetParser};
pub use config::SwarmConfig;
pub use correlator::{CorrelationOutcome, MessageCorrelator};
pub use error::{Result, SwarmError};
pub use identity::{Credentials, IdentityRegistry, UserIdentity};
pub use metrics::{AnomalyKind, LatencyStats, MetricsSink, RunSummary, SwarmMetrics};
pub use publish::{HttpPublishClient, PublishClient};
pub use session::{SessionState, StreamSession};
pub use swarm::Swarm;
pub use transport::{
    ChatFrame, StreamConnection, StreamEvent, StreamTransport, WsTransport,
    CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
