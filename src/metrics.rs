use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Non-fatal irregularities surfaced in the final summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// A token was registered while already pending
    DuplicateToken,
    /// An echo arrived with no matching pending token
    UnmatchedEcho,
    /// The stream closed with a code outside the expected set
    UnexpectedCloseCode,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::DuplicateToken => "duplicate_token",
            AnomalyKind::UnmatchedEcho => "unmatched_echo",
            AnomalyKind::UnexpectedCloseCode => "unexpected_close_code",
        }
    }
}

/// Sink for observations produced by concurrently running sessions.
///
/// Every method may be called from many session tasks at once.
pub trait MetricsSink: Send + Sync {
    /// One resolved echo round trip
    fn record_latency(&self, sample: Duration);
    /// Tokens that never came back before session end
    fn record_losses(&self, count: u64);
    /// A session whose stream handshake failed
    fn record_connect_failure(&self);
    /// A publish call the API accepted
    fn record_publish(&self);
    /// A publish call the API rejected
    fn record_publish_error(&self);
    fn record_anomaly(&self, kind: AnomalyKind);
    fn record_close_code(&self, code: u16);
    fn record_session_started(&self);
    fn record_session_closed(&self);
}

/// In-memory aggregate implementation of [`MetricsSink`]
#[derive(Debug, Default)]
pub struct SwarmMetrics {
    latencies: Mutex<Vec<Duration>>,
    losses: AtomicU64,
    connect_failures: AtomicU64,
    published: AtomicU64,
    publish_errors: AtomicU64,
    sessions_started: AtomicU64,
    sessions_closed: AtomicU64,
    dataset_skipped_lines: AtomicU64,
    anomalies: DashMap<&'static str, u64>,
    close_codes: DashMap<u16, u64>,
}

impl SwarmMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset lines dropped during index construction; recorded once per
    /// run so parse quality shows up in the summary, not just the log.
    pub fn record_dataset_skipped_lines(&self, count: u64) {
        self.dataset_skipped_lines.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot the aggregates into the per-run summary.
    pub fn summary(&self) -> RunSummary {
        let mut samples = self.latencies.lock().clone();
        samples.sort();

        let losses = self.losses.load(Ordering::Relaxed);
        let matched = samples.len() as u64;
        let observed = matched + losses;

        RunSummary {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            messages_published: self.published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            dataset_skipped_lines: self.dataset_skipped_lines.load(Ordering::Relaxed),
            latency: LatencyStats::from_sorted(&samples),
            losses,
            loss_rate: if observed > 0 {
                losses as f64 / observed as f64
            } else {
                0.0
            },
            anomalies: self
                .anomalies
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            close_codes: self
                .close_codes
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

impl MetricsSink for SwarmMetrics {
    fn record_latency(&self, sample: Duration) {
        self.latencies.lock().push(sample);
    }

    fn record_losses(&self, count: u64) {
        self.losses.fetch_add(count, Ordering::Relaxed);
    }

    fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_anomaly(&self, kind: AnomalyKind) {
        *self.anomalies.entry(kind.as_str()).or_insert(0) += 1;
    }

    fn record_close_code(&self, code: u16) {
        *self.close_codes.entry(code).or_insert(0) += 1;
    }

    fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Echo round-trip latency distribution
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    fn from_sorted(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                mean_ms: 0.0,
                min_ms: 0.0,
                max_ms: 0.0,
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
            };
        }

        let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let sum: f64 = millis.iter().sum();

        Self {
            count: millis.len() as u64,
            mean_ms: sum / millis.len() as f64,
            min_ms: millis[0],
            max_ms: millis[millis.len() - 1],
            p50_ms: percentile(&millis, 50.0),
            p95_ms: percentile(&millis, 95.0),
            p99_ms: percentile(&millis, 99.0),
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice
fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0 * (sorted_ms.len() - 1) as f64).round() as usize;
    sorted_ms[rank.min(sorted_ms.len() - 1)]
}

/// Aggregated result of one load-generation run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub sessions_started: u64,
    pub sessions_closed: u64,
    pub connect_failures: u64,
    pub messages_published: u64,
    pub publish_errors: u64,
    /// Permission dataset lines skipped as malformed at index build
    pub dataset_skipped_lines: u64,
    pub latency: LatencyStats,
    pub losses: u64,
    /// Losses over all observed outcomes (matches + losses)
    pub loss_rate: f64,
    pub anomalies: BTreeMap<String, u64>,
    pub close_codes: BTreeMap<u16, u64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(
            f,
            "sessions: {} started, {} closed, {} connect failures",
            self.sessions_started, self.sessions_closed, self.connect_failures
        )?;
        writeln!(
            f,
            "publishes: {} accepted, {} rejected",
            self.messages_published, self.publish_errors
        )?;
        writeln!(
            f,
            "latency: {} samples, mean {:.1}ms, p50 {:.1}ms, p95 {:.1}ms, p99 {:.1}ms, max {:.1}ms",
            self.latency.count,
            self.latency.mean_ms,
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms,
            self.latency.max_ms
        )?;
        writeln!(
            f,
            "loss: {} tokens never echoed ({:.2}% of observed)",
            self.losses,
            self.loss_rate * 100.0
        )?;
        if self.dataset_skipped_lines > 0 {
            writeln!(
                f,
                "dataset: {} malformed lines skipped",
                self.dataset_skipped_lines
            )?;
        }
        for (kind, count) in &self.anomalies {
            writeln!(f, "anomaly {}: {}", kind, count)?;
        }
        for (code, count) in &self.close_codes {
            writeln!(f, "close code {}: {}", code, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_with_samples(ms: &[u64]) -> SwarmMetrics {
        let metrics = SwarmMetrics::new();
        for &m in ms {
            metrics.record_latency(Duration::from_millis(m));
        }
        metrics
    }

    #[test]
    fn test_summary_latency_distribution() {
        let metrics = sink_with_samples(&[10, 20, 30, 40, 50]);
        let summary = metrics.summary();

        assert_eq!(summary.latency.count, 5);
        assert_eq!(summary.latency.mean_ms, 30.0);
        assert_eq!(summary.latency.min_ms, 10.0);
        assert_eq!(summary.latency.max_ms, 50.0);
        assert_eq!(summary.latency.p50_ms, 30.0);
    }

    #[test]
    fn test_empty_summary_has_no_samples() {
        let summary = SwarmMetrics::new().summary();
        assert_eq!(summary.latency.count, 0);
        assert_eq!(summary.loss_rate, 0.0);
    }

    #[test]
    fn test_loss_rate_over_observed_outcomes() {
        let metrics = sink_with_samples(&[10, 10, 10]);
        metrics.record_losses(1);

        let summary = metrics.summary();
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.loss_rate, 0.25);
    }

    #[test]
    fn test_anomalies_grouped_by_kind() {
        let metrics = SwarmMetrics::new();
        metrics.record_anomaly(AnomalyKind::UnmatchedEcho);
        metrics.record_anomaly(AnomalyKind::UnmatchedEcho);
        metrics.record_anomaly(AnomalyKind::DuplicateToken);

        let summary = metrics.summary();
        assert_eq!(summary.anomalies.get("unmatched_echo"), Some(&2));
        assert_eq!(summary.anomalies.get("duplicate_token"), Some(&1));
        assert_eq!(summary.anomalies.get("unexpected_close_code"), None);
    }

    #[test]
    fn test_dataset_skipped_lines_surface_in_summary() {
        let metrics = SwarmMetrics::new();
        metrics.record_dataset_skipped_lines(7);

        let summary = metrics.summary();
        assert_eq!(summary.dataset_skipped_lines, 7);
        assert!(summary.to_string().contains("7 malformed lines skipped"));

        // a clean dataset stays out of the printed summary
        let clean = SwarmMetrics::new().summary();
        assert_eq!(clean.dataset_skipped_lines, 0);
        assert!(!clean.to_string().contains("malformed"));
    }

    #[test]
    fn test_close_codes_counted() {
        let metrics = SwarmMetrics::new();
        metrics.record_close_code(1001);
        metrics.record_close_code(1001);
        metrics.record_close_code(1006);

        let summary = metrics.summary();
        assert_eq!(summary.close_codes.get(&1001), Some(&2));
        assert_eq!(summary.close_codes.get(&1006), Some(&1));
    }

    #[test]
    fn test_concurrent_writers() {
        use std::sync::Arc;

        let metrics = Arc::new(SwarmMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let metrics = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_latency(Duration::from_millis(5));
                    metrics.record_publish();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.latency.count, 400);
        assert_eq!(summary.messages_published, 400);
    }

    #[test]
    fn test_summary_serializes() {
        let metrics = sink_with_samples(&[10]);
        let json = serde_json::to_string(&metrics.summary()).unwrap();
        assert!(json.contains("\"p95_ms\""));
    }
}
