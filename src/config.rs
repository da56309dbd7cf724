use crate::authz::DatasetFormat;
use crate::error::{Result, SwarmError};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime parameters for one load-generation run.
///
/// All required values come from the environment and are validated before
/// any session starts; a missing or malformed value fails the whole run.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Host of the message-create HTTP API, `host[:port]`
    pub api_host: String,

    /// Host of the streaming endpoint, `host[:port]`
    pub ws_host: String,

    /// Path to the permission dataset file
    pub dataset_path: PathBuf,

    /// Shape of the permission dataset
    pub dataset_format: DatasetFormat,

    /// Size of the user identifier space; ids are drawn from `[1, space]`
    pub user_space: u32,

    /// Number of concurrent simulated sessions
    pub sessions: usize,

    /// Lower bound of the randomized inter-publish interval
    pub publish_interval_min: Duration,

    /// Upper bound of the randomized inter-publish interval
    pub publish_interval_max: Duration,

    /// Lower bound of the randomized session duration
    pub session_duration_min: Duration,

    /// Upper bound of the randomized session duration
    pub session_duration_max: Duration,

    /// Probability that a session becomes an active publisher
    pub publisher_probability: f64,

    /// How long a draining session stays connected for in-flight echoes
    /// before the forced close
    pub drain_grace: Duration,

    /// Upper bound of the randomized sleep after connection open,
    /// desynchronizing publish timers across sessions (0 disables it)
    pub open_jitter_max: Duration,
}

impl SwarmConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an injected lookup function.
    ///
    /// The indirection exists so tests can substitute the environment
    /// without mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            api_host: require(&lookup, "API_HOST")?,
            ws_host: require(&lookup, "WS_HOST")?,
            dataset_path: PathBuf::from(require(&lookup, "AUTHZ_DATASET")?),
            dataset_format: parse_format(optional(&lookup, "AUTHZ_FORMAT"))?,
            user_space: parse("USER_SPACE", require(&lookup, "USER_SPACE")?)?,
            sessions: optional(&lookup, "SESSIONS")
                .map(|v| parse("SESSIONS", v))
                .transpose()?
                .unwrap_or(100),
            publish_interval_min: require_millis(&lookup, "PUBLISH_INTERVAL_MIN_MS")?,
            publish_interval_max: require_millis(&lookup, "PUBLISH_INTERVAL_MAX_MS")?,
            session_duration_min: require_millis(&lookup, "SESSION_DURATION_MIN_MS")?,
            session_duration_max: require_millis(&lookup, "SESSION_DURATION_MAX_MS")?,
            publisher_probability: optional(&lookup, "PUBLISHER_PROBABILITY")
                .map(|v| parse("PUBLISHER_PROBABILITY", v))
                .transpose()?
                .unwrap_or(0.5),
            drain_grace: optional_millis(&lookup, "DRAIN_GRACE_MS")?
                .unwrap_or(Duration::from_millis(3000)),
            open_jitter_max: optional_millis(&lookup, "OPEN_JITTER_MAX_MS")?
                .unwrap_or(Duration::ZERO),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check range invariants across the parsed values.
    pub fn validate(&self) -> Result<()> {
        if self.user_space == 0 {
            return Err(SwarmError::Config("USER_SPACE must be at least 1".to_string()));
        }
        if self.sessions == 0 {
            return Err(SwarmError::Config("SESSIONS must be at least 1".to_string()));
        }
        if self.publish_interval_min.is_zero() || self.publish_interval_min > self.publish_interval_max {
            return Err(SwarmError::Config(format!(
                "publish interval bounds invalid: {}ms..{}ms",
                self.publish_interval_min.as_millis(),
                self.publish_interval_max.as_millis()
            )));
        }
        if self.session_duration_min.is_zero() || self.session_duration_min > self.session_duration_max {
            return Err(SwarmError::Config(format!(
                "session duration bounds invalid: {}ms..{}ms",
                self.session_duration_min.as_millis(),
                self.session_duration_max.as_millis()
            )));
        }
        if !(0.0..=1.0).contains(&self.publisher_probability) {
            return Err(SwarmError::Config(format!(
                "PUBLISHER_PROBABILITY must be within [0, 1], got {}",
                self.publisher_probability
            )));
        }
        Ok(())
    }
}

fn require<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SwarmError::Config(format!(
            "environment variable {} is required",
            name
        ))),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.is_empty())
}

fn parse<T>(name: &str, raw: String) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| {
        SwarmError::Config(format!("can't parse env {}={}: {}", name, raw, e))
    })
}

fn require_millis<F>(lookup: &F, name: &str) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = require(lookup, name)?;
    let millis: u64 = parse(name, raw)?;
    Ok(Duration::from_millis(millis))
}

fn optional_millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name)
        .map(|raw| parse(name, raw).map(Duration::from_millis))
        .transpose()
}

fn parse_format(raw: Option<String>) -> Result<DatasetFormat> {
    match raw.as_deref() {
        None | Some("csv") => Ok(DatasetFormat::Delimited),
        Some("zed") => Ok(DatasetFormat::Relationship),
        Some(other) => Err(SwarmError::Config(format!(
            "AUTHZ_FORMAT must be \"csv\" or \"zed\", got {:?}",
            other
        ))),
    }
}
