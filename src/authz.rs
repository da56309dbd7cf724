use crate::error::{Result, SwarmError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// One publish grant parsed from the permission dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRecord {
    pub user_id: u32,
    pub topic: String,
}

/// Supported permission dataset shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// `userId,topic1,topic2,...` per line
    Delimited,
    /// Relationship lines of the form `topic:<name>#writer@user:<id>`
    Relationship,
}

impl DatasetFormat {
    pub fn parser(&self) -> &'static dyn DatasetParser {
        match self {
            DatasetFormat::Delimited => &DelimitedParser,
            DatasetFormat::Relationship => &RelationshipParser,
        }
    }
}

/// Line parser for one dataset shape.
///
/// Deployments shipped more than one dataset format, so the index is built
/// against this seam; a new shape only needs a new parser.
pub trait DatasetParser: Send + Sync {
    /// Parse one line into grant records.
    ///
    /// `None` marks the line malformed (counted, skipped). `Some(vec![])`
    /// is a valid line carrying no grant.
    fn parse_line(&self, line: &str) -> Option<Vec<AuthorizationRecord>>;
}

/// `userId,topic1,topic2,...`
pub struct DelimitedParser;

impl DatasetParser for DelimitedParser {
    fn parse_line(&self, line: &str) -> Option<Vec<AuthorizationRecord>> {
        let mut fields = line.split(',');
        let user_id: u32 = fields.next()?.trim().parse().ok()?;

        let records: Vec<AuthorizationRecord> = fields
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(|topic| AuthorizationRecord {
                user_id,
                topic: topic.to_string(),
            })
            .collect();

        if records.is_empty() {
            // an id with no topics grants nothing and is treated as malformed
            return None;
        }
        Some(records)
    }
}

/// `topic:<name>#writer@user:<id>`, one relationship per line
pub struct RelationshipParser;

impl DatasetParser for RelationshipParser {
    fn parse_line(&self, line: &str) -> Option<Vec<AuthorizationRecord>> {
        let rest = line.trim().strip_prefix("topic:")?;
        let (topic, relation) = rest.split_once('#')?;
        let (relation, subject) = relation.split_once('@')?;

        if relation != "writer" {
            // other relations are valid dataset lines, just not publish grants
            return Some(Vec::new());
        }

        let user_id: u32 = subject.strip_prefix("user:")?.trim().parse().ok()?;
        if topic.is_empty() {
            return None;
        }

        Some(vec![AuthorizationRecord {
            user_id,
            topic: topic.to_string(),
        }])
    }
}

/// Immutable mapping from user id to the topics that user may publish to.
///
/// Built exactly once per run and shared read-only by every session; the
/// parse cost is never paid again after startup.
#[derive(Debug, Default)]
pub struct AuthorizationIndex {
    topics_by_user: HashMap<u32, Vec<String>>,
    grants: usize,
    skipped_lines: usize,
}

impl AuthorizationIndex {
    /// Load and index the permission dataset file.
    pub fn load(path: impl AsRef<Path>, parser: &dyn DatasetParser) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            SwarmError::Dataset(format!("can't open {}: {}", path.display(), e))
        })?;

        let index = Self::build(BufReader::new(file), parser)?;
        info!(
            users = index.user_count(),
            grants = index.grants,
            path = %path.display(),
            "authorization index built"
        );
        Ok(index)
    }

    /// Index a line-oriented dataset from any reader.
    ///
    /// Malformed lines are skipped and counted; they surface as one
    /// aggregate warning rather than per-line log flooding.
    pub fn build<R: BufRead>(reader: R, parser: &dyn DatasetParser) -> Result<Self> {
        let mut topics_by_user: HashMap<u32, Vec<String>> = HashMap::new();
        let mut grants = 0usize;
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line.map_err(|e| SwarmError::Dataset(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }

            match parser.parse_line(&line) {
                Some(records) => {
                    for record in records {
                        topics_by_user
                            .entry(record.user_id)
                            .or_default()
                            .push(record.topic);
                        grants += 1;
                    }
                }
                None => skipped += 1,
            }
        }

        for topics in topics_by_user.values_mut() {
            topics.sort();
            topics.dedup();
        }

        if skipped > 0 {
            warn!(skipped, "skipped malformed permission dataset lines");
        }

        Ok(Self {
            topics_by_user,
            grants,
            skipped_lines: skipped,
        })
    }

    /// Topics the user may publish to; empty for users absent from the
    /// dataset. Callers with an empty set must not publish.
    pub fn topics_for(&self, user_id: u32) -> &[String] {
        self.topics_by_user
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct users carrying at least one grant
    pub fn user_count(&self) -> usize {
        self.topics_by_user.len()
    }

    /// Dataset lines that could not be parsed
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}
