//! Configuration loader and validator for the GitHub→Notion sync pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::EntityState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
///
/// Every component receives the sections it needs by reference; nothing here
/// is process-global, so concurrent runs against different databases cannot
/// cross-talk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub http: Http,
    pub retry: Retry,
    pub properties: PropertyNames,
    /// Absent means: use the per-flavour default table.
    pub status_map: Option<StatusMap>,
    pub relations: Vec<RelationRule>,
    pub backlink: Backlink,
}

/// HTTP client settings shared by both remote services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Http {
    pub timeout_seconds: u64,
    /// Minimum pause between consecutive upserts; the only backpressure
    /// besides honoring Retry-After headers.
    pub min_call_interval_ms: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            min_call_interval_ms: 350,
        }
    }
}

/// Bounded retry schedule applied to throttled or timed-out calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl Retry {
    /// Exponential growth from the base delay, capped. `attempt` is 0-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Names of the Notion properties a target database exposes. Databases may
/// omit any of them except the identifier; absent properties are skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PropertyNames {
    pub title: String,
    pub identifier: String,
    pub status: String,
    pub url: String,
    pub labels: String,
    pub assignees: String,
    pub author: String,
    pub number: String,
    pub created: String,
    pub updated: String,
    pub completed: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: "Name".into(),
            identifier: "GitHub ID".into(),
            status: "Status".into(),
            url: "GitHub URL".into(),
            labels: "Labels".into(),
            assignees: "Assignees".into(),
            author: "Author".into(),
            number: "GitHub Number".into(),
            created: "Created".into(),
            updated: "Updated".into(),
            completed: "Completed".into(),
        }
    }
}

/// Source-state → Notion status label table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusMap {
    pub open: String,
    pub closed: String,
    pub merged: String,
    pub archived: String,
}

impl Default for StatusMap {
    fn default() -> Self {
        Self {
            open: "Open".into(),
            closed: "Closed".into(),
            merged: "Done".into(),
            archived: "Archived".into(),
        }
    }
}

impl StatusMap {
    /// Table for task-flavoured issues: closing a task completes it.
    pub fn tasks() -> Self {
        Self {
            closed: "Done".into(),
            ..Self::default()
        }
    }

    pub fn label_for(&self, state: EntityState) -> &str {
        match state {
            EntityState::Open => &self.open,
            EntityState::Closed => &self.closed,
            EntityState::Merged => &self.merged,
            EntityState::Archived => &self.archived,
        }
    }
}

/// Upstream field a relation property is populated from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationSource {
    /// The issue's / pull request's milestone.
    Milestone,
}

/// Maps a relation-typed property onto the database holding its targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationRule {
    pub property: String,
    pub database_id: String,
    pub source: RelationSource,
}

/// Best-effort backlink comments posted on GitHub after a page is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Backlink {
    pub enabled: bool,
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.http.min_call_interval_ms)
    }
}

/// Load configuration from a YAML file and validate it.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.http.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("http.timeout_seconds must be > 0"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be > 0"));
    }
    if cfg.retry.base_delay_ms > cfg.retry.max_delay_ms {
        return Err(ConfigError::Invalid(
            "retry.base_delay_ms must not exceed retry.max_delay_ms",
        ));
    }

    let p = &cfg.properties;
    for (value, message) in [
        (&p.title, "properties.title must be non-empty"),
        (&p.identifier, "properties.identifier must be non-empty"),
        (&p.status, "properties.status must be non-empty"),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(message));
        }
    }

    if let Some(map) = &cfg.status_map {
        if map.open.trim().is_empty() || map.closed.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "status_map labels must be non-empty",
            ));
        }
    }

    for rule in &cfg.relations {
        if rule.property.trim().is_empty() {
            return Err(ConfigError::Invalid("relations[].property must be non-empty"));
        }
        if rule.database_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "relations[].database_id must be non-empty",
            ));
        }
    }

    Ok(())
}

/// Example YAML accepted by [`load`].
pub fn example() -> &'static str {
    r#"http:
  timeout_seconds: 30
  min_call_interval_ms: 350

retry:
  max_attempts: 3
  base_delay_ms: 500
  max_delay_ms: 30000

properties:
  title: "Name"
  identifier: "GitHub ID"
  status: "Status"
  url: "GitHub URL"
  labels: "Labels"
  assignees: "Assignees"
  author: "Author"
  number: "GitHub Number"
  created: "Created"
  updated: "Updated"
  completed: "Completed"

status_map:
  open: "Open"
  closed: "Closed"
  merged: "Done"
  archived: "Archived"

relations:
  - property: "Milestone"
    database_id: "NOTION_MILESTONE_DATABASE_ID"
    source: milestone

backlink:
  enabled: false
"#
}
