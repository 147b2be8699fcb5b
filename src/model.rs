use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The GitHub artefact flavours this tool can mirror.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Issue,
    PullRequest,
    Discussion,
    Milestone,
    WorkflowRun,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Issue => "issue",
            EntityKind::PullRequest => "pull_request",
            EntityKind::Discussion => "discussion",
            EntityKind::Milestone => "milestone",
            EntityKind::WorkflowRun => "workflow_run",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntityState {
    Open,
    Closed,
    Merged,
    /// Terminal without success: failed/cancelled workflow runs, archived items.
    Archived,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Open => "open",
            EntityState::Closed => "closed",
            EntityState::Merged => "merged",
            EntityState::Archived => "archived",
        }
    }
}

/// A cross-database link carried by an entity, resolved against the related
/// database at upsert time. `unlink` requests removal of an existing relation
/// entry; plain refs are appended if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub property: String,
    pub target_external_id: String,
    pub unlink: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Closed or merged time, whichever terminated the entity.
    pub closed: Option<DateTime<Utc>>,
}

/// Normalised snapshot of one GitHub object, rebuilt fresh every run.
/// `external_id` is the sole join key to Notion and is unique within one
/// kind and repository.
#[derive(Debug, Clone)]
pub struct SourceEntity {
    pub kind: EntityKind,
    pub external_id: String,
    pub number: Option<i64>,
    pub title: String,
    pub state: EntityState,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub timestamps: Timestamps,
    pub relations: Vec<RelationRef>,
}

impl SourceEntity {
    pub fn new(kind: EntityKind, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            number: None,
            title: title.into(),
            state: EntityState::Open,
            labels: Vec::new(),
            assignees: Vec::new(),
            author: None,
            url: None,
            timestamps: Timestamps::default(),
            relations: Vec::new(),
        }
    }
}

/// What the upsert decided to do (or would have done under dry-run).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
    /// Entity produced no writable properties; nothing to persist.
    Skipped,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Created => "created",
            UpsertAction::Updated => "updated",
            UpsertAction::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    /// Absent when a dry-run create never produced a page.
    pub page_id: Option<String>,
    pub page_url: Option<String>,
}
