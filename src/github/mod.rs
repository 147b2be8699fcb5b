use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::{RelationRule, RelationSource, Retry};
use crate::error::{classify_status, parse_retry_after, Service, SyncError};
use crate::model::{EntityKind, EntityState, RelationRef, SourceEntity, Timestamps};
use crate::retry::with_retry;

pub mod model;

use model::{
    DiscussionNode, GraphqlResp, MilestoneRef, RestIssue, RestMilestone, RestPull,
    WorkflowRunEvent,
};

const GITHUB_API_BASE: &str = "https://api.github.com/";
const API_VERSION: &str = "2022-11-28";

const DISCUSSIONS_QUERY: &str = "\
query($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    discussions(first: 100, after: $cursor) {
      pageInfo { hasNextPage endCursor }
      nodes {
        id number title url closed createdAt updatedAt
        labels(first: 50) { nodes { name } }
        author { login }
      }
    }
  }
}";

/// Lazy, finite sequence of entities; pages are fetched on demand.
pub type EntityStream<'a> = BoxStream<'a, Result<SourceEntity, SyncError>>;

/// Criteria narrowing what the fetcher yields.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Label allow-list (case-insensitive); empty means no label filtering.
    pub labels: Vec<String>,
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: String,
    owner: String,
    repo: String,
    retry: Retry,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(
        token: String,
        repository: &str,
        timeout: Duration,
        retry: Retry,
    ) -> Result<Self, SyncError> {
        let base_url = Url::parse(GITHUB_API_BASE).expect("valid default GitHub URL");
        Self::with_base_url(token, repository, base_url, timeout, retry)
    }

    pub fn with_base_url(
        token: String,
        repository: &str,
        base_url: Url,
        timeout: Duration,
        retry: Retry,
    ) -> Result<Self, SyncError> {
        let (owner, repo) = repository
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "repository must be given as owner/name, got {repository:?}"
                ))
            })?;
        let http = Client::builder()
            .user_agent("gh-notion-sync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            base_url,
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            retry,
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_endpoint(&self, tail: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(&format!("repos/{}/{}/{}", self.owner, self.repo, tail))
            .map_err(|err| SyncError::Config(format!("invalid GitHub URL: {err}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Issues carrying any of the filter labels, excluding pull requests
    /// (the issues endpoint conflates them).
    pub fn issues(
        &self,
        filter: EntityFilter,
        rules: Vec<RelationRule>,
    ) -> Result<EntityStream<'_>, SyncError> {
        let first = self.repo_endpoint("issues?state=all&per_page=100&sort=updated")?;
        Ok(self.rest_entities::<RestIssue, _>(first, move |issue| {
            convert_issue(issue, &filter, &rules)
        }))
    }

    pub fn pull_requests(&self, rules: Vec<RelationRule>) -> Result<EntityStream<'_>, SyncError> {
        let first = self.repo_endpoint("pulls?state=all&per_page=100&sort=updated")?;
        Ok(self.rest_entities::<RestPull, _>(first, move |pull| convert_pull(pull, &rules)))
    }

    pub fn milestones(&self) -> Result<EntityStream<'_>, SyncError> {
        let first = self.repo_endpoint("milestones?state=all&per_page=100")?;
        Ok(self.rest_entities::<RestMilestone, _>(first, |milestone| {
            Some(convert_milestone(milestone))
        }))
    }

    /// Repository discussions, which GitHub only exposes over GraphQL.
    pub fn discussions(&self) -> EntityStream<'_> {
        enum Cursor {
            Start,
            Next(String),
            Done,
        }

        stream::try_unfold(Cursor::Start, move |state| async move {
            let cursor = match state {
                Cursor::Start => None,
                Cursor::Next(cursor) => Some(cursor),
                Cursor::Done => return Ok::<_, SyncError>(None),
            };
            let (nodes, next) = self.fetch_discussion_page(cursor.as_deref()).await?;
            let state = match next {
                Some(cursor) => Cursor::Next(cursor),
                None => Cursor::Done,
            };
            Ok(Some((nodes, state)))
        })
        .map_ok(|nodes| {
            stream::iter(
                nodes
                    .into_iter()
                    .map(convert_discussion)
                    .map(Ok::<SourceEntity, SyncError>),
            )
        })
        .try_flatten()
        .boxed()
    }

    fn rest_entities<T, F>(&self, first: Url, convert: F) -> EntityStream<'_>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Option<SourceEntity> + Send + Sync + Clone + 'static,
    {
        stream::try_unfold(Some(first), move |state| async move {
            let Some(url) = state else {
                return Ok::<_, SyncError>(None);
            };
            let (items, next) = self.fetch_rest_page::<T>(url).await?;
            Ok(Some((items, next)))
        })
        .map_ok(move |items| {
            let convert = convert.clone();
            stream::iter(
                items
                    .into_iter()
                    .filter_map(move |item| convert(item))
                    .map(Ok::<SourceEntity, SyncError>),
            )
        })
        .try_flatten()
        .boxed()
    }

    async fn fetch_rest_page<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(Vec<T>, Option<Url>), SyncError> {
        with_retry(&self.retry, || self.fetch_rest_page_once::<T>(url.clone())).await
    }

    async fn fetch_rest_page_once<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(Vec<T>, Option<Url>), SyncError> {
        debug!(url = %url, "github request");
        let res = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                service: Service::GitHub,
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            let throttled = rate_limit_exhausted(res.headers());
            let retry_after = parse_retry_after(res.headers());
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(
                Service::GitHub,
                status.as_u16(),
                throttled,
                retry_after,
                body,
            ));
        }

        let next = res
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link)
            .and_then(|raw| Url::parse(&raw).ok());

        let raw = res.text().await.map_err(|source| SyncError::Transport {
            service: Service::GitHub,
            source,
        })?;
        let items = serde_json::from_str(&raw).map_err(|err| SyncError::MalformedResponse {
            service: Service::GitHub,
            message: err.to_string(),
        })?;
        Ok((items, next))
    }

    async fn fetch_discussion_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<DiscussionNode>, Option<String>), SyncError> {
        with_retry(&self.retry, || self.fetch_discussion_page_once(cursor)).await
    }

    async fn fetch_discussion_page_once(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<DiscussionNode>, Option<String>), SyncError> {
        let endpoint = self
            .base_url
            .join("graphql")
            .map_err(|err| SyncError::Config(format!("invalid GitHub URL: {err}")))?;
        let body = json!({
            "query": DISCUSSIONS_QUERY,
            "variables": { "owner": self.owner, "name": self.repo, "cursor": cursor },
        });
        let res = self
            .request(reqwest::Method::POST, endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                service: Service::GitHub,
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            let throttled = rate_limit_exhausted(res.headers());
            let retry_after = parse_retry_after(res.headers());
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(
                Service::GitHub,
                status.as_u16(),
                throttled,
                retry_after,
                body,
            ));
        }

        let resp: GraphqlResp = res.json().await.map_err(|err| SyncError::MalformedResponse {
            service: Service::GitHub,
            message: err.to_string(),
        })?;
        if !resp.errors.is_empty() {
            let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
            return Err(SyncError::MalformedResponse {
                service: Service::GitHub,
                message: messages.join("; "),
            });
        }
        let connection = resp
            .data
            .and_then(|data| data.repository)
            .ok_or_else(|| SyncError::MalformedResponse {
                service: Service::GitHub,
                message: "repository missing from GraphQL response".into(),
            })?
            .discussions;
        let next = if connection.page_info.has_next_page {
            connection.page_info.end_cursor
        } else {
            None
        };
        Ok((connection.nodes, next))
    }

    /// Best-effort backlink comment after a page is created. Failures are
    /// the caller's to log; they never block the run.
    pub async fn post_backlink_comment(
        &self,
        number: i64,
        notion_url: &str,
    ) -> Result<(), SyncError> {
        let endpoint = self.repo_endpoint(&format!("issues/{number}/comments"))?;
        let body = json!({ "body": format!("Mirrored to Notion: {notion_url}") });
        let res = self
            .request(reqwest::Method::POST, endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                service: Service::GitHub,
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            let throttled = rate_limit_exhausted(res.headers());
            let retry_after = parse_retry_after(res.headers());
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(
                Service::GitHub,
                status.as_u16(),
                throttled,
                retry_after,
                body,
            ));
        }
        Ok(())
    }
}

/// Load a GitHub Actions event payload from disk.
pub fn load_event(path: &Path) -> Result<Value, SyncError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        SyncError::Config(format!("event payload not readable at {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|err| SyncError::MalformedResponse {
        service: Service::GitHub,
        message: err.to_string(),
    })
}

/// Build the workflow-run entity from an Actions event payload. Runs are
/// delivered by the trigger, never fetched.
pub fn workflow_run_from_event(payload: &Value) -> Result<SourceEntity, SyncError> {
    let event: WorkflowRunEvent =
        serde_json::from_value(payload.clone()).map_err(|err| SyncError::MalformedResponse {
            service: Service::GitHub,
            message: err.to_string(),
        })?;
    let run = event
        .workflow_run
        .ok_or_else(|| SyncError::MalformedResponse {
            service: Service::GitHub,
            message: "workflow_run payload missing from event context".into(),
        })?;

    let name = run.name.clone().unwrap_or_else(|| "Workflow".to_string());
    let title = match run.run_number {
        Some(number) => format!("{name} #{number}"),
        None => name,
    };

    let mut entity = SourceEntity::new(
        EntityKind::WorkflowRun,
        external_id(run.node_id.as_deref(), run.id),
        title,
    );
    entity.number = run.run_number;
    entity.state = match run.conclusion.as_deref() {
        None => EntityState::Open,
        Some("success") => EntityState::Closed,
        Some(_) => EntityState::Archived,
    };
    entity.labels = run.event.as_deref().map(capitalize).into_iter().collect();
    entity.author = run.actor.map(|actor| actor.login);
    entity.url = run.html_url;
    entity.timestamps = Timestamps {
        created: run.run_started_at,
        updated: run.updated_at,
        closed: run.conclusion.is_some().then_some(run.updated_at).flatten(),
    };
    Ok(entity)
}

fn convert_issue(
    issue: RestIssue,
    filter: &EntityFilter,
    rules: &[RelationRule],
) -> Option<SourceEntity> {
    if issue.pull_request.is_some() {
        return None;
    }
    let labels: Vec<String> = issue.labels.into_iter().map(|label| label.name).collect();
    if !passes_label_filter(&labels, &filter.labels) {
        return None;
    }

    let mut entity = SourceEntity::new(
        EntityKind::Issue,
        external_id(issue.node_id.as_deref(), issue.id),
        issue
            .title
            .unwrap_or_else(|| format!("Issue #{}", issue.number)),
    );
    entity.number = Some(issue.number);
    entity.state = if issue.state.as_deref() == Some("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    };
    entity.labels = labels;
    entity.assignees = issue.assignees.into_iter().map(|a| a.login).collect();
    entity.author = issue.user.map(|user| user.login);
    entity.url = issue.html_url;
    entity.timestamps = Timestamps {
        created: issue.created_at,
        updated: issue.updated_at,
        closed: issue.closed_at,
    };
    entity.relations = milestone_relations(issue.milestone.as_ref(), rules);
    Some(entity)
}

fn convert_pull(pull: RestPull, rules: &[RelationRule]) -> Option<SourceEntity> {
    let mut entity = SourceEntity::new(
        EntityKind::PullRequest,
        external_id(pull.node_id.as_deref(), pull.id),
        pull.title
            .unwrap_or_else(|| format!("PR #{}", pull.number)),
    );
    entity.number = Some(pull.number);
    entity.state = if pull.merged_at.is_some() {
        EntityState::Merged
    } else if pull.state.as_deref() == Some("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    };
    entity.labels = pull.labels.into_iter().map(|label| label.name).collect();
    entity.assignees = pull.assignees.into_iter().map(|a| a.login).collect();
    entity.author = pull.user.map(|user| user.login);
    entity.url = pull.html_url;
    entity.timestamps = Timestamps {
        created: pull.created_at,
        updated: pull.updated_at,
        closed: pull.merged_at.or(pull.closed_at),
    };
    entity.relations = milestone_relations(pull.milestone.as_ref(), rules);
    Some(entity)
}

fn convert_milestone(milestone: RestMilestone) -> SourceEntity {
    let mut entity = SourceEntity::new(
        EntityKind::Milestone,
        external_id(milestone.node_id.as_deref(), milestone.id),
        milestone
            .title
            .unwrap_or_else(|| format!("Milestone #{}", milestone.number)),
    );
    entity.number = Some(milestone.number);
    entity.state = if milestone.state.as_deref() == Some("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    };
    entity.author = milestone.creator.map(|creator| creator.login);
    entity.url = milestone.html_url;
    entity.timestamps = Timestamps {
        created: milestone.created_at,
        updated: milestone.updated_at,
        closed: milestone.closed_at,
    };
    entity
}

fn convert_discussion(node: DiscussionNode) -> SourceEntity {
    let mut entity = SourceEntity::new(
        EntityKind::Discussion,
        node.id.clone(),
        node.title.unwrap_or_else(|| "Discussion".to_string()),
    );
    entity.number = node.number;
    entity.state = if node.closed {
        EntityState::Closed
    } else {
        EntityState::Open
    };
    entity.labels = node
        .labels
        .map(|conn| conn.nodes.into_iter().map(|label| label.name).collect())
        .unwrap_or_default();
    entity.author = node.author.map(|author| author.login);
    entity.url = node.url;
    entity.timestamps = Timestamps {
        created: node.created_at,
        updated: node.updated_at,
        closed: None,
    };
    entity
}

fn milestone_relations(
    milestone: Option<&MilestoneRef>,
    rules: &[RelationRule],
) -> Vec<RelationRef> {
    let Some(milestone) = milestone else {
        return Vec::new();
    };
    let target = milestone
        .node_id
        .clone()
        .unwrap_or_else(|| milestone.id.to_string());
    rules
        .iter()
        .filter(|rule| rule.source == RelationSource::Milestone)
        .map(|rule| RelationRef {
            property: rule.property.clone(),
            target_external_id: target.clone(),
            unlink: false,
        })
        .collect()
}

fn external_id(node_id: Option<&str>, id: i64) -> String {
    match node_id {
        Some(node_id) if !node_id.is_empty() => node_id.to_string(),
        _ => id.to_string(),
    }
}

fn passes_label_filter(labels: &[String], allow: &[String]) -> bool {
    allow.is_empty()
        || labels
            .iter()
            .any(|label| allow.iter().any(|wanted| wanted.eq_ignore_ascii_case(label)))
}

fn rate_limit_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false)
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Extract the `rel="next"` URL from a Link header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/repos/a/b/issues?page=2>; rel="next", <...>; rel="last"`
pub(crate) fn next_link(value: &str) -> Option<String> {
    for part in value.split(',') {
        let mut url = None;
        let mut rel = None;
        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(value) = segment.strip_prefix("rel=") {
                rel = Some(value.trim_matches('"'));
            }
        }
        if rel == Some("next") {
            return url.map(str::to_string);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GithubClient {
        GithubClient::new(
            "token".into(),
            "acme/widgets",
            Duration::from_secs(5),
            Retry::default(),
        )
        .unwrap()
    }

    #[test]
    fn repository_must_be_owner_slash_name() {
        let err = GithubClient::new(
            "t".into(),
            "not-a-repo",
            Duration::from_secs(5),
            Retry::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(
            GithubClient::new("t".into(), "a/b", Duration::from_secs(5), Retry::default()).is_ok()
        );
    }

    #[test]
    fn request_sets_auth_and_api_headers() {
        let client = client();
        let url = client.repo_endpoint("issues").unwrap();
        let request = client
            .request(reqwest::Method::GET, url)
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/repos/acme/widgets/issues");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Accept")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/vnd.github+json"
        );
        assert_eq!(
            headers
                .get("X-GitHub-Api-Version")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            API_VERSION
        );
    }

    #[test]
    fn next_link_picks_rel_next() {
        let header = "<https://api.github.com/repos/a/b/issues?page=2>; rel=\"next\", \
                      <https://api.github.com/repos/a/b/issues?page=9>; rel=\"last\"";
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repos/a/b/issues?page=2")
        );
        assert_eq!(next_link("<https://x>; rel=\"last\""), None);
        assert_eq!(next_link(""), None);
    }

    fn issue_json(id: i64, labels: &[&str]) -> Value {
        json!({
            "id": id,
            "node_id": format!("I_{id}"),
            "number": id,
            "title": format!("Issue {id}"),
            "state": "open",
            "html_url": format!("https://github.com/acme/widgets/issues/{id}"),
            "labels": labels.iter().map(|l| json!({"name": l})).collect::<Vec<_>>(),
            "assignees": [{"login": "octocat"}],
            "user": {"login": "hubber"},
            "created_at": "2024-03-01T12:00:00Z",
            "updated_at": "2024-03-02T12:00:00Z",
        })
    }

    #[test]
    fn issue_conversion_excludes_pull_requests() {
        let mut raw = issue_json(1, &["task"]);
        raw["pull_request"] = json!({"url": "https://api.github.com/..."});
        let issue: RestIssue = serde_json::from_value(raw).unwrap();
        assert!(convert_issue(issue, &EntityFilter::default(), &[]).is_none());
    }

    #[test]
    fn issue_label_filter_is_case_insensitive() {
        let filter = EntityFilter {
            labels: vec!["Task".into()],
        };
        let kept: RestIssue = serde_json::from_value(issue_json(1, &["task"])).unwrap();
        assert!(convert_issue(kept, &filter, &[]).is_some());

        let dropped: RestIssue = serde_json::from_value(issue_json(2, &["bug"])).unwrap();
        assert!(convert_issue(dropped, &filter, &[]).is_none());
    }

    #[test]
    fn issue_conversion_fills_the_entity() {
        let issue: RestIssue = serde_json::from_value(issue_json(7, &["task", "infra"])).unwrap();
        let entity = convert_issue(issue, &EntityFilter::default(), &[]).unwrap();
        assert_eq!(entity.kind, EntityKind::Issue);
        assert_eq!(entity.external_id, "I_7");
        assert_eq!(entity.number, Some(7));
        assert_eq!(entity.state, EntityState::Open);
        assert_eq!(entity.labels, vec!["task".to_string(), "infra".to_string()]);
        assert_eq!(entity.assignees, vec!["octocat".to_string()]);
        assert_eq!(entity.author.as_deref(), Some("hubber"));
        assert!(entity.timestamps.created.is_some());
    }

    #[test]
    fn merged_pull_requests_are_merged_not_closed() {
        let raw = json!({
            "id": 11,
            "node_id": "PR_11",
            "number": 11,
            "title": "Add widget",
            "state": "closed",
            "merged_at": "2024-03-05T09:00:00Z",
            "closed_at": "2024-03-05T09:00:00Z",
        });
        let pull: RestPull = serde_json::from_value(raw).unwrap();
        let entity = convert_pull(pull, &[]).unwrap();
        assert_eq!(entity.state, EntityState::Merged);
        assert!(entity.timestamps.closed.is_some());
    }

    #[test]
    fn milestone_relations_follow_the_rules() {
        let rules = vec![RelationRule {
            property: "Milestone".into(),
            database_id: "db-milestones".into(),
            source: RelationSource::Milestone,
        }];
        let raw = issue_json(3, &[]);
        let mut issue: RestIssue = serde_json::from_value(raw).unwrap();
        issue.milestone = Some(MilestoneRef {
            id: 77,
            node_id: Some("MI_77".into()),
        });
        let entity = convert_issue(issue, &EntityFilter::default(), &rules).unwrap();
        assert_eq!(entity.relations.len(), 1);
        assert_eq!(entity.relations[0].property, "Milestone");
        assert_eq!(entity.relations[0].target_external_id, "MI_77");
        assert!(!entity.relations[0].unlink);
    }

    #[test]
    fn workflow_run_event_maps_conclusions() {
        let payload = json!({
            "workflow_run": {
                "id": 900,
                "node_id": "WFR_900",
                "name": "CI",
                "run_number": 58,
                "status": "completed",
                "conclusion": "success",
                "html_url": "https://github.com/acme/widgets/actions/runs/900",
                "event": "push",
                "run_started_at": "2024-03-01T10:00:00Z",
                "updated_at": "2024-03-01T10:05:00Z",
                "actor": {"login": "hubber"},
            }
        });
        let entity = workflow_run_from_event(&payload).unwrap();
        assert_eq!(entity.kind, EntityKind::WorkflowRun);
        assert_eq!(entity.external_id, "WFR_900");
        assert_eq!(entity.title, "CI #58");
        assert_eq!(entity.state, EntityState::Closed);
        assert_eq!(entity.labels, vec!["Push".to_string()]);
        assert!(entity.timestamps.closed.is_some());

        let failed = json!({
            "workflow_run": { "id": 901, "conclusion": "failure" }
        });
        let entity = workflow_run_from_event(&failed).unwrap();
        assert_eq!(entity.state, EntityState::Archived);
        assert_eq!(entity.external_id, "901");

        let running = json!({
            "workflow_run": { "id": 902 }
        });
        let entity = workflow_run_from_event(&running).unwrap();
        assert_eq!(entity.state, EntityState::Open);
        assert!(entity.timestamps.closed.is_none());
    }

    #[test]
    fn workflow_run_event_requires_the_run_object() {
        let err = workflow_run_from_event(&json!({"action": "completed"})).unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse { .. }));
    }

    #[test]
    fn external_id_prefers_node_id() {
        assert_eq!(external_id(Some("I_9"), 9), "I_9");
        assert_eq!(external_id(None, 9), "9");
        assert_eq!(external_id(Some(""), 9), "9");
    }
}
