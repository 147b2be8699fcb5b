use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{info, warn};

use gh_notion_sync::config::{self, Config, StatusMap};
use gh_notion_sync::github::{self, EntityFilter, EntityStream, GithubClient};
use gh_notion_sync::model::EntityKind;
use gh_notion_sync::notion::model::PropertyType;
use gh_notion_sync::notion::{DatabaseSchema, LiveWriter, NoopWriter, NotionClient, PageWriter};
use gh_notion_sync::report::{self, RunReporter};
use gh_notion_sync::sync::{run_pipeline, BacklinkSink, CancelFlag, SyncContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EntityArg {
    /// Issues carrying a task label
    Tasks,
    Issues,
    PullRequests,
    Discussions,
    Milestones,
    /// A single run taken from the Actions event payload
    WorkflowRuns,
}

impl EntityArg {
    fn kind(self) -> EntityKind {
        match self {
            EntityArg::Tasks | EntityArg::Issues => EntityKind::Issue,
            EntityArg::PullRequests => EntityKind::PullRequest,
            EntityArg::Discussions => EntityKind::Discussion,
            EntityArg::Milestones => EntityKind::Milestone,
            EntityArg::WorkflowRuns => EntityKind::WorkflowRun,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Synchronise GitHub entities into Notion databases")]
struct Args {
    /// Entity type to synchronise
    #[arg(value_enum)]
    entity: EntityArg,

    /// Target Notion database identifier
    #[arg(long)]
    database_id: String,

    /// GitHub repository in owner/name format (defaults to GITHUB_REPOSITORY)
    #[arg(long)]
    repository: Option<String>,

    /// Path to YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compute actions without writing to Notion
    #[arg(long)]
    dry_run: bool,

    /// Path to the GitHub Actions event payload (workflow runs only)
    #[arg(long)]
    event_path: Option<PathBuf>,

    /// Comma separated labels identifying task issues (default: task)
    #[arg(long)]
    task_labels: Option<String>,

    /// Where the run report artifact is written
    #[arg(long, default_value = "sync-report.json")]
    report_path: PathBuf,

    /// Override for the identifier property name
    #[arg(long)]
    identifier_property: Option<String>,

    /// Override for the status property name
    #[arg(long)]
    status_property: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(name) = args.identifier_property.clone() {
        cfg.properties.identifier = name;
    }
    if let Some(name) = args.status_property.clone() {
        cfg.properties.status = name;
    }

    let notion_token = require_env("NOTION_TOKEN")?;
    let notion = NotionClient::new(notion_token, cfg.http_timeout());

    let schema = notion
        .retrieve_schema(&args.database_id)
        .await
        .context("failed to read the target database schema")?;
    ensure_identifier(&schema, &cfg.properties.identifier)?;

    let github = match args.entity {
        EntityArg::WorkflowRuns => None,
        _ => {
            let token = require_env("GITHUB_TOKEN")?;
            let repository = args
                .repository
                .clone()
                .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())
                .context("--repository must be provided or GITHUB_REPOSITORY must be set")?;
            Some(GithubClient::new(
                token,
                &repository,
                cfg.http_timeout(),
                cfg.retry.clone(),
            )?)
        }
    };

    let entities: EntityStream<'_> = match args.entity {
        EntityArg::WorkflowRuns => {
            let event_path = args
                .event_path
                .clone()
                .or_else(|| std::env::var("GITHUB_EVENT_PATH").ok().map(PathBuf::from))
                .context("--event-path or GITHUB_EVENT_PATH must be set for workflow runs")?;
            let payload = github::load_event(&event_path)?;
            let entity = github::workflow_run_from_event(&payload)?;
            futures::stream::iter(vec![Ok(entity)]).boxed()
        }
        EntityArg::Tasks => {
            let labels = args
                .task_labels
                .as_deref()
                .map(parse_labels)
                .unwrap_or_else(|| vec!["task".to_string()]);
            github_client(&github)?.issues(EntityFilter { labels }, cfg.relations.clone())?
        }
        EntityArg::Issues => {
            github_client(&github)?.issues(EntityFilter::default(), cfg.relations.clone())?
        }
        EntityArg::PullRequests => github_client(&github)?.pull_requests(cfg.relations.clone())?,
        EntityArg::Discussions => github_client(&github)?.discussions(),
        EntityArg::Milestones => github_client(&github)?.milestones()?,
    };

    let status_map = cfg.status_map.clone().unwrap_or_else(|| match args.entity {
        EntityArg::Tasks => StatusMap::tasks(),
        _ => StatusMap::default(),
    });

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing the current entity");
                cancel.cancel();
            }
        });
    }

    let live_writer;
    let noop_writer;
    let writer: &dyn PageWriter = if args.dry_run {
        noop_writer = NoopWriter;
        &noop_writer
    } else {
        live_writer = LiveWriter::new(notion.clone());
        &live_writer
    };

    let backlink: Option<&dyn BacklinkSink> = if cfg.backlink.enabled {
        github.as_ref().map(|client| client as &dyn BacklinkSink)
    } else {
        None
    };

    let ctx = SyncContext {
        database_id: &args.database_id,
        names: &cfg.properties,
        status_map: &status_map,
        relations: &cfg.relations,
        retry: &cfg.retry,
        min_call_interval: cfg.min_call_interval(),
        backlink,
    };

    let repository = github.as_ref().map(|client| client.repository());
    let reporter = RunReporter::new(args.entity.kind(), repository, args.dry_run);

    info!(
        entity = args.entity.kind().as_str(),
        database_id = %args.database_id,
        dry_run = args.dry_run,
        "starting synchronisation"
    );

    let run_result = run_pipeline(
        entities, &schema, &notion, writer, &ctx, &cancel, &reporter,
    )
    .await;

    let report = reporter.finalize();
    report::write_report(&report, &args.report_path)
        .with_context(|| format!("failed to write report to {}", args.report_path.display()))?;

    info!(
        considered = report.entities_considered,
        created = report.created_count,
        updated = report.updated_count,
        skipped = report.skipped_count,
        errors = report.error_count,
        incomplete = report.incomplete,
        report = %args.report_path.display(),
        "synchronisation finished"
    );

    run_result?;
    if report.error_count > 0 {
        bail!(
            "synchronisation recorded {} entity error(s); see {}",
            report.error_count,
            args.report_path.display()
        );
    }
    Ok(())
}

fn github_client(github: &Option<GithubClient>) -> Result<&GithubClient> {
    github
        .as_ref()
        .context("a GitHub client is required for this entity type")
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} environment variable must be set"))
}

fn parse_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn ensure_identifier(schema: &DatabaseSchema, name: &str) -> Result<()> {
    match schema.type_of(name) {
        Some(PropertyType::RichText) => Ok(()),
        Some(_) => bail!(
            "identifier property '{name}' must be a rich_text property in the target database"
        ),
        None => bail!(
            "identifier property '{name}' is missing from the target database; \
             syncing without it would create duplicates on every run"
        ),
    }
}
