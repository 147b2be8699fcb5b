//! Pipeline tests against an in-memory Notion stand-in.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use gh_notion_sync::config::{PropertyNames, RelationRule, RelationSource, Retry, StatusMap};
use gh_notion_sync::error::{Service, SyncError};
use gh_notion_sync::mapper;
use gh_notion_sync::model::{EntityKind, EntityState, RelationRef, SourceEntity, UpsertAction};
use gh_notion_sync::notion::model::{DatabaseSchema, PropertyType};
use gh_notion_sync::notion::{NoopWriter, Page, PageLocator, PageWriter, WriteReceipt};
use gh_notion_sync::report::{RunReport, RunReporter};
use gh_notion_sync::sync::{run_pipeline, CancelFlag, SyncContext, UpsertExecutor};

const MAIN_DB: &str = "db-main";

#[derive(Clone, Debug)]
struct StoredPage {
    id: String,
    database_id: String,
    properties: Map<String, Value>,
}

/// In-memory double for the Notion database: locator and writer in one.
#[derive(Default)]
struct FakeNotion {
    pages: Mutex<Vec<StoredPage>>,
    next_id: AtomicUsize,
}

impl FakeNotion {
    fn seed_page(&self, database_id: &str, identifier_property: &str, external_id: &str) -> String {
        let id = self.fresh_id();
        let mut properties = Map::new();
        properties.insert(
            identifier_property.to_string(),
            json!({ "rich_text": [{ "text": { "content": external_id } }] }),
        );
        self.pages.lock().unwrap().push(StoredPage {
            id: id.clone(),
            database_id: database_id.to_string(),
            properties,
        });
        id
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("page-{n}")
    }

    fn pages_in(&self, database_id: &str) -> Vec<StoredPage> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|page| page.database_id == database_id)
            .cloned()
            .collect()
    }

    fn set_property(&self, page_id: &str, name: &str, value: Value) {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .iter_mut()
            .find(|page| page.id == page_id)
            .expect("page exists");
        page.properties.insert(name.to_string(), value);
    }
}

fn identifier_of(properties: &Map<String, Value>, property: &str) -> Option<String> {
    properties
        .get(property)?
        .get("rich_text")?
        .get(0)?
        .get("text")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl PageLocator for FakeNotion {
    async fn locate(
        &self,
        database_id: &str,
        identifier_property: &str,
        external_id: &str,
    ) -> Result<Option<Page>, SyncError> {
        let pages = self.pages.lock().unwrap();
        let matches: Vec<&StoredPage> = pages
            .iter()
            .filter(|page| {
                page.database_id == database_id
                    && identifier_of(&page.properties, identifier_property).as_deref()
                        == Some(external_id)
            })
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(Page {
                id: matches[0].id.clone(),
                url: Some(format!("https://notion.example/{}", matches[0].id)),
                properties: matches[0].properties.clone(),
            })),
            count => Err(SyncError::DuplicatePage {
                database_id: database_id.to_string(),
                external_id: external_id.to_string(),
                count,
            }),
        }
    }
}

#[async_trait]
impl PageWriter for FakeNotion {
    async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<WriteReceipt, SyncError> {
        let id = self.fresh_id();
        self.pages.lock().unwrap().push(StoredPage {
            id: id.clone(),
            database_id: database_id.to_string(),
            properties,
        });
        Ok(WriteReceipt {
            page_id: Some(id.clone()),
            page_url: Some(format!("https://notion.example/{id}")),
        })
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), SyncError> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .iter_mut()
            .find(|page| page.id == page_id)
            .ok_or_else(|| SyncError::Api {
                service: Service::Notion,
                status: 404,
                body: format!("no page {page_id}"),
            })?;
        // Partial patch: only the provided keys change.
        for (key, value) in properties {
            page.properties.insert(key, value);
        }
        Ok(())
    }
}

struct TestBed {
    names: PropertyNames,
    status_map: StatusMap,
    retry: Retry,
    relations: Vec<RelationRule>,
}

impl Default for TestBed {
    fn default() -> Self {
        Self {
            names: PropertyNames::default(),
            status_map: StatusMap::default(),
            retry: Retry::default(),
            relations: Vec::new(),
        }
    }
}

impl TestBed {
    fn ctx(&self) -> SyncContext<'_> {
        SyncContext {
            database_id: MAIN_DB,
            names: &self.names,
            status_map: &self.status_map,
            relations: &self.relations,
            retry: &self.retry,
            min_call_interval: Duration::ZERO,
            backlink: None,
        }
    }
}

fn schema() -> DatabaseSchema {
    DatabaseSchema::from_pairs(&[
        ("Name", PropertyType::Title),
        ("GitHub ID", PropertyType::RichText),
        ("Status", PropertyType::Status),
        ("Labels", PropertyType::MultiSelect),
        ("GitHub URL", PropertyType::Url),
        ("Milestone", PropertyType::Relation),
    ])
}

fn task_entity(external_id: &str, state: EntityState) -> SourceEntity {
    let mut entity = SourceEntity::new(EntityKind::Issue, external_id, format!("Task {external_id}"));
    entity.state = state;
    entity.labels = vec!["task".into()];
    entity.number = Some(1);
    entity.url = Some(format!("https://github.com/acme/widgets/issues/{external_id}"));
    entity
}

async fn run_batch(
    entities: Vec<Result<SourceEntity, SyncError>>,
    locator: &dyn PageLocator,
    writer: &dyn PageWriter,
    bed: &TestBed,
    db_schema: &DatabaseSchema,
) -> (Result<(), SyncError>, RunReport) {
    let reporter = RunReporter::new(EntityKind::Issue, Some("acme/widgets".into()), false);
    let cancel = CancelFlag::new();
    let stream = futures::stream::iter(entities).boxed();
    let result = run_pipeline(
        stream,
        db_schema,
        locator,
        writer,
        &bed.ctx(),
        &cancel,
        &reporter,
    )
    .await;
    (result, reporter.finalize())
}

fn status_name(page: &StoredPage) -> Option<String> {
    page.properties
        .get("Status")?
        .get("status")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

#[tokio::test]
async fn first_sync_creates_then_closing_updates_to_done() {
    let store = FakeNotion::default();
    let bed = TestBed {
        status_map: StatusMap::tasks(),
        ..TestBed::default()
    };
    let db_schema = schema();

    let (result, report) = run_batch(
        vec![Ok(task_entity("I_1", EntityState::Open))],
        &store,
        &store,
        &bed,
        &db_schema,
    )
    .await;
    result.unwrap();
    assert_eq!(report.created_count, 1);
    assert_eq!(report.error_count, 0);

    let pages = store.pages_in(MAIN_DB);
    assert_eq!(pages.len(), 1);
    assert_eq!(status_name(&pages[0]).as_deref(), Some("Open"));

    // A Notion-only field set by hand must survive the next sync.
    store.set_property(
        &pages[0].id,
        "Notes",
        json!({ "rich_text": [{ "text": { "content": "triaged by ops" } }] }),
    );

    let (result, report) = run_batch(
        vec![Ok(task_entity("I_1", EntityState::Closed))],
        &store,
        &store,
        &bed,
        &db_schema,
    )
    .await;
    result.unwrap();
    assert_eq!(report.created_count, 0);
    assert_eq!(report.updated_count, 1);

    let pages = store.pages_in(MAIN_DB);
    assert_eq!(pages.len(), 1, "update must not create a second page");
    assert_eq!(status_name(&pages[0]).as_deref(), Some("Done"));
    assert!(
        pages[0].properties.contains_key("Notes"),
        "partial update dropped a Notion-only property"
    );
}

#[tokio::test]
async fn upsert_twice_with_identical_input_is_idempotent() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = schema();
    let entity = task_entity("I_2", EntityState::Open);
    let mapped = mapper::map(&entity, &db_schema, &bed.names, &bed.status_map);
    let executor = UpsertExecutor::new(&store, &store);

    let first = executor
        .upsert(MAIN_DB, &bed.names.identifier, &entity, &mapped, &[])
        .await
        .unwrap();
    assert_eq!(first.action, UpsertAction::Created);

    let snapshot = store.pages_in(MAIN_DB);
    let second = executor
        .upsert(MAIN_DB, &bed.names.identifier, &entity, &mapped, &[])
        .await
        .unwrap();
    assert_eq!(second.action, UpsertAction::Updated);
    assert_eq!(second.page_id.as_deref(), first.page_id.as_deref());

    let after = store.pages_in(MAIN_DB);
    assert_eq!(after.len(), 1);
    assert_eq!(
        after[0].properties, snapshot[0].properties,
        "second identical upsert changed observable state"
    );
}

#[tokio::test]
async fn relations_merge_additively_without_duplicates() {
    let store = FakeNotion::default();
    let milestone_page = store.seed_page("db-milestones", "GitHub ID", "MI_7");

    let bed = TestBed {
        relations: vec![RelationRule {
            property: "Milestone".into(),
            database_id: "db-milestones".into(),
            source: RelationSource::Milestone,
        }],
        ..TestBed::default()
    };
    let db_schema = schema();
    let mut entity = task_entity("I_3", EntityState::Open);
    entity.relations = vec![RelationRef {
        property: "Milestone".into(),
        target_external_id: "MI_7".into(),
        unlink: false,
    }];
    let mapped = mapper::map(&entity, &db_schema, &bed.names, &bed.status_map);
    let executor = UpsertExecutor::new(&store, &store);

    for _ in 0..2 {
        executor
            .upsert(
                MAIN_DB,
                &bed.names.identifier,
                &entity,
                &mapped,
                &bed.relations,
            )
            .await
            .unwrap();
    }

    let pages = store.pages_in(MAIN_DB);
    assert_eq!(pages.len(), 1);
    let relation = pages[0].properties["Milestone"]["relation"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(relation.len(), 1, "relation entry duplicated across upserts");
    assert_eq!(relation[0]["id"], milestone_page.as_str());
}

#[tokio::test]
async fn existing_relations_survive_and_unlink_removes() {
    let store = FakeNotion::default();
    let kept = store.seed_page("db-milestones", "GitHub ID", "MI_1");
    let removed = store.seed_page("db-milestones", "GitHub ID", "MI_2");

    let bed = TestBed {
        relations: vec![RelationRule {
            property: "Milestone".into(),
            database_id: "db-milestones".into(),
            source: RelationSource::Milestone,
        }],
        ..TestBed::default()
    };
    let db_schema = schema();

    // Page already linked to both milestones from an earlier run.
    let page_id = store.seed_page(MAIN_DB, "GitHub ID", "I_4");
    store.set_property(
        &page_id,
        "Milestone",
        json!({ "relation": [{ "id": kept }, { "id": removed }] }),
    );

    let mut entity = task_entity("I_4", EntityState::Open);
    entity.relations = vec![RelationRef {
        property: "Milestone".into(),
        target_external_id: "MI_2".into(),
        unlink: true,
    }];
    let mapped = mapper::map(&entity, &db_schema, &bed.names, &bed.status_map);
    let executor = UpsertExecutor::new(&store, &store);
    executor
        .upsert(
            MAIN_DB,
            &bed.names.identifier,
            &entity,
            &mapped,
            &bed.relations,
        )
        .await
        .unwrap();

    let pages = store.pages_in(MAIN_DB);
    let relation = pages[0].properties["Milestone"]["relation"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(relation.len(), 1);
    assert_eq!(relation[0]["id"], kept.as_str());
}

#[tokio::test]
async fn dry_run_reports_created_but_writes_nothing() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = schema();

    let (result, report) = run_batch(
        vec![Ok(task_entity("I_5", EntityState::Open))],
        &store,
        &NoopWriter,
        &bed,
        &db_schema,
    )
    .await;
    result.unwrap();
    assert_eq!(report.created_count, 1, "would-be action must be reported");
    assert!(store.pages_in(MAIN_DB).is_empty(), "dry-run mutated Notion");
}

#[tokio::test]
async fn duplicate_pages_surface_as_entity_errors() {
    let store = FakeNotion::default();
    store.seed_page(MAIN_DB, "GitHub ID", "I_6");
    store.seed_page(MAIN_DB, "GitHub ID", "I_6");
    let bed = TestBed::default();
    let db_schema = schema();

    let (result, report) = run_batch(
        vec![
            Ok(task_entity("I_6", EntityState::Open)),
            Ok(task_entity("I_7", EntityState::Open)),
        ],
        &store,
        &store,
        &bed,
        &db_schema,
    )
    .await;
    result.unwrap();
    assert_eq!(report.error_count, 1);
    assert_eq!(report.created_count, 1, "batch must continue past the duplicate");
    let message = report.actions[0].error_message.as_deref().unwrap();
    assert!(message.contains("2 pages"), "got: {message}");
    // Still exactly two pages for I_6: never auto-merged, never added to.
    assert_eq!(store.pages_in(MAIN_DB).len(), 3);
}

#[tokio::test]
async fn batch_of_five_isolates_one_malformed_entity() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = schema();

    let malformed = SyncError::MalformedResponse {
        service: Service::GitHub,
        message: "unexpected null".into(),
    };
    let (result, report) = run_batch(
        vec![
            Ok(task_entity("I_10", EntityState::Open)),
            Ok(task_entity("I_11", EntityState::Open)),
            Err(malformed),
            Ok(task_entity("I_12", EntityState::Closed)),
            Ok(task_entity("I_13", EntityState::Open)),
        ],
        &store,
        &store,
        &bed,
        &db_schema,
    )
    .await;
    result.unwrap();
    assert_eq!(report.entities_considered, 5);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.created_count + report.updated_count, 4);
    assert!(!report.incomplete);
}

#[tokio::test]
async fn auth_failure_aborts_the_run() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = schema();

    let (result, report) = run_batch(
        vec![
            Ok(task_entity("I_20", EntityState::Open)),
            Err(SyncError::UpstreamAuth {
                service: Service::GitHub,
                status: 401,
            }),
            Ok(task_entity("I_21", EntityState::Open)),
        ],
        &store,
        &store,
        &bed,
        &db_schema,
    )
    .await;
    assert!(matches!(result, Err(SyncError::UpstreamAuth { .. })));
    assert!(report.incomplete);
    assert_eq!(report.entities_considered, 1, "work committed before the abort stays reported");
    assert_eq!(store.pages_in(MAIN_DB).len(), 1);
}

#[tokio::test]
async fn missing_labels_property_degrades_to_a_warning() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = DatabaseSchema::from_pairs(&[
        ("Name", PropertyType::Title),
        ("GitHub ID", PropertyType::RichText),
        ("Status", PropertyType::Status),
    ]);

    let mut entity = task_entity("I_30", EntityState::Open);
    entity.labels = vec!["a".into(), "b".into(), "c".into()];

    let (result, report) = run_batch(vec![Ok(entity)], &store, &store, &bed, &db_schema).await;
    result.unwrap();
    assert_eq!(report.error_count, 0);
    assert_eq!(report.created_count, 1);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.external_id == "I_30" && w.message.contains("Labels")));

    let pages = store.pages_in(MAIN_DB);
    assert!(pages[0].properties.get("Labels").is_none());
}

#[tokio::test]
async fn cancellation_emits_a_partial_report() {
    let store = FakeNotion::default();
    let bed = TestBed::default();
    let db_schema = schema();

    let reporter = RunReporter::new(EntityKind::Issue, None, false);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let stream = futures::stream::iter(vec![
        Ok(task_entity("I_40", EntityState::Open)),
        Ok(task_entity("I_41", EntityState::Open)),
    ])
    .boxed();

    run_pipeline(
        stream,
        &db_schema,
        &store,
        &store,
        &bed.ctx(),
        &cancel,
        &reporter,
    )
    .await
    .unwrap();

    let report = reporter.finalize();
    assert!(report.incomplete);
    assert_eq!(report.entities_considered, 0);
    assert!(store.pages_in(MAIN_DB).is_empty());
}
