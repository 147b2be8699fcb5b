//! Upsert execution and the per-run pipeline.
//!
//! For a single entity the stages run in strict sequence: fetch → map →
//! locate → upsert. Across entities the pipeline is a bulkhead: one entity's
//! failure is recorded and the batch continues.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{PropertyNames, RelationRule, Retry, StatusMap};
use crate::error::SyncError;
use crate::github::{EntityStream, GithubClient};
use crate::mapper::{self, MappedProperties};
use crate::model::{SourceEntity, UpsertAction, UpsertOutcome};
use crate::notion::{DatabaseSchema, Page, PageLocator, PageWriter};
use crate::report::RunReporter;
use crate::retry::with_retry;

/// Cooperative cancellation checked between entities.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decides create-vs-update against one target database.
pub struct UpsertExecutor<'a> {
    locator: &'a dyn PageLocator,
    writer: &'a dyn PageWriter,
}

impl<'a> UpsertExecutor<'a> {
    pub fn new(locator: &'a dyn PageLocator, writer: &'a dyn PageWriter) -> Self {
        Self { locator, writer }
    }

    /// Lookup-before-create keyed on the identifier property. Updates are
    /// partial patches: properties the mapper did not emit keep their prior
    /// values, so Notion-only fields survive repeated syncs.
    pub async fn upsert(
        &self,
        database_id: &str,
        identifier_property: &str,
        entity: &SourceEntity,
        mapped: &MappedProperties,
        rules: &[RelationRule],
    ) -> Result<UpsertOutcome, SyncError> {
        if mapped.properties.is_empty() {
            debug!(external_id = %entity.external_id, "no writable properties; skipping");
            return Ok(UpsertOutcome {
                action: UpsertAction::Skipped,
                page_id: None,
                page_url: None,
            });
        }

        let existing = self
            .locator
            .locate(database_id, identifier_property, &entity.external_id)
            .await?;

        let mut properties = mapped.properties.clone();
        self.resolve_relations(
            &mut properties,
            existing.as_ref(),
            identifier_property,
            entity,
            rules,
        )
        .await?;

        match existing {
            Some(page) => {
                self.writer.update_page(&page.id, properties).await?;
                Ok(UpsertOutcome {
                    action: UpsertAction::Updated,
                    page_id: Some(page.id),
                    page_url: page.url,
                })
            }
            None => {
                // The identifier is the persisted sync link; make sure a
                // created page always carries it.
                properties
                    .entry(identifier_property.to_string())
                    .or_insert_with(|| mapper::rich_text_value(&entity.external_id));
                let receipt = self.writer.create_page(database_id, properties).await?;
                Ok(UpsertOutcome {
                    action: UpsertAction::Created,
                    page_id: receipt.page_id,
                    page_url: receipt.page_url,
                })
            }
        }
    }

    /// Relations are additive: the union of the page's current entries and
    /// the entity's links, minus explicit unlinks. Running twice cannot
    /// produce duplicate entries.
    async fn resolve_relations(
        &self,
        properties: &mut Map<String, Value>,
        existing: Option<&Page>,
        identifier_property: &str,
        entity: &SourceEntity,
        rules: &[RelationRule],
    ) -> Result<(), SyncError> {
        if entity.relations.is_empty() {
            return Ok(());
        }

        let mut grouped: BTreeMap<&str, (Vec<String>, Vec<String>)> = BTreeMap::new();
        for reference in &entity.relations {
            let Some(rule) = rules.iter().find(|r| r.property == reference.property) else {
                debug!(property = %reference.property, "no relation rule; ignoring link");
                continue;
            };
            let Some(target) = self
                .locator
                .locate(
                    &rule.database_id,
                    identifier_property,
                    &reference.target_external_id,
                )
                .await?
            else {
                debug!(
                    target = %reference.target_external_id,
                    database_id = %rule.database_id,
                    "relation target has no page yet; ignoring link"
                );
                continue;
            };
            let slot = grouped.entry(&reference.property).or_default();
            if reference.unlink {
                slot.1.push(target.id);
            } else {
                slot.0.push(target.id);
            }
        }

        for (property, (additions, removals)) in grouped {
            let current = existing
                .map(|page| extract_relation_ids(&page.properties, property))
                .unwrap_or_default();
            let merged = merge_relations(current, &additions, &removals);
            let entries: Vec<Value> = merged.iter().map(|id| json!({ "id": id })).collect();
            properties.insert(property.to_string(), json!({ "relation": entries }));
        }
        Ok(())
    }
}

/// Union of current entries and additions, minus removals; order of the
/// current entries is preserved.
pub(crate) fn merge_relations(
    current: Vec<String>,
    additions: &[String],
    removals: &[String],
) -> Vec<String> {
    let mut merged = current;
    for id in additions {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged.retain(|id| !removals.contains(id));
    merged
}

pub(crate) fn extract_relation_ids(properties: &Map<String, Value>, property: &str) -> Vec<String> {
    properties
        .get(property)
        .and_then(|value| value.get("relation"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Best-effort write-back to the source system after a page is created.
#[async_trait]
pub trait BacklinkSink: Send + Sync {
    async fn post_backlink(&self, number: i64, page_url: &str) -> Result<(), SyncError>;
}

#[async_trait]
impl BacklinkSink for GithubClient {
    async fn post_backlink(&self, number: i64, page_url: &str) -> Result<(), SyncError> {
        self.post_backlink_comment(number, page_url).await
    }
}

/// Everything one run needs, threaded explicitly so concurrent runs against
/// different databases cannot share state.
pub struct SyncContext<'a> {
    pub database_id: &'a str,
    pub names: &'a PropertyNames,
    pub status_map: &'a StatusMap,
    pub relations: &'a [RelationRule],
    pub retry: &'a Retry,
    pub min_call_interval: Duration,
    pub backlink: Option<&'a dyn BacklinkSink>,
}

/// Drive one batch through map → locate → upsert, feeding the reporter.
///
/// Returns `Err` only for run-fatal failures (rejected credentials, broken
/// configuration); the partial report is marked incomplete first.
pub async fn run_pipeline(
    mut entities: EntityStream<'_>,
    schema: &DatabaseSchema,
    locator: &dyn PageLocator,
    writer: &dyn PageWriter,
    ctx: &SyncContext<'_>,
    cancel: &CancelFlag,
    reporter: &RunReporter,
) -> Result<(), SyncError> {
    let executor = UpsertExecutor::new(locator, writer);

    while let Some(item) = entities.next().await {
        if cancel.is_cancelled() {
            warn!("cancellation requested; stopping between entities");
            reporter.mark_incomplete();
            break;
        }

        let entity = match item {
            Ok(entity) => entity,
            Err(err) if err.is_fatal() => {
                reporter.mark_incomplete();
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "entity fetch failed; continuing batch");
                reporter.record_error("<fetch>", &err, None);
                continue;
            }
        };

        let mapped = mapper::map(&entity, schema, ctx.names, ctx.status_map);
        for property in &mapped.skipped {
            reporter.record_schema_warning(&entity.external_id, property);
        }

        let started = Instant::now();
        let result = with_retry(ctx.retry, || {
            executor.upsert(
                ctx.database_id,
                &ctx.names.identifier,
                &entity,
                &mapped,
                ctx.relations,
            )
        })
        .await;
        let latency = started.elapsed();

        match result {
            Ok(outcome) => {
                debug!(
                    external_id = %entity.external_id,
                    action = outcome.action.as_str(),
                    "entity synced"
                );
                post_backlink(ctx, reporter, &entity, &outcome).await;
                reporter.record_action(&entity.external_id, outcome.action, latency);
            }
            Err(err) if err.is_fatal() => {
                reporter.record_error(&entity.external_id, &err, Some(latency));
                reporter.mark_incomplete();
                return Err(err);
            }
            Err(err) => {
                warn!(external_id = %entity.external_id, error = %err, "upsert failed; continuing batch");
                reporter.record_error(&entity.external_id, &err, Some(latency));
            }
        }

        if !ctx.min_call_interval.is_zero() {
            tokio::time::sleep(ctx.min_call_interval).await;
        }
    }

    Ok(())
}

async fn post_backlink(
    ctx: &SyncContext<'_>,
    reporter: &RunReporter,
    entity: &SourceEntity,
    outcome: &UpsertOutcome,
) {
    let Some(sink) = ctx.backlink else { return };
    if outcome.action != UpsertAction::Created {
        return;
    }
    let (Some(number), Some(url)) = (entity.number, outcome.page_url.as_deref()) else {
        return;
    };
    if let Err(err) = sink.post_backlink(number, url).await {
        warn!(external_id = %entity.external_id, error = %err, "backlink comment failed");
        reporter.record_warning(
            &entity.external_id,
            format!("backlink comment failed: {err}"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_additive_and_duplicate_free() {
        let merged = merge_relations(
            vec!["a".into(), "b".into()],
            &["b".to_string(), "c".to_string()],
            &[],
        );
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_removes_only_unlinked_entries() {
        let merged = merge_relations(
            vec!["a".into(), "b".into(), "c".into()],
            &[],
            &["b".to_string()],
        );
        assert_eq!(merged, vec!["a", "c"]);
    }

    #[test]
    fn extract_relation_ids_reads_query_payloads() {
        let properties: Map<String, Value> = serde_json::from_value(json!({
            "Milestone": { "id": "p", "type": "relation", "relation": [{"id": "m-1"}, {"id": "m-2"}] }
        }))
        .unwrap();
        assert_eq!(
            extract_relation_ids(&properties, "Milestone"),
            vec!["m-1", "m-2"]
        );
        assert!(extract_relation_ids(&properties, "Other").is_empty());
    }

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
