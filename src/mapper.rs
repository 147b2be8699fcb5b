//! Pure translation of a [`SourceEntity`] into a Notion property set.
//!
//! Only properties present in the target schema are emitted; everything else
//! is collected into `skipped` so the run report can surface the degradation
//! as a warning. Databases evolve independently of this mapper, so a missing
//! property is never an error.

use serde_json::{json, Map, Value};

use crate::config::{PropertyNames, StatusMap};
use crate::model::SourceEntity;
use crate::notion::model::{DatabaseSchema, PropertyType};

const TEXT_LIMIT: usize = 2000;
const OPTION_LIMIT: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct MappedProperties {
    pub properties: Map<String, Value>,
    /// Property names dropped because the schema lacks them or exposes an
    /// incompatible type.
    pub skipped: Vec<String>,
}

pub fn map(
    entity: &SourceEntity,
    schema: &DatabaseSchema,
    names: &PropertyNames,
    status_map: &StatusMap,
) -> MappedProperties {
    let mut out = MappedProperties::default();

    emit(&mut out, schema, &names.title, |typ| match typ {
        PropertyType::Title => Some(title_value(&entity.title)),
        _ => None,
    });

    emit(&mut out, schema, &names.identifier, |typ| match typ {
        PropertyType::RichText => Some(rich_text_value(&entity.external_id)),
        _ => None,
    });

    let status_label = status_map.label_for(entity.state);
    emit(&mut out, schema, &names.status, |typ| match typ {
        PropertyType::Status => Some(json!({ "status": { "name": status_label } })),
        PropertyType::Select => Some(json!({ "select": { "name": status_label } })),
        PropertyType::RichText => Some(rich_text_value(status_label)),
        _ => None,
    });

    // No label at all still yields an empty multi-select, not an omission.
    emit(&mut out, schema, &names.labels, |typ| match typ {
        PropertyType::MultiSelect => Some(multi_select_value(&entity.labels)),
        PropertyType::RichText => Some(rich_text_value(&entity.labels.join(", "))),
        _ => None,
    });

    emit(&mut out, schema, &names.assignees, |typ| match typ {
        // Logins cannot be resolved to Notion user ids from here; a
        // people-typed property is kept present but empty.
        PropertyType::People => Some(json!({ "people": [] })),
        PropertyType::MultiSelect => Some(multi_select_value(&entity.assignees)),
        PropertyType::RichText => {
            let joined = if entity.assignees.is_empty() {
                "Unassigned".to_string()
            } else {
                entity.assignees.join(", ")
            };
            Some(rich_text_value(&joined))
        }
        _ => None,
    });

    if let Some(url) = entity.url.as_deref() {
        emit(&mut out, schema, &names.url, |typ| match typ {
            PropertyType::Url => Some(json!({ "url": url })),
            PropertyType::RichText => Some(rich_text_value(url)),
            _ => None,
        });
    }

    if let Some(author) = entity.author.as_deref() {
        emit(&mut out, schema, &names.author, |typ| match typ {
            PropertyType::RichText => Some(rich_text_value(author)),
            PropertyType::MultiSelect => Some(multi_select_value(&[author.to_string()])),
            _ => None,
        });
    }

    if let Some(number) = entity.number {
        emit(&mut out, schema, &names.number, |typ| match typ {
            PropertyType::Number => Some(json!({ "number": number })),
            _ => None,
        });
    }

    let dates = [
        (&names.created, entity.timestamps.created),
        (&names.updated, entity.timestamps.updated),
        (&names.completed, entity.timestamps.closed),
    ];
    for (name, stamp) in dates {
        if let Some(stamp) = stamp {
            emit(&mut out, schema, name, |typ| match typ {
                PropertyType::Date => {
                    Some(json!({ "date": { "start": stamp.to_rfc3339() } }))
                }
                _ => None,
            });
        }
    }

    out
}

fn emit(
    out: &mut MappedProperties,
    schema: &DatabaseSchema,
    name: &str,
    build: impl FnOnce(PropertyType) -> Option<Value>,
) {
    match schema.type_of(name).and_then(build) {
        Some(value) => {
            out.properties.insert(name.to_string(), value);
        }
        None => out.skipped.push(name.to_string()),
    }
}

pub fn title_value(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": truncate(text, TEXT_LIMIT) } }] })
}

pub fn rich_text_value(text: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": truncate(text, TEXT_LIMIT) } }] })
}

fn multi_select_value(items: &[String]) -> Value {
    let options: Vec<Value> = items
        .iter()
        .filter(|item| !item.is_empty())
        .map(|item| json!({ "name": truncate(item, OPTION_LIMIT) }))
        .collect();
    json!({ "multi_select": options })
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
