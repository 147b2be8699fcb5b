use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Notion property value kinds this tool knows how to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Title,
    RichText,
    Status,
    Select,
    MultiSelect,
    People,
    Url,
    Number,
    Date,
    Relation,
    Other,
}

impl PropertyType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "title" => PropertyType::Title,
            "rich_text" => PropertyType::RichText,
            "status" => PropertyType::Status,
            "select" => PropertyType::Select,
            "multi_select" => PropertyType::MultiSelect,
            "people" => PropertyType::People,
            "url" => PropertyType::Url,
            "number" => PropertyType::Number,
            "date" => PropertyType::Date,
            "relation" => PropertyType::Relation,
            _ => PropertyType::Other,
        }
    }
}

/// Name → type view of a target database, fetched once per run.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSchema {
    properties: HashMap<String, PropertyType>,
}

impl DatabaseSchema {
    pub fn from_response(resp: &RetrieveDatabaseResp) -> Self {
        let properties = resp
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), PropertyType::parse(&prop.typ)))
            .collect();
        Self { properties }
    }

    pub fn from_pairs(pairs: &[(&str, PropertyType)]) -> Self {
        Self {
            properties: pairs
                .iter()
                .map(|(name, typ)| (name.to_string(), *typ))
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn type_of(&self, name: &str) -> Option<PropertyType> {
        self.properties.get(name).copied()
    }
}

#[derive(Deserialize, Debug)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    pub properties: HashMap<String, DatabaseProperty>,
}

/// One page as returned by a database query. Properties are kept raw so the
/// upsert can read existing relation entries without modelling every type.
#[derive(Deserialize, Debug, Clone)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct QueryDatabaseResp {
    pub results: Vec<Page>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CreatePageResponse {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}
