use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{classify_status, parse_retry_after, Service, SyncError};

pub mod model;

pub use model::{CreatePageResponse, DatabaseSchema, Page, QueryDatabaseResp, RetrieveDatabaseResp};

const NOTION_API_BASE: &str = "https://api.notion.com/";
pub const NOTION_VERSION: &str = "2022-06-28";

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(token: String, timeout: Duration) -> Self {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(token, base_url, timeout)
    }

    pub fn with_base_url(token: String, base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("gh-notion-sync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            version: NOTION_VERSION.to_string(),
        }
    }

    pub fn build_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, SyncError> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|err| SyncError::Config(format!("invalid Notion base URL: {err}")))?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().map_err(|source| SyncError::Transport {
            service: Service::Notion,
            source,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, SyncError> {
        let request = self.build_request(method, path, body)?;
        debug!(url = %request.url(), "notion request");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|source| SyncError::Transport {
                service: Service::Notion,
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(res.headers());
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(
                Service::Notion,
                status.as_u16(),
                status == StatusCode::TOO_MANY_REQUESTS,
                retry_after,
                body,
            ));
        }

        let raw = res
            .text()
            .await
            .map_err(|source| SyncError::Transport {
                service: Service::Notion,
                source,
            })?;
        serde_json::from_str(&raw).map_err(|err| SyncError::MalformedResponse {
            service: Service::Notion,
            message: err.to_string(),
        })
    }

    pub async fn retrieve_database(
        &self,
        database_id: &str,
    ) -> Result<RetrieveDatabaseResp, SyncError> {
        self.execute(
            reqwest::Method::GET,
            &format!("v1/databases/{database_id}"),
            None,
        )
        .await
    }

    /// Fetch the target database's property schema once per run.
    pub async fn retrieve_schema(&self, database_id: &str) -> Result<DatabaseSchema, SyncError> {
        let resp = self.retrieve_database(database_id).await?;
        Ok(DatabaseSchema::from_response(&resp))
    }

    /// All pages whose identifier property equals `external_id`, across every
    /// result cursor. Callers decide what more than one match means.
    pub async fn find_pages(
        &self,
        database_id: &str,
        identifier_property: &str,
        external_id: &str,
    ) -> Result<Vec<Page>, SyncError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = build_query_body(identifier_property, external_id, cursor.as_deref());
            let resp: QueryDatabaseResp = self
                .execute(
                    reqwest::Method::POST,
                    &format!("v1/databases/{database_id}/query"),
                    Some(&body),
                )
                .await?;
            pages.extend(resp.results);
            if !resp.has_more {
                break;
            }
            cursor = resp.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(pages)
    }

    pub async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<CreatePageResponse, SyncError> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": Value::Object(properties),
        });
        self.execute(reqwest::Method::POST, "v1/pages", Some(&body))
            .await
    }

    /// Partial property patch: untouched properties retain their prior values.
    pub async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), SyncError> {
        let body = json!({ "properties": Value::Object(properties) });
        let _: Value = self
            .execute(
                reqwest::Method::PATCH,
                &format!("v1/pages/{page_id}"),
                Some(&body),
            )
            .await?;
        Ok(())
    }
}

pub(crate) fn build_query_body(
    identifier_property: &str,
    external_id: &str,
    cursor: Option<&str>,
) -> Value {
    let mut body = json!({
        "filter": {
            "property": identifier_property,
            "rich_text": { "equals": external_id },
        }
    });
    if let Some(cursor) = cursor {
        body["start_cursor"] = Value::String(cursor.to_string());
    }
    body
}

/// Read access to the target database, keyed on the identifier property.
#[async_trait]
pub trait PageLocator: Send + Sync {
    /// `Ok(None)` when no page carries the identifier; an error when more
    /// than one does — duplicates indicate a prior bug and must surface.
    async fn locate(
        &self,
        database_id: &str,
        identifier_property: &str,
        external_id: &str,
    ) -> Result<Option<Page>, SyncError>;
}

#[async_trait]
impl PageLocator for NotionClient {
    async fn locate(
        &self,
        database_id: &str,
        identifier_property: &str,
        external_id: &str,
    ) -> Result<Option<Page>, SyncError> {
        let mut pages = self
            .find_pages(database_id, identifier_property, external_id)
            .await?;
        match pages.len() {
            0 => Ok(None),
            1 => Ok(Some(pages.remove(0))),
            count => Err(SyncError::DuplicatePage {
                database_id: database_id.to_string(),
                external_id: external_id.to_string(),
                count,
            }),
        }
    }
}

/// Receipt for a (possibly suppressed) page write.
#[derive(Debug, Clone, Default)]
pub struct WriteReceipt {
    pub page_id: Option<String>,
    pub page_url: Option<String>,
}

/// Mutation capability of the upsert executor. Swapping the implementation
/// is how dry-run works; the pipeline itself never branches on the mode.
#[async_trait]
pub trait PageWriter: Send + Sync {
    async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<WriteReceipt, SyncError>;

    async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), SyncError>;
}

/// Writer that performs real Notion mutations.
pub struct LiveWriter {
    client: NotionClient,
}

impl LiveWriter {
    pub fn new(client: NotionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageWriter for LiveWriter {
    async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<WriteReceipt, SyncError> {
        let resp = self.client.create_page(database_id, properties).await?;
        Ok(WriteReceipt {
            page_id: Some(resp.id),
            page_url: resp.url,
        })
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), SyncError> {
        self.client.update_page(page_id, properties).await
    }
}

/// Writer that mutates nothing; the would-be action is still reported.
pub struct NoopWriter;

#[async_trait]
impl PageWriter for NoopWriter {
    async fn create_page(
        &self,
        database_id: &str,
        _properties: Map<String, Value>,
    ) -> Result<WriteReceipt, SyncError> {
        debug!(database_id, "dry-run: skipping page create");
        Ok(WriteReceipt::default())
    }

    async fn update_page(
        &self,
        page_id: &str,
        _properties: Map<String, Value>,
    ) -> Result<(), SyncError> {
        debug!(page_id, "dry-run: skipping page update");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> NotionClient {
        NotionClient::new("token".into(), Duration::from_secs(5))
    }

    #[test]
    fn build_request_sets_headers() {
        let body = json!({ "sample": true });
        let request = client()
            .build_request(reqwest::Method::POST, "v1/pages", Some(&body))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/pages");
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
                .get("Notion-Version")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            NOTION_VERSION
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn query_body_filters_on_identifier() {
        let body = build_query_body("GitHub ID", "I_1", None);
        assert_eq!(body["filter"]["property"], "GitHub ID");
        assert_eq!(body["filter"]["rich_text"]["equals"], "I_1");
        assert!(body.get("start_cursor").is_none());

        let paged = build_query_body("GitHub ID", "I_1", Some("abc"));
        assert_eq!(paged["start_cursor"], "abc");
    }

    #[tokio::test]
    async fn noop_writer_returns_empty_receipt() {
        let receipt = NoopWriter
            .create_page("db-1", Map::new())
            .await
            .unwrap();
        assert!(receipt.page_id.is_none());
        NoopWriter.update_page("page-1", Map::new()).await.unwrap();
    }
}
