//! Notion REST API client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{BaselineRecord, NewRecord, NotesService};
use crate::credentials::CredentialStore;

const BASE_URL: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";

const TITLE_PROPERTY: &str = "名前";
const AMOUNT_PROPERTY: &str = "金額";
const CATEGORY_PROPERTY: &str = "資産/負債";
const NOTE_PROPERTY: &str = "備考";
const COLLECTION_ICON: &str = "💵";

/// Notion-backed baseline storage.
///
/// Collections are databases created under one parent page.
pub struct NotionNotes {
    token: SecretString,
    parent_page_id: String,
    base_url: String,
    client: Client,
}

impl NotionNotes {
    pub fn new(token: SecretString, parent_page_id: impl Into<String>) -> Self {
        Self {
            token,
            parent_page_id: parent_page_id.into(),
            base_url: BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Override API base URL (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Expected keys: `notion_key`, `notion_page_id`.
    pub async fn from_credentials(store: &dyn CredentialStore) -> Result<Self> {
        let token = store
            .get("notion_key")
            .await?
            .context("Missing credential: notion_key")?;
        let parent = store
            .get("notion_page_id")
            .await?
            .context("Missing credential: notion_page_id")?;
        Ok(Self::new(token, parent.expose_secret()))
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .context("Notion HTTP request failed")?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .context("Failed to read Notion response body")?;

        if !status.is_success() {
            anyhow::bail!("Notion API request to {path} failed ({status}): {body_text}");
        }

        serde_json::from_str(&body_text).context("Failed to parse Notion JSON response")
    }
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
struct QueryPage {
    #[serde(default)]
    results: Vec<PageObject>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct PageObject {
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

impl PageObject {
    fn to_record(&self) -> BaselineRecord {
        let name = self
            .properties
            .get(TITLE_PROPERTY)
            .and_then(|p| p.get("title"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();

        let price = self
            .properties
            .get(AMOUNT_PROPERTY)
            .and_then(|p| p.get("number"))
            .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)))
            .unwrap_or(0);

        BaselineRecord { name, price }
    }
}

#[async_trait]
impl NotesService for NotionNotes {
    async fn query_records(&self, collection_id: &str) -> Result<Vec<BaselineRecord>> {
        let path = format!("/v1/databases/{collection_id}/query");
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = match &cursor {
                Some(c) => json!({ "start_cursor": c }),
                None => json!({}),
            };
            let page: QueryPage = self.post(&path, &body).await?;
            records.extend(page.results.iter().map(PageObject::to_record));

            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(collection_id, records = records.len(), "Queried baseline records");
        Ok(records)
    }

    async fn create_collection(&self, title: &str) -> Result<String> {
        let body = json!({
            "parent": { "type": "page_id", "page_id": self.parent_page_id },
            "title": [{ "type": "text", "text": { "content": title } }],
            "icon": { "type": "emoji", "emoji": COLLECTION_ICON },
            "properties": {
                TITLE_PROPERTY: { "title": {} },
                AMOUNT_PROPERTY: { "number": { "format": "yen" } },
                CATEGORY_PROPERTY: {
                    "multi_select": {
                        "options": [
                            { "name": "資産", "color": "blue" },
                            { "name": "負債", "color": "red" },
                            { "name": "貯金", "color": "yellow" },
                            { "name": "非表示", "color": "gray" }
                        ]
                    }
                },
                NOTE_PROPERTY: { "rich_text": {} }
            }
        });

        let created: Created = self.post("/v1/databases", &body).await?;
        tracing::info!(title, id = %created.id, "Created baseline collection");
        Ok(created.id)
    }

    async fn create_record(&self, collection_id: &str, record: &NewRecord) -> Result<String> {
        let categories: Vec<Value> = record
            .categories
            .iter()
            .map(|c| json!({ "name": c }))
            .collect();

        let mut body = json!({
            "parent": { "database_id": collection_id },
            "properties": {
                TITLE_PROPERTY: { "title": [{ "text": { "content": record.name } }] },
                AMOUNT_PROPERTY: { "number": record.amount },
                CATEGORY_PROPERTY: { "multi_select": categories },
                NOTE_PROPERTY: { "rich_text": [{ "text": { "content": record.note } }] }
            }
        });
        if let Some(icon) = &record.icon {
            body["icon"] = json!({ "type": "emoji", "emoji": icon });
        }

        let created: Created = self.post("/v1/pages", &body).await?;
        Ok(created.id)
    }
}
