use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    attributes::{Attribute, AttributeOption, AttributeType},
    config::Config,
    filter_compiler::FilterCondition,
};

const UNTITLED_DATABASE: &str = "Untitled Database";
const UNTITLED_PAGE: &str = "Untitled Page";
const LIST_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(format!("Unable to reach Notion: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub id: String,
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPagesRequest {
    pub database_id: String,
    pub filter: Option<FilterCondition>,
    // Empty means every property is returned.
    pub data_attribute_names: Vec<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredPage {
    pub id: String,
    pub title: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPagesResponse {
    pub pages: Vec<FilteredPage>,
    pub total_count: usize,
    pub has_more: bool,
}

#[async_trait]
pub trait NotionMetadata: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ProviderError>;
    async fn list_pages(&self, database_id: &str) -> Result<Vec<PageSummary>, ProviderError>;
    async fn list_attributes(&self, database_id: &str) -> Result<Vec<Attribute>, ProviderError>;
    async fn list_attribute_options(
        &self,
        database_id: &str,
        attribute_name: &str,
    ) -> Result<Vec<AttributeOption>, ProviderError>;
}

#[async_trait]
pub trait PageQuery: Send + Sync {
    async fn query_pages(
        &self,
        request: &QueryPagesRequest,
    ) -> Result<QueryPagesResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
}

impl NotionClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        if config.notion_api_key.is_none() {
            warn!("NOTION_API_KEY not set; Notion requests will fail until it is configured");
        }

        Ok(Self {
            http,
            base_url: config.notion_base_url.trim_end_matches('/').to_string(),
            api_key: config.notion_api_key.clone(),
            api_version: config.notion_api_version.clone(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::new(
                "Notion API key is not configured. Set NOTION_API_KEY.",
            ));
        };

        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Notion request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(api_key)
            .header("Notion-Version", &self.api_version);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Notion API error");
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|err| ProviderError::new(format!("Unexpected response format from Notion API: {err}")))
    }

    async fn retrieve_database(&self, database_id: &str) -> Result<Value, ProviderError> {
        let database_id = require_database_id(database_id)?;
        self.call(Method::GET, &format!("/databases/{database_id}"), None)
            .await
    }
}

#[async_trait]
impl NotionMetadata for NotionClient {
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ProviderError> {
        let body = json!({
            "filter": { "property": "object", "value": "database" },
            "page_size": LIST_PAGE_SIZE,
        });
        let data = self.call(Method::POST, "/search", Some(body)).await?;
        let databases = parse_databases(&data)?;
        info!(count = databases.len(), "Fetched Notion databases");
        Ok(databases)
    }

    async fn list_pages(&self, database_id: &str) -> Result<Vec<PageSummary>, ProviderError> {
        let database_id = require_database_id(database_id)?;
        let body = json!({ "page_size": LIST_PAGE_SIZE });
        let data = self
            .call(
                Method::POST,
                &format!("/databases/{database_id}/query"),
                Some(body),
            )
            .await?;
        let pages = results(&data)?
            .iter()
            .map(|page| PageSummary {
                id: string_field(page, "id"),
                name: page_title(page),
            })
            .collect::<Vec<_>>();
        info!(database_id, count = pages.len(), "Fetched Notion pages");
        Ok(pages)
    }

    async fn list_attributes(&self, database_id: &str) -> Result<Vec<Attribute>, ProviderError> {
        let data = self.retrieve_database(database_id).await?;
        parse_attributes(&data)
    }

    async fn list_attribute_options(
        &self,
        database_id: &str,
        attribute_name: &str,
    ) -> Result<Vec<AttributeOption>, ProviderError> {
        let data = self.retrieve_database(database_id).await?;
        parse_attribute_options(&data, attribute_name)
    }
}

#[async_trait]
impl PageQuery for NotionClient {
    async fn query_pages(
        &self,
        request: &QueryPagesRequest,
    ) -> Result<QueryPagesResponse, ProviderError> {
        let database_id = require_database_id(&request.database_id)?;
        let mut body = json!({ "page_size": request.page_size });
        if let Some(filter) = &request.filter {
            body["filter"] = serde_json::to_value(filter)
                .map_err(|err| ProviderError::new(format!("Failed to encode filter: {err}")))?;
        }

        let data = self
            .call(
                Method::POST,
                &format!("/databases/{database_id}/query"),
                Some(body),
            )
            .await?;
        let response = parse_query_response(&data, &request.data_attribute_names)?;
        info!(
            database_id,
            pages = response.pages.len(),
            has_more = response.has_more,
            "Queried filtered Notion pages"
        );
        Ok(response)
    }
}

fn require_database_id(database_id: &str) -> Result<&str, ProviderError> {
    let trimmed = database_id.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::new("Database ID is required"));
    }
    Ok(trimmed)
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let details = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::UNAUTHORIZED {
        return ProviderError::new(format!(
            "Notion API key is invalid. Please check your Notion integration token. ({details})"
        ));
    }
    ProviderError::new(format!("Notion API error ({}): {details}", status.as_u16()))
}

fn results(data: &Value) -> Result<&Vec<Value>, ProviderError> {
    data.get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::new("Unexpected response format from Notion API"))
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn plain_text(rich_text: &Value) -> String {
    rich_text
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn page_title(page: &Value) -> String {
    page.get("properties")
        .and_then(Value::as_object)
        .and_then(|props| {
            props.values().find_map(|prop| {
                if prop.get("type").and_then(Value::as_str) != Some("title") {
                    return None;
                }
                let text = prop.get("title").map(plain_text).unwrap_or_default();
                (!text.is_empty()).then_some(text)
            })
        })
        .unwrap_or_else(|| UNTITLED_PAGE.to_string())
}

fn parse_databases(data: &Value) -> Result<Vec<DatabaseSummary>, ProviderError> {
    Ok(results(data)?
        .iter()
        .map(|db| {
            let name = db
                .get("title")
                .and_then(Value::as_array)
                .and_then(|t| t.first())
                .and_then(|t| t.get("plain_text"))
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .unwrap_or(UNTITLED_DATABASE)
                .to_string();
            DatabaseSummary {
                id: string_field(db, "id"),
                name,
                available: true,
            }
        })
        .collect())
}

fn properties(data: &Value) -> Result<&Map<String, Value>, ProviderError> {
    data.get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::new("Notion database has no properties"))
}

fn parse_attributes(data: &Value) -> Result<Vec<Attribute>, ProviderError> {
    Ok(properties(data)?
        .iter()
        .map(|(name, property)| Attribute {
            id: name.clone(),
            name: name.clone(),
            attribute_type: AttributeType::from(
                property.get("type").and_then(Value::as_str).unwrap_or_default(),
            ),
        })
        .collect())
}

fn parse_attribute_options(
    data: &Value,
    attribute_name: &str,
) -> Result<Vec<AttributeOption>, ProviderError> {
    let Some(property) = properties(data)?.get(attribute_name) else {
        return Err(ProviderError::new(format!(
            "Attribute {attribute_name} not found in database"
        )));
    };

    let attribute_type =
        AttributeType::from(property.get("type").and_then(Value::as_str).unwrap_or_default());
    if !attribute_type.has_options() {
        return Ok(Vec::new());
    }

    let options = property
        .get(attribute_type.as_str())
        .and_then(|config| config.get("options"))
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .map(|option| AttributeOption {
                    id: string_field(option, "id"),
                    name: string_field(option, "name"),
                    color: option
                        .get("color")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(options)
}

fn simplify_property(property: &Value) -> Value {
    let kind = property.get("type").and_then(Value::as_str).unwrap_or_default();
    let inner = property.get(kind).unwrap_or(&Value::Null);
    match kind {
        "title" | "rich_text" => Value::String(plain_text(inner)),
        "number" | "checkbox" | "url" | "email" | "phone_number" => inner.clone(),
        "select" | "status" => inner.get("name").cloned().unwrap_or(Value::Null),
        "multi_select" => Value::Array(
            inner
                .as_array()
                .map(|options| {
                    options
                        .iter()
                        .filter_map(|o| o.get("name").cloned())
                        .collect()
                })
                .unwrap_or_default(),
        ),
        "date" => inner.get("start").cloned().unwrap_or(Value::Null),
        _ => inner.clone(),
    }
}

fn parse_query_response(
    data: &Value,
    data_attribute_names: &[String],
) -> Result<QueryPagesResponse, ProviderError> {
    let pages = results(data)?
        .iter()
        .map(|page| {
            let properties = page
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .filter(|(name, _)| {
                            data_attribute_names.is_empty()
                                || data_attribute_names.iter().any(|n| n == *name)
                        })
                        .map(|(name, prop)| (name.clone(), simplify_property(prop)))
                        .collect::<Map<_, _>>()
                })
                .unwrap_or_default();
            FilteredPage {
                id: string_field(page, "id"),
                title: page_title(page),
                properties,
            }
        })
        .collect::<Vec<_>>();

    Ok(QueryPagesResponse {
        total_count: pages.len(),
        has_more: data
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        pages,
    })
}
