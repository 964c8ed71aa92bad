use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::Config, context::ChatContext};

const SAMPLE_TITLE_COUNT: usize = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiBackendError {
    #[error("AI service transport failure: {0}")]
    Transport(String),
    #[error("No response from AI service")]
    NoResponse,
    #[error("AI service returned empty content")]
    EmptyResponse,
    #[error("Malformed AI response: {0}")]
    MalformedResponse(String),
}

impl AiBackendError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "AI_TRANSPORT_FAILURE",
            Self::NoResponse => "AI_NO_RESPONSE",
            Self::EmptyResponse => "AI_EMPTY_RESPONSE",
            Self::MalformedResponse(_) => "AI_MALFORMED_RESPONSE",
        }
    }

    pub fn fallback_message(&self) -> &'static str {
        match self {
            Self::Transport(_) => {
                "Sorry, I couldn't reach the assistant service. Please try again in a moment."
            }
            Self::NoResponse => {
                "Sorry, the assistant did not respond. Please try sending your message again."
            }
            Self::EmptyResponse => {
                "Sorry, the assistant returned an empty answer. Try rephrasing your question."
            }
            Self::MalformedResponse(_) => {
                "Sorry, the assistant's answer could not be read. Please try again later."
            }
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_chat_message(
        &self,
        message: &str,
        thread_id: &str,
        context: Option<&ChatContext>,
    ) -> Result<String, AiBackendError>;
}

#[derive(Debug, Clone)]
pub struct WebhookChatBackend {
    http: Client,
    webhook_url: Option<String>,
    language: String,
}

impl WebhookChatBackend {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        if config.webhook_url.is_none() {
            warn!("NOTION_CHAT_WEBHOOK_URL not set; chat messages will receive fallback replies");
        }

        Ok(Self {
            http,
            webhook_url: config.webhook_url.clone(),
            language: config.language.clone(),
        })
    }
}

#[async_trait]
impl ChatBackend for WebhookChatBackend {
    async fn send_chat_message(
        &self,
        message: &str,
        thread_id: &str,
        context: Option<&ChatContext>,
    ) -> Result<String, AiBackendError> {
        let Some(url) = &self.webhook_url else {
            return Err(AiBackendError::Transport(
                "webhook URL is not configured".to_string(),
            ));
        };

        let payload = build_webhook_payload(message, thread_id, context, &self.language, Utc::now());
        info!(
            thread_id,
            has_context = context.is_some(),
            pages = payload["context"]["pagesCount"].as_u64().unwrap_or(0),
            "Sending message to AI webhook"
        );

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AiBackendError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiBackendError::Transport(format!(
                "webhook returned status {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| AiBackendError::Transport(err.to_string()))?;
        debug!(thread_id, length = body.len(), "AI webhook response received");
        parse_reply(&body)
    }
}

pub fn parse_reply(body: &str) -> Result<String, AiBackendError> {
    if body.trim().is_empty() {
        return Err(AiBackendError::NoResponse);
    }

    let parsed: Value = serde_json::from_str(body)
        .map_err(|err| AiBackendError::MalformedResponse(format!("body is not JSON: {err}")))?;

    let Some(content) = parsed.get("content") else {
        return Err(AiBackendError::MalformedResponse(
            "missing content field".to_string(),
        ));
    };
    let Some(content) = content.as_str() else {
        return Err(AiBackendError::MalformedResponse(
            "content field is not a string".to_string(),
        ));
    };

    if content.trim().is_empty() {
        return Err(AiBackendError::EmptyResponse);
    }
    Ok(content.to_string())
}

fn data_summary(context: &ChatContext) -> Option<Value> {
    let db = &context.selected_database;
    let data = db.filtered_data.as_ref()?;

    let sample_titles: Vec<&str> = data
        .pages
        .iter()
        .take(SAMPLE_TITLE_COUNT)
        .map(|p| p.title.as_str())
        .collect();
    let available_properties: Vec<&String> = data
        .pages
        .first()
        .map(|p| p.properties.keys().collect())
        .unwrap_or_default();

    let filtering_description = if db.has_filters {
        format!("Data was filtered by: {}", db.filter_summary)
    } else {
        "Using all available data from the database".to_string()
    };
    let data_scope = if db.has_data_selection {
        format!("Including only the selected attributes: {}", db.data_attributes_summary)
    } else {
        "Including all attributes from the database".to_string()
    };

    Some(json!({
        "totalPages": data.pages.len(),
        "sampleTitles": sample_titles,
        "availableProperties": available_properties,
        "filteringDescription": filtering_description,
        "dataScope": data_scope,
    }))
}

pub fn build_webhook_payload(
    message: &str,
    thread_id: &str,
    context: Option<&ChatContext>,
    language: &str,
    now: DateTime<Utc>,
) -> Value {
    let notion_context = context.map(|ctx| {
        let db = &ctx.selected_database;
        let data = db.filtered_data.as_ref();
        let mut value = json!({
            "selectedDatabase": {
                "id": db.id,
                "name": db.name,
                "hasFilters": db.has_filters,
                "hasDataSelection": db.has_data_selection,
                "filterSummary": db.filter_summary,
                "dataAttributesSummary": db.data_attributes_summary,
                "filteredData": data,
                "pagesCount": data.map(|d| d.pages.len()).unwrap_or(0),
                "totalPagesAvailable": data.map(|d| d.total_count).unwrap_or(0),
                "hasMorePages": data.map(|d| d.has_more).unwrap_or(false),
            },
            "filters": ctx.filters,
            "dataAttributes": ctx.data_attributes,
            "summary": ctx.summary,
            "selectedPage": ctx.selected_page,
        });
        if let Some(summary) = data_summary(ctx) {
            value["dataSummary"] = summary;
        }
        value
    });

    let system_message = match context {
        Some(ctx) => {
            let mut parts = vec![format!(
                "The user selected the \"{}\" database.",
                ctx.selected_database.name
            )];
            if let Some(summary) = notion_context.as_ref().and_then(|v| v.get("dataSummary")) {
                for key in ["filteringDescription", "dataScope"] {
                    if let Some(text) = summary.get(key).and_then(Value::as_str) {
                        parts.push(format!("{text}."));
                    }
                }
            }
            parts.join(" ")
        }
        None => "The user has not selected any Notion database.".to_string(),
    };

    let db = context.map(|ctx| &ctx.selected_database);
    json!({
        "message": message,
        "threadId": thread_id,
        "notionContext": notion_context,
        "userRequest": {
            "text": message,
            "timestamp": now.to_rfc3339(),
            "language": language,
        },
        "context": {
            "hasUserSelection": context.is_some(),
            "databaseName": db.map(|d| d.name.as_str()).unwrap_or("none"),
            "hasFilters": db.map(|d| d.has_filters).unwrap_or(false),
            "hasDataSelection": db.map(|d| d.has_data_selection).unwrap_or(false),
            "pagesCount": db
                .and_then(|d| d.filtered_data.as_ref())
                .map(|d| d.pages.len())
                .unwrap_or(0),
            "filterDescription": db
                .map(|d| d.filter_summary.as_str())
                .unwrap_or(crate::summary::NO_FILTERS_SUMMARY),
            "dataDescription": db
                .map(|d| d.data_attributes_summary.as_str())
                .unwrap_or(crate::summary::ALL_ATTRIBUTES_SUMMARY),
            "systemMessage": system_message,
        }
    })
}
