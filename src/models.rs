use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    attributes::{AttributeMeta, AttributeType},
    context::ChatContext,
    filter_compiler::FilterCondition,
    filter_values::NotionFilter,
    selection::{DataAttribute, FilteringAttribute, SelectionStore},
    summary::SelectionSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Bot,
}

impl MessageSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub content: String,
    pub sender: MessageSender,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub selected_database_id: String,
    pub selected_database_name: Option<String>,
    pub selected_page_id: String,
    pub filtering_attributes: Vec<FilteringAttribute>,
    pub data_attributes: Vec<DataAttribute>,
    pub filters: Vec<NotionFilter>,
    pub summary: SelectionSummary,
    pub sending: bool,
}

impl SessionView {
    pub fn new(
        session_id: &str,
        selection: &SelectionStore,
        database_name: Option<&str>,
        sending: bool,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            selected_database_id: selection.selected_database_id().to_string(),
            selected_database_name: database_name.map(str::to_string),
            selected_page_id: selection.selected_page_id().to_string(),
            filtering_attributes: selection.filtering_attributes().to_vec(),
            data_attributes: selection.data_attributes().to_vec(),
            filters: selection.filters().to_vec(),
            summary: SelectionSummary::project(selection),
            sending,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectDatabaseRequest {
    pub database_id: String,
    #[serde(default)]
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPageRequest {
    #[serde(default)]
    pub page_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleAttributeRequest {
    pub attribute_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

impl ToggleAttributeRequest {
    pub fn meta(&self) -> AttributeMeta {
        AttributeMeta {
            name: self.name.clone(),
            attribute_type: self.attribute_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledFilterResponse {
    pub database_id: String,
    pub filter: Option<FilterCondition>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameThreadRequest {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub user_message: ChatMessage,
    pub bot_message: ChatMessage,
    pub context: Option<ChatContext>,
    pub fallback: Option<&'static str>,
}
