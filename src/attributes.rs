use std::fmt;

use serde::{Deserialize, Serialize};

// Unknown types are kept verbatim so they round-trip back to Notion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeType {
    Title,
    Text,
    Number,
    Select,
    MultiSelect,
    Status,
    Checkbox,
    Date,
    Other(String),
}

impl AttributeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Title => "title",
            Self::Text => "rich_text",
            Self::Number => "number",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Status => "status",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_single_choice(&self) -> bool {
        matches!(self, Self::Select | Self::Status)
    }

    pub fn has_options(&self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect | Self::Status)
    }
}

impl From<&str> for AttributeType {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "title" => Self::Title,
            "rich_text" | "text" => Self::Text,
            "number" => Self::Number,
            "select" => Self::Select,
            "multi_select" => Self::MultiSelect,
            "status" => Self::Status,
            "checkbox" => Self::Checkbox,
            "date" => Self::Date,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for AttributeType {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeOption {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}
