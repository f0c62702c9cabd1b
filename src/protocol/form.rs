//! Form schema for human-in-the-loop suspension (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Select,
    Number,
    Checkbox,
    Date,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub message: String,
}

/// An async `select` field resolves its options via an auxiliary
/// `ui_interaction.query` / response round-trip rather than a static list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AsyncDataSource {
    pub provider: String,
    pub min_chars: u32,
    pub debounce_ms: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<AsyncDataSource>,
}

impl Field {
    pub fn text(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::Text,
            key: key.into(),
            label: label.into(),
            required: None,
            placeholder: None,
            validation: Vec::new(),
            options: None,
            data_source: None,
        }
    }

    pub fn async_select(
        key: impl Into<String>,
        label: impl Into<String>,
        data_source: AsyncDataSource,
    ) -> Self {
        Self {
            field_type: FieldType::Select,
            key: key.into(),
            label: label.into(),
            required: None,
            placeholder: None,
            validation: Vec::new(),
            options: None,
            data_source: Some(data_source),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }
}

/// A structured UI request for human input, uniquely identified (§6, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fields: Vec<Field>,
}

impl FormSpec {
    pub fn new(id: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            id: id.into(),
            title: None,
            fields,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
