use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_timestamp;

pub const NEW_CHAT_TITLE: &str = "New Chat";

/// A chat thread as stored by the backend.
///
/// `id` is `None` until the first create round-trip succeeds; such a chat is
/// local only and must never be resumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub llm_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatHistoryEntry>,
}

impl Chat {
    /// A fresh chat that exists only on this side of the wire.
    pub fn new_local(llm_type: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: None,
            title: Some(NEW_CHAT_TITLE.to_string()),
            created_time: Some(now.clone()),
            last_modified_time: Some(now),
            llm_type: Some(llm_type.to_string()),
            ..Default::default()
        }
    }

    pub fn is_pending_local(&self) -> bool {
        self.id.is_none()
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => NEW_CHAT_TITLE,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified_time.as_deref().and_then(parse_timestamp)
    }
}

/// One human/AI turn. Field names on the wire are PascalCase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    #[serde(rename = "HumanInput", default, skip_serializing_if = "Option::is_none")]
    pub human_input: Option<String>,
    #[serde(rename = "AIOutput", default, skip_serializing_if = "Option::is_none")]
    pub ai_output: Option<String>,
    #[serde(rename = "UploadedFile", default, skip_serializing_if = "Option::is_none")]
    pub uploaded_file: Option<String>,
    #[serde(rename = "FileURL", default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(rename = "FileContentsBase64", default, skip_serializing_if = "Option::is_none")]
    pub file_contents_base64: Option<String>,
    #[serde(rename = "FileType", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(rename = "Source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<HistorySource>,
    #[serde(rename = "QueryReferences", default, skip_serializing_if = "Option::is_none")]
    pub query_references: Option<Vec<QueryReference>>,
}

impl ChatHistoryEntry {
    pub fn human(text: &str) -> Self {
        Self {
            human_input: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn ai(text: &str) -> Self {
        Self {
            ai_output: Some(text.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
}

/// A retrieved chunk backing an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryReference {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub document_url: String,
    #[serde(default)]
    pub document_text: String,
    #[serde(default)]
    pub modality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_stop: Option<f64>,
}
