use serde::{Deserialize, Serialize};

use super::chat::{Chat, QueryReference};

/// A retrieval question/answer thread against one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub llm_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
    #[serde(default)]
    pub history: Vec<QueryContents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_result: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_references: Option<Vec<QueryReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_chat: Option<Chat>,
}

impl Query {
    pub fn new_local(llm_type: &str) -> Self {
        Self {
            llm_type: Some(llm_type.to_string()),
            ..Default::default()
        }
    }

    pub fn is_pending_local(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContents {
    #[serde(rename = "HumanQuestion", default, skip_serializing_if = "Option::is_none")]
    pub human_question: Option<String>,
    #[serde(rename = "AIResponse", default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    #[serde(rename = "AIReferences", default, skip_serializing_if = "Option::is_none")]
    pub ai_references: Option<Vec<QueryReference>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub response: String,
}

/// Payload returned by `POST /query/engine/{engine}` and `POST /query/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub user_query_id: Option<String>,
    #[serde(default)]
    pub query_result: Option<QueryResult>,
    #[serde(default)]
    pub query_references: Option<Vec<QueryReference>>,
    /// Present when the backend promoted the query into a chat.
    #[serde(default)]
    pub user_chat: Option<Chat>,
}

/// Parameters for creating or resuming a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub prompt: String,
    pub llm_type: String,
    pub chat_mode: bool,
    pub stream: bool,
}

impl QueryRequest {
    pub fn create_body(&self) -> serde_json::Value {
        serde_json::json!({
            "prompt": self.prompt,
            "llm_type": self.llm_type,
            "chat_mode": self.chat_mode,
        })
    }

    pub fn resume_body(&self) -> serde_json::Value {
        serde_json::json!({
            "prompt": self.prompt,
            "llm_type": self.llm_type,
            "sentence_references": false,
            "stream": self.stream,
            "chat_mode": self.chat_mode,
        })
    }
}
