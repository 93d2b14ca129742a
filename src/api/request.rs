use std::path::Path;

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::models::ChatHistoryEntry;

/// A file attached to a generate call, sent inline as base64.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub name: String,
    pub contents: Vec<u8>,
}

impl FileUpload {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let contents = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { name, contents })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.contents)
    }
}

/// Parameters for `POST /chat/{id}/generate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub llm_type: String,
    pub stream: bool,
    pub file: Option<FileUpload>,
    pub file_url: Option<String>,
    pub tool_names: Vec<String>,
    pub history: Option<Vec<ChatHistoryEntry>>,
    pub temperature: Option<f32>,
    pub query_engine_id: Option<String>,
    pub query_filter: Option<Value>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    llm_type: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_file_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_file_b64_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_file_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_engine_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_filter: Option<&'a Value>,
}

impl GenerateRequest {
    pub fn new(prompt: &str, llm_type: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            llm_type: llm_type.to_string(),
            stream: true,
            ..Default::default()
        }
    }

    /// JSON body. Tool names and history travel as JSON-encoded strings.
    pub fn to_body(&self) -> Result<Value, serde_json::Error> {
        let tool_names = if self.tool_names.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.tool_names)?)
        };
        let history = match &self.history {
            Some(history) => Some(serde_json::to_string(history)?),
            None => None,
        };

        let body = GenerateBody {
            prompt: &self.prompt,
            llm_type: &self.llm_type,
            stream: self.stream,
            chat_file_b64: self.file.as_ref().map(FileUpload::to_base64),
            chat_file_b64_name: self.file.as_ref().map(|f| f.name.as_str()),
            chat_file_url: self.file_url.as_deref().filter(|u| !u.is_empty()),
            tool_names,
            history,
            temperature: self.temperature,
            query_engine_id: self.query_engine_id.as_deref().filter(|id| !id.is_empty()),
            query_filter: self.query_filter.as_ref(),
        };
        serde_json::to_value(body)
    }
}
