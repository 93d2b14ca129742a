use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::ApiError;
use super::request::GenerateRequest;
use super::transport::{ApiRequest, ByteStream, Transport};
use crate::models::{
    Chat, ChatHistoryEntry, ChatModel, ModelDetails, Query, QueryEngine, QueryEngineBuildJob,
    QueryRequest, QueryResponse, SourceDraft,
};

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Typed access to the GENIE endpoints for one authenticated user.
#[derive(Clone)]
pub struct GenieClient {
    transport: Arc<dyn Transport>,
    token: String,
}

impl std::fmt::Debug for GenieClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenieClient")
            .field("token", &"***")
            .finish()
    }
}

impl GenieClient {
    pub fn new(transport: Arc<dyn Transport>, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: token.into(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let body = self.transport.request(&self.token, request).await?;
        unwrap_data(body)
    }

    // --- Chats ---

    pub async fn list_chats(&self, skip: u32, limit: u32) -> Result<Vec<Chat>, ApiError> {
        self.call(
            ApiRequest::get("/chat")
                .with_query("skip", skip)
                .with_query("limit", limit),
        )
        .await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat, ApiError> {
        self.call(ApiRequest::get(format!("/chat/{}", chat_id))).await
    }

    /// Most recently modified chat, fetched in full.
    pub async fn latest_chat(&self) -> Result<Option<Chat>, ApiError> {
        let chats = self.list_chats(0, DEFAULT_PAGE_LIMIT).await?;
        let latest = chats
            .iter()
            .filter(|c| c.id.is_some())
            .max_by_key(|c| c.last_modified());
        match latest.and_then(|c| c.id.as_deref()) {
            Some(id) => self.get_chat(id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn create_empty_chat(&self) -> Result<Chat, ApiError> {
        self.call(ApiRequest::post("/chat/empty_chat", serde_json::json!({})))
            .await
    }

    /// Non-streaming generate; returns the updated chat.
    pub async fn generate(
        &self,
        chat_id: &str,
        request: &GenerateRequest,
    ) -> Result<Chat, ApiError> {
        let mut request = request.clone();
        request.stream = false;
        self.call(generate_request(chat_id, &request)?).await
    }

    /// Streaming generate; returns the raw response body.
    pub async fn generate_stream(
        &self,
        chat_id: &str,
        request: &GenerateRequest,
    ) -> Result<ByteStream, ApiError> {
        let mut request = request.clone();
        request.stream = true;
        self.transport
            .request_stream(&self.token, generate_request(chat_id, &request)?)
            .await
    }

    pub async fn generate_summary(&self, chat_id: &str) -> Result<Chat, ApiError> {
        self.call(ApiRequest::post(
            format!("/chat/{}/generate_summary", chat_id),
            serde_json::json!({}),
        ))
        .await
    }

    pub async fn update_chat(
        &self,
        chat_id: &str,
        title: Option<&str>,
        history: Option<&[ChatHistoryEntry]>,
    ) -> Result<Chat, ApiError> {
        let mut body = serde_json::Map::new();
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            body.insert("title".to_string(), Value::String(title.to_string()));
        }
        if let Some(history) = history {
            let history = serde_json::to_value(history)
                .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
            body.insert("history".to_string(), history);
        }
        self.call(ApiRequest::put(format!("/chat/{}", chat_id), Value::Object(body)))
            .await
    }

    // --- Queries ---

    pub async fn get_query(&self, query_id: &str) -> Result<Query, ApiError> {
        self.call(ApiRequest::get(format!("/query/{}", query_id))).await
    }

    pub async fn list_queries(&self, skip: u32, limit: u32) -> Result<Vec<Query>, ApiError> {
        self.call(
            ApiRequest::get("/query/user")
                .with_query("skip", skip)
                .with_query("limit", limit),
        )
        .await
    }

    pub async fn create_query(
        &self,
        engine_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, ApiError> {
        self.call(ApiRequest::post(
            format!("/query/engine/{}", engine_id),
            request.create_body(),
        ))
        .await
    }

    pub async fn resume_query(
        &self,
        query_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, ApiError> {
        self.call(ApiRequest::post(
            format!("/query/{}", query_id),
            request.resume_body(),
        ))
        .await
    }

    // --- Query engines ---

    pub async fn list_engines(&self) -> Result<Vec<QueryEngine>, ApiError> {
        self.call(ApiRequest::get("/query")).await
    }

    pub async fn get_engine(&self, engine_id: &str) -> Result<QueryEngine, ApiError> {
        self.call(ApiRequest::get(format!("/query/engine/{}", engine_id)))
            .await
    }

    /// Starts a build job for a new engine. Callers validate the draft first.
    pub async fn create_engine(&self, draft: &SourceDraft) -> Result<QueryEngineBuildJob, ApiError> {
        self.call(ApiRequest::post("/query/engine", draft.to_build_body()))
            .await
    }

    pub async fn update_engine(
        &self,
        engine_id: &str,
        name: &str,
        description: &str,
    ) -> Result<QueryEngine, ApiError> {
        self.call(ApiRequest::put(
            format!("/query/engine/{}", engine_id),
            serde_json::json!({ "name": name, "description": description }),
        ))
        .await
    }

    pub async fn delete_engine(&self, engine_id: &str) -> Result<bool, ApiError> {
        let body = self
            .transport
            .request(
                &self.token,
                ApiRequest::delete(format!("/query/engine/{}", engine_id)),
            )
            .await?;
        Ok(body.get("success").and_then(Value::as_bool).unwrap_or(false))
    }

    // --- Models ---

    pub async fn list_chat_models(
        &self,
        is_multimodal: Option<bool>,
    ) -> Result<Vec<ChatModel>, ApiError> {
        let mut request = ApiRequest::get("/chat/chat_types/details");
        if let Some(multi) = is_multimodal {
            request = request.with_query("is_multimodal", multi);
        }
        self.models(request).await
    }

    pub async fn list_embedding_models(
        &self,
        is_multimodal: Option<bool>,
    ) -> Result<Vec<ChatModel>, ApiError> {
        let mut request = ApiRequest::get("/llm/details").with_query("is_embedding", "True");
        if let Some(multi) = is_multimodal {
            request = request.with_query("is_multimodal", multi);
        }
        self.models(request).await
    }

    async fn models(&self, request: ApiRequest) -> Result<Vec<ChatModel>, ApiError> {
        let details: Option<Vec<ModelDetails>> = self.call(request).await?;
        let now = Utc::now();
        Ok(details
            .unwrap_or_default()
            .into_iter()
            .map(|d| ChatModel::from_details(d, now))
            .collect())
    }

    // --- Build jobs ---

    pub async fn list_build_jobs(&self) -> Result<Vec<QueryEngineBuildJob>, ApiError> {
        let jobs: Option<Vec<QueryEngineBuildJob>> = self
            .call(ApiRequest::get("/jobs/query_engine_build").on_jobs())
            .await?;
        Ok(jobs.unwrap_or_default())
    }

    pub async fn get_build_job(&self, job_id: &str) -> Result<QueryEngineBuildJob, ApiError> {
        self.call(ApiRequest::get(format!("/jobs/query_engine_build/{}", job_id)).on_jobs())
            .await
    }
}

fn generate_request(chat_id: &str, request: &GenerateRequest) -> Result<ApiRequest, ApiError> {
    let body = request
        .to_body()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    Ok(ApiRequest::post(format!("/chat/{}/generate", chat_id), body))
}

/// Pull `data` out of the `{success, message, data}` envelope.
fn unwrap_data<T: DeserializeOwned>(mut body: Value) -> Result<T, ApiError> {
    let data = match body.get_mut("data") {
        Some(data) => data.take(),
        None => return Err(ApiError::InvalidResponse("missing data field".to_string())),
    };
    serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
