use serde::{Deserialize, Serialize};

/// A configured retrieval index ("source").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryEngine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub query_engine_type: Option<String>,
    #[serde(default)]
    pub embedding_type: Option<String>,
    #[serde(default)]
    pub vector_store: Option<String>,
    #[serde(default)]
    pub doc_url: Option<String>,
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub llm_type: Option<String>,
    #[serde(default)]
    pub parent_engine_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub index_id: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub depth_limit: Option<u32>,
    #[serde(default)]
    pub chunk_size: Option<u32>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub child_engines: Option<Vec<String>>,
    #[serde(default)]
    pub is_multimodal: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

impl QueryEngine {
    pub fn type_display_name(&self) -> &str {
        match self.query_engine_type.as_deref() {
            Some(raw) => QueryEngineType::from_str(raw)
                .map(|t| t.display_name())
                .unwrap_or(raw),
            None => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryEngineType {
    #[serde(rename = "qe_vertex_search")]
    VertexSearch,
    #[default]
    #[serde(rename = "qe_llm_service")]
    LlmService,
    #[serde(rename = "qe_integrated_search")]
    IntegratedSearch,
}

impl QueryEngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryEngineType::VertexSearch => "qe_vertex_search",
            QueryEngineType::LlmService => "qe_llm_service",
            QueryEngineType::IntegratedSearch => "qe_integrated_search",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            QueryEngineType::VertexSearch => "Vertex Search",
            QueryEngineType::LlmService => "GENIE Search",
            QueryEngineType::IntegratedSearch => "Integrated Search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "qe_vertex_search" => Some(QueryEngineType::VertexSearch),
            "qe_llm_service" => Some(QueryEngineType::LlmService),
            "qe_integrated_search" => Some(QueryEngineType::IntegratedSearch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorStore {
    #[serde(rename = "matching_engine")]
    MatchingEngine,
    #[default]
    #[serde(rename = "langchain_pgvector")]
    PgVector,
}

impl VectorStore {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStore::MatchingEngine => "matching_engine",
            VectorStore::PgVector => "langchain_pgvector",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VectorStore::MatchingEngine => "Vertex Matching Engine",
            VectorStore::PgVector => "PG Vector",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "matching_engine" => Some(VectorStore::MatchingEngine),
            "langchain_pgvector" => Some(VectorStore::PgVector),
            _ => None,
        }
    }
}

/// User input for a new source, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDraft {
    pub name: String,
    pub description: String,
    pub engine_type: QueryEngineType,
    pub doc_url: String,
    pub embedding_type: String,
    pub vector_store: VectorStore,
    pub depth_limit: u32,
    pub chunk_size: u32,
    pub agents: Vec<String>,
    pub child_engines: Vec<String>,
    pub manifest_url: Option<String>,
    pub is_multimodal: bool,
}

impl Default for SourceDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            engine_type: QueryEngineType::default(),
            doc_url: String::new(),
            embedding_type: "VertexAI-Embedding".to_string(),
            vector_store: VectorStore::default(),
            depth_limit: 0,
            chunk_size: 500,
            agents: Vec::new(),
            child_engines: Vec::new(),
            manifest_url: None,
            is_multimodal: false,
        }
    }
}

impl SourceDraft {
    /// Body for `POST /query/engine`.
    pub fn to_build_body(&self) -> serde_json::Value {
        serde_json::json!({
            "query_engine": self.name.trim(),
            "query_engine_type": self.engine_type.as_str(),
            "doc_url": self.doc_url.trim(),
            "embedding_type": self.embedding_type,
            "vector_store": self.vector_store.as_str(),
            "description": self.description,
            "params": {
                "depth_limit": self.depth_limit,
                "agents": self.agents,
                "associated_engines": self.child_engines,
                "manifest_url": self.manifest_url,
                "chunk_size": self.chunk_size,
                "is_multimodal": if self.is_multimodal { "True" } else { "False" },
            },
        })
    }
}

/// Status of an engine build job. Unknown strings are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Active,
    Succeeded,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => JobStatus::Active,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// The build request recorded on a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryEngineBuild {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub doc_url: Option<String>,
    #[serde(default)]
    pub query_engine: Option<String>,
    #[serde(default)]
    pub query_engine_type: Option<String>,
    #[serde(default)]
    pub llm_type: Option<String>,
    #[serde(default)]
    pub embedding_type: Option<String>,
    #[serde(default)]
    pub vector_store: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEngineBuildJob {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub input_data: Option<QueryEngineBuild>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

impl QueryEngineBuildJob {
    /// Name of the engine this job is building, if recorded.
    pub fn engine_name(&self) -> Option<&str> {
        self.input_data
            .as_ref()
            .and_then(|input| input.query_engine.as_deref())
            .filter(|name| !name.is_empty())
    }
}
