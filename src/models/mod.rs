pub mod chat;
pub mod chat_model;
pub mod engine;
pub mod query;

use chrono::{DateTime, NaiveDateTime, Utc};

pub use chat::{Chat, ChatHistoryEntry, HistorySource, QueryReference};
pub use chat_model::{ChatModel, ModelDetails};
pub use engine::{
    JobStatus, QueryEngine, QueryEngineBuild, QueryEngineBuildJob, QueryEngineType, SourceDraft,
    VectorStore,
};
pub use query::{Query, QueryContents, QueryRequest, QueryResponse, QueryResult};

/// Parse a backend timestamp. The service emits RFC 3339 strings, sometimes
/// without an offset; those are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
