use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, GenieClient};
use crate::models::{JobStatus, QueryEngine, QueryEngineBuildJob, SourceDraft};

pub const DEFAULT_CHAT_SOURCE_ID: &str = "default-chat";
pub const MAX_SOURCE_NAME_LEN: usize = 50;
pub const DEPTH_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 0..=4;
pub const CHUNK_SIZE_RANGE: std::ops::RangeInclusive<u32> = 100..=1000;

const ALLOWED_DOC_URL_PREFIXES: [&str; 3] = ["http://", "https://", "gs://"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all required fields.")]
    MissingName,

    #[error("Name must be at most {max} characters")]
    NameTooLong { max: usize },

    #[error("Please fill in all required fields.")]
    MissingDocUrl,

    #[error("Invalid URL. Must start with https://, http://, or gs://")]
    UnsupportedDocUrl(String),

    #[error("Depth limit {0} is out of range")]
    DepthLimitOutOfRange(u32),

    #[error("Chunk size {0} is out of range")]
    ChunkSizeOutOfRange(u32),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Build job {job_id} still {status} after {polls} checks")]
    TimedOut {
        job_id: String,
        status: String,
        polls: u32,
    },

    #[error("Stopped waiting for build job {0}")]
    Cancelled(String),
}

/// Check a draft before anything is sent to the backend.
pub fn validate_draft(draft: &SourceDraft) -> Result<(), ValidationError> {
    validate_name(&draft.name)?;

    let doc_url = draft.doc_url.trim();
    if doc_url.is_empty() {
        return Err(ValidationError::MissingDocUrl);
    }
    if !ALLOWED_DOC_URL_PREFIXES
        .iter()
        .any(|prefix| doc_url.starts_with(prefix))
    {
        return Err(ValidationError::UnsupportedDocUrl(doc_url.to_string()));
    }

    if !DEPTH_LIMIT_RANGE.contains(&draft.depth_limit) {
        return Err(ValidationError::DepthLimitOutOfRange(draft.depth_limit));
    }
    if !CHUNK_SIZE_RANGE.contains(&draft.chunk_size) {
        return Err(ValidationError::ChunkSizeOutOfRange(draft.chunk_size));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    if name.chars().count() > MAX_SOURCE_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            max: MAX_SOURCE_NAME_LEN,
        });
    }
    Ok(())
}

/// Placeholder source meaning "chat without retrieval".
pub fn default_chat_source() -> QueryEngine {
    let mut params = serde_json::Map::new();
    params.insert(
        "is_multimodal".to_string(),
        serde_json::Value::String("false".to_string()),
    );
    QueryEngine {
        id: DEFAULT_CHAT_SOURCE_ID.to_string(),
        name: "Default Chat".to_string(),
        description: Some("Default chat without specific source".to_string()),
        query_engine_type: Some("default_chat_type".to_string()),
        embedding_type: Some("default".to_string()),
        user_id: Some("default-user".to_string()),
        params: Some(params),
        depth_limit: Some(3),
        chunk_size: Some(1024),
        agents: Some(Vec::new()),
        child_engines: Some(Vec::new()),
        is_multimodal: Some(false),
        ..Default::default()
    }
}

/// Sources a user can pick: the default chat source first, then every engine
/// that is not still being built.
pub fn selectable_sources(
    engines: Vec<QueryEngine>,
    jobs: &[QueryEngineBuildJob],
) -> Vec<QueryEngine> {
    let building: HashSet<&str> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Active)
        .filter_map(|job| job.engine_name())
        .collect();

    std::iter::once(default_chat_source())
        .chain(
            engines
                .into_iter()
                .filter(|engine| !building.contains(engine.name.as_str())),
        )
        .collect()
}

pub async fn load_selectable_sources(client: &GenieClient) -> Result<Vec<QueryEngine>, ApiError> {
    let engines = client.list_engines().await?;
    let jobs = client.list_build_jobs().await?;
    Ok(selectable_sources(engines, &jobs))
}

/// A submitted source build and the engine list as it stood afterwards.
#[derive(Debug, Clone)]
pub struct CreatedSource {
    pub job: QueryEngineBuildJob,
    /// `None` when the refresh failed; the build job was still started.
    pub engines: Option<Vec<QueryEngine>>,
}

/// Validate and submit a new source, then re-read the engine list.
pub async fn create_source(
    client: &GenieClient,
    draft: &SourceDraft,
) -> Result<CreatedSource, SourceError> {
    validate_draft(draft)?;
    let job = client.create_engine(draft).await?;
    tracing::info!("Started build job {} for source {}", job.id, draft.name.trim());

    let engines = match client.list_engines().await {
        Ok(engines) => Some(engines),
        Err(e) => {
            tracing::warn!("Failed to refresh sources after creation: {}", e);
            None
        }
    };
    Ok(CreatedSource { job, engines })
}

pub async fn update_source(
    client: &GenieClient,
    engine_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<QueryEngine, SourceError> {
    validate_name(name)?;
    // Without a new description the stored one is kept.
    let description = match description {
        Some(d) => d.to_string(),
        None => client
            .get_engine(engine_id)
            .await?
            .description
            .unwrap_or_default(),
    };
    let engine = client
        .update_engine(engine_id, name.trim(), &description)
        .await?;
    Ok(engine)
}

pub async fn delete_source(client: &GenieClient, engine_id: &str) -> Result<bool, SourceError> {
    if engine_id == DEFAULT_CHAT_SOURCE_ID {
        return Ok(false);
    }
    let deleted = client.delete_engine(engine_id).await?;
    if !deleted {
        tracing::warn!("Backend declined to delete source {}", engine_id);
    }
    Ok(deleted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_polls: 360,
        }
    }
}

/// Poll a build job until it succeeds or fails.
pub async fn wait_for_build<F>(
    client: &GenieClient,
    job_id: &str,
    settings: PollSettings,
    cancel: CancellationToken,
    mut on_status: F,
) -> Result<QueryEngineBuildJob, SourceError>
where
    F: FnMut(&QueryEngineBuildJob),
{
    let mut last_status = JobStatus::Active;

    for poll in 1..=settings.max_polls {
        let job = client.get_build_job(job_id).await?;
        on_status(&job);
        if job.status.is_terminal() {
            return Ok(job);
        }
        last_status = job.status;

        if poll == settings.max_polls {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled(job_id.to_string()));
            }
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }

    Err(SourceError::TimedOut {
        job_id: job_id.to_string(),
        status: last_status.as_str().to_string(),
        polls: settings.max_polls,
    })
}
