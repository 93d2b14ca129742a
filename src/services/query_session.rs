use uuid::Uuid;

use crate::api::GenieClient;
use crate::models::{Chat, Query, QueryContents, QueryRequest, QueryResponse};
use crate::services::session::{SessionError, SessionState, Ticket, Tickets, NETWORK_ERROR_REPLY};

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub llm_type: String,
    pub chat_mode: bool,
    pub stream: bool,
}

impl QueryOptions {
    pub fn new(llm_type: &str) -> Self {
        Self {
            llm_type: llm_type.to_string(),
            chat_mode: false,
            stream: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub ticket: Ticket,
    pub engine_id: String,
    /// `None` starts a new query against the engine.
    pub query_id: Option<String>,
    pub request: QueryRequest,
}

impl PendingQuery {
    pub fn is_create(&self) -> bool {
        self.query_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum QueryEvent {
    Loaded { ticket: Ticket, query: Query },
    Completed { ticket: Ticket, response: QueryResponse },
    Failed { ticket: Ticket, error: String },
}

impl QueryEvent {
    pub fn ticket(&self) -> Ticket {
        match self {
            QueryEvent::Loaded { ticket, .. }
            | QueryEvent::Completed { ticket, .. }
            | QueryEvent::Failed { ticket, .. } => *ticket,
        }
    }
}

/// A retrieval thread against one engine.
#[derive(Debug)]
pub struct QuerySession {
    engine_id: String,
    query: Query,
    state: SessionState,
    tickets: Tickets,
    promoted: Option<Chat>,
}

impl QuerySession {
    pub fn new(engine_id: &str, llm_type: &str) -> Self {
        Self::with_query(engine_id, Query::new_local(llm_type))
    }

    pub fn for_id(engine_id: &str, query_id: &str) -> Self {
        Self::with_query(
            engine_id,
            Query {
                id: Some(query_id.to_string()),
                ..Default::default()
            },
        )
    }

    fn with_query(engine_id: &str, query: Query) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            query,
            state: SessionState::Idle,
            tickets: Tickets::new(),
            promoted: None,
        }
    }

    pub fn key(&self) -> Uuid {
        self.tickets.key()
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == SessionState::Pending
    }

    /// Chat the backend turned this query into, if any. Taking it leaves `None`.
    pub fn take_promoted_chat(&mut self) -> Option<Chat> {
        self.promoted.take()
    }

    pub fn begin_submit(
        &mut self,
        input: &str,
        options: &QueryOptions,
    ) -> Result<PendingQuery, SessionError> {
        if self.is_pending() {
            return Err(SessionError::Busy);
        }
        let prompt = input.trim();
        if prompt.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        self.query.history.push(QueryContents {
            human_question: Some(prompt.to_string()),
            ..Default::default()
        });
        let ticket = self.tickets.issue();
        self.state = SessionState::Pending;

        Ok(PendingQuery {
            ticket,
            engine_id: self.engine_id.clone(),
            query_id: self.query.id.clone(),
            request: QueryRequest {
                prompt: prompt.to_string(),
                llm_type: options.llm_type.clone(),
                chat_mode: options.chat_mode,
                stream: options.stream,
            },
        })
    }

    pub fn begin_load(&mut self) -> Result<(Ticket, String), SessionError> {
        if self.is_pending() {
            return Err(SessionError::Busy);
        }
        let query_id = self.query.id.clone().ok_or(SessionError::NotPersisted)?;
        let ticket = self.tickets.issue();
        self.state = SessionState::Pending;
        Ok((ticket, query_id))
    }

    /// Apply a result. Returns `false` for events this session no longer waits on.
    pub fn apply(&mut self, event: QueryEvent) -> bool {
        let ticket = event.ticket();
        if !self.tickets.is_current(ticket) {
            tracing::debug!(
                session = %self.key(),
                stale_session = %ticket.session,
                "Discarding stale query event"
            );
            return false;
        }

        match event {
            QueryEvent::Loaded { query, .. } => {
                let held = self.query.id.clone();
                self.query = query;
                if held.is_some() {
                    self.query.id = held;
                }
                self.settle(SessionState::Resolved);
            }
            QueryEvent::Completed { response, .. } => {
                if self.query.id.is_none() {
                    self.query.id = response.user_query_id.clone();
                }
                let answer = response
                    .query_result
                    .as_ref()
                    .map(|r| r.response.clone())
                    .unwrap_or_default();
                self.query.history.push(QueryContents {
                    ai_response: Some(answer),
                    ai_references: response.query_references.clone(),
                    ..Default::default()
                });
                self.query.query_result = response.query_result;
                self.query.query_references = response.query_references;
                if let Some(chat) = response.user_chat {
                    tracing::info!(
                        "Query {:?} continued as chat {:?}",
                        self.query.id,
                        chat.id
                    );
                    self.promoted = Some(chat);
                }
                self.settle(SessionState::Resolved);
            }
            QueryEvent::Failed { error, .. } => {
                tracing::error!("Query request failed: {}", error);
                self.query.history.push(QueryContents {
                    ai_response: Some(format!("{} ({})", NETWORK_ERROR_REPLY, error)),
                    ..Default::default()
                });
                self.settle(SessionState::Failed);
            }
        }
        true
    }

    fn settle(&mut self, state: SessionState) {
        self.tickets.settle();
        self.state = state;
    }

    pub async fn submit(
        &mut self,
        client: &GenieClient,
        input: &str,
        options: &QueryOptions,
    ) -> Result<SessionState, SessionError> {
        let pending = self.begin_submit(input, options)?;
        let event = run_query(client, pending).await;
        self.apply(event);
        Ok(self.state)
    }

    pub async fn load(&mut self, client: &GenieClient) -> Result<SessionState, SessionError> {
        let (ticket, query_id) = self.begin_load()?;
        let event = match client.get_query(&query_id).await {
            Ok(query) => QueryEvent::Loaded { ticket, query },
            Err(e) => QueryEvent::Failed {
                ticket,
                error: e.to_string(),
            },
        };
        self.apply(event);
        Ok(self.state)
    }
}

/// Create or resume a query depending on whether it already has an id.
pub async fn run_query(client: &GenieClient, pending: PendingQuery) -> QueryEvent {
    let PendingQuery {
        ticket,
        engine_id,
        query_id,
        request,
    } = pending;

    let result = match query_id {
        Some(id) => client.resume_query(&id, &request).await,
        None => client.create_query(&engine_id, &request).await,
    };

    match result {
        Ok(response) => QueryEvent::Completed { ticket, response },
        Err(e) => QueryEvent::Failed {
            ticket,
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::mock::MockTransport;
    use crate::api::{ApiError, Method};

    fn setup() -> (Arc<MockTransport>, GenieClient) {
        let mock = Arc::new(MockTransport::new());
        let client = GenieClient::new(mock.clone(), "token");
        (mock, client)
    }

    #[tokio::test]
    async fn test_new_query_posts_to_engine_and_takes_id() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/query/engine/e-1",
            serde_json::json!({"data": {
                "user_query_id": "q-1",
                "query_result": {"response": "Forty two."},
                "query_references": [{"chunk_id": "c", "document_url": "gs://b/doc.pdf"}]
            }}),
        );

        let mut session = QuerySession::new("e-1", "VertexAI-Chat");
        let state = session
            .submit(&client, "meaning?", &QueryOptions::new("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Resolved);
        assert_eq!(session.query_id(), Some("q-1"));
        let history = &session.query().history;
        assert_eq!(history[0].human_question.as_deref(), Some("meaning?"));
        assert_eq!(history[1].ai_response.as_deref(), Some("Forty two."));
        assert_eq!(history[1].ai_references.as_ref().map(Vec::len), Some(1));
        assert!(session.take_promoted_chat().is_none());
    }

    #[tokio::test]
    async fn test_existing_query_resumes() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/query/q-1",
            serde_json::json!({"data": {"user_query_id": "q-other", "query_result": {"response": "ok"}}}),
        );

        let mut session = QuerySession::for_id("e-1", "q-1");
        session
            .submit(&client, "follow up", &QueryOptions::new("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(mock.call_paths(), vec![(Method::Post, "/query/q-1".to_string())]);
        assert_eq!(session.query_id(), Some("q-1"));
        let body = mock.calls()[0].request.body.clone().unwrap();
        assert_eq!(body["sentence_references"], false);
    }

    #[tokio::test]
    async fn test_chat_mode_response_promotes_to_chat() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/query/engine/e-1",
            serde_json::json!({"data": {
                "user_query_id": "q-2",
                "query_result": {"response": "Yes."},
                "user_chat": {"id": "chat-5", "history": [{"HumanInput": "is it?"}, {"AIOutput": "Yes."}]}
            }}),
        );

        let mut session = QuerySession::new("e-1", "VertexAI-Chat");
        let options = QueryOptions {
            chat_mode: true,
            ..QueryOptions::new("VertexAI-Chat")
        };
        session.submit(&client, "is it?", &options).await.unwrap();

        let chat = session.take_promoted_chat().unwrap();
        assert_eq!(chat.id.as_deref(), Some("chat-5"));
        assert!(session.take_promoted_chat().is_none());
        assert_eq!(mock.calls()[0].request.body.clone().unwrap()["chat_mode"], true);
    }

    #[tokio::test]
    async fn test_failure_appends_error_reply() {
        let (mock, client) = setup();
        mock.fail(
            Method::Post,
            "/query/engine/e-1",
            ApiError::Network("connection refused".to_string()),
        );

        let mut session = QuerySession::new("e-1", "VertexAI-Chat");
        let state = session
            .submit(&client, "q", &QueryOptions::new("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Failed);
        assert!(session.query_id().is_none());
        let reply = session.query().history[1].ai_response.as_deref().unwrap();
        assert!(reply.starts_with(NETWORK_ERROR_REPLY));
    }

    #[test]
    fn test_stale_query_event_is_dropped() {
        let mut old = QuerySession::new("e-1", "VertexAI-Chat");
        let pending = old
            .begin_submit("q", &QueryOptions::new("VertexAI-Chat"))
            .unwrap();

        let mut current = QuerySession::new("e-1", "VertexAI-Chat");
        assert!(!current.apply(QueryEvent::Completed {
            ticket: pending.ticket,
            response: QueryResponse::default(),
        }));
        assert!(current.query().history.is_empty());
    }

    #[tokio::test]
    async fn test_load_replaces_history_and_keeps_id() {
        let (mock, client) = setup();
        mock.respond(
            Method::Get,
            "/query/q-1",
            serde_json::json!({"data": {
                "id": "q-other",
                "title": "Leave policy",
                "history": [{"HumanQuestion": "days off?"}, {"AIResponse": "Twenty."}]
            }}),
        );

        let mut session = QuerySession::for_id("e-1", "q-1");
        let state = session.load(&client).await.unwrap();

        assert_eq!(state, SessionState::Resolved);
        assert_eq!(session.query_id(), Some("q-1"));
        assert_eq!(session.query().title.as_deref(), Some("Leave policy"));
        assert_eq!(session.query().history.len(), 2);
        assert_eq!(mock.call_paths(), vec![(Method::Get, "/query/q-1".to_string())]);
    }

    #[tokio::test]
    async fn test_unsaved_query_cannot_load() {
        let (mock, client) = setup();
        let mut session = QuerySession::new("e-1", "VertexAI-Chat");

        assert_eq!(
            session.load(&client).await.unwrap_err(),
            SessionError::NotPersisted
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_load_from_previous_session_is_dropped() {
        let mut old = QuerySession::for_id("e-1", "q-1");
        let (old_ticket, _) = old.begin_load().unwrap();

        let mut current = QuerySession::for_id("e-1", "q-2");
        let (ticket, query_id) = current.begin_load().unwrap();
        assert_eq!(query_id, "q-2");

        let stale = Query {
            id: Some("q-1".to_string()),
            history: vec![QueryContents {
                human_question: Some("old".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(!current.apply(QueryEvent::Loaded {
            ticket: old_ticket,
            query: stale,
        }));
        assert!(current.is_pending());
        assert!(current.query().history.is_empty());

        assert!(current.apply(QueryEvent::Loaded {
            ticket,
            query: Query::default(),
        }));
        assert_eq!(current.state(), SessionState::Resolved);
        assert_eq!(current.query_id(), Some("q-2"));
    }

    #[test]
    fn test_busy_while_pending() {
        let mut session = QuerySession::new("e-1", "VertexAI-Chat");
        let options = QueryOptions::new("VertexAI-Chat");
        session.begin_submit("one", &options).unwrap();
        assert_eq!(
            session.begin_submit("two", &options).unwrap_err(),
            SessionError::Busy
        );
    }
}
