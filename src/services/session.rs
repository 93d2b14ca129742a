use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::api::{FileUpload, GenerateRequest, GenieClient};
use crate::models::{Chat, ChatHistoryEntry};
use crate::services::sources::DEFAULT_CHAT_SOURCE_ID;
use crate::services::stream::{append_to_last_entry, consume_stream};

/// Shown in place of an answer when a request fails.
pub const NETWORK_ERROR_REPLY: &str =
    "I'm sorry, the request could not be completed. A network error was detected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pending,
    Resolved,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A response is still pending for this conversation")]
    Busy,

    #[error("Message is empty")]
    EmptyInput,

    #[error("Conversation has not been saved yet")]
    NotPersisted,
}

/// Identifies one in-flight request of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub session: Uuid,
    pub seq: u64,
}

/// Hands out tickets for a session and remembers the outstanding one.
#[derive(Debug)]
pub(crate) struct Tickets {
    key: Uuid,
    next_seq: u64,
    in_flight: Option<Ticket>,
}

impl Tickets {
    pub(crate) fn new() -> Self {
        Self {
            key: Uuid::new_v4(),
            next_seq: 0,
            in_flight: None,
        }
    }

    pub(crate) fn key(&self) -> Uuid {
        self.key
    }

    pub(crate) fn issue(&mut self) -> Ticket {
        self.next_seq += 1;
        let ticket = Ticket {
            session: self.key,
            seq: self.next_seq,
        };
        self.in_flight = Some(ticket);
        ticket
    }

    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        self.in_flight == Some(ticket)
    }

    pub(crate) fn settle(&mut self) {
        self.in_flight = None;
    }
}

/// Per-submission settings besides the prompt itself.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub llm_type: String,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub tool_names: Vec<String>,
    pub query_engine_id: Option<String>,
    pub query_filter: Option<Value>,
    pub file: Option<FileUpload>,
    pub file_url: Option<String>,
}

impl GenerateOptions {
    pub fn new(llm_type: &str) -> Self {
        Self {
            llm_type: llm_type.to_string(),
            stream: true,
            ..Default::default()
        }
    }

    fn to_request(&self, prompt: &str) -> GenerateRequest {
        // The default chat source means "no retrieval".
        let query_engine_id = self
            .query_engine_id
            .clone()
            .filter(|id| !id.is_empty() && id != DEFAULT_CHAT_SOURCE_ID);

        GenerateRequest {
            prompt: prompt.to_string(),
            llm_type: self.llm_type.clone(),
            stream: self.stream,
            file: self.file.clone(),
            file_url: self.file_url.clone(),
            tool_names: self.tool_names.clone(),
            history: None,
            temperature: self.temperature,
            query_engine_id,
            query_filter: self.query_filter.clone(),
        }
    }
}

/// Work to perform for a submission, produced by [`ChatSession::begin_submit`].
#[derive(Debug, Clone)]
pub struct PendingGenerate {
    pub ticket: Ticket,
    /// `None` means the chat has to be created first.
    pub chat_id: Option<String>,
    pub request: GenerateRequest,
}

impl PendingGenerate {
    pub fn is_create(&self) -> bool {
        self.chat_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PendingLoad {
    pub ticket: Ticket,
    pub chat_id: String,
}

/// Results of background work, fed back through [`ChatSession::apply`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Loaded {
        ticket: Ticket,
        chat: Chat,
    },
    Token {
        ticket: Ticket,
        text: String,
    },
    Completed {
        ticket: Ticket,
        chat_id: String,
        /// Full chat from a non-streaming call; `None` after a stream.
        chat: Option<Chat>,
    },
    Failed {
        ticket: Ticket,
        error: String,
    },
}

impl SessionEvent {
    pub fn ticket(&self) -> Ticket {
        match self {
            SessionEvent::Loaded { ticket, .. }
            | SessionEvent::Token { ticket, .. }
            | SessionEvent::Completed { ticket, .. }
            | SessionEvent::Failed { ticket, .. } => *ticket,
        }
    }
}

/// The chat currently on screen and the state of its outstanding request.
#[derive(Debug)]
pub struct ChatSession {
    chat: Chat,
    state: SessionState,
    tickets: Tickets,
}

impl ChatSession {
    pub fn new(chat: Chat) -> Self {
        Self {
            chat,
            state: SessionState::Idle,
            tickets: Tickets::new(),
        }
    }

    pub fn new_local(llm_type: &str) -> Self {
        Self::new(Chat::new_local(llm_type))
    }

    /// Session for a stored chat whose contents still need loading.
    pub fn for_id(chat_id: &str) -> Self {
        Self::new(Chat {
            id: Some(chat_id.to_string()),
            ..Default::default()
        })
    }

    pub fn key(&self) -> Uuid {
        self.tickets.key()
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == SessionState::Pending
    }

    /// Record the user's turn and decide between the create and resume paths.
    pub fn begin_submit(
        &mut self,
        input: &str,
        options: &GenerateOptions,
    ) -> Result<PendingGenerate, SessionError> {
        if self.is_pending() {
            return Err(SessionError::Busy);
        }
        let prompt = input.trim();
        if prompt.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let request = options.to_request(prompt);

        let mut entry = ChatHistoryEntry::human(prompt);
        entry.uploaded_file = options.file.as_ref().map(|f| f.name.clone());
        entry.file_url = options.file_url.clone().filter(|u| !u.is_empty());
        self.chat.history.push(entry);

        let ticket = self.tickets.issue();
        self.state = SessionState::Pending;

        Ok(PendingGenerate {
            ticket,
            chat_id: self.chat.id.clone(),
            request,
        })
    }

    pub fn begin_load(&mut self) -> Result<PendingLoad, SessionError> {
        if self.is_pending() {
            return Err(SessionError::Busy);
        }
        let chat_id = self.chat.id.clone().ok_or(SessionError::NotPersisted)?;
        let ticket = self.tickets.issue();
        self.state = SessionState::Pending;
        Ok(PendingLoad { ticket, chat_id })
    }

    /// Apply a result. Returns `false` when the event belongs to a request
    /// this session no longer waits on.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        let ticket = event.ticket();
        if !self.tickets.is_current(ticket) {
            tracing::debug!(
                session = %self.key(),
                stale_session = %ticket.session,
                seq = ticket.seq,
                "Discarding stale chat event"
            );
            return false;
        }

        match event {
            SessionEvent::Token { text, .. } => {
                append_to_last_entry(&mut self.chat.history, &text);
            }
            SessionEvent::Loaded { chat, .. } => {
                let held = self.chat.id.clone();
                self.chat = chat;
                if let Some(id) = held {
                    if self.chat.id.as_deref() != Some(id.as_str()) {
                        tracing::warn!("Loaded chat {:?} into session for {}", self.chat.id, id);
                    }
                    self.chat.id = Some(id);
                }
                self.settle(SessionState::Resolved);
            }
            SessionEvent::Completed { chat_id, chat, .. } => {
                match self.chat.id.clone() {
                    None => self.chat.id = Some(chat_id),
                    Some(existing) if existing != chat_id => {
                        tracing::warn!(
                            "Server answered for chat {} while session holds {}; keeping {}",
                            chat_id,
                            existing,
                            existing
                        );
                    }
                    Some(_) => {}
                }
                if let Some(server_chat) = chat {
                    let id = self.chat.id.clone();
                    self.chat = server_chat;
                    self.chat.id = id;
                }
                self.settle(SessionState::Resolved);
            }
            SessionEvent::Failed { error, .. } => {
                tracing::error!("Chat request failed: {}", error);
                self.chat
                    .history
                    .push(ChatHistoryEntry::ai(&format!("{} ({})", NETWORK_ERROR_REPLY, error)));
                self.settle(SessionState::Failed);
            }
        }
        true
    }

    fn settle(&mut self, state: SessionState) {
        self.tickets.settle();
        self.state = state;
    }

    /// Submit and wait for the result, applying events as they arrive.
    pub async fn submit(
        &mut self,
        client: &GenieClient,
        input: &str,
        options: &GenerateOptions,
    ) -> Result<SessionState, SessionError> {
        let pending = self.begin_submit(input, options)?;
        run_generate(client, pending, |event| self.apply(event)).await;
        Ok(self.state)
    }

    pub async fn load(&mut self, client: &GenieClient) -> Result<SessionState, SessionError> {
        let pending = self.begin_load()?;
        let event = run_load(client, pending).await;
        self.apply(event);
        Ok(self.state)
    }
}

/// Perform the network side of a submission.
///
/// `on_event` receives every event in order and returns `false` to abandon a
/// stream whose session is no longer interested.
pub async fn run_generate<F>(client: &GenieClient, pending: PendingGenerate, mut on_event: F)
where
    F: FnMut(SessionEvent) -> bool,
{
    let PendingGenerate {
        ticket,
        chat_id,
        request,
    } = pending;

    let chat_id = match chat_id {
        Some(id) => id,
        None => match client.create_empty_chat().await {
            Ok(Chat { id: Some(id), .. }) => id,
            Ok(_) => {
                on_event(SessionEvent::Failed {
                    ticket,
                    error: "Failed to create an empty chat".to_string(),
                });
                return;
            }
            Err(e) => {
                on_event(SessionEvent::Failed {
                    ticket,
                    error: e.to_string(),
                });
                return;
            }
        },
    };

    if !request.stream {
        let event = match client.generate(&chat_id, &request).await {
            Ok(chat) => SessionEvent::Completed {
                ticket,
                chat_id,
                chat: Some(chat),
            },
            Err(e) => SessionEvent::Failed {
                ticket,
                error: e.to_string(),
            },
        };
        on_event(event);
        return;
    }

    let stream = match client.generate_stream(&chat_id, &request).await {
        Ok(stream) => stream,
        Err(e) => {
            on_event(SessionEvent::Failed {
                ticket,
                error: e.to_string(),
            });
            return;
        }
    };

    let result = consume_stream(stream, |text| {
        on_event(SessionEvent::Token {
            ticket,
            text: text.to_string(),
        })
    })
    .await;

    match result {
        Ok(outcome) if outcome.completed => {
            on_event(SessionEvent::Completed {
                ticket,
                chat_id,
                chat: None,
            });
        }
        Ok(_) => {
            tracing::debug!("Stream for chat {} abandoned", chat_id);
        }
        Err(e) => {
            on_event(SessionEvent::Failed {
                ticket,
                error: e.to_string(),
            });
        }
    }
}

pub async fn run_load(client: &GenieClient, pending: PendingLoad) -> SessionEvent {
    match client.get_chat(&pending.chat_id).await {
        Ok(chat) => SessionEvent::Loaded {
            ticket: pending.ticket,
            chat,
        },
        Err(e) => SessionEvent::Failed {
            ticket: pending.ticket,
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

    fn blocking(llm: &str) -> GenerateOptions {
        GenerateOptions {
            stream: false,
            ..GenerateOptions::new(llm)
        }
    }

    fn server_chat(id: &str, answer: &str) -> serde_json::Value {
        serde_json::json!({"data": {
            "id": id,
            "title": "Budget",
            "history": [{"HumanInput": "q"}, {"AIOutput": answer}]
        }})
    }

    #[tokio::test]
    async fn test_pending_local_chat_creates_then_generates() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/chat/empty_chat",
            serde_json::json!({"data": {"id": "new-1", "history": []}}),
        );
        mock.respond(Method::Post, "/chat/new-1/generate", server_chat("new-1", "hi"));

        let mut session = ChatSession::new_local("VertexAI-Chat");
        let state = session
            .submit(&client, "q", &blocking("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Resolved);
        assert_eq!(session.chat_id(), Some("new-1"));
        assert_eq!(
            mock.call_paths(),
            vec![
                (Method::Post, "/chat/empty_chat".to_string()),
                (Method::Post, "/chat/new-1/generate".to_string()),
            ]
        );
        assert_eq!(session.chat().history[1].ai_output.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_existing_chat_resumes_without_create() {
        let (mock, client) = setup();
        mock.respond(Method::Post, "/chat/c-1/generate", server_chat("c-1", "again"));

        let mut session = ChatSession::for_id("c-1");
        let pending = session
            .begin_submit("q", &blocking("VertexAI-Chat"))
            .unwrap();
        assert!(!pending.is_create());

        run_generate(&client, pending, |e| session.apply(e)).await;

        assert_eq!(session.state(), SessionState::Resolved);
        assert_eq!(
            mock.call_paths(),
            vec![(Method::Post, "/chat/c-1/generate".to_string())]
        );
    }

    #[tokio::test]
    async fn test_streaming_create_accumulates_tokens() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/chat/empty_chat",
            serde_json::json!({"data": {"id": "s-1"}}),
        );
        mock.stream(
            Method::Post,
            "/chat/s-1/generate",
            vec![Ok(b"The answer".to_vec()), Ok(b" is 42.".to_vec())],
        );

        let mut session = ChatSession::new_local("VertexAI-Chat");
        let mut token_count = 0;
        let pending = session
            .begin_submit("  what is it?  ", &GenerateOptions::new("VertexAI-Chat"))
            .unwrap();
        assert!(pending.is_create());
        assert!(pending.request.stream);

        run_generate(&client, pending, |event| {
            if matches!(event, SessionEvent::Token { .. }) {
                token_count += 1;
            }
            session.apply(event)
        })
        .await;

        assert_eq!(token_count, 2);
        assert_eq!(session.chat_id(), Some("s-1"));
        let history = &session.chat().history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].human_input.as_deref(), Some("what is it?"));
        assert_eq!(history[0].ai_output.as_deref(), Some("The answer is 42."));

        let body = mock.calls()[1].request.body.clone().unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["prompt"], "what is it?");
    }

    #[tokio::test]
    async fn test_failed_create_path_keeps_chat_unsaved() {
        let (mock, client) = setup();
        mock.respond(
            Method::Post,
            "/chat/empty_chat",
            serde_json::json!({"data": {"id": "orphan"}}),
        );
        mock.fail(
            Method::Post,
            "/chat/orphan/generate",
            ApiError::Server {
                status: 500,
                message: "model unavailable".to_string(),
            },
        );

        let mut session = ChatSession::new_local("VertexAI-Chat");
        let state = session
            .submit(&client, "hello", &blocking("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Failed);
        assert!(session.chat().is_pending_local());
        let last = session.chat().history.last().unwrap();
        let text = last.ai_output.as_deref().unwrap();
        assert!(text.starts_with(NETWORK_ERROR_REPLY));
        assert!(text.contains("model unavailable"));

        // The next attempt goes through create again.
        let pending = session
            .begin_submit("hello again", &blocking("VertexAI-Chat"))
            .unwrap();
        assert!(pending.is_create());
    }

    #[tokio::test]
    async fn test_stream_error_marks_failed_and_keeps_partial_text() {
        let (mock, client) = setup();
        mock.stream(
            Method::Post,
            "/chat/c-1/generate",
            vec![
                Ok(b"Part".to_vec()),
                Err(ApiError::StreamRead("connection reset".to_string())),
            ],
        );

        let mut session = ChatSession::for_id("c-1");
        session
            .submit(&client, "q", &GenerateOptions::new("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Failed);
        let history = &session.chat().history;
        assert_eq!(history[0].ai_output.as_deref(), Some("Part"));
        assert!(history[1]
            .ai_output
            .as_deref()
            .unwrap()
            .contains("connection reset"));
        assert_eq!(session.chat_id(), Some("c-1"));
    }

    #[test]
    fn test_second_submit_while_pending_is_rejected() {
        let mut session = ChatSession::for_id("c-1");
        let options = GenerateOptions::new("VertexAI-Chat");
        session.begin_submit("first", &options).unwrap();

        assert_eq!(
            session.begin_submit("second", &options).unwrap_err(),
            SessionError::Busy
        );
        assert_eq!(session.chat().history.len(), 1);
        assert!(session.is_pending());
    }

    #[test]
    fn test_blank_input_rejected_before_any_request() {
        let mut session = ChatSession::new_local("VertexAI-Chat");
        assert_eq!(
            session
                .begin_submit("   ", &GenerateOptions::new("VertexAI-Chat"))
                .unwrap_err(),
            SessionError::EmptyInput
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.chat().history.is_empty());
    }

    #[test]
    fn test_event_for_other_session_is_discarded() {
        let mut a = ChatSession::for_id("a");
        let pending = a
            .begin_submit("for a", &GenerateOptions::new("VertexAI-Chat"))
            .unwrap();

        let mut b = ChatSession::new(Chat {
            id: Some("b".to_string()),
            history: vec![ChatHistoryEntry::human("b history")],
            ..Default::default()
        });
        let before = b.chat().clone();

        let applied = b.apply(SessionEvent::Completed {
            ticket: pending.ticket,
            chat_id: "a".to_string(),
            chat: Some(Chat {
                id: Some("a".to_string()),
                history: vec![ChatHistoryEntry::ai("a answer")],
                ..Default::default()
            }),
        });
        assert!(!applied);
        assert_eq!(b.chat(), &before);
        assert_eq!(b.state(), SessionState::Idle);

        let token = b.apply(SessionEvent::Token {
            ticket: pending.ticket,
            text: "leak".to_string(),
        });
        assert!(!token);
        assert_eq!(b.chat(), &before);
    }

    #[test]
    fn test_assigned_id_is_never_replaced() {
        let mut session = ChatSession::for_id("c-1");
        let pending = session
            .begin_submit("q", &GenerateOptions::new("VertexAI-Chat"))
            .unwrap();

        session.apply(SessionEvent::Completed {
            ticket: pending.ticket,
            chat_id: "c-2".to_string(),
            chat: Some(Chat {
                id: Some("c-2".to_string()),
                ..Default::default()
            }),
        });
        assert_eq!(session.chat_id(), Some("c-1"));
    }

    #[test]
    fn test_default_source_is_not_sent_as_engine() {
        let mut options = GenerateOptions::new("VertexAI-Chat");
        options.query_engine_id = Some(DEFAULT_CHAT_SOURCE_ID.to_string());
        assert!(options.to_request("q").query_engine_id.is_none());

        options.query_engine_id = Some("engine-1".to_string());
        assert_eq!(
            options.to_request("q").query_engine_id.as_deref(),
            Some("engine-1")
        );
    }

    #[tokio::test]
    async fn test_load_replaces_placeholder() {
        let (mock, client) = setup();
        mock.respond(Method::Get, "/chat/c-9", server_chat("c-9", "stored"));

        let mut session = ChatSession::for_id("c-9");
        let state = session.load(&client).await.unwrap();

        assert_eq!(state, SessionState::Resolved);
        assert_eq!(session.chat().display_title(), "Budget");
        assert_eq!(session.chat().history.len(), 2);
    }

    #[tokio::test]
    async fn test_load_keeps_held_id() {
        let (mock, client) = setup();
        mock.respond(Method::Get, "/chat/c-9", server_chat("c-other", "stored"));

        let mut session = ChatSession::for_id("c-9");
        session.load(&client).await.unwrap();

        assert_eq!(session.chat_id(), Some("c-9"));
        assert_eq!(session.chat().history.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_that_fails_to_open_marks_failed() {
        let (mock, client) = setup();
        mock.fail_stream(
            Method::Post,
            "/chat/c-1/generate",
            ApiError::Server {
                status: 503,
                message: "overloaded".to_string(),
            },
        );

        let mut session = ChatSession::for_id("c-1");
        let state = session
            .submit(&client, "q", &GenerateOptions::new("VertexAI-Chat"))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Failed);
        let history = &session.chat().history;
        assert_eq!(history.len(), 2);
        assert!(history[1].ai_output.as_deref().unwrap().contains("overloaded"));
    }

    #[test]
    fn test_load_requires_saved_chat() {
        let mut session = ChatSession::new_local("VertexAI-Chat");
        assert_eq!(session.begin_load().unwrap_err(), SessionError::NotPersisted);
    }
}
