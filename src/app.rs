use crate::api::{ApiError, GenieClient};
use crate::models::Chat;
use crate::services::session::{
    run_load, ChatSession, GenerateOptions, PendingGenerate, PendingLoad, SessionError,
    SessionEvent,
};

/// The one screen that is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Welcome,
    Chat,
    SourcesList,
    AddSource,
    EditSource { source_id: String },
}

impl View {
    pub fn name(&self) -> &'static str {
        match self {
            View::Welcome => "welcome",
            View::Chat => "chat",
            View::SourcesList => "sources",
            View::AddSource => "add-source",
            View::EditSource { .. } => "edit-source",
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppMsg {
    ShowWelcome,
    SelectChat(String),
    NewChat,
    StartChat,
    NewChatFromHeader,
    ShowSources,
    AddSource,
    EditSource(String),
    CancelSourceForm,
    SourceSaved,
    ResumeLatest,
}

/// Background work requested by [`App::update`].
#[derive(Debug, Clone)]
pub enum AppCmd {
    LoadChat(PendingLoad),
    FetchLatest { nav: u64 },
}

#[derive(Debug, Clone)]
pub enum AppCmdOutput {
    Session(SessionEvent),
    Latest {
        nav: u64,
        result: Result<Option<Chat>, ApiError>,
    },
}

pub struct App {
    model: String,
    view: View,
    session: Option<ChatSession>,
    // Bumped by every navigation; late results from older navigations are dropped.
    nav: u64,
}

impl App {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            view: View::Welcome,
            session: None,
            nav: 0,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    pub fn editing_source(&self) -> Option<&str> {
        match &self.view {
            View::EditSource { source_id } => Some(source_id),
            _ => None,
        }
    }

    pub fn update(&mut self, msg: AppMsg) -> Option<AppCmd> {
        self.nav += 1;
        tracing::debug!("{:?} from {} view", msg, self.view.name());

        match msg {
            AppMsg::ShowWelcome => {
                self.session = None;
                self.view = View::Welcome;
                None
            }
            AppMsg::SelectChat(chat_id) => {
                let mut session = ChatSession::for_id(&chat_id);
                let cmd = match session.begin_load() {
                    Ok(pending) => Some(AppCmd::LoadChat(pending)),
                    Err(e) => {
                        tracing::error!("Failed to load chat {}: {}", chat_id, e);
                        None
                    }
                };
                self.session = Some(session);
                self.view = View::Chat;
                cmd
            }
            AppMsg::NewChat | AppMsg::StartChat => {
                self.session = Some(ChatSession::new_local(&self.model));
                self.view = View::Chat;
                None
            }
            AppMsg::NewChatFromHeader => {
                self.session = Some(ChatSession::new_local(&self.model));
                self.view = View::Welcome;
                None
            }
            AppMsg::ShowSources | AppMsg::CancelSourceForm | AppMsg::SourceSaved => {
                self.view = View::SourcesList;
                None
            }
            AppMsg::AddSource => {
                self.session = None;
                self.view = View::AddSource;
                None
            }
            AppMsg::EditSource(source_id) => {
                self.session = None;
                self.view = View::EditSource { source_id };
                None
            }
            AppMsg::ResumeLatest => Some(AppCmd::FetchLatest { nav: self.nav }),
        }
    }

    /// Start a submission on the displayed chat, opening a fresh one if needed.
    pub fn begin_submit(
        &mut self,
        input: &str,
        options: &GenerateOptions,
    ) -> Result<PendingGenerate, SessionError> {
        let model = self.model.clone();
        let session = self
            .session
            .get_or_insert_with(|| ChatSession::new_local(&model));
        let pending = session.begin_submit(input, options)?;
        self.view = View::Chat;
        Ok(pending)
    }

    /// Route a session event to the displayed chat. Returns `false` when the
    /// event was dropped because its session is gone.
    pub fn apply_event(&mut self, event: SessionEvent) -> bool {
        match self.session.as_mut() {
            Some(session) if session.key() == event.ticket().session => session.apply(event),
            _ => {
                tracing::debug!("Dropping event for a chat that is no longer shown");
                false
            }
        }
    }

    pub fn update_cmd(&mut self, output: AppCmdOutput) {
        match output {
            AppCmdOutput::Session(event) => {
                self.apply_event(event);
            }
            AppCmdOutput::Latest { nav, result } => {
                if nav != self.nav {
                    tracing::debug!("Ignoring latest chat from an earlier navigation");
                    return;
                }
                match result {
                    Ok(Some(chat)) => {
                        self.session = Some(ChatSession::new(chat));
                        self.view = View::Chat;
                    }
                    Ok(None) => {
                        self.session = None;
                        self.view = View::Welcome;
                    }
                    Err(e) => {
                        tracing::error!("Failed to fetch latest chat: {}", e);
                        self.view = View::Welcome;
                    }
                }
            }
        }
    }
}

pub async fn run_command(client: &GenieClient, cmd: AppCmd) -> AppCmdOutput {
    match cmd {
        AppCmd::LoadChat(pending) => AppCmdOutput::Session(run_load(client, pending).await),
        AppCmd::FetchLatest { nav } => AppCmdOutput::Latest {
            nav,
            result: client.latest_chat().await,
        },
    }
}
