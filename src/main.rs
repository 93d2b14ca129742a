use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use genie::api::client::DEFAULT_PAGE_LIMIT;
use genie::api::{ApiError, FileUpload, GenieClient, HttpTransport};
use genie::app::{self, App, AppMsg, View};
use genie::config::{self, Config};
use genie::models::{Chat, QueryEngineType, QueryReference, SourceDraft, VectorStore};
use genie::services::session::{run_generate, ChatSession, GenerateOptions, SessionEvent};
use genie::services::sources::{self, SourceError};
use genie::services::{QueryOptions, QuerySession, SessionState};

/// Command line client for GENIE chats, queries and sources.
#[derive(Parser)]
#[command(name = "genie", version)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to `./genie.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List chats, newest first.
    Chats {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },

    /// Print one chat with its history.
    Show { chat_id: String },

    /// Print the most recently modified chat.
    Latest,

    /// Send a prompt, starting a new chat unless `--chat-id` is given.
    Chat {
        #[arg(long)]
        chat_id: Option<String>,
        /// Chat model id. Defaults to `chat.model` from the config.
        #[arg(long)]
        model: Option<String>,
        /// Query engine to ground the answer in.
        #[arg(long)]
        source: Option<String>,
        /// Local file to upload with the prompt.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Remote file (http(s) or gs://) to attach instead of uploading.
        #[arg(long, conflicts_with = "file")]
        file_url: Option<String>,
        #[arg(long)]
        no_stream: bool,
        prompt: String,
    },

    /// Ask the backend to generate a title for a chat.
    Summary { chat_id: String },

    /// Rename a chat.
    Rename { chat_id: String, title: String },

    /// Ask a question against a query engine.
    Query {
        #[arg(long)]
        engine: String,
        /// Continue an existing query thread.
        #[arg(long)]
        query_id: Option<String>,
        /// Let the backend continue the thread as a chat.
        #[arg(long)]
        chat_mode: bool,
        #[arg(long)]
        model: Option<String>,
        prompt: String,
    },

    /// List the current user's queries.
    Queries,

    /// Manage query engines ("sources").
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// List chat or embedding models.
    Models {
        #[arg(long)]
        embedding: bool,
        #[arg(long)]
        multimodal: Option<bool>,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// List all engines.
    List,

    /// List the sources a chat can use.
    Selectable,

    /// Start building a new engine.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        doc_url: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "qe_llm_service")]
        engine_type: String,
        #[arg(long, default_value = "langchain_pgvector")]
        vector_store: String,
        #[arg(long, default_value = "VertexAI-Embedding")]
        embedding: String,
        #[arg(long, default_value_t = 0)]
        depth: u32,
        #[arg(long, default_value_t = 500)]
        chunk_size: u32,
        #[arg(long)]
        multimodal: bool,
        /// Engine ids to associate with an integrated search engine.
        #[arg(long = "child-engine")]
        child_engines: Vec<String>,
        /// Poll the build job until it finishes.
        #[arg(long)]
        wait: bool,
    },

    /// Change an engine's name or description.
    Edit {
        engine_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete an engine.
    Delete { engine_id: String },

    /// List engine build jobs.
    Jobs,

    /// Wait for a build job to finish.
    Wait { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = run(Cli::parse()).await;
    if let Err(e) = &result {
        if is_unauthorized(e) {
            eprintln!(
                "The backend rejected the token. Check api.token or {}.",
                config::ENV_TOKEN
            );
        }
    }
    result
}

fn is_unauthorized(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return api.is_unauthorized();
        }
        matches!(
            cause.downcast_ref::<SourceError>(),
            Some(SourceError::Api(api)) if api.is_unauthorized()
        )
    })
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;
    let transport = HttpTransport::new(
        &config.api.endpoint,
        &config.api.jobs_endpoint,
        config.timeout(),
    )?;
    let client = GenieClient::new(Arc::new(transport), config.api.token.clone());

    match cli.command {
        Commands::Chats { skip, limit } => {
            let mut chats = client.list_chats(skip, limit).await?;
            chats.sort_by_key(|c| std::cmp::Reverse(c.last_modified()));
            for chat in &chats {
                println!(
                    "{}\t{}\t{}",
                    chat.id.as_deref().unwrap_or("-"),
                    chat.last_modified_time.as_deref().unwrap_or("-"),
                    chat.display_title()
                );
            }
        }
        Commands::Show { chat_id } => {
            let chat = client
                .get_chat(&chat_id)
                .await
                .with_context(|| format!("Failed to load chat {}", chat_id))?;
            print_chat(&chat);
        }
        Commands::Latest => {
            let mut app = App::new(&config.chat.model);
            if let Some(cmd) = app.update(AppMsg::ResumeLatest) {
                let output = app::run_command(&client, cmd).await;
                app.update_cmd(output);
            }
            match (app.view(), app.session()) {
                (View::Chat, Some(session)) => print_chat(session.chat()),
                _ => println!("No chats yet."),
            }
        }
        Commands::Chat {
            chat_id,
            model,
            source,
            file,
            file_url,
            no_stream,
            prompt,
        } => {
            let model = model.unwrap_or_else(|| config.chat.model.clone());
            let mut options = GenerateOptions::new(&model);
            options.stream = config.chat.stream && !no_stream;
            options.temperature = config.chat.temperature;
            options.query_engine_id = source;
            options.file_url = file_url;
            if let Some(path) = file {
                let upload = FileUpload::from_path(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                options.file = Some(upload);
            }
            send_chat(&client, chat_id, &prompt, &options).await?;
        }
        Commands::Summary { chat_id } => {
            let chat = client.generate_summary(&chat_id).await?;
            println!("{}", chat.display_title());
        }
        Commands::Rename { chat_id, title } => {
            let chat = client.update_chat(&chat_id, Some(&title), None).await?;
            println!("{}", chat.display_title());
        }
        Commands::Query {
            engine,
            query_id,
            chat_mode,
            model,
            prompt,
        } => {
            let model = model.unwrap_or_else(|| config.chat.model.clone());
            let mut session = match query_id {
                Some(id) => QuerySession::for_id(&engine, &id),
                None => QuerySession::new(&engine, &model),
            };
            let options = QueryOptions {
                chat_mode,
                ..QueryOptions::new(&model)
            };
            let state = session.submit(&client, &prompt, &options).await?;
            print_query_answer(&session);
            if let Some(chat) = session.take_promoted_chat() {
                eprintln!("chat: {}", chat.id.as_deref().unwrap_or("-"));
            }
            if state == SessionState::Failed {
                bail!("Query failed");
            }
        }
        Commands::Queries => {
            for query in client.list_queries(0, DEFAULT_PAGE_LIMIT).await? {
                println!(
                    "{}\t{}",
                    query.id.as_deref().unwrap_or("-"),
                    query.title.as_deref().or(query.prompt.as_deref()).unwrap_or("")
                );
            }
        }
        Commands::Sources { action } => run_sources(&client, &config, action).await?,
        Commands::Models {
            embedding,
            multimodal,
        } => {
            let models = if embedding {
                client.list_embedding_models(multimodal).await?
            } else {
                client.list_chat_models(multimodal).await?
            };
            for model in models {
                let mut flags = Vec::new();
                if model.is_new {
                    flags.push("new");
                }
                if model.is_multimodal {
                    flags.push("multimodal");
                }
                println!("{}\t{}\t{}", model.id, model.name, flags.join(","));
            }
        }
    }

    Ok(())
}

async fn send_chat(
    client: &GenieClient,
    chat_id: Option<String>,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<()> {
    let mut session = match chat_id {
        Some(id) => {
            let mut session = ChatSession::for_id(&id);
            if session.load(client).await? == SessionState::Failed {
                bail!("Failed to load chat {}", id);
            }
            session
        }
        None => ChatSession::new_local(&options.llm_type),
    };

    let streaming = options.stream;
    let pending = session.begin_submit(prompt, options)?;
    let mut stdout = std::io::stdout();
    let mut write_error = None;

    run_generate(client, pending, |event| {
        if let SessionEvent::Token { text, .. } = &event {
            if let Err(e) = write!(stdout, "{}", text).and_then(|_| stdout.flush()) {
                write_error = Some(e);
                return false;
            }
        }
        session.apply(event)
    })
    .await;

    if let Some(e) = write_error {
        return Err(e).context("Failed to write the answer to stdout");
    }

    let answer = session
        .chat()
        .history
        .last()
        .and_then(|entry| entry.ai_output.clone())
        .unwrap_or_default();
    match session.state() {
        SessionState::Failed => {
            if streaming {
                println!();
            }
            bail!("{}", answer);
        }
        _ if streaming => println!(),
        _ => println!("{}", answer),
    }

    if let Some(id) = session.chat_id() {
        eprintln!("chat: {}", id);
    }
    Ok(())
}

async fn run_sources(client: &GenieClient, config: &Config, action: SourceAction) -> Result<()> {
    match action {
        SourceAction::List => {
            for engine in client.list_engines().await? {
                println!(
                    "{}\t{}\t{}",
                    engine.id,
                    engine.name,
                    engine.type_display_name()
                );
            }
        }
        SourceAction::Selectable => {
            for engine in sources::load_selectable_sources(client).await? {
                println!("{}\t{}", engine.id, engine.name);
            }
        }
        SourceAction::Add {
            name,
            doc_url,
            description,
            engine_type,
            vector_store,
            embedding,
            depth,
            chunk_size,
            multimodal,
            child_engines,
            wait,
        } => {
            let Some(engine_type) = QueryEngineType::from_str(&engine_type) else {
                bail!("Unknown engine type: '{}'", engine_type);
            };
            let Some(vector_store) = VectorStore::from_str(&vector_store) else {
                bail!("Unknown vector store: '{}'", vector_store);
            };
            let draft = SourceDraft {
                name,
                description,
                engine_type,
                doc_url,
                embedding_type: embedding,
                vector_store,
                depth_limit: depth,
                chunk_size,
                child_engines,
                is_multimodal: multimodal,
                ..Default::default()
            };

            let sources::CreatedSource { job, engines } =
                sources::create_source(client, &draft).await?;
            println!("{}\t{}", job.id, job.status.as_str());
            if let Some(engines) = engines {
                eprintln!("{} sources:", engines.len());
                for engine in &engines {
                    eprintln!("  {}\t{}", engine.id, engine.name);
                }
            }
            if wait {
                wait_for_job(client, config, &job.id).await?;
            }
        }
        SourceAction::Edit {
            engine_id,
            name,
            description,
        } => {
            let engine =
                sources::update_source(client, &engine_id, &name, description.as_deref()).await?;
            println!("{}\t{}", engine.id, engine.name);
        }
        SourceAction::Delete { engine_id } => {
            if !sources::delete_source(client, &engine_id).await? {
                bail!("Source {} was not deleted", engine_id);
            }
        }
        SourceAction::Jobs => {
            for job in client.list_build_jobs().await? {
                println!(
                    "{}\t{}\t{}",
                    job.id,
                    job.status.as_str(),
                    job.engine_name().unwrap_or("-")
                );
            }
        }
        SourceAction::Wait { job_id } => wait_for_job(client, config, &job_id).await?,
    }
    Ok(())
}

async fn wait_for_job(client: &GenieClient, config: &Config, job_id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let job = sources::wait_for_build(client, job_id, config.poll_settings(), cancel, |job| {
        tracing::info!("Build job {} is {}", job.id, job.status.as_str());
    })
    .await?;

    println!("{}\t{}", job.id, job.status.as_str());
    if let Some(message) = job.message.as_deref().filter(|m| !m.is_empty()) {
        eprintln!("{}", message);
    }
    Ok(())
}

fn print_chat(chat: &Chat) {
    println!("# {}", chat.display_title());
    if let Some(id) = &chat.id {
        println!("id: {}", id);
    }
    for entry in &chat.history {
        if let Some(text) = &entry.human_input {
            println!("\n> {}", text);
        }
        if let Some(name) = &entry.uploaded_file {
            println!("  [file: {}]", name);
        }
        if let Some(text) = &entry.ai_output {
            println!("\n{}", text);
        }
        if let Some(refs) = &entry.query_references {
            print_references(refs);
        }
    }
}

fn print_query_answer(session: &QuerySession) {
    if let Some(contents) = session.query().history.last() {
        if let Some(answer) = &contents.ai_response {
            println!("{}", answer);
        }
        if let Some(refs) = &contents.ai_references {
            print_references(refs);
        }
    }
    if let Some(id) = session.query_id() {
        eprintln!("query: {}", id);
    }
}

fn print_references(refs: &[QueryReference]) {
    for (i, r) in refs.iter().enumerate() {
        match r.page {
            Some(page) => println!("  [{}] {} (page {})", i + 1, r.document_url, page),
            None => println!("  [{}] {}", i + 1, r.document_url),
        }
    }
}
