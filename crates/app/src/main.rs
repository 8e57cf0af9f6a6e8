use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_chat_core::{
    DocumentStorage, GroqChatModel, HashedNgramEmbedder, IndexManager, ModelConfig,
    SessionCoordinator, SessionStore, SqliteStore,
};
use doc_chat_core::LopdfExtractor;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the database, stored PDFs, and session indexes.
    #[arg(long, env = "DOC_CHAT_DATA_DIR", default_value = "./doc-chat-data")]
    data_dir: PathBuf,

    /// Groq API key; required for upload and chat.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: Option<String>,

    /// Completion model name.
    #[arg(long, env = "GROQ_MODEL", default_value = "llama-3.1-8b-instant")]
    model: String,

    /// Completion endpoint base URL.
    #[arg(long, default_value = "https://api.groq.com/openai/v1")]
    endpoint: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new session.
    CreateSession {
        /// Display name for the session.
        #[arg(long)]
        name: String,
    },
    /// List sessions, newest first.
    Sessions,
    /// Rename a session.
    RenameSession {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        name: String,
    },
    /// Delete a session and everything it owns.
    DeleteSession {
        #[arg(long)]
        session: i64,
    },
    /// Upload a PDF into a session and fold it into the rolling summary.
    Upload {
        #[arg(long)]
        session: i64,
        /// Path to the PDF file.
        #[arg(long)]
        file: PathBuf,
    },
    /// Ask a question over the session's documents.
    Chat {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        query: String,
    },
    /// Show the session's rolling summary.
    Summary {
        #[arg(long)]
        session: i64,
    },
    /// List a session's uploaded documents, newest first.
    Documents {
        #[arg(long)]
        session: i64,
    },
    /// Print a session's chat history in order.
    Messages {
        #[arg(long)]
        session: i64,
    },
}

fn coordinator(
    cli: &Cli,
    store: SqliteStore,
) -> anyhow::Result<SessionCoordinator<SqliteStore, GroqChatModel, HashedNgramEmbedder, LopdfExtractor>>
{
    let model = GroqChatModel::new(ModelConfig {
        endpoint: cli.endpoint.clone(),
        model: cli.model.clone(),
        api_key: cli.groq_api_key.clone(),
    })
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    Ok(SessionCoordinator::new(
        store,
        LopdfExtractor,
        IndexManager::new(cli.data_dir.join("indexes"), HashedNgramEmbedder::default()),
        DocumentStorage::new(cli.data_dir.join("storage")),
        model,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = SqliteStore::open(&cli.data_dir.join("doc_chat.db"))
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        "doc-chat boot"
    );

    match &cli.command {
        Command::CreateSession { name } => {
            let session = store
                .create_session(name)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("created session {} ({})", session.id, session.name);
        }
        Command::Sessions => {
            let sessions = store
                .list_sessions()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            if sessions.is_empty() {
                println!("no sessions yet");
            }
            for session in sessions {
                let documents = store
                    .documents(session.id)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!(
                    "[{}] {} created={} documents={}",
                    session.id,
                    session.name,
                    session.created_at.to_rfc3339(),
                    documents.len()
                );
            }
        }
        Command::RenameSession { session, name } => {
            let renamed = store
                .rename_session(*session, name)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("session {} renamed to {}", renamed.id, renamed.name);
        }
        Command::DeleteSession { session } => {
            store
                .delete_session(*session)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("session {session} deleted");
        }
        Command::Upload { session, file } => {
            let pipeline = coordinator(&cli, store)?;
            let document = pipeline
                .upload(*session, Path::new(file))
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "uploaded {} into session {} at {}",
                document.filename,
                session,
                Utc::now().to_rfc3339()
            );
        }
        Command::Chat { session, query } => {
            let pipeline = coordinator(&cli, store)?;
            let answer = pipeline
                .answer(*session, query)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("{answer}");
        }
        Command::Summary { session } => {
            let session = store
                .get_session(*session)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            match session.current_summary {
                Some(summary) => println!("{summary}"),
                None => println!("no summary yet; upload a document first"),
            }
        }
        Command::Documents { session } => {
            let documents = store
                .documents(*session)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            if documents.is_empty() {
                println!("no documents uploaded");
            }
            for document in documents {
                println!(
                    "[{}] {} uploaded={} checksum={}",
                    document.id,
                    document.filename,
                    document.uploaded_at.to_rfc3339(),
                    document.checksum
                );
            }
        }
        Command::Messages { session } => {
            let messages = store
                .messages(*session)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            if messages.is_empty() {
                println!("no messages yet");
            }
            for message in messages {
                println!(
                    "{} [{}]\n{}\n",
                    message.role.as_str().to_uppercase(),
                    message.created_at.to_rfc3339(),
                    message.content
                );
            }
        }
    }

    Ok(())
}
