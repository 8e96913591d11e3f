//! # docchat CLI
//!
//! Thin consumer of the docchat core: uploads PDFs through the ingestion
//! pipeline and drives document conversations from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat upload <file.pdf>` | Ingest a PDF and provision its conversation thread |
//! | `docchat documents` | List committed documents |
//! | `docchat show <id>` | Show one document's metadata and extracted text |
//! | `docchat ask <id> "<question>"` | Ask about a document; streams the reply |
//! | `docchat messages <id>` | Print a document's conversation log |

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docchat::agent::OpenAiAgent;
use docchat::blob::{BlobStore, FsBlobStore, HttpBlobStore};
use docchat::chat::ChatController;
use docchat::config::{load_config, Config};
use docchat::ingest::IngestController;
use docchat::models::{MessageRole, MessageStatus};
use docchat::registry::DocumentRegistry;
use docchat::thread::ThreadStore;
use docchat::{db, migrate};

/// docchat — grounded PDF conversations from the terminal.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Upload PDFs and converse with an agent grounded in their text",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Upload a PDF: extract its text, store the bytes, commit the
    /// document and its conversation thread.
    Upload {
        /// Path to a PDF file.
        file: PathBuf,
    },

    /// List committed documents, newest first.
    Documents,

    /// Show one document's metadata and extracted text.
    Show {
        /// Document id.
        id: String,
    },

    /// Ask a question about a document. The reply streams to stdout.
    Ask {
        /// Document id.
        id: String,
        /// Question text (at most 1,000 characters).
        prompt: String,
    },

    /// Print a document's conversation log.
    Messages {
        /// Document id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Upload { file } => run_upload(&config, &file).await,
        Commands::Documents => run_documents(&config).await,
        Commands::Show { id } => run_show(&config, &id).await,
        Commands::Ask { id, prompt } => run_ask(&config, &id, &prompt).await,
        Commands::Messages { id } => run_messages(&config, &id).await,
    }
}

fn build_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    match config.blob.backend.as_str() {
        "http" => {
            let base_url = config
                .blob
                .base_url
                .as_deref()
                .context("blob.base_url missing for http backend")?;
            Ok(Arc::new(HttpBlobStore::new(
                base_url,
                config.blob.timeout_secs,
            )?))
        }
        _ => Ok(Arc::new(FsBlobStore::new(config.blob.root.clone()))),
    }
}

async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn run_upload(config: &Config, file: &PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("file path has no name")?;

    let pool = db::connect(config).await?;
    let registry = DocumentRegistry::new(pool.clone());
    let blob = build_blob_store(config)?;
    let mut controller = IngestController::new(blob, registry, config.limits.max_file_bytes);

    let document = controller.upload(&name, bytes).await?;

    println!("uploaded {}", document.name);
    println!("  id:      {}", document.id);
    println!("  size:    {} bytes", document.size);
    println!("  thread:  {}", document.agent_thread_id);
    println!(
        "  text:    {} extracted characters",
        document.text.chars().count()
    );

    pool.close().await;
    Ok(())
}

async fn run_documents(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = DocumentRegistry::new(pool.clone());

    let documents = registry.list().await?;
    if documents.is_empty() {
        println!("no documents");
    }
    for doc in documents {
        println!("{}  {}  {} bytes", doc.id, doc.name, doc.size);
    }

    pool.close().await;
    Ok(())
}

async fn run_show(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = DocumentRegistry::new(pool.clone());

    let doc = registry.get(id).await?;
    println!("--- Document ---");
    println!("id:        {}", doc.id);
    println!("name:      {}", doc.name);
    println!("size:      {} bytes", doc.size);
    println!("storage:   {}", doc.storage_id);
    println!("thread:    {}", doc.agent_thread_id);
    println!();
    println!("--- Text ---");
    println!("{}", doc.text);

    pool.close().await;
    Ok(())
}

async fn run_ask(config: &Config, id: &str, prompt: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = DocumentRegistry::new(pool.clone());
    let doc = registry.get(id).await?;

    let agent = Arc::new(OpenAiAgent::from_config(&config.agent)?);
    let store = ThreadStore::new(pool.clone(), agent, config.limits.max_message_chars);
    let mut controller = ChatController::new(
        store,
        doc.agent_thread_id,
        config.limits.page_size,
        config.limits.max_message_chars,
    );

    controller.refresh().await?;
    controller.submit(prompt).await?;

    // Render the reply as it streams into the store.
    let mut printed = 0usize;
    loop {
        controller.refresh().await?;
        let view = controller.view();
        if let Some(reply) = view.iter().rev().find(|m| m.role == MessageRole::Assistant) {
            let content = &reply.content;
            if content.len() > printed {
                print!("{}", &content[printed..]);
                std::io::stdout().flush().ok();
                printed = content.len();
            }
            if reply.status == MessageStatus::Failed {
                println!();
                anyhow::bail!("agent failed to answer");
            }
        }
        if !controller.is_live() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    println!();

    pool.close().await;
    Ok(())
}

async fn run_messages(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = DocumentRegistry::new(pool.clone());
    let doc = registry.get(id).await?;

    let agent = Arc::new(OpenAiAgent::from_config(&config.agent)?);
    let store = ThreadStore::new(pool.clone(), agent, config.limits.max_message_chars);

    let mut cursor = 0;
    loop {
        let page = store
            .list_messages(&doc.agent_thread_id, cursor, config.limits.page_size)
            .await?;
        for message in &page.messages {
            println!("[{}] {}", message.role.as_str(), message.content);
        }
        if !page.has_more || page.next_cursor == cursor {
            break;
        }
        cursor = page.next_cursor;
    }

    pool.close().await;
    Ok(())
}
