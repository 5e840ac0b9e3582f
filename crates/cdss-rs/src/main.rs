//! `cdss` command-line entry point.

use anyhow::{Context, bail};
use cdss_rs::core::{ConsultationPipeline, Identity};
use cdss_rs::knowledge::{Embedder, SqliteKnowledgeStore};
use cdss_rs::protocol::ConsultationRequest;
use cdss_rs::{configured_embedder, import_knowledge, init_logging, load_config};
use clap::{Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;

/// Command-line options for the consultation service.
#[derive(Parser)]
#[command(name = "cdss", version, about = "Grounded clinical consultation service")]
struct Cli {
    /// Extra cdss.json5 layer applied after the discovered ones (repeatable)
    #[arg(long, global = true)]
    config: Vec<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP consultation endpoint
    Serve {
        /// Listen address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Load the product and rule collections into the knowledge base
    Import {
        /// JSON array of dental products
        #[arg(long)]
        products: PathBuf,
        /// JSON document with a `rules` array
        #[arg(long)]
        rules: PathBuf,
        /// Knowledge database path, overriding storage.knowledge_path
        #[arg(long)]
        db: Option<PathBuf>,
        /// Remove existing products and rules first
        #[arg(long)]
        replace: bool,
    },
    /// Run one consultation locally and print the answer
    Ask {
        question: String,
        /// Conversation to continue
        #[arg(long)]
        conversation: Option<String>,
        /// Owner recorded for the conversation
        #[arg(long, default_value = "cli")]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to resolve current working directory")?;
    let mut config = load_config(&cwd, &cli.config)?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            info!("starting server (bind={})", config.server.bind);
            cdss_rs::server::serve(&config)
                .await
                .context("consultation server failed")?;
        }
        Command::Import {
            products,
            rules,
            db,
            replace,
        } => {
            let db = db.unwrap_or_else(|| PathBuf::from(&config.storage.knowledge_path));
            let products_json = fs::read_to_string(&products)
                .with_context(|| format!("failed to read {}", products.display()))?;
            let rules_json = fs::read_to_string(&rules)
                .with_context(|| format!("failed to read {}", rules.display()))?;
            let store = SqliteKnowledgeStore::open(&db)
                .with_context(|| format!("failed to open knowledge base {}", db.display()))?;
            let embedder = configured_embedder(&config.embedding)?;
            let summary = import_knowledge(
                &store,
                &products_json,
                &rules_json,
                embedder.as_ref().map(|embedder| embedder as &dyn Embedder),
                replace,
            )
            .await
            .context("knowledge import failed")?;
            println!(
                "imported {} products and {} rules into {} ({} embedded, {} replaced)",
                summary.products,
                summary.rules,
                db.display(),
                summary.embedded,
                summary.removed
            );
        }
        Command::Ask {
            question,
            conversation,
            owner,
        } => {
            if question.trim().is_empty() {
                bail!("question must not be empty");
            }
            let pipeline =
                ConsultationPipeline::from_config(&config).context("failed to build pipeline")?;
            pipeline
                .ensure_configured()
                .context("completion endpoint is not configured")?;
            let mut request = ConsultationRequest::new(question);
            request.conversation_id = conversation;
            let reply = pipeline.handle(request, Identity::user(&owner)).await;
            info!(
                "consultation finished (outcome={:?}, tier={:?})",
                reply.outcome, reply.retrieval.resolved
            );
            if let Some(id) = reply.conversation_id {
                eprintln!("conversation: {id}");
            }
            println!("{}", reply.content);
        }
    }
    Ok(())
}
