//! # Quarry CLI (`quarry`)
//!
//! Command-line interface to the local document search engine. Documents
//! are ingested from the filesystem, chunked and BM25-indexed, and
//! persisted per user in a SQLite blob store.
//!
//! ## Usage
//!
//! ```bash
//! quarry --config ./config/quarry.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quarry init` | Create the SQLite blob database |
//! | `quarry index <path>` | Scan a directory and index new or changed files |
//! | `quarry search "<query>"` | Ranked search over indexed documents |
//! | `quarry rag "<query>" --space <id>` | Retrieve and format RAG context for a space |
//! | `quarry get <id>` | Print a full document (chunked parents are reassembled) |
//! | `quarry remove` | Remove documents by id, folder, or space |
//! | `quarry status` | Index statistics |
//! | `quarry clear` | Drop all indexed documents for the user |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quarry::config::load_config;
use quarry::models::SearchState;
use quarry::service::{format_rag_context, SearchService};
use quarry::sqlite_store::{connect, SqliteBlobStore};

/// Quarry — a local document search engine with BM25 ranking, semantic
/// chunking, and RAG retrieval.
#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Quarry — a local document search engine with BM25 ranking and RAG retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/quarry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the blob database.
    ///
    /// Creates the SQLite file (and parent directories) with the blobs
    /// table. Idempotent.
    Init,

    /// Scan a directory and index new or changed files.
    ///
    /// Relative paths double as document ids, so re-running on the same
    /// tree supersedes prior entries. Files whose content is unchanged
    /// are skipped.
    Index {
        /// Directory to scan.
        path: PathBuf,
    },

    /// Ranked search over indexed documents.
    Search {
        /// The search query string.
        query: String,
    },

    /// Retrieve the most relevant documents for a space and print the
    /// assembled RAG context block.
    Rag {
        /// The retrieval query string.
        query: String,

        /// Space id to retrieve from.
        #[arg(long)]
        space: String,

        /// Print per-document scores instead of the formatted context.
        #[arg(long)]
        scores: bool,
    },

    /// Print a full document by id or name.
    ///
    /// Chunked parents are reassembled in chunk order.
    Get {
        /// Document id, or name with `--by-name`.
        id: String,

        /// Look the document up by name instead of id.
        #[arg(long)]
        by_name: bool,
    },

    /// Remove documents by id, folder, or space. Exactly one selector.
    Remove {
        /// Document id (removes its chunks too).
        #[arg(long)]
        id: Option<String>,

        /// Folder id: removes every document in the folder.
        #[arg(long)]
        folder: Option<String>,

        /// Space id: removes every document scoped to the space.
        #[arg(long)]
        space: Option<String>,
    },

    /// Index statistics for the configured user.
    Status,

    /// Drop all indexed documents and persisted blobs for the user.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let pool = connect(&config.db.path).await?;
    let store = SqliteBlobStore::new(pool.clone(), &config.user);
    let mut service = SearchService::new(&config.user, store);

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", config.db.path.display());
        }
        Commands::Index { path } => {
            quarry::ingest::ingest_directory(&mut service, &path, &config.indexing).await?;
        }
        Commands::Search { query } => {
            let results = service.search(&query, &SearchState::default()).await;
            if results.is_empty() {
                println!("No results.");
            } else {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Commands::Rag {
            query,
            space,
            scores,
        } => {
            let documents = service
                .retrieve_for_rag(
                    &query,
                    &space,
                    config.retrieval.top_k,
                    config.retrieval.min_score,
                )
                .await;
            if scores {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else {
                let context =
                    format_rag_context(&documents, config.retrieval.max_context_chars);
                println!("{context}");
            }
        }
        Commands::Get { id, by_name } => {
            let document = if by_name {
                service.get_document_by_name(&id).await
            } else {
                service.get_document_by_id(&id).await
            };
            match document {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => bail!("Document not found: {id}"),
            }
        }
        Commands::Remove { id, folder, space } => {
            let removed = match (id, folder, space) {
                (Some(id), None, None) => service.remove_document(&id).await,
                (None, Some(folder), None) => service.remove_documents_by_folder(&folder).await,
                (None, None, Some(space)) => service.remove_documents_by_space(&space).await,
                _ => bail!("Specify exactly one of --id, --folder, --space"),
            };
            println!("Removed {removed} entries");
        }
        Commands::Status => {
            let status = service.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Clear => {
            service.clear().await;
            println!("Cleared all documents for user {}", config.user);
        }
    }

    pool.close().await;
    Ok(())
}
