use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkrec_core::{DisplayPosition, JsonSource, LinkEngine, MemorySource, SettingsUpdate};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use std::sync::Arc;

#[derive(Parser)]
#[command(name = "linkrec-indexer")]
#[command(about = "Build and query the related-pages index", long_about = None)]
struct Cli {
    /// Index database directory
    #[arg(long, global = true, default_value = "./linkrec-db")]
    db: String,
    /// Content export (JSON/JSONL file or directory); needed by `start`, `batch` and `run`
    #[arg(long, global = true)]
    content: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue every publishable document not yet in the index
    Start,
    /// Process one batch of queued documents
    Batch {
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
    /// Recompute IDF weights for the whole corpus
    Idf,
    /// Recompute IDF, then all pairwise similarities
    Similarities,
    /// Start, drain the queue and compute similarities in one go
    Run {
        #[arg(long, default_value_t = 25)]
        batch_size: usize,
    },
    /// Print index statistics
    Stats,
    /// Delete every document, term and similarity
    Clear,
    /// Show recommendations for a page
    Recommend {
        #[arg(long)]
        page_id: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        max_recommendations: Option<usize>,
        #[arg(long)]
        similarity_threshold: Option<f32>,
        #[arg(long)]
        max_terms_per_doc: Option<usize>,
        #[arg(long)]
        max_similar_per_doc: Option<usize>,
        #[arg(long)]
        auto_index: Option<bool>,
        /// top, bottom or sidebar
        #[arg(long)]
        display_position: Option<String>,
        #[arg(long)]
        heading_text: Option<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let engine = open(&cli)?;

    match cli.command {
        Commands::Start => print(&engine.start_indexing()?),
        Commands::Batch { size } => print(&engine.process_batch(size)?),
        Commands::Idf => print(&engine.recalculate_idf()?),
        Commands::Similarities => {
            let (idf, sims) = engine.refresh_similarities()?;
            tracing::info!(terms = idf.terms, documents = idf.documents, "idf refreshed");
            print(&sims)
        }
        Commands::Run { batch_size } => print(&engine.run_to_completion(batch_size)?),
        Commands::Stats => print(&engine.get_index_stats()?),
        Commands::Clear => print(&engine.clear_index()?),
        Commands::Recommend { page_id, limit, min_similarity } => {
            print(&engine.get_similar_content(&page_id, limit, min_similarity)?)
        }
        Commands::Settings { action: SettingsAction::Show } => print(&engine.settings()?),
        Commands::Settings {
            action:
                SettingsAction::Set {
                    enabled,
                    max_recommendations,
                    similarity_threshold,
                    max_terms_per_doc,
                    max_similar_per_doc,
                    auto_index,
                    display_position,
                    heading_text,
                },
        } => {
            let display_position = display_position.map(|p| p.parse::<DisplayPosition>()).transpose()?;
            let update = SettingsUpdate {
                enabled,
                max_recommendations,
                similarity_threshold,
                max_terms_per_doc,
                max_similar_per_doc,
                auto_index,
                display_position,
                heading_text,
            };
            print(&engine.update_settings(&update)?)
        }
    }?;
    engine.flush()?;
    Ok(())
}

/// Commands that never read content get an empty source.
fn open(cli: &Cli) -> Result<LinkEngine> {
    let needs_content = matches!(cli.command, Commands::Start | Commands::Batch { .. } | Commands::Run { .. });
    let engine = match &cli.content {
        Some(path) => LinkEngine::open(&cli.db, Arc::new(JsonSource::new(path)?)),
        None if needs_content => anyhow::bail!("--content is required for this command"),
        None => LinkEngine::open(&cli.db, Arc::new(MemorySource::new())),
    };
    engine.with_context(|| format!("opening index database {}", cli.db))
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
