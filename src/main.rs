//! sharpsearch CLI: index, search, watch, stats, clear.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sharpsearch::constants::{self, SHUTDOWN_REQUESTED};
use sharpsearch::index::SearchFilter;
use sharpsearch::watch::WatcherDebouncer;
use sharpsearch::{EngineConfig, EngineRegistry};

#[derive(Parser)]
#[command(name = "sharpsearch", version, about = "Semantic code search for C#/Razor/C codebases")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Project name (defaults to the root directory's name).
    #[arg(long, global = true)]
    project: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Index the project directory.
    Index {
        /// Discard the existing index first (the embedding cache survives).
        #[arg(long)]
        force: bool,
    },
    /// Search the project's index.
    Search {
        query: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Comma-separated kind tags to accept (e.g. `method-auth,class-auth`).
        #[arg(long)]
        types: Option<String>,
        /// Only results whose path contains this substring.
        #[arg(long)]
        filter_path: Option<String>,
        /// Expand the query with synonym groups before embedding.
        #[arg(long)]
        expand: bool,
        /// Show cosine scores.
        #[arg(long)]
        scores: bool,
    },
    /// Watch the project directory and reindex on changes until CTRL-C.
    Watch,
    /// Show index statistics.
    Stats,
    /// Remove the project's index (keeps the embedding cache by default).
    Clear {
        /// Also drop the project's rows from the embedding cache.
        #[arg(long)]
        cache: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHARPSEARCH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = constants::app_data_dir().ok().map(|dir| {
        let appender =
            tracing_appender::rolling::daily(dir.join(constants::LOG_DIR_NAME), constants::LOG_FILE_NAME);
        tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
    });

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn resolve_target(cli: &Cli) -> Result<(PathBuf, String)> {
    let root = match &cli.path {
        Some(p) => std::fs::canonicalize(p)?,
        None => std::env::current_dir()?,
    };
    let project = cli
        .project
        .clone()
        .or_else(|| root.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "default".to_string());
    Ok((root, project))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down...");
            SHUTDOWN_REQUESTED.store(true, std::sync::atomic::Ordering::SeqCst);
            cancel.cancel();
        })?;
    }

    let (root, project) = resolve_target(&cli)?;
    let config = EngineConfig::from_env();
    let registry = Arc::new(EngineRegistry::new(config)?);

    match cli.command {
        Command::Index { force } => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
            spinner.set_message(format!("Indexing {}...", root.display()));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let stats = {
                let registry = registry.clone();
                let root = root.clone();
                let project = project.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let indexer = registry.get_or_create(&project, &root)?;
                    Ok(indexer.index_directory(force, None, &cancel)?)
                })
                .await??
            };
            spinner.finish_and_clear();

            println!(
                "{} {} files indexed, {} removed, {} chunks ({} cache hits, {} skipped) in {} ms",
                "Done:".green().bold(),
                stats.files_indexed,
                stats.files_removed,
                stats.chunks_created,
                stats.cache_hits,
                stats.files_skipped,
                stats.elapsed_ms
            );
        }

        Command::Search {
            query,
            limit,
            types,
            filter_path,
            expand,
            scores,
        } => {
            let filter = SearchFilter {
                chunk_types: types
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                path_contains: filter_path,
            };

            let results = {
                let registry = registry.clone();
                let root = root.clone();
                let project = project.clone();
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let indexer = registry.get_or_create(&project, &root)?;
                    Ok(indexer.search_with_filters(&query, limit, &filter, expand)?)
                })
                .await??
            };

            if results.is_empty() {
                println!("{}", "No results.".yellow());
            }
            for (i, result) in results.iter().enumerate() {
                let location = format!(
                    "{}:{}-{}",
                    result.path, result.start_line, result.end_line
                );
                if scores {
                    println!(
                        "{:>2}. {} {} [{}] (cos {:.4})",
                        i + 1,
                        location.cyan(),
                        result.kind_tag.dimmed(),
                        result.id,
                        result.score
                    );
                } else {
                    println!("{:>2}. {} {}", i + 1, location.cyan(), result.kind_tag.dimmed());
                }
                for line in result.text.lines().take(3) {
                    println!("      {}", line);
                }
            }
        }

        Command::Watch => {
            {
                let registry = registry.clone();
                let root = root.clone();
                let project = project.clone();
                let cancel = cancel.clone();
                // Bring the index up to date before watching.
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let indexer = registry.get_or_create(&project, &root)?;
                    Ok(indexer.index_directory(false, None, &cancel)?)
                })
                .await??;
            }

            let watcher = Arc::new(WatcherDebouncer::new(registry.clone()));
            watcher.register(&project, &root)?;
            println!(
                "Watching {} (project '{}'), CTRL-C to stop",
                root.display(),
                project
            );
            watcher.run(cancel.clone()).await;
        }

        Command::Stats => {
            let stats = {
                let registry = registry.clone();
                let root = root.clone();
                let project = project.clone();
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let indexer = registry.get_or_create(&project, &root)?;
                    Ok(indexer.stats()?)
                })
                .await??
            };
            println!("Project:        {}", stats.project.bold());
            println!("Chunks:         {}", stats.chunk_count);
            println!("Files:          {}", stats.file_count);
            println!("Live vectors:   {}", stats.live_vectors);
            println!("Deleted slots:  {}", stats.deleted_slots);
            println!("Dimension:      {}", stats.dimension);
            println!("Precision:      {}", stats.precision.as_str());
            println!("Store size:     {} bytes", stats.db_size_bytes);
            println!("Cache entries:  {}", stats.cache_entries);
        }

        Command::Clear { cache } => {
            let registry2 = registry.clone();
            let project2 = project.clone();
            let root2 = root.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let indexer = registry2.get_or_create(&project2, &root2)?;
                indexer.clear()?;
                if cache {
                    let removed = registry2.embedder().cache().clear_project(&project2)?;
                    println!("Dropped {} cached embeddings", removed);
                }
                Ok(())
            })
            .await??;
            println!("{} index cleared for '{}'", "Done:".green().bold(), project);
        }
    }

    Ok(())
}
