use anyhow::Context as _;
use clap::{Parser, Subcommand};
use codescope_context::{ChunkType, CodeChunk, ContextAssembler, ContextItem, Language};
use codescope_retriever::{
    config::IndexingEngineConfig,
    retrieval::{
        directory_watcher::{DEFAULT_DEBOUNCE, DirectoryWatcher},
        indexing_engine::{IndexingEngine, ScanOptions},
        retrieval_service::{RetrievalService, SearchOptions},
    },
    storage::ChunkFilter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Index a workspace into code chunks and query it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root to index
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Config file. Defaults to `<root>/.codescope.toml` when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the index is persisted. Defaults to `<root>/.codescope/index.json`.
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the workspace and index every supported file
    Index {
        /// Maximum number of files to index
        #[arg(long)]
        max_files: Option<usize>,
        /// Extra glob patterns to exclude (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Files processed concurrently per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search indexed chunks by keyword relevance
    Search {
        query: String,
        #[command(flatten)]
        search: SearchArgs,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Append the most relevant chunks to a prompt
    Augment {
        prompt: String,
        /// Query used to find chunks. Defaults to the prompt itself.
        #[arg(short, long)]
        query: Option<String>,
        /// Only use chunks of this language
        #[arg(short, long)]
        language: Option<String>,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    /// Assemble search hits and files into a token-budgeted context block
    Context {
        query: String,
        /// Token budget
        #[arg(short, long, default_value_t = 2000)]
        max_tokens: usize,
        /// Files to include in full, e.g. the ones open in an editor (repeatable)
        #[arg(long)]
        file: Vec<PathBuf>,
        #[command(flatten)]
        search: SearchArgs,
    },
    /// Show index statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Remove every chunk from the index
    Clear,
    /// Index, then keep the index up to date until interrupted
    Watch {
        /// Debounce window for file events, in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Skip the initial full scan
        #[arg(long)]
        no_initial_scan: bool,
    },
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Maximum number of results
    #[arg(short = 'n', long, default_value_t = 5)]
    limit: usize,
    /// Minimum relevance score (0.0 to 1.0)
    #[arg(short, long, default_value_t = 0.05)]
    threshold: f32,
    /// Only match chunks of this language
    #[arg(short, long)]
    language: Option<String>,
    /// Only match these chunk types (comma-separated)
    #[arg(long = "type", value_delimiter = ',')]
    chunk_types: Vec<ChunkType>,
    /// Only match chunks under this path prefix
    #[arg(long)]
    path_prefix: Option<String>,
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        let mut filter = ChunkFilter::default();
        if let Some(language) = &self.language {
            filter = filter.with_language(language.as_str());
        }
        if !self.chunk_types.is_empty() {
            filter = filter.with_chunk_types(self.chunk_types.clone());
        }
        if let Some(prefix) = &self.path_prefix {
            filter = filter.with_path_prefix(prefix.as_str());
        }
        SearchOptions::default()
            .with_limit(self.limit)
            .with_threshold(self.threshold)
            .with_filter(filter)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct SearchHit<'a> {
    score: f32,
    file_path: &'a str,
    chunk_type: ChunkType,
    name: &'a str,
    line_start: usize,
    line_end: usize,
    content: &'a str,
}

impl<'a> From<(&'a CodeChunk, f32)> for SearchHit<'a> {
    fn from((chunk, score): (&'a CodeChunk, f32)) -> Self {
        Self {
            score,
            file_path: &chunk.file_path,
            chunk_type: chunk.chunk_type,
            name: &chunk.metadata.name,
            line_start: chunk.metadata.start_line,
            line_end: chunk.metadata.end_line,
            content: &chunk.content,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<IndexingEngineConfig> {
    let mut config = match &args.config {
        Some(path) => IndexingEngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IndexingEngineConfig::load_or_default(&args.root)?,
    };
    if let Some(store) = &args.store {
        config.store_path = Some(store.clone());
    }
    if config.store_path.is_none() {
        config.store_path = config.default_store_path();
    }
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    match args.command {
        Commands::Index {
            max_files,
            exclude,
            batch_size,
            format,
        } => {
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }
            let engine = Arc::new(IndexingEngine::open(config).await?);
            let mut options = ScanOptions::default().with_exclude_patterns(exclude);
            options.max_files = max_files;

            let handle = engine
                .start_full_scan(options)
                .context("A scan is already running")?;
            let mut progress = handle.progress_stream();
            let reporter = tokio::spawn(async move {
                while let Some(p) = progress.next().await {
                    if p.total > 0 {
                        info!("Indexed {}/{} files", p.processed, p.total);
                    }
                }
            });
            let interrupt_engine = Arc::clone(&engine);
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt_engine.cancel();
                }
            });

            let report = handle.join().await;
            interrupt.abort();
            reporter.abort();

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary => {
                    println!("Indexing {}", if report.cancelled { "cancelled" } else { "complete" });
                    println!("  Files discovered: {}", report.files_discovered);
                    println!("  Files indexed: {}", report.files_indexed);
                    println!("  Files unchanged: {}", report.files_unchanged);
                    println!("  Files skipped: {}", report.files_skipped);
                    println!("  Errors: {}", report.errors);
                    println!("  Chunks written: {}", report.chunks_written);
                    println!("  Elapsed: {}ms", report.elapsed_ms);
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            search,
            format,
        } => {
            let engine = IndexingEngine::open(config).await?;
            let service = RetrievalService::new(Arc::clone(engine.store()));
            let results = service.search(&query, &search.options()).await?;

            match format {
                OutputFormat::Json => {
                    let hits: Vec<SearchHit> = results
                        .iter()
                        .map(|r| SearchHit::from((&r.chunk, r.score)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} matching chunks:", results.len());
                    for result in &results {
                        let chunk = &result.chunk;
                        println!(
                            "  Score: {:.3} | {} {} | File: {} | Lines: {}-{}",
                            result.score,
                            chunk.chunk_type,
                            chunk.metadata.name,
                            chunk.file_path,
                            chunk.metadata.start_line,
                            chunk.metadata.end_line
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Augment {
            prompt,
            query,
            language,
            limit,
        } => {
            let engine = IndexingEngine::open(config).await?;
            let service = RetrievalService::new(Arc::clone(engine.store()));
            let query = query.as_deref().unwrap_or(&prompt);
            let augmented = service
                .augment_prompt(&prompt, query, language.as_deref(), limit)
                .await;
            println!("{augmented}");
            Ok(())
        }
        Commands::Context {
            query,
            max_tokens,
            file,
            search,
        } => {
            let engine = IndexingEngine::open(config).await?;
            let service = RetrievalService::new(Arc::clone(engine.store()));

            let mut items = Vec::new();
            for path in &file {
                items.push(file_item(path).await?);
            }
            items.extend(service.context_items(&query, &search.options()).await?);

            println!("{}", ContextAssembler::default().build(&items, max_tokens));
            Ok(())
        }
        Commands::Stats { format } => {
            let engine = IndexingEngine::open(config).await?;
            let stats = engine.index_stats().await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary => {
                    println!("Index Statistics:");
                    println!("  Total chunks: {}", stats.chunk_count);
                    println!("  Files: {}", stats.file_count);
                    for (chunk_type, count) in &stats.by_type {
                        println!("  {chunk_type}: {count}");
                    }
                }
            }
            Ok(())
        }
        Commands::Clear => {
            let engine = IndexingEngine::open(config).await?;
            let removed = engine.store().count().await?;
            engine.clear().await?;
            println!("Removed {removed} chunks");
            Ok(())
        }
        Commands::Watch {
            debounce_ms,
            no_initial_scan,
        } => {
            let engine = Arc::new(IndexingEngine::open(config).await?);
            if !no_initial_scan {
                if let Some(report) = engine.full_scan(ScanOptions::default()).await {
                    println!(
                        "Indexed {} files ({} chunks)",
                        report.files_indexed, report.chunks_written
                    );
                }
            }

            let debounce = debounce_ms.map(Duration::from_millis).unwrap_or(DEFAULT_DEBOUNCE);
            let watcher = DirectoryWatcher::start(&engine.roots(), Arc::clone(&engine), debounce)?;
            println!("Watching for changes, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;

            watcher.shutdown().await;
            engine.store().flush().await?;
            let stats = engine.stats().await;
            println!(
                "Stopped after processing {} files ({} errors)",
                stats.files_processed, stats.errors
            );
            Ok(())
        }
    }
}

/// A whole file as a context item, without a line range.
async fn file_item(path: &Path) -> anyhow::Result<ContextItem> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let item = ContextItem::new(path.to_string_lossy().replace('\\', "/"), content);
    Ok(match Language::from_path(path) {
        Language::Unknown => item,
        language => item.with_language(language.as_str()),
    })
}
