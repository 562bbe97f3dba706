//! `graphrag-search`: ask questions against a paper graph from the terminal.
//!
//! The graph comes from a SQLite database or a JSON snapshot. Results are
//! printed as a table or as the full JSON retrieval result, which downstream
//! answer generation can consume as is.
//!
//! # Examples
//!
//! Single query:
//! ```bash
//! graphrag-search --db-path graph.db --query "organizational ambidexterity"
//! ```
//!
//! JSON output from a snapshot, stricter vector cut-off:
//! ```bash
//! graphrag-search --snapshot graph.json --query "agency costs" --threshold 0.6 --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! graphrag-search --db-path graph.db --interactive
//! ```

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
#[cfg(feature = "local-embeddings")]
use paper_graphrag::embedding::fastembed::FastEmbedProvider;
use paper_graphrag::{
    embedding::{openai::OpenAIEmbedding, EmbeddingProvider, EmbeddingResult},
    models::{EmbeddingConfig, Evidence, FusedPaper},
    storage::{memory::InMemoryGraphStore, sqlite::SqliteGraphStore, GraphStore},
    GraphRagEngine, RetrievalConfig, RetrievalQuery, RetrievalResult, Retriever,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wrapper enum for embedding providers to allow dynamic dispatch
enum DynamicEmbeddingProvider {
    #[cfg(feature = "local-embeddings")]
    FastEmbed(FastEmbedProvider),
    OpenAI(OpenAIEmbedding),
}

#[async_trait::async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            #[cfg(feature = "local-embeddings")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            #[cfg(feature = "local-embeddings")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            #[cfg(feature = "local-embeddings")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.dimension(),
            DynamicEmbeddingProvider::OpenAI(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            #[cfg(feature = "local-embeddings")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.model_name(),
            DynamicEmbeddingProvider::OpenAI(p) => p.model_name(),
        }
    }
}

/// Output format for retrieval results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table, one row per fused paper
    Table,
    /// The full retrieval result as JSON
    Json,
}

/// Query a paper graph with vector, graph and entity retrieval
#[derive(Parser, Debug)]
#[command(
    name = "graphrag-search",
    version,
    about = "Retrieve papers for a question from a paper graph",
    long_about = "Answer-free GraphRAG retrieval: papers are found by embedding similarity, \
                  by sharing theories, methods or phenomena with those hits, and by entity \
                  names mentioned in the question. Results show which channels found each paper.

EXAMPLES:
  Single query:
    graphrag-search --db-path graph.db --query \"organizational ambidexterity\"

  JSON output from a snapshot:
    graphrag-search --snapshot graph.json --query \"agency costs\" --format json

  Interactive mode with a config file:
    graphrag-search --db-path graph.db --config retrieval.toml --interactive",
    group(ArgGroup::new("source").required(true).args(["db_path", "snapshot"]))
)]
struct Args {
    /// SQLite graph database
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// JSON graph snapshot
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Question to answer (omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Results kept per channel (overrides the config file)
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Minimum cosine similarity for the vector channel (overrides the config file)
    #[arg(long, value_name = "SCORE", allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Retrieval config file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    /// FastEmbed model cache directory (only used with local embedding models)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Open whichever graph source was given and report its paper count.
async fn open_store(args: &Args) -> Result<(Arc<dyn GraphStore>, usize)> {
    if let Some(path) = &args.snapshot {
        let store = InMemoryGraphStore::load_snapshot(path)
            .with_context(|| format!("Failed to load graph snapshot {}", path.display()))?;
        let papers = store.paper_count();
        return Ok((Arc::new(store), papers));
    }

    let path = args
        .db_path
        .as_deref()
        .context("Either --db-path or --snapshot must be specified")?;
    let store = open_database(path).await?;
    let papers = store
        .count_papers()
        .await
        .with_context(|| "Failed to count papers in database")?;
    Ok((Arc::new(store), papers))
}

async fn open_database(path: &Path) -> Result<SqliteGraphStore> {
    if !path.exists() {
        anyhow::bail!("Database file not found: {}", path.display());
    }
    info!("Loading graph database from: {}", path.display());

    let store = SqliteGraphStore::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    store
        .initialize()
        .await
        .with_context(|| "Failed to initialize storage")?;
    Ok(store)
}

/// Auto-detect and instantiate the embedding provider based on the stored config
fn create_embedding_provider(
    config: &EmbeddingConfig,
    cache_dir: Option<PathBuf>,
) -> Result<DynamicEmbeddingProvider> {
    info!("Auto-detecting embedding provider for model: {}", config.model_name);

    let provider = if config.model_name.contains("text-embedding") {
        info!("Detected OpenAI embedding model");
        let provider = OpenAIEmbedding::from_env(Some(config.model_name.clone())).with_context(|| {
            "OPENAI_API_KEY environment variable required for OpenAI embeddings.\n\
             Set it with: export OPENAI_API_KEY=your-api-key"
        })?;
        DynamicEmbeddingProvider::OpenAI(provider)
    } else {
        local_provider(&config.model_name, cache_dir)?
    };

    if provider.dimension() != config.dimension {
        anyhow::bail!(
            "Dimension mismatch: expected {} from the graph's embedding config, but provider returns {}",
            config.dimension,
            provider.dimension()
        );
    }
    Ok(provider)
}

/// Where local models are downloaded when `--cache-dir` is not given.
fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("paper-graphrag").join("fastembed"))
}

#[cfg(feature = "local-embeddings")]
fn local_provider(model_name: &str, cache_dir: Option<PathBuf>) -> Result<DynamicEmbeddingProvider> {
    info!("Detected FastEmbed model");
    let provider = FastEmbedProvider::from_model_name(model_name, cache_dir)
        .with_context(|| format!("Failed to create FastEmbed provider for {model_name}"))?;
    Ok(DynamicEmbeddingProvider::FastEmbed(provider))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_provider(model_name: &str, _cache_dir: Option<PathBuf>) -> Result<DynamicEmbeddingProvider> {
    anyhow::bail!(
        "The graph was embedded with local model '{model_name}'.\n\
         Rebuild with `--features local-embeddings` to query it."
    )
}

/// Config file (or defaults) with command-line overrides applied.
fn load_retrieval_config(args: &Args) -> Result<RetrievalConfig> {
    let mut config = match &args.config {
        Some(path) => RetrievalConfig::load(path)
            .with_context(|| format!("Failed to load retrieval config {}", path.display()))?,
        None => RetrievalConfig::default(),
    };
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    config.validate().with_context(|| "Invalid retrieval settings")?;
    Ok(config)
}

/// Execute a query and return the fused result
async fn execute_query(
    engine: &dyn Retriever,
    question: &str,
    top_k: usize,
    threshold: f32,
) -> Result<RetrievalResult> {
    debug!("Executing retrieval for question: {}", question);

    let query = RetrievalQuery::new(question.to_string(), Some(top_k), Some(threshold));
    engine.retrieve(&query).await.map_err(|e| {
        let hint = if e.is_unavailable() {
            " (backend unavailable, try again later)"
        } else {
            ""
        };
        anyhow::anyhow!(e).context(format!("Failed to retrieve papers for '{question}'{hint}"))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

/// One-line explanation of a channel's evidence.
fn describe_evidence(evidence: &Evidence) -> String {
    match evidence {
        Evidence::Vector { similarity } => format!("vector: similarity {similarity:.3}"),
        Evidence::Graph {
            connection_strength,
            relationship_types,
        } => format!(
            "graph: {connection_strength} shared ({})",
            relationship_types.join(", ")
        ),
        Evidence::Entity {
            entity_name,
            entity_kind,
            matched_keywords,
        } => format!("entity: {entity_kind} '{entity_name}' [{}]", matched_keywords.join(", ")),
    }
}

/// Format results as a pretty table
fn format_result_table(result: &RetrievalResult) -> String {
    if result.is_empty() {
        return "No papers found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Year").add_attribute(Attribute::Bold),
        Cell::new("Channels").add_attribute(Attribute::Bold),
        Cell::new("Evidence").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, fused) in result.papers.iter().enumerate() {
        let channels = fused
            .channels()
            .iter()
            .map(|channel| channel.as_str())
            .collect::<Vec<_>>()
            .join("+");

        // More agreeing channels, stronger color
        let color = match fused.channel_count() {
            3 => Color::Green,
            2 => Color::Cyan,
            _ => Color::White,
        };

        let evidence = fused
            .provenance
            .iter()
            .map(|score| truncate(&describe_evidence(&score.evidence), 60))
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(truncate(&fused.paper.title, 60)),
            Cell::new(fused.paper.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string())),
            Cell::new(channels).fg(color),
            Cell::new(evidence),
            Cell::new(format!("{:.4}", fused.best_score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_result_json(result: &RetrievalResult) -> Result<String> {
    serde_json::to_string_pretty(result).with_context(|| "Failed to serialize results to JSON")
}

fn print_result(result: &RetrievalResult, format: OutputFormat, elapsed_secs: f64) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", format_result_table(result));
            if !result.timed_out.is_empty() {
                let channels: Vec<&str> = result.timed_out.iter().map(|c| c.as_str()).collect();
                println!("\nTimed out: {}", channels.join(", "));
            }
            println!(
                "\nFound {} papers (vector {}, graph {}, entity {}) in {:.2}s",
                result.total_papers,
                result.vector.len(),
                result.graph.len(),
                result.entity.len(),
                elapsed_secs
            );
        }
        OutputFormat::Json => println!("{}", format_result_json(result)?),
    }
    Ok(())
}

/// Display detailed view of a single fused paper
fn display_paper_detail(fused: &FusedPaper, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Id: {}", fused.paper.id);
    println!("Title: {}", fused.paper.title);
    if let Some(year) = fused.paper.year {
        println!("Year: {}", year);
    }
    println!("Best score: {:.4}", fused.best_score);
    println!("\nEvidence:");
    for score in &fused.provenance {
        println!(
            "  - {} (score {:.4}, normalized {:.4})",
            describe_evidence(&score.evidence),
            score.score,
            score.normalized
        );
    }
    if !fused.paper.abstract_text.is_empty() {
        println!("\nAbstract:\n{}", fused.paper.abstract_text);
    }
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <question>       - Retrieve papers for a question");
    println!("  /top N           - Keep N results per channel");
    println!("  /threshold S     - Set the vector similarity cut-off (-1 to 1)");
    println!("  /format table    - Use table output format");
    println!("  /format json     - Use JSON output format");
    println!("  /detail N        - Show evidence and abstract for result rank N");
    println!("  /help            - Show this help");
    println!("  Ctrl+D or Ctrl+C - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    engine: &dyn Retriever,
    mut top_k: usize,
    mut threshold: f32,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Paper GraphRAG");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;
    let mut last_result: Option<RetrievalResult> = None;

    loop {
        match rl.readline("Ask> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok(); // Ignore errors from adding to history

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts.as_slice() {
                        ["/help"] => print_help(),
                        ["/top", n] => match n.parse::<usize>() {
                            Ok(n) if n > 0 => {
                                top_k = n;
                                println!("Set top-k to {}", top_k);
                            }
                            _ => eprintln!("Invalid number: must be a positive integer"),
                        },
                        ["/threshold", s] => match s.parse::<f32>() {
                            Ok(s) if (-1.0..=1.0).contains(&s) => {
                                threshold = s;
                                println!("Set similarity threshold to {}", threshold);
                            }
                            _ => eprintln!("Invalid threshold: must be a number between -1 and 1"),
                        },
                        ["/format", "table"] => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        ["/format", "json"] => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        ["/detail", n] => {
                            let papers = last_result.as_ref().map(|r| r.papers.as_slice()).unwrap_or(&[]);
                            match n.parse::<usize>() {
                                Ok(rank) if rank > 0 && rank <= papers.len() => {
                                    display_paper_detail(&papers[rank - 1], rank);
                                }
                                Ok(rank) if rank > papers.len() => {
                                    eprintln!(
                                        "Rank {} out of range (last query had {} papers)",
                                        rank,
                                        papers.len()
                                    );
                                }
                                _ => eprintln!("Invalid rank: must be a positive integer"),
                            }
                        }
                        ["/top", ..] => eprintln!("Usage: /top N"),
                        ["/threshold", ..] => eprintln!("Usage: /threshold S"),
                        ["/format", ..] => eprintln!("Usage: /format [table|json]"),
                        ["/detail", ..] => eprintln!("Usage: /detail N"),
                        _ => eprintln!("Unknown command: {}. Type /help for available commands.", line),
                    }
                    continue;
                }

                let start = Instant::now();
                match execute_query(engine, line, top_k, threshold).await {
                    Ok(result) => {
                        if let Err(e) = print_result(&result, format, start.elapsed().as_secs_f64()) {
                            eprintln!("Error formatting result: {:#}", e);
                        }
                        last_result = Some(result);
                    }
                    Err(e) => eprintln!("Query failed: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level);

    if !args.interactive && args.query.is_none() {
        anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }

    let retrieval_config = load_retrieval_config(&args)?;
    let (store, paper_count) = open_store(&args).await?;

    let embedding_config = store
        .embedding_config()
        .await
        .with_context(|| "Failed to read the graph's embedding configuration")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "The graph has no embedding configuration.\n\
                 Its papers cannot be compared with query embeddings."
            )
        })?;

    info!(
        "Using embedding model: {} (dimension: {})",
        embedding_config.model_name, embedding_config.dimension
    );

    if paper_count == 0 {
        anyhow::bail!("The graph is empty (0 papers found).");
    }
    info!("Graph contains {} papers", paper_count);

    let cache_dir = args.cache_dir.clone().or_else(default_cache_dir);
    let embedder = create_embedding_provider(&embedding_config, cache_dir)?;
    info!("Embedding provider initialized successfully");

    let top_k = retrieval_config.top_k;
    let threshold = retrieval_config.similarity_threshold;
    let engine = GraphRagEngine::new(embedder, store)
        .with_config(retrieval_config)
        .with_context(|| "Invalid retrieval settings")?;

    match args.query.as_deref() {
        Some(question) if !args.interactive => {
            let start = Instant::now();
            let result = execute_query(&engine, question, top_k, threshold).await?;
            print_result(&result, args.format, start.elapsed().as_secs_f64())?;
        }
        _ => run_interactive(&engine, top_k, threshold, args.format).await?,
    }

    Ok(())
}
