//! docqa - command-line interface for the document QA retrieval engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docqa_core::{DocqaConfig, Generator, Query, RankedResult, SimilarityStore, Signal};
use docqa_embed::HashingEmbedder;
use docqa_llm::OpenAiGenerator;
use docqa_query::{expander_for, RetrievalEngine};
use docqa_store::MemoryStore;

/// docqa - Retrieve and rank document fragments for a question
#[derive(Parser)]
#[command(name = "docqa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/docqa/config.toml, then ./docqa.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a fragment corpus
    Search {
        /// The question
        question: String,

        /// JSON file holding the fragment corpus
        #[arg(long)]
        corpus: PathBuf,

        /// Restrict retrieval to one document
        #[arg(short, long)]
        document: Option<String>,

        /// Maximum number of results (overrides retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip the language model and expand with rules only
        #[arg(long)]
        offline: bool,

        /// Print the ranked result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a question would be expanded
    Expand {
        /// The question
        question: String,

        /// Corpus used to filter synonym concepts
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Skip the language model and expand with rules only
        #[arg(long)]
        offline: bool,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

fn setup_logging(verbose: bool) {
    if verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> docqa_core::Result<DocqaConfig> {
    match path {
        Some(path) => DocqaConfig::load(path),
        None => DocqaConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Search {
            question,
            corpus,
            document,
            top_k,
            offline,
            json,
        } => {
            if let Some(k) = top_k {
                config.retrieval.top_k = k;
            }
            let store = open_corpus(&config, &corpus).await?;
            let engine = build_engine(&config, store, offline)?;

            let mut query = Query::new(&question);
            if let Some(doc_id) = document.as_deref() {
                query = query.for_document(doc_id);
            }

            let start = Instant::now();
            let result = engine.search(&query).await;
            let elapsed_ms = start.elapsed().as_millis();
            if json {
                print_json(&result)?;
            } else {
                print_result(&result, elapsed_ms);
            }
        }
        Commands::Expand {
            question,
            corpus,
            offline,
        } => {
            let store = match corpus {
                Some(path) => open_corpus(&config, &path).await?,
                None => Arc::new(MemoryStore::new(Vec::new(), embedder(&config)?).await?),
            };
            let engine = build_engine(&config, store, offline)?;
            let expansion = engine.expand(&Query::new(&question)).await;
            println!("{}", serde_json::to_string_pretty(&expansion)?);
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK");
            println!("  candidate_limit: {}", config.retrieval.candidate_limit);
            println!("  top_k: {}", config.retrieval.top_k);
            println!("  max_per_source: {}", config.retrieval.max_per_source);
            println!("  expansion: {}", if config.expansion.enabled { "enabled" } else { "disabled" });
            println!("  model: {} @ {}", config.llm.model, config.llm.endpoint);
        }
    }

    Ok(())
}

fn embedder(config: &DocqaConfig) -> docqa_core::Result<Arc<HashingEmbedder>> {
    Ok(Arc::new(HashingEmbedder::new(config.embedding.dimension)?))
}

async fn open_corpus(
    config: &DocqaConfig,
    path: &Path,
) -> Result<Arc<MemoryStore>, Box<dyn std::error::Error>> {
    let store = MemoryStore::from_json_file(path, embedder(config)?).await?;
    if store.is_empty() {
        eprintln!("Corpus {} holds no fragments", path.display());
    }
    Ok(Arc::new(store))
}

/// Wire the engine. A missing API key falls back to rule-based expansion.
fn build_engine(
    config: &DocqaConfig,
    store: Arc<MemoryStore>,
    offline: bool,
) -> docqa_core::Result<RetrievalEngine> {
    let generator: Option<Arc<dyn Generator>> = if offline || !config.expansion.enabled {
        None
    } else {
        match OpenAiGenerator::from_env(config.llm.clone()) {
            Ok(generator) => Some(Arc::new(generator) as Arc<dyn Generator>),
            Err(e) => {
                warn!("Generation unavailable, using rule-based expansion: {}", e);
                None
            }
        }
    };

    let expander = expander_for(config, generator);
    let similarity: Arc<dyn SimilarityStore> = store.clone();
    Ok(RetrievalEngine::new(config, similarity, expander)?.with_corpus_stats(store))
}

fn print_result(result: &RankedResult, elapsed_ms: u128) {
    if result.is_empty() {
        println!("No relevant context found.");
        return;
    }

    let mut output = format!(
        "Found {} results in {}ms (type: {}, {} candidates):\n\n",
        result.len(),
        elapsed_ms,
        result.query_type,
        result.candidates_considered
    );

    for ranked in &result.results {
        let fragment = &ranked.fragment;
        output.push_str(&format!(
            "---\n[{}] {} / {} (score: {:.3})\n",
            ranked.rank, fragment.filename, fragment.id, ranked.score
        ));
        if let Some(section) = &fragment.section {
            output.push_str(&format!("Section: {}\n", section));
        }

        let signals = Signal::ALL
            .iter()
            .map(|s| format!("{}={:.2}", s.name(), ranked.signals.get(*s)))
            .collect::<Vec<_>>()
            .join(" ");
        output.push_str(&format!("Signals: {}\n\n", signals));
        output.push_str(&fragment.content);
        output.push_str("\n\n");
    }

    if result.diversity_shortfall {
        output.push_str("Note: too few sources to honor the per-document cap.\n");
    }

    print!("{}", output);
}

fn print_json(result: &RankedResult) -> Result<(), serde_json::Error> {
    let value = serde_json::json!({
        "result": result,
        "references": result.references(),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
