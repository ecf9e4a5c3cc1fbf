//! dwell-search CLI
//!
//! Runs searches and recommendations against Elasticsearch with Gemini, or
//! fully offline against a JSON listings file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dwell_search::{
    DisabledEmbedder, DisabledGenerator, ElasticsearchIndex, EmbeddingProvider, EngineConfig,
    Environment, GeminiEmbedder, GeminiGenerator, GenerativeProvider, Listing, RawQuery,
    SearchEngine,
};

/// Hybrid keyword, vector and geo search over rental listings
#[derive(Parser)]
#[command(name = "dwell-search")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// JSON config file; missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Search a JSON array of listings in memory instead of Elasticsearch
    #[arg(long, global = true)]
    listings: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ranked listings for a query
    Search(QueryArgs),

    /// Listings re-ranked against budget, type and location
    Recommend(QueryArgs),

    /// Listings similar to a known listing
    Similar {
        listing_id: String,
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Index statistics
    Stats,

    /// Provider readiness
    Health,
}

#[derive(Args)]
struct QueryArgs {
    /// Free-text query, e.g. "2bhk near metro under 25k"
    text: Option<String>,
    /// City, locality or "lat,lon"
    #[arg(long)]
    location: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    budget_min: Option<f64>,
    #[arg(long)]
    budget_max: Option<f64>,
    /// apartment, pg, co-living, student-housing, hostel or studio
    #[arg(long = "type")]
    accommodation_type: Option<String>,
    /// keyword, semantic, hybrid or geo
    #[arg(long)]
    search_type: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    limit: Option<i64>,
}

impl From<QueryArgs> for RawQuery {
    fn from(args: QueryArgs) -> Self {
        RawQuery {
            text: args.text,
            location: args.location,
            lat: args.lat,
            lon: args.lon,
            budget_min: args.budget_min,
            budget_max: args.budget_max,
            accommodation_type: args.accommodation_type,
            search_type: args.search_type,
            limit: args.limit,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let config = config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &EngineConfig) {
    // RUST_LOG wins over the configured level. Keep HTTP client noise down.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.log_level))
    });

    // Logs go to stderr so stdout stays valid JSON.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.environment {
        Environment::Production => builder.json().with_current_span(true).init(),
        Environment::Development => builder.with_target(false).init(),
    }
}

fn build_engine(config: EngineConfig, listings: Option<&Path>) -> Result<SearchEngine> {
    if let Some(path) = listings {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read listings file {}", path.display()))?;
        let listings: Vec<Listing> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse listings file {}", path.display()))?;
        tracing::info!(count = listings.len(), "loaded listings for offline search");
        return Ok(SearchEngine::in_memory(config, listings)?);
    }

    let index = Arc::new(ElasticsearchIndex::new(&config.index)?);
    let (embedder, generator): (Arc<dyn EmbeddingProvider>, Arc<dyn GenerativeProvider>) =
        match config.ai.gemini_api_key.clone() {
            Some(key) => (
                Arc::new(GeminiEmbedder::new(key.clone(), &config.ai)?),
                Arc::new(GeminiGenerator::new(key, &config.ai)?),
            ),
            None => {
                // Stored vectors come from Gemini, so there is no local substitute.
                tracing::warn!(
                    "GEMINI_API_KEY not set: vector search, intent extraction and summaries \
                     disabled"
                );
                (
                    Arc::new(DisabledEmbedder::new(config.ai.embedding_dimension)),
                    Arc::new(DisabledGenerator),
                )
            }
        };

    Ok(SearchEngine::new(config, index, embedder, generator)?)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config);

    let engine = build_engine(config, cli.listings.as_deref())?;

    match cli.command {
        Commands::Search(args) => {
            let response = engine.search(&args.into()).await?;
            print_json(&response, cli.pretty)
        }
        Commands::Recommend(args) => {
            let response = engine.recommend(&args.into()).await?;
            print_json(&response, cli.pretty)
        }
        Commands::Similar { listing_id, limit } => {
            let response = engine.similar(&listing_id, limit).await?;
            print_json(&response, cli.pretty)
        }
        Commands::Stats => print_json(&engine.stats().await?, cli.pretty),
        Commands::Health => print_json(&engine.health().await, cli.pretty),
    }
}
