use nl_analytics::pipeline::{AnalysisOutcome, Analyst};
use nl_analytics::query::{self, ResultRow};
use nl_analytics::resolver::PlanResolver;
use nl_analytics::{prompt, AppConfig, OllamaClient, SourceRegistry};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl-analytics")]
#[command(about = "Say what you want to analyze; get the query, the rows and a summary")]
#[command(version)]
struct Args {
    /// Project root that source paths are relative to (or NL_ANALYTICS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// JSON source catalog replacing the builtin sources (or NL_ANALYTICS_CATALOG)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured data sources
    Sources,
    /// Answer a one-sentence request against a source
    Ask {
        /// Source id (e.g. sales, events)
        source: String,

        /// The request, e.g. "profit trend over time"
        request: String,

        /// Skip the text generator and use keyword matching only
        #[arg(long)]
        offline: bool,

        /// Resolve and compile only; do not query the database
        #[arg(long)]
        dry_run: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Text generator base URL (or OLLAMA_URL)
        #[arg(long)]
        ollama_url: Option<String>,

        /// Text generator model (or OLLAMA_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Generator timeout in seconds (or OLLAMA_TIMEOUT_SECS)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Show the prompt that would be sent to the text generator
    Prompt {
        source: String,
        request: String,
    },
    /// Row count and column check for a source table
    Stats { source: String },
    /// Column names and types of a source table
    Schema { source: String },
    /// First rows of a source table
    Preview {
        source: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env().context("Failed to read configuration")?;
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(catalog) = args.catalog {
        config.catalog_path = Some(catalog);
    }
    let registry = config.load_registry().context("Failed to load source catalog")?;

    match args.command {
        Commands::Sources => list_sources(&registry),
        Commands::Ask {
            source,
            request,
            offline,
            dry_run,
            json,
            ollama_url,
            model,
            timeout_secs,
        } => {
            if let Some(url) = ollama_url {
                config.ollama_url = url;
            }
            if let Some(model) = model {
                config.ollama_model = model;
            }
            if let Some(secs) = timeout_secs {
                config.generation_timeout = Duration::from_secs(secs.max(1));
            }
            let resolver = if offline {
                PlanResolver::offline()
            } else {
                let client = OllamaClient::from_config(&config)?;
                PlanResolver::new(Arc::new(client), config.generation_timeout)
            };
            let analyst = Analyst::new(&registry, resolver);
            ask(&analyst, &source, &request, dry_run, json).await
        }
        Commands::Prompt { source, request } => {
            let source = registry.resolve(&source)?;
            println!("{}", prompt::build_for_source(&request, source));
            Ok(())
        }
        Commands::Stats { source } => {
            let source = registry.resolve(&source)?;
            let stats = query::table_stats(source)?;
            println!("Engine:     SQLite (local file)");
            println!("Path:       {}", stats.db_path.display());
            println!("Table:      {}", stats.table);
            println!("Total rows: {}", stats.row_count);
            println!("Columns:    {}", stats.columns.join(", "));
            if !stats.missing_columns.is_empty() {
                println!("Missing:    {} (re-run ETL)", stats.missing_columns.join(", "));
            }
            Ok(())
        }
        Commands::Schema { source } => {
            let source = registry.resolve(&source)?;
            println!("Table: {}", source.table);
            for column in query::table_schema(source)? {
                println!("  {:<20} {}", column.name, column.data_type);
            }
            Ok(())
        }
        Commands::Preview { source, limit } => {
            let source = registry.resolve(&source)?;
            let preview = query::preview(source, limit)?;
            println!("{}", preview.columns.join("\t"));
            for row in preview.rows {
                println!("{}", row.join("\t"));
            }
            Ok(())
        }
    }
}

fn list_sources(registry: &SourceRegistry) -> Result<()> {
    for source in registry.sources() {
        println!("{:<10} {}", source.id, source.name);
        println!("           db:    {}", source.db_path.display());
        println!("           table: {}", source.table);
        println!("           {}", source.request_hint());
    }
    Ok(())
}

async fn ask(
    analyst: &Analyst<'_>,
    source: &str,
    request: &str,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    info!("Request on '{}': {}", source, request);

    if dry_run {
        let dry = analyst.dry_run(source, request).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&dry)?);
        } else {
            if let Some(notice) = &dry.resolution.notice {
                println!("Note: {}", notice);
            }
            println!("Plan: {}", serde_json::to_string(&dry.resolution.plan)?);
            println!("\n{}", dry.query.sql);
        }
        return Ok(());
    }

    let outcome = analyst.ask(source, request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome)?;
    }
    Ok(())
}

fn print_outcome(outcome: &AnalysisOutcome) -> Result<()> {
    let resolution = &outcome.resolution;
    if let Some(notice) = &resolution.notice {
        println!("Note: {}", notice);
    }
    for correction in &resolution.corrections {
        println!("Adjusted: {}", correction);
    }

    println!("\n{} [{} chart]", outcome.title, resolution.plan.chart_type.label());
    let origin = match resolution.cached_from {
        Some(first) => format!("{:?} from {:?}", resolution.origin, first),
        None => format!("{:?}", resolution.origin),
    };
    println!("Plan ({}): {}", origin, serde_json::to_string(&resolution.plan)?);
    println!("\n{}\n", outcome.result.query_text);

    for row in &outcome.result.rows {
        match row {
            ResultRow::Categorical { dim, value } => println!("  {:<24} {:>16.2}", dim, value),
            ResultRow::Time { date, value } => println!("  {:<24} {:>16.2}", date, value),
            ResultRow::TimeBreakdown { date, category, value } => {
                println!("  {:<10} {:<24} {:>16.2}", date, category, value)
            }
        }
    }

    println!("\n{}", outcome.summary);
    Ok(())
}
