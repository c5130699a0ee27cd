//! bike-vss CLI
//!
//! Command-line interface for seeding the bike catalog and querying it.

use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bike_vss::{
    store, AppConfig, EmbeddingModelKind, FastEmbedProvider, HttpCatalogClient, QueryReport,
    Result, SearchHit, Searcher, SeedOptions, SeedOutcome, Seeder,
};

#[derive(Parser)]
#[command(name = "bike-vss")]
#[command(author, version, about = "Bike catalog vector similarity search", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "bike-vss.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Store host (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Store port (overrides the configuration file)
    #[arg(long)]
    port: Option<u16>,

    /// Embedding model, e.g. "bge-base-en-v1.5" (also sets the index dimension)
    #[arg(long)]
    model: Option<EmbeddingModelKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "bike-vss.toml")]
        output: String,
    },

    /// Load the catalog, embed descriptions and build the index
    Seed {
        /// Re-seed even if the store is already seeded
        #[arg(long)]
        force: bool,
    },

    /// Run one similarity query
    Search {
        /// Free-text query
        query: String,

        /// Number of hits to return
        #[arg(short, long)]
        k: Option<usize>,

        /// Pre-filter expression, e.g. "@brand:Peaknetic"
        #[arg(long)]
        filter: Option<String>,
    },

    /// Run every configured query and print the hits
    Report,

    /// Show search index statistics
    Info,

    /// Seed, then run the report, in one process
    Demo,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        info!("Loading configuration from: {}", cli.config);
        AppConfig::load(&cli.config)?
    } else {
        info!("Using default configuration");
        AppConfig::default()
    };
    if let Some(host) = &cli.host {
        config.store.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.store.port = port;
    }
    if let Some(model) = cli.model {
        config.embedding.model = model;
        config.embedding.dimension = model.dimension();
    }
    config.validate()?;
    Ok(config)
}

fn print_hits(hits: &[SearchHit]) {
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. {:<10} {:.4}  {} {}",
            rank + 1,
            hit.id,
            hit.score,
            hit.brand().unwrap_or("-"),
            hit.model().unwrap_or("-"),
        );
        if let Some(description) = hit.description() {
            println!("    {}", description);
        }
    }
}

fn print_report(reports: &[QueryReport]) {
    for report in reports {
        println!("\n{}", report.query);
        print_hits(&report.hits);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        info!("Initializing new configuration at: {}", output);
        AppConfig::default().save(output)?;
        info!("Configuration saved successfully");
        return Ok(());
    }

    let config = load_config(&cli)?;
    let store = store::connect(&config.store).await?;

    if let Commands::Info = cli.command {
        let stats = store.index_stats(&config.index.name).await?;
        println!("index:              {}", stats.name);
        println!("num_docs:           {}", stats.num_docs);
        println!("indexing_failures:  {}", stats.indexing_failures);
        return Ok(());
    }

    // One model instance for the whole process.
    let kind = config.embedding.model;
    let show_progress = config.embedding.show_download_progress;
    let provider = tokio::task::spawn_blocking(move || FastEmbedProvider::new(kind, show_progress))
        .await
        .map_err(|e| bike_vss::Error::Embedding(e.to_string()))??;
    let provider = Arc::new(provider);

    match cli.command {
        Commands::Seed { force } => {
            let source = Arc::new(HttpCatalogClient::from_config(&config.catalog)?);
            let seeder = Seeder::new(store, source, provider, config)?;
            let report = seeder.run(SeedOptions { force }).await?;
            match report.outcome {
                SeedOutcome::AlreadySeeded => println!("already seeded"),
                SeedOutcome::Seeded => println!(
                    "seeded {} documents ({} dimensions)",
                    report.records, report.dimension
                ),
            }
        }

        Commands::Search { query, k, filter } => {
            let k = k.unwrap_or(config.search.k);
            let filter = filter.unwrap_or_else(|| config.search.filter.clone());
            let searcher = Searcher::new(store, provider, config)?;
            let hits = searcher.search_filtered(&query, &filter, k).await?;
            print_hits(&hits);
        }

        Commands::Report => {
            let queries = config.search.queries.clone();
            let searcher = Searcher::new(store, provider, config)?;
            print_report(&searcher.run_report(&queries).await?);
        }

        Commands::Demo => {
            let source = Arc::new(HttpCatalogClient::from_config(&config.catalog)?);
            let seeder = Seeder::new(
                Arc::clone(&store),
                source,
                provider.clone(),
                config.clone(),
            )?;
            seeder.run(SeedOptions::default()).await?;
            let queries = config.search.queries.clone();
            let searcher = Searcher::new(store, provider, config)?;
            print_report(&searcher.run_report(&queries).await?);
        }

        Commands::Init { .. } | Commands::Info => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
