//! Command-line entry point for the document similarity batch job.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use docsim_similarity::{CommitPolicy, SimilarityConfig, SimilarityPipeline, WriteMode};
use docsim_store_sqlite::SqliteStore;

pub mod import;

/// Compute pairwise similarities between document embeddings.
#[derive(Debug, Parser)]
#[command(name = "docsim", version, about)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// SQLite database holding embeddings and similarities
    #[arg(long, env = "DOCSIM_DATABASE", global = true, default_value = "docsim.db")]
    pub database: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database schema
    Init,
    /// Load documents from a JSONL file of {"document_id", "vector"} records
    Import(ImportArgs),
    /// Compute and store all pairwise similarities
    Run(RunArgs),
    /// Show row counts
    Status,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSONL file to load
    pub file: PathBuf,

    /// Scale vectors to unit length so scores are cosine similarities
    #[arg(long)]
    pub normalize: bool,
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// TOML configuration file; flags override its values
    #[arg(long, env = "DOCSIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Documents per group
    #[arg(long)]
    pub group_size: Option<usize>,

    /// per_entry, per_group_pair, end_of_run or every_n:<count>
    #[arg(long)]
    pub commit: Option<CommitPolicy>,

    /// Skip group pairs completed by an earlier run
    #[arg(long)]
    pub resume: bool,

    /// Replace existing scores instead of failing on them
    #[arg(long)]
    pub upsert: bool,

    /// Group-pair matrices computed concurrently
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Attempts per store operation before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl RunArgs {
    /// Build the run configuration from the config file and flags.
    pub fn to_config(&self) -> Result<SimilarityConfig> {
        let mut config = match &self.config {
            Some(path) => SimilarityConfig::from_toml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SimilarityConfig::default(),
        };

        if let Some(group_size) = self.group_size {
            config.group_size = group_size;
        }
        if let Some(commit) = self.commit {
            config.commit = commit;
        }
        if self.resume {
            config.resume = true;
        }
        if self.upsert {
            config.write_mode = WriteMode::Upsert;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            config.max_in_flight = max_in_flight;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Install the tracing subscriber, writing to stderr.
pub fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute a parsed command line.
pub async fn run_main(cli: Cli) -> Result<()> {
    let database = cli.database;
    let open = || {
        SqliteStore::open(&database)
            .with_context(|| format!("opening database {}", database.display()))
    };

    match cli.command {
        Command::Init => {
            open()?;
            println!("Initialized {}", database.display());
        }
        Command::Import(args) => {
            let file = File::open(&args.file)
                .with_context(|| format!("opening {}", args.file.display()))?;
            let documents = import::read_documents(BufReader::new(file), args.normalize)
                .with_context(|| format!("reading {}", args.file.display()))?;

            let mut store = open()?;
            let count = store
                .insert_documents(&documents)
                .context("inserting documents")?;
            info!("Imported {count} documents from {}", args.file.display());
            println!("Imported {count} documents");
        }
        Command::Run(args) => {
            let config = args.to_config()?;
            let mut store = open()?;
            let stats = SimilarityPipeline::new(config)
                .run(&mut store)
                .await
                .context("similarity run failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Status => {
            let counts = open()?.counts().context("counting rows")?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
