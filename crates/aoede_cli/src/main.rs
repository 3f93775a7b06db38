use anyhow::{Context, Result};
use aoede_core::AoedeConfig;
use aoede_memory::{write_exports, ConsolidationEngine, SleepReport, SqliteStore};
use aoede_pipeline::{register_builtins, HttpModelClient, Pipeline, ToolRegistry};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod repl;

#[derive(Parser, Debug)]
#[command(name = "aoede", version, about = "A personal companion with memory, mood, and sleep")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "aoede.toml", env = "AOEDE_CONFIG")]
    config: String,

    /// Override the database path from the config
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat (the default when no subcommand is given)
    Chat {
        /// User id the session belongs to
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Send a single message and print the reply instead of opening the REPL
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Run one consolidation batch immediately
    Sleep,
    /// Shrink all bandit arms by the configured decay factor
    Decay,
    /// Regenerate the training export files from the current log
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = AoedeConfig::load_or_default(&cli.config);
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    resolve_storage_paths(&mut config)?;

    let command = cli.command.unwrap_or(Commands::Chat {
        user: "local".to_string(),
        message: None,
    });

    match command {
        Commands::Chat { user, message } => {
            let runtime = Runtime::build(&config).await?;
            repl::run(runtime.pipeline, runtime.consolidation, user, message).await
        }
        Commands::Sleep => {
            let runtime = Runtime::build(&config).await?;
            let report = runtime.consolidation.run_now().await?;
            print_sleep_report(&report);
            Ok(())
        }
        Commands::Decay => {
            let runtime = Runtime::build(&config).await?;
            let touched = runtime.pipeline.bandit().decay().await?;
            println!("Decayed {} bandit arms.", touched);
            Ok(())
        }
        Commands::Export => {
            let store = open_store(&config).await?;
            let summary = write_exports(&store, Path::new(&config.storage.export_dir)).await?;
            println!(
                "Wrote {} SFT rows and {} dispatcher tuning rows to {}.",
                summary.sft_rows, summary.tuning_rows, config.storage.export_dir
            );
            Ok(())
        }
    }
}

struct Runtime {
    pipeline: Arc<Pipeline>,
    consolidation: Arc<ConsolidationEngine>,
}

impl Runtime {
    async fn build(config: &AoedeConfig) -> Result<Self> {
        let store = Arc::new(open_store(config).await?);

        let dispatcher = Arc::new(HttpModelClient::dispatcher(&config.models)?);
        let executor = Arc::new(HttpModelClient::executor(&config.models)?);
        info!(
            base_url = %config.models.base_url,
            dispatcher = %config.models.dispatcher_model,
            executor = %config.models.executor_model,
            "model endpoints configured"
        );

        let mut tools = ToolRegistry::new();
        register_builtins(&mut tools, store.clone());

        let pipeline = Arc::new(
            Pipeline::new(store.clone(), config.clone(), dispatcher, executor).with_tools(tools),
        );
        let consolidation = Arc::new(
            ConsolidationEngine::new(store.as_ref().clone(), config.sleep.clone())
                .with_affect(pipeline.affect())
                .with_export_dir(PathBuf::from(&config.storage.export_dir)),
        );

        Ok(Self {
            pipeline,
            consolidation,
        })
    }
}

async fn open_store(config: &AoedeConfig) -> Result<SqliteStore> {
    info!(path = %config.storage.db_path, "opening store");
    SqliteStore::new(&config.storage.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.storage.db_path))
}

/// Relative storage paths land in the platform data directory so that
/// running `aoede` from anywhere finds the same database.
fn resolve_storage_paths(config: &mut AoedeConfig) -> Result<()> {
    let root = data_root();
    if Path::new(&config.storage.db_path).is_relative() {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data dir {}", root.display()))?;
        config.storage.db_path = root
            .join(&config.storage.db_path)
            .to_string_lossy()
            .into_owned();
    }
    if Path::new(&config.storage.export_dir).is_relative() {
        config.storage.export_dir = root
            .join(&config.storage.export_dir)
            .to_string_lossy()
            .into_owned();
    }
    Ok(())
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("aoede"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn print_sleep_report(report: &SleepReport) {
    if report.performed {
        println!(
            "Slept: {} messages consolidated, {} day summaries written, {} promoted to long-term.",
            report.processed_count, report.days_summarized, report.days_promoted
        );
        if let Some(batch_id) = &report.batch_id {
            println!("Batch {}.", batch_id);
        }
    } else {
        println!(
            "Sleep skipped: {}.",
            report.skip_reason.as_deref().unwrap_or("not due")
        );
    }
}
