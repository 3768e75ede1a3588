mod noninteractive;
mod output;
mod repl;

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::agent::CommandPipeline;
use crate::core::config::AppConfig;
use crate::core::ledger::{EntryFilter, LedgerStore};
use crate::engine::{create_engine, gguf};
use crate::storage::{Database, SettingsStore};

#[derive(Parser, Debug)]
#[command(name = "nl-ledger", version, about = "Natural-language expense ledger backed by a local model")]
struct Cli {
    /// Non-interactive mode: run one request and print the result
    #[arg(short, long)]
    prompt: Option<String>,

    /// GGUF model to load (overrides config and the remembered model)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Validate a GGUF file, copy it into the data directory and remember it
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Working directory
    #[arg(short = 'c', long = "cwd")]
    working_dir: Option<PathBuf>,

    /// Output format for non-interactive mode
    #[arg(short = 'f', long, default_value = "text")]
    output_format: OutputFormat,

    /// Suppress progress indicators
    #[arg(short, long)]
    quiet: bool,

    /// Print the ledger and exit
    #[arg(long)]
    list: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct App {
    pub pipeline: CommandPipeline,
    pub store: Arc<dyn LedgerStore>,
    pub config: AppConfig,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = crate::core::config::load_config(cli.working_dir.clone())?;
    config.debug |= cli.debug;
    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }

    let settings = SettingsStore::new(&config.data_path());

    if let Some(src) = &cli.import {
        return import(&config, &settings, src).await;
    }

    let db = Database::open(&config).await?;
    db.run_migrations().await?;
    let store: Arc<dyn LedgerStore> = Arc::new(db.entries());

    if cli.list {
        let entries = store.list(&EntryFilter::All).await?;
        output::render_entries(&entries);
        return Ok(());
    }

    let model = config.model_path.clone().or_else(|| match settings.load() {
        Ok(s) => s.last_model_path,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable settings");
            None
        }
    });

    let engine = create_engine(&config)?;
    let pipeline = CommandPipeline::new(config.clone(), engine, Arc::clone(&store))
        .with_settings(settings);
    let app = App {
        pipeline,
        store,
        config,
    };

    match cli.prompt {
        Some(prompt) => noninteractive::run(app, model, prompt, cli.output_format, cli.quiet).await,
        None => repl::run(app, model).await,
    }
}

async fn import(config: &AppConfig, settings: &SettingsStore, src: &Path) -> Result<()> {
    let dest = gguf::import_model(src, &config.models_path()).await?;
    settings.remember_model(&dest)?;
    println!("Imported model to \x1b[36m{}\x1b[0m", dest.display());
    Ok(())
}
