//! ocr-orchestrator - run OCR engines from the command line

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use ocr_orchestrator::config::{self, OrchestratorConfig};
use ocr_orchestrator::engine::find_free_port;
use ocr_orchestrator::{init_tracing, EngineRegistry, OcrAdapter, RecognitionRequest};

#[derive(Parser, Debug)]
#[command(name = "ocr-orchestrator")]
#[command(about = "Launch OCR engines, recognize images and print normalized results")]
struct Args {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize text in an image and print the normalized result as JSON
    Recognize {
        /// Adapter name or alias (ppocr, manga-ocr)
        #[arg(short, long, default_value = "ppocr")]
        engine: String,

        #[arg(short, long)]
        image: PathBuf,

        #[arg(short, long, default_value = "en")]
        language: String,

        /// Attach to an engine already listening at this address
        #[arg(long)]
        connect: Option<String>,
    },

    /// List the languages an engine supports
    Languages {
        #[arg(short, long, default_value = "ppocr")]
        engine: String,

        #[arg(long)]
        connect: Option<String>,
    },

    /// Print the first free TCP port in a range
    FindPort {
        #[arg(long, default_value = "53000")]
        start: u16,

        #[arg(long, default_value = "53100")]
        end: u16,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

fn load(path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let path = match path {
        Some(path) => Some(path),
        None => config::default_config_path().ok().filter(|p| p.exists()),
    };
    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            config::load_config(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => OrchestratorConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn start_engine(
    config: &OrchestratorConfig,
    engine: &str,
    connect: Option<&str>,
) -> Result<(EngineRegistry, Arc<dyn OcrAdapter>)> {
    let registry = EngineRegistry::new(config);
    let Some(adapter) = registry.get(engine) else {
        bail!("unknown or disabled engine: {engine}");
    };
    adapter
        .initialize(connect)
        .await
        .with_context(|| format!("starting {}", adapter.name()))?;
    Ok((registry, adapter))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);
    let config = load(args.config)?;

    match args.command {
        Command::Recognize {
            engine,
            image,
            language,
            connect,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            let (registry, adapter) = start_engine(&config, &engine, connect.as_deref()).await?;

            let result = adapter.recognize(RecognitionRequest::new(bytes, language)).await;
            registry.shutdown_all().await;

            match result {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => bail!("{} returned no result", adapter.name()),
            }
        }
        Command::Languages { engine, connect } => {
            let (registry, adapter) = start_engine(&config, &engine, connect.as_deref()).await?;
            let languages = adapter.get_supported_languages().await;
            registry.shutdown_all().await;
            for language in languages {
                println!("{language}");
            }
        }
        Command::FindPort { start, end } => match find_free_port(start..=end).await {
            Some(port) => {
                info!(port, "found free port");
                println!("{port}");
            }
            None => bail!("no free port in {start}..={end}"),
        },
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config).context("serializing configuration")?);
        }
    }

    Ok(())
}
