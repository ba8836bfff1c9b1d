use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use facematch::config::{self, DetectorBackend};
use facematch::{OnnxProvider, RankOutcome, RankingEntry, RunOptions};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Rank look-alike images by facial similarity to a subject image"
)]
struct Cli {
    /// Path to the subject image
    #[arg(long = "subjectPath", default_value = "data/subject/stock_twins_1.jpg")]
    subject_path: PathBuf,

    /// Path to the doubles directory
    #[arg(long = "doublesPath", default_value = "data/doubles")]
    doubles_path: PathBuf,

    /// Name of the model to use for embedding
    #[arg(long = "model_name", default_value = "VGG-Face")]
    model_name: String,

    /// Enable verbose output (default)
    #[arg(long, overrides_with = "no_verbose")]
    verbose: bool,

    /// Disable verbose output
    #[arg(long = "no-verbose", overrides_with = "verbose")]
    no_verbose: bool,

    /// Config file (defaults to the system config path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the ONNX model files
    #[arg(long = "models-dir")]
    models_dir: Option<PathBuf>,

    /// Face detector to run before encoding
    #[arg(long, value_enum)]
    detector: Option<DetectorBackend>,

    /// Output format for the ranking
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Cli {
    fn verbose(&self) -> bool {
        !self.no_verbose
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct Report<'a> {
    status: &'static str,
    rankings: &'a [RankingEntry],
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.models_dir {
        cfg.models_dir = dir.clone();
    }
    if let Some(detector) = cli.detector {
        cfg.detector = detector;
    }

    let opts = RunOptions {
        subject_path: cli.subject_path.clone(),
        doubles_path: cli.doubles_path.clone(),
        model_name: cli.model_name.clone(),
        verbose: cli.verbose(),
        extensions: cfg.extensions.clone(),
    };

    let mut provider = OnnxProvider::new(&cfg);
    let outcome = facematch::run(&mut provider, &opts).context("Failed to rank doubles")?;

    match &outcome {
        RankOutcome::Ranked(entries) => {
            if opts.verbose {
                info!("Ranked {} double(s)", entries.len());
            }
        }
        RankOutcome::Empty => warn!(
            "No doubles in {} could be ranked",
            opts.doubles_path.display()
        ),
        RankOutcome::SubjectUnavailable { .. } => warn!(
            "Subject image {} produced no embedding, nothing was ranked",
            opts.subject_path.display()
        ),
    }

    print_outcome(&outcome, cli.format)
}

fn print_outcome(outcome: &RankOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in outcome.entries() {
                println!("{}: {:.6}", entry.name, entry.score);
            }
        }
        OutputFormat::Json => {
            let reason = match outcome {
                RankOutcome::SubjectUnavailable { reason } => Some(reason.as_str()),
                _ => None,
            };
            let report = Report {
                status: outcome.status(),
                rankings: outcome.entries(),
                reason,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
