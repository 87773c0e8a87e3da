use anyhow::{bail, Context};
use assay_common::config::Config;
use assay_common::layout::DataLayout;
use assay_worker::{intake, Orchestrator, SessionHub, SystemRunner};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// Grade one local archive against an assignment, logging progress locally
#[derive(Parser)]
#[command(name = "assay-worker")]
#[command(about = "Run the grading pipeline for a single submission archive", long_about = None)]
struct Cli {
    /// Assignment id (directory under <data-dir>/assignments)
    #[arg(short, long)]
    assignment: String,

    /// Path to the submission archive (.zip)
    #[arg(long)]
    archive: PathBuf,

    /// Data root; overrides DATA_DIR
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    init_tracing(config.log_json);

    let layout = DataLayout::new(&config.data_dir);
    layout
        .ensure_base()
        .with_context(|| format!("failed to create data layout under {}", config.data_dir.display()))?;

    let bytes = tokio::fs::read(&cli.archive)
        .await
        .with_context(|| format!("failed to read {}", cli.archive.display()))?;
    let original_name = cli
        .archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stored = intake::store_upload(&layout, &cli.assignment, &original_name, &bytes, Utc::now())
        .await
        .context("failed to store archive")?;

    let orchestrator = Orchestrator::new(&config, SystemRunner, SessionHub::new());
    let job = orchestrator
        .prepare(&cli.assignment, Some(&stored.to_string_lossy()), None)
        .await?;
    info!(job_id = %job.job_id, output = %job.output_dir.display(), "grading");

    let outcome = orchestrator.run(job).await;
    if outcome.succeeded() {
        let result = outcome.result.unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let message = outcome.error.unwrap_or_default();
    error!(job_id = %outcome.job_id, code = outcome.code, "{}", message);
    if outcome.code == 0 {
        bail!(message);
    }
    std::process::exit(outcome.code.clamp(1, 255));
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
