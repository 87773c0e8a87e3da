mod handlers;
mod metrics;
mod routes;
mod sessions;

use anyhow::Context;
use assay_common::config::Config;
use assay_common::layout::DataLayout;
use assay_worker::{Orchestrator, SessionHub, SystemRunner};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator<SystemRunner>>,
    pub layout: DataLayout,
    pub docker: Option<bollard::Docker>,
    pub max_upload_bytes: usize,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: &Config, docker: Option<bollard::Docker>) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(config, SystemRunner, SessionHub::new())),
            layout: DataLayout::new(&config.data_dir),
            docker,
            max_upload_bytes: config.max_upload_bytes,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn hub(&self) -> &SessionHub {
        self.orchestrator.hub()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Assay API booting...");

    metrics::init_metrics().context("failed to register metrics")?;
    info!("Metrics registry initialized");

    let layout = DataLayout::new(&config.data_dir);
    layout
        .ensure_base()
        .with_context(|| format!("failed to create data layout under {}", config.data_dir.display()))?;
    info!(
        data_dir = %config.data_dir.display(),
        host_data_dir = ?config.host_data_dir,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Storage ready"
    );

    let docker = match bollard::Docker::connect_with_local_defaults() {
        Ok(docker) => {
            match docker.ping().await {
                Ok(_) => info!("Docker daemon reachable"),
                Err(e) => warn!(error = %e, "Docker daemon not responding; grading will fail until it is"),
            }
            Some(docker)
        }
        Err(e) => {
            warn!(error = %e, "No Docker client available");
            None
        }
    };

    let state = Arc::new(AppState::new(&config, docker));
    let app = routes::routes(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
