/// Job Orchestrator - High-Level Orchestration
///
/// **Responsibility:**
/// Own a job's state machine and sequence its stages:
/// extract → build → run → parse, strictly one after another.
///
/// **Failure policy:**
/// - Any stage failure is terminal; later stages never run
/// - Each failure is logged once and reported as one `done` event
/// - Delivery problems on the session channel never affect the job
///
/// **Concurrency:**
/// - Jobs wait on an admission semaphore before their first stage
/// - Image builds for the same assignment are serialized; runs are not

use crate::channel::{Publisher, SessionHub};
use crate::engine::{CommandSpec, ProcessRunner, NO_STATUS};
use crate::evaluator::{self, ResultError};
use assay_common::config::Config;
use assay_common::layout::{
    self, DataLayout, HostPathMapper, LayoutError, OUTPUT_MOUNT, SUBMISSION_MOUNT,
};
use assay_common::types::{Job, JobStage, TransitionError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, info_span, warn, Instrument};

/// Status carried by result-ingestion failures; the grader itself exited 0
pub const RESULT_FAILURE_STATUS: i32 = 1;

/// Input errors, raised before a job exists
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("file is required")]
    MissingArchive,
    #[error("file must be a previously uploaded submission")]
    InvalidArchive,
    #[error(transparent)]
    InvalidAssignment(#[from] LayoutError),
    #[error("assignment {0} has no grader package")]
    UnknownAssignment(String),
    #[error("failed to prepare job directories: {0}")]
    Io(#[from] io::Error),
}

/// Terminal stage failures. `Display` is the message shown to the client.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Extraction failed")]
    Extraction { code: i32 },
    #[error("Docker build failed")]
    Build { code: i32 },
    #[error("Grader run failed")]
    Execution { code: i32 },
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error("Internal pipeline error")]
    Transition(#[from] TransitionError),
}

impl PipelineError {
    pub fn code(&self) -> i32 {
        match self {
            PipelineError::Extraction { code }
            | PipelineError::Build { code }
            | PipelineError::Execution { code } => *code,
            PipelineError::Result(_) => RESULT_FAILURE_STATUS,
            PipelineError::Transition(_) => NO_STATUS,
        }
    }
}

/// What a finished job looked like, for callers that need more than events
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub assignment_id: String,
    pub stage: JobStage,
    pub failed_at: Option<JobStage>,
    pub code: i32,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub elapsed: Duration,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.stage == JobStage::Done
    }
}

/// Synthetic liveness percentages for the run stage.
/// Starts at 10, climbs by 10 per tick, never passes 90.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    next: u8,
}

impl Heartbeat {
    pub const START: u8 = 10;
    pub const STEP: u8 = 10;
    pub const CEILING: u8 = 90;

    pub fn new() -> Self {
        Self { next: Self::START }
    }

    pub fn tick(&mut self) -> u8 {
        let current = self.next;
        self.next = (self.next + Self::STEP).min(Self::CEILING);
        current
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator<R> {
    layout: DataLayout,
    host_paths: HostPathMapper,
    docker_socket: Option<String>,
    heartbeat_interval: Duration,
    runner: R,
    hub: SessionHub,
    permits: Semaphore,
    build_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R: ProcessRunner> Orchestrator<R> {
    pub fn new(config: &Config, runner: R, hub: SessionHub) -> Self {
        // Bind mount sources must be absolute
        let data_dir = match std::path::absolute(&config.data_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(data_dir = %config.data_dir.display(), error = %e, "could not resolve data root");
                config.data_dir.clone()
            }
        };
        Self {
            layout: DataLayout::new(&data_dir),
            host_paths: HostPathMapper::new(&data_dir, config.host_data_dir.clone()),
            docker_socket: config.docker_socket.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            runner,
            hub,
            permits: Semaphore::new(config.max_concurrent_jobs.max(1)),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Validate a submission and create its job directories
    pub async fn prepare(
        &self,
        assignment_id: &str,
        archive: Option<&str>,
        session_id: Option<String>,
    ) -> Result<Job, SubmitError> {
        self.prepare_at(assignment_id, archive, session_id, Utc::now())
            .await
    }

    /// Like [`prepare`](Self::prepare) with an explicit submission time.
    /// The bucket is computed here once and kept for the job's lifetime.
    pub async fn prepare_at(
        &self,
        assignment_id: &str,
        archive: Option<&str>,
        session_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Job, SubmitError> {
        let archive = archive
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(SubmitError::MissingArchive)?;
        layout::validate_assignment_id(assignment_id)?;

        let grader_dir = self.layout.grader_dir(assignment_id);
        if !tokio::fs::metadata(&grader_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(SubmitError::UnknownAssignment(assignment_id.to_string()));
        }

        let source_archive = self.resolve_archive(Path::new(archive)).await?;

        let bucket = layout::bucket_key(now);
        let submissions_bucket = self.layout.submissions_root().join(&bucket);
        tokio::fs::create_dir_all(&submissions_bucket).await?;

        // Claim a workspace; same-millisecond collisions move to the next id
        let mut stamp = now;
        let (job_id, workspace_dir) = loop {
            let job_id = layout::job_id(assignment_id, stamp);
            let workspace_dir = self.layout.workspace_dir(&bucket, &job_id);
            match tokio::fs::create_dir(&workspace_dir).await {
                Ok(()) => break (job_id, workspace_dir),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    stamp += chrono::Duration::milliseconds(1);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let output_dir = self.layout.output_dir(&bucket, &job_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let result_path = DataLayout::public_result_path(&bucket, &job_id);
        info!(
            job_id = %job_id,
            assignment_id,
            bucket = %bucket,
            archive = %source_archive.display(),
            "job accepted"
        );

        Ok(Job::new(
            job_id,
            assignment_id.to_string(),
            source_archive,
            workspace_dir,
            output_dir,
            session_id,
            bucket,
            result_path,
            now,
        ))
    }

    async fn resolve_archive(&self, archive: &Path) -> Result<PathBuf, SubmitError> {
        let resolved = tokio::fs::canonicalize(archive)
            .await
            .map_err(|_| SubmitError::InvalidArchive)?;
        tokio::fs::create_dir_all(self.layout.submissions_root()).await?;
        let root = tokio::fs::canonicalize(self.layout.submissions_root()).await?;

        let is_file = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file || !resolved.starts_with(&root) {
            return Err(SubmitError::InvalidArchive);
        }
        Ok(resolved)
    }

    /// Run a prepared job to DONE or FAILED
    pub async fn run(&self, mut job: Job) -> JobOutcome {
        let span = info_span!("job", job_id = %job.job_id, assignment_id = %job.assignment_id);
        async move {
            let publisher =
                Publisher::new(self.hub.clone(), job.session_id.clone(), job.job_id.clone());

            // The semaphore is never closed, so acquire cannot fail
            let _permit = self.permits.acquire().await.ok();
            let started = Instant::now();

            match self.execute(&mut job, &publisher).await {
                Ok(payload) => {
                    publisher.progress(JobStage::Done.phase(), 100, "Grading complete");
                    publisher.result(payload.clone());
                    publisher.done(0, None);
                    info!(elapsed_ms = started.elapsed().as_millis() as u64, "job done");
                    JobOutcome {
                        job_id: job.job_id.clone(),
                        assignment_id: job.assignment_id.clone(),
                        stage: job.stage(),
                        failed_at: None,
                        code: 0,
                        error: None,
                        result: Some(payload),
                        elapsed: started.elapsed(),
                    }
                }
                Err(err) => {
                    let failed_at = job.stage();
                    let code = err.code();
                    let message = err.to_string();
                    warn!(stage = %failed_at, code, error = ?err, "{}", message);

                    if let Err(e) = job.advance_to(JobStage::Failed) {
                        warn!(error = %e, "job already terminal");
                    }
                    publisher.log(format!("❌ {} (exit code {})", message, code));
                    publisher.progress(JobStage::Failed.phase(), 100, &message);
                    publisher.done(code, Some(message.clone()));

                    JobOutcome {
                        job_id: job.job_id.clone(),
                        assignment_id: job.assignment_id.clone(),
                        stage: job.stage(),
                        failed_at: Some(failed_at),
                        code,
                        error: Some(message),
                        result: None,
                        elapsed: started.elapsed(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job: &mut Job,
        out: &Publisher,
    ) -> Result<serde_json::Value, PipelineError> {
        job.advance_to(JobStage::Extracting)?;
        out.progress(JobStage::Extracting.phase(), 0, "Unzipping submission...");
        let code = self
            .invoke(&extract_command(&job.source_archive, &job.workspace_dir), out)
            .await;
        if code != 0 {
            return Err(PipelineError::Extraction { code });
        }
        out.progress(JobStage::Extracting.phase(), 100, "Submission extracted");

        job.advance_to(JobStage::Building)?;
        out.progress(JobStage::Building.phase(), 0, "Building grader image...");
        let tag = layout::image_tag(&job.assignment_id);
        let code = {
            let lock = self.build_lock(&job.assignment_id);
            let _guard = lock.lock().await;
            self.invoke(
                &build_command(&tag, &self.layout.grader_dir(&job.assignment_id)),
                out,
            )
            .await
        };
        if code != 0 {
            return Err(PipelineError::Build { code });
        }
        out.progress(JobStage::Building.phase(), 100, "Build complete");

        job.advance_to(JobStage::Running)?;
        out.progress(JobStage::Running.phase(), 0, "Starting grader...");
        let code = self
            .run_with_heartbeat(&self.run_command(&tag, job), out)
            .await;
        if code != 0 {
            return Err(PipelineError::Execution { code });
        }

        job.advance_to(JobStage::Parsing)?;
        out.progress(JobStage::Parsing.phase(), 90, "Parsing result.json...");
        let result = evaluator::read_result(&job.output_dir).await?;

        job.advance_to(JobStage::Done)?;
        Ok(result.into_payload(&job.result_path))
    }

    async fn invoke(&self, command: &CommandSpec, out: &Publisher) -> i32 {
        match self.runner.run(command, out).await {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "process supervision failed");
                out.log(e.to_string());
                NO_STATUS
            }
        }
    }

    /// Heartbeat lives inside this future: once the process future resolves
    /// the ticker is dropped and no further progress is emitted.
    async fn run_with_heartbeat(&self, command: &CommandSpec, out: &Publisher) -> i32 {
        let run = self.invoke(command, out);
        tokio::pin!(run);

        let mut heartbeat = Heartbeat::new();
        let period = self.heartbeat_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                code = &mut run => return code,
                _ = ticker.tick() => {
                    out.progress(JobStage::Running.phase(), heartbeat.tick(), "Grading in progress...");
                }
            }
        }
    }

    fn build_lock(&self, assignment_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.build_locks
            .lock()
            .entry(assignment_id.to_string())
            .or_default()
            .clone()
    }

    /// `docker run` for a prepared job, with paths rewritten for the host
    pub fn run_command(&self, tag: &str, job: &Job) -> CommandSpec {
        let host_workspace = self.host_paths.to_host(&job.workspace_dir);
        let host_output = self.host_paths.to_host(&job.output_dir);

        let mut cmd = CommandSpec::new("docker")
            .arg("run")
            .arg("--rm")
            .arg("--network")
            .arg("host")
            .arg("-v")
            .arg(format!("{}:{}:ro", host_workspace.display(), SUBMISSION_MOUNT))
            .arg("-v")
            .arg(format!("{}:{}", host_output.display(), OUTPUT_MOUNT));
        // Graders may start their own containers
        if let Some(socket) = &self.docker_socket {
            cmd = cmd.arg("-v").arg(format!("{}:{}", socket, socket));
        }
        cmd.arg(tag)
    }
}

pub fn extract_command(archive: &Path, workspace: &Path) -> CommandSpec {
    CommandSpec::new("unzip")
        .arg("-o")
        .path_arg(archive)
        .arg("-d")
        .path_arg(workspace)
}

pub fn build_command(tag: &str, grader_dir: &Path) -> CommandSpec {
    CommandSpec::new("docker")
        .arg("build")
        .arg("-t")
        .arg(tag)
        .path_arg(grader_dir)
}
