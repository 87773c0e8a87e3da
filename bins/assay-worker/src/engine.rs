/// Process Engine - supervision of external commands
///
/// **Core Responsibility:**
/// Run one external command to completion, forwarding each stdout/stderr line
/// to the job's publisher as it arrives, and report the exit status.
///
/// **Boundary:**
/// - Engine knows HOW to run a command
/// - Engine does NOT know which stage it is serving or what a status means
/// - The orchestrator decides failure policy from the returned status

use crate::channel::Publisher;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::debug;

/// Status reported when a process has no exit code (spawn failure, signal)
pub const NO_STATUS: i32 = -1;

/// How long output readers may keep draining after the process exits.
/// A leftover grandchild can hold the pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Anything that can run a command and report its exit status.
///
/// Implementations must:
/// 1. Forward output lines to `output` while the command runs
/// 2. Return as soon as the process has exited, not when its output closes
/// 3. Return `NO_STATUS` for a process terminated without an exit code
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec, output: &Publisher) -> Result<i32, EngineError>;
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec, output: &Publisher) -> Result<i32, EngineError> {
        debug!(job_id = output.job_id(), command = %command, "spawning");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(forward_lines(s, output.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(forward_lines(s, output.clone())));

        let status = child.wait().await.map_err(|source| EngineError::Wait {
            program: command.program.clone(),
            source,
        })?;

        // Drain whatever is still buffered so lines land before the next stage
        let deadline = Instant::now() + OUTPUT_GRACE;
        for mut task in [stdout, stderr].into_iter().flatten() {
            if time::timeout_at(deadline, &mut task).await.is_err() {
                debug!(job_id = output.job_id(), command = %command.program, "output still open after exit, detaching");
                task.abort();
            }
        }

        let code = status.code().unwrap_or(NO_STATUS);
        debug!(job_id = output.job_id(), command = %command.program, code, "exited");
        Ok(code)
    }
}

async fn forward_lines<R>(stream: R, output: Publisher)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                output.log(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                debug!(job_id = output.job_id(), error = %e, "output stream closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SessionHub;
    use assay_common::types::JobEvent;

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::new("docker")
            .arg("build")
            .arg("-t")
            .arg("grader-x")
            .path_arg(Path::new("/data/assignments/x/grader"));
        assert_eq!(cmd.to_string(), "docker build -t grader-x /data/assignments/x/grader");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_forwards_both_streams() {
        let hub = SessionHub::new();
        let mut rx = hub.register("s");
        let publisher = Publisher::new(hub, Some("s".to_string()), "job");

        let cmd = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo out-line; echo err-line 1>&2; exit 3");
        let code = SystemRunner.run(&cmd, &publisher).await.unwrap();
        assert_eq!(code, 3);

        let mut lines = Vec::new();
        while let Ok(JobEvent::Log(line)) = rx.try_recv() {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err-line".to_string(), "out-line".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_zero_exit() {
        let cmd = CommandSpec::new("true");
        let code = SystemRunner.run(&cmd, &Publisher::detached("job")).await.unwrap();
        assert_eq!(code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_grandchild_does_not_delay_exit() {
        let hub = SessionHub::new();
        let mut rx = hub.register("s");
        let publisher = Publisher::new(hub, Some("s".to_string()), "job");

        // The sleeper inherits stdout and stderr and outlives the shell
        let cmd = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo started; sleep 30 & exit 0");
        let started = std::time::Instant::now();
        let code = time::timeout(Duration::from_secs(10), SystemRunner.run(&cmd, &publisher))
            .await
            .expect("runner returned while the grandchild was alive")
            .unwrap();

        assert_eq!(code, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(rx.try_recv().unwrap(), JobEvent::Log("started".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let cmd = CommandSpec::new("definitely-not-a-real-program-7f3a");
        let err = SystemRunner
            .run(&cmd, &Publisher::detached("job"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }
}
