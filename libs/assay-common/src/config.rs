use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub host_data_dir: Option<PathBuf>,
    pub port: u16,
    pub max_concurrent_jobs: usize,
    pub heartbeat_interval_ms: u64,
    pub docker_socket: Option<String>,
    pub max_upload_bytes: usize,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests don't touch the process env
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            data_dir: lookup("DATA_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/app/data")),
            host_data_dir: lookup("HOST_DATA_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
            max_concurrent_jobs: lookup("MAX_CONCURRENT_JOBS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4usize)
                .max(1),
            heartbeat_interval_ms: lookup("HEARTBEAT_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(1500),
            docker_socket: match lookup("DOCKER_SOCKET") {
                Some(v) if v.is_empty() => None,
                Some(v) => Some(v),
                None => Some("/var/run/docker.sock".to_string()),
            },
            max_upload_bytes: lookup("MAX_UPLOAD_MB")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|mb| *mb > 0)
                .unwrap_or(100)
                * 1024
                * 1024,
            log_json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
