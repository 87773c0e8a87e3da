//! Storage layout semantics - defines only naming, not runtime logic.
//! Keeps the API, the worker and the grader containers agreeing on where
//! archives, workspaces and results live.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

pub const ASSIGNMENTS_DIR: &str = "assignments";
pub const SUBMISSIONS_DIR: &str = "submissions";
pub const RESULTS_DIR: &str = "results";
pub const GRADER_DIR: &str = "grader";
pub const RESULT_FILE: &str = "result.json";

/// URL prefix under which `results/` is served read-only
pub const PUBLIC_RESULTS_PREFIX: &str = "/assets/results";

/// Fixed in-container mount points for the grader image
pub const SUBMISSION_MOUNT: &str = "/workspace/submission";
pub const OUTPUT_MOUNT: &str = "/workspace/output";

pub const IMAGE_TAG_PREFIX: &str = "grader";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("assignment id is empty")]
    EmptyAssignmentId,
    #[error("assignment id {0:?} contains characters outside [A-Za-z0-9._-]")]
    InvalidAssignmentId(String),
}

/// Hour bucket key for a timestamp: `YYYY-MM-DD-HH`, UTC, zero-padded
pub fn bucket_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d-%H").to_string()
}

/// Job id: assignment id plus submission time in unix milliseconds
pub fn job_id(assignment_id: &str, ts: DateTime<Utc>) -> String {
    format!("{}-{}", assignment_id, ts.timestamp_millis())
}

/// Deterministic image tag for an assignment's grader.
/// Docker references must be lowercase.
pub fn image_tag(assignment_id: &str) -> String {
    format!("{}-{}", IMAGE_TAG_PREFIX, assignment_id.to_lowercase())
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Assignment ids become path segments and image tags, so they must be a
/// single safe segment.
pub fn validate_assignment_id(id: &str) -> Result<(), LayoutError> {
    if id.is_empty() {
        return Err(LayoutError::EmptyAssignmentId);
    }
    let safe = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !safe || id == "." || id == ".." {
        return Err(LayoutError::InvalidAssignmentId(id.to_string()));
    }
    Ok(())
}

/// Directory layout under the data root
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assignments_dir(&self) -> PathBuf {
        self.root.join(ASSIGNMENTS_DIR)
    }

    pub fn grader_dir(&self, assignment_id: &str) -> PathBuf {
        self.assignments_dir().join(assignment_id).join(GRADER_DIR)
    }

    pub fn submissions_root(&self) -> PathBuf {
        self.root.join(SUBMISSIONS_DIR)
    }

    pub fn results_root(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn workspace_dir(&self, bucket: &str, job_id: &str) -> PathBuf {
        self.submissions_root().join(bucket).join(job_id)
    }

    pub fn output_dir(&self, bucket: &str, job_id: &str) -> PathBuf {
        self.results_root().join(bucket).join(job_id)
    }

    pub fn public_result_path(bucket: &str, job_id: &str) -> String {
        format!("{}/{}/{}", PUBLIC_RESULTS_PREFIX, bucket, job_id)
    }

    /// Create the base `submissions/` and `results/` folders
    pub fn ensure_base(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.submissions_root())?;
        std::fs::create_dir_all(self.results_root())
    }

    /// Compute the bucket for `now` under `base` and make sure it exists.
    /// Idempotent.
    pub fn ensure_bucket(base: &Path, now: DateTime<Utc>) -> io::Result<(String, PathBuf)> {
        let bucket = bucket_key(now);
        let dir = base.join(&bucket);
        std::fs::create_dir_all(&dir)?;
        Ok((bucket, dir))
    }
}

/// Rewrites paths under the orchestrator's data root to the host-visible
/// data root before they are handed to the container runtime.
#[derive(Debug, Clone)]
pub struct HostPathMapper {
    internal_root: PathBuf,
    host_root: Option<PathBuf>,
}

impl HostPathMapper {
    pub fn new(internal_root: impl Into<PathBuf>, host_root: Option<PathBuf>) -> Self {
        Self {
            internal_root: internal_root.into(),
            host_root,
        }
    }

    pub fn to_host(&self, path: &Path) -> PathBuf {
        match &self.host_root {
            Some(host_root) => match path.strip_prefix(&self.internal_root) {
                Ok(rest) => host_root.join(rest),
                Err(_) => path.to_path_buf(),
            },
            None => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_bucket_format_zero_padded() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 7, 4, 5, 6).unwrap();
        assert_eq!(bucket_key(ts), "2026-03-07-04");
    }

    #[test]
    fn test_bucket_stable_within_hour() {
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let end = start + Duration::minutes(59) + Duration::seconds(59) + Duration::milliseconds(999);
        assert_eq!(bucket_key(start), bucket_key(end));
        assert_eq!(bucket_key(start), bucket_key(start + Duration::minutes(30)));
    }

    #[test]
    fn test_bucket_changes_across_hour_boundary() {
        let last_ms = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap() + Duration::milliseconds(999);
        let next = last_ms + Duration::milliseconds(1);
        assert_eq!(bucket_key(last_ms), "2026-12-31-23");
        assert_eq!(bucket_key(next), "2027-01-01-00");
    }

    #[test]
    fn test_bucket_is_utc() {
        let ts = chrono::FixedOffset::east_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 18, 2, 30, 0)
            .unwrap();
        assert_eq!(bucket_key(ts.with_timezone(&Utc)), "2026-10-17-21");
    }

    #[test]
    fn test_ensure_bucket_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 15, 0).unwrap();
        let (bucket, dir) = DataLayout::ensure_bucket(tmp.path(), now).unwrap();
        let (again, dir_again) = DataLayout::ensure_bucket(tmp.path(), now).unwrap();
        assert_eq!(bucket, "2026-10-18-09");
        assert_eq!(bucket, again);
        assert_eq!(dir, dir_again);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my work (final).zip"), "my_work__final_.zip");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("ok-name_1.zip"), "ok-name_1.zip");
    }

    #[test]
    fn test_validate_assignment_id() {
        assert!(validate_assignment_id("ml-monitoring").is_ok());
        assert_eq!(validate_assignment_id(""), Err(LayoutError::EmptyAssignmentId));
        assert!(validate_assignment_id("..").is_err());
        assert!(validate_assignment_id("a/b").is_err());
        assert!(validate_assignment_id("a b").is_err());
    }

    #[test]
    fn test_image_tag_deterministic() {
        assert_eq!(image_tag("QA-Claims"), "grader-qa-claims");
        assert_eq!(image_tag("fullstack"), image_tag("fullstack"));
    }

    #[test]
    fn test_job_id_from_assignment_and_millis() {
        let ts = Utc.timestamp_millis_opt(1_760_000_000_123).unwrap();
        assert_eq!(job_id("fullstack", ts), "fullstack-1760000000123");
    }

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/app/data");
        assert_eq!(
            layout.grader_dir("fullstack"),
            PathBuf::from("/app/data/assignments/fullstack/grader")
        );
        assert_eq!(
            layout.workspace_dir("2026-10-18-09", "fullstack-1"),
            PathBuf::from("/app/data/submissions/2026-10-18-09/fullstack-1")
        );
        assert_eq!(
            layout.output_dir("2026-10-18-09", "fullstack-1"),
            PathBuf::from("/app/data/results/2026-10-18-09/fullstack-1")
        );
        assert_eq!(
            DataLayout::public_result_path("2026-10-18-09", "fullstack-1"),
            "/assets/results/2026-10-18-09/fullstack-1"
        );
    }

    #[test]
    fn test_host_path_translation() {
        let mapper = HostPathMapper::new("/app/data", Some(PathBuf::from("/srv/portal/data")));
        assert_eq!(
            mapper.to_host(Path::new("/app/data/results/b/j")),
            PathBuf::from("/srv/portal/data/results/b/j")
        );
        assert_eq!(
            mapper.to_host(Path::new("/elsewhere/x")),
            PathBuf::from("/elsewhere/x")
        );
        assert_eq!(
            mapper.to_host(Path::new("/app/database/x")),
            PathBuf::from("/app/database/x")
        );

        let identity = HostPathMapper::new("/app/data", None);
        assert_eq!(
            identity.to_host(Path::new("/app/data/results")),
            PathBuf::from("/app/data/results")
        );
    }
}
