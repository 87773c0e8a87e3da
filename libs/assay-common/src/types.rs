use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Job State Machine
/// Strictly sequential: PENDING → EXTRACTING → BUILDING → RUNNING → PARSING → DONE,
/// with FAILED reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Extracting,
    Building,
    Running,
    Parsing,
    Done,
    Failed,
}

impl JobStage {
    /// Successor on the success path, `None` for terminal stages
    pub fn next(self) -> Option<JobStage> {
        match self {
            JobStage::Pending => Some(JobStage::Extracting),
            JobStage::Extracting => Some(JobStage::Building),
            JobStage::Building => Some(JobStage::Running),
            JobStage::Running => Some(JobStage::Parsing),
            JobStage::Parsing => Some(JobStage::Done),
            JobStage::Done | JobStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    pub fn can_transition_to(self, to: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == JobStage::Failed || self.next() == Some(to)
    }

    /// Phase name carried by progress events emitted while in this stage
    pub fn phase(self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Extracting => "extract",
            JobStage::Building => "build",
            JobStage::Running => "grade",
            JobStage::Parsing => "parse_result",
            JobStage::Done => "done",
            JobStage::Failed => "error",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Pending => "PENDING",
            JobStage::Extracting => "EXTRACTING",
            JobStage::Building => "BUILDING",
            JobStage::Running => "RUNNING",
            JobStage::Parsing => "PARSING",
            JobStage::Done => "DONE",
            JobStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStage,
    pub to: JobStage,
}

/// One grading attempt for one uploaded archive.
///
/// Directories are exclusively owned by this job. `bucket` is fixed at
/// creation and never recomputed, so a job that crosses an hour boundary
/// keeps writing under the hour it started in.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub assignment_id: String,
    pub source_archive: PathBuf,
    pub workspace_dir: PathBuf,
    pub output_dir: PathBuf,
    pub session_id: Option<String>,
    pub bucket: String,
    pub result_path: String,
    pub created_at: DateTime<Utc>,
    stage: JobStage,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        assignment_id: String,
        source_archive: PathBuf,
        workspace_dir: PathBuf,
        output_dir: PathBuf,
        session_id: Option<String>,
        bucket: String,
        result_path: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            assignment_id,
            source_archive,
            workspace_dir,
            output_dir,
            session_id: session_id.filter(|s| !s.is_empty()),
            bucket,
            result_path,
            created_at,
            stage: JobStage::Pending,
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Move forward in the state machine; backward or skipping moves are rejected
    pub fn advance_to(&mut self, to: JobStage) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(to) {
            return Err(TransitionError {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }
}

/// Named sub-score inside a grading result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub score: serde_json::Number,
    pub max: serde_json::Number,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Contents of `result.json` written by the grading procedure.
///
/// Only the minimum shape is enforced; any other top-level fields are
/// carried through to the client untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    /// Kept as written so `87` is not re-sent as `87.0`
    pub score: serde_json::Number,
    pub sections: Vec<Section>,
    pub feedback: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GradeResult {
    /// Client payload: the result plus the public location of the output directory
    pub fn into_payload(mut self, result_path: &str) -> serde_json::Value {
        self.extra.remove("resultPath");
        let mut value = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        value.insert(
            "resultPath".to_string(),
            serde_json::Value::String(result_path.to_string()),
        );
        serde_json::Value::Object(value)
    }
}

/// Events delivered on a session channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// First frame on a fresh connection, carries the session id to submit with
    Session { id: String },
    Log(String),
    Progress {
        phase: String,
        percent: u8,
        message: String,
    },
    Result(serde_json::Value),
    Done {
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl JobEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Session { .. } => "session",
            JobEvent::Log(_) => "log",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Result(_) => "result",
            JobEvent::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            "ml-monitoring-1".to_string(),
            "ml-monitoring".to_string(),
            PathBuf::from("/data/submissions/2026-10-18-09/1-a.zip"),
            PathBuf::from("/data/submissions/2026-10-18-09/ml-monitoring-1"),
            PathBuf::from("/data/results/2026-10-18-09/ml-monitoring-1"),
            Some(String::new()),
            "2026-10-18-09".to_string(),
            "/assets/results/2026-10-18-09/ml-monitoring-1".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_stage_success_path() {
        let mut stage = JobStage::Pending;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                JobStage::Pending,
                JobStage::Extracting,
                JobStage::Building,
                JobStage::Running,
                JobStage::Parsing,
                JobStage::Done,
            ]
        );
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_stage() {
        for stage in [
            JobStage::Pending,
            JobStage::Extracting,
            JobStage::Building,
            JobStage::Running,
            JobStage::Parsing,
        ] {
            assert!(stage.can_transition_to(JobStage::Failed), "{stage}");
        }
        assert!(!JobStage::Done.can_transition_to(JobStage::Failed));
        assert!(!JobStage::Failed.can_transition_to(JobStage::Failed));
    }

    #[test]
    fn test_job_rejects_backward_and_skipping_moves() {
        let mut job = job();
        job.advance_to(JobStage::Extracting).unwrap();
        job.advance_to(JobStage::Building).unwrap();

        let err = job.advance_to(JobStage::Extracting).unwrap_err();
        assert_eq!(err.from, JobStage::Building);
        assert!(job.advance_to(JobStage::Parsing).is_err());
        assert_eq!(job.stage(), JobStage::Building);

        job.advance_to(JobStage::Failed).unwrap();
        assert!(job.advance_to(JobStage::Running).is_err());
    }

    #[test]
    fn test_empty_session_is_no_session() {
        assert_eq!(job().session_id, None);
    }

    #[test]
    fn test_grade_result_requires_minimum_shape() {
        let ok = json!({
            "score": 7.5,
            "sections": [{"name": "api", "score": 5, "max": 5}],
            "feedback": "good",
            "grader_version": "2"
        });
        let parsed: GradeResult = serde_json::from_value(ok).unwrap();
        assert_eq!(parsed.score.as_f64(), Some(7.5));
        assert_eq!(parsed.sections[0].max.as_u64(), Some(5));
        assert_eq!(parsed.extra["grader_version"], "2");

        let missing_feedback = json!({"score": 1, "sections": []});
        assert!(serde_json::from_value::<GradeResult>(missing_feedback).is_err());

        let bad_score = json!({"score": "ten", "sections": [], "feedback": ""});
        assert!(serde_json::from_value::<GradeResult>(bad_score).is_err());
    }

    #[test]
    fn test_payload_passes_unknown_fields_and_sets_result_path() {
        let result: GradeResult = serde_json::from_value(json!({
            "score": 3,
            "sections": [{"name": "a", "score": 3, "max": 4, "note": "x"}],
            "feedback": "ok",
            "artifacts": ["report.html"],
            "resultPath": "stale"
        }))
        .unwrap();

        let payload = result.into_payload("/assets/results/b/j");
        assert_eq!(payload["resultPath"], "/assets/results/b/j");
        assert_eq!(payload["artifacts"][0], "report.html");
        assert_eq!(payload["sections"][0]["note"], "x");
        assert_eq!(payload["score"], json!(3));
        assert_eq!(payload["sections"][0]["max"], json!(4));
    }

    #[test]
    fn test_integer_scores_are_not_widened() {
        let result: GradeResult = serde_json::from_str(
            r#"{"score": 87, "sections": [{"name": "API", "score": 9007199254740993, "max": 9007199254740993}], "feedback": ""}"#,
        )
        .unwrap();
        let text = serde_json::to_string(&result.into_payload("/r")).unwrap();
        assert!(text.contains(r#""score":87,"#));
        assert!(text.contains(r#""max":9007199254740993"#));
        assert!(!text.contains("87.0"));
    }

    #[test]
    fn test_event_wire_format() {
        let progress = JobEvent::Progress {
            phase: "build".to_string(),
            percent: 100,
            message: "Build complete".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"event": "progress", "data": {"phase": "build", "percent": 100, "message": "Build complete"}})
        );

        let log = JobEvent::Log("Step 1/4".to_string());
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            json!({"event": "log", "data": "Step 1/4"})
        );

        let done = JobEvent::Done { code: 0, error: None };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"event": "done", "data": {"code": 0}})
        );
    }
}
