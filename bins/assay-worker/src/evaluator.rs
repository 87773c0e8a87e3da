/// Result Ingestion
///
/// Reads `result.json` from a job's output directory after a successful run.
/// A grader that exits 0 without writing the file is a pipeline failure,
/// never a zero score. The contents are only checked for the minimum shape.

use assay_common::layout::RESULT_FILE;
use assay_common::types::GradeResult;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("No result.json found")]
    Missing,
    #[error("Could not parse result.json")]
    Unreadable(#[source] io::Error),
    #[error("Could not parse result.json")]
    Malformed(#[source] serde_json::Error),
}

pub async fn read_result(output_dir: &Path) -> Result<GradeResult, ResultError> {
    let path = output_dir.join(RESULT_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ResultError::Missing),
        Err(e) => return Err(ResultError::Unreadable(e)),
    };
    serde_json::from_slice(&bytes).map_err(ResultError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_result() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_result(dir.path()).await.unwrap_err();
        assert!(matches!(err, ResultError::Missing));
        assert_eq!(err.to_string(), "No result.json found");
    }

    #[tokio::test]
    async fn test_malformed_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESULT_FILE), "{\"score\": 10, ").unwrap();
        let err = read_result(dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "Could not parse result.json");
    }

    #[tokio::test]
    async fn test_wrong_shape_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESULT_FILE), "[1, 2, 3]").unwrap();
        let err = read_result(dir.path()).await.unwrap_err();
        assert!(matches!(err, ResultError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_valid_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(RESULT_FILE),
            r#"{"score": 82.5, "sections": [{"name": "Drift detection", "score": 40, "max": 50}, {"name": "Alerting", "score": 42.5, "max": 50}], "feedback": "Solid work"}"#,
        )
        .unwrap();

        let result = read_result(dir.path()).await.unwrap();
        assert_eq!(result.score.as_f64(), Some(82.5));
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[0].name, "Drift detection");
        assert_eq!(result.sections[1].score.as_f64(), Some(42.5));
        assert_eq!(result.feedback, "Solid work");
    }
}
