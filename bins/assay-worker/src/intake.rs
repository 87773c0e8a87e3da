/// Archive Intake
///
/// Persists an uploaded archive under the current submissions bucket as
/// `<unix millis>-<sanitized name>`. Existing files are never overwritten.

use assay_common::layout::{sanitize_filename, DataLayout};
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("upload is empty")]
    Empty,
    #[error("failed to store upload: {0}")]
    Io(#[from] io::Error),
}

/// Store `bytes` and return the absolute path written.
/// `assignment_id` is recorded for auditing only.
pub async fn store_upload(
    layout: &DataLayout,
    assignment_id: &str,
    original_name: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<PathBuf, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::Empty);
    }

    let (bucket, dir) = DataLayout::ensure_bucket(&layout.submissions_root(), now)?;
    let name = match sanitize_filename(original_name) {
        n if n.is_empty() => "submission".to_string(),
        n => n,
    };
    let path = dir.join(format!("{}-{}", now.timestamp_millis(), name));

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;

    let path = tokio::fs::canonicalize(&path).await?;
    info!(
        assignment_id,
        bucket = %bucket,
        path = %path.display(),
        size = bytes.len(),
        "stored submission archive"
    );
    Ok(path)
}
