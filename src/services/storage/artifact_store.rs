use chrono::{DateTime, Local};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::errors::{ArtifactError, ArtifactResult};
use crate::core::types::ArtifactRole;

/// Directory of PDFs named `<timestamp>_<task_id>_<role>.pdf`.
///
/// Files are never evicted.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> ArtifactResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::DirectoryCreationFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tagged file name binding a timestamp, a task id and a role.
    pub fn artifact_name(timestamp: &DateTime<Local>, task_id: &str, role: ArtifactRole) -> String {
        format!("{}_{}_{}.pdf", timestamp.format("%Y%m%d_%H%M%S"), task_id, role)
    }

    pub async fn save(&self, name: &str, bytes: &[u8]) -> ArtifactResult<PathBuf> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ArtifactError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), bytes = bytes.len(), "Artifact saved");
        Ok(path)
    }

    /// First stored file for `task_id` with the given role, if any.
    pub fn find(&self, task_id: &str, role: ArtifactRole) -> ArtifactResult<Option<PathBuf>> {
        validate_task_id(task_id)?;

        let pattern = format!(
            "{}/*_{}_{}.pdf",
            Pattern::escape(&self.dir.to_string_lossy()),
            Pattern::escape(task_id),
            role
        );
        let found = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .find(|path| path.is_file());

        debug!(task_id, %role, found = found.is_some(), "Artifact lookup");
        Ok(found)
    }

    pub fn contains(&self, task_id: &str, role: ArtifactRole) -> bool {
        matches!(self.find(task_id, role), Ok(Some(_)))
    }
}

/// Reject ids that could escape the artifact directory or widen a lookup.
pub fn validate_task_id(task_id: &str) -> ArtifactResult<()> {
    let invalid = task_id.is_empty()
        || task_id.contains('/')
        || task_id.contains('\\')
        || task_id.contains("..")
        || task_id.contains('\0');
    if invalid {
        return Err(ArtifactError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}
