//! Per-session workspace directory
//!
//! Uploaded bytes are staged under `<root>/<session-id>/` so executed code can
//! open them by absolute path. The directory lives as long as the session.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid file name for staging: {0:?}")]
    InvalidName(String),
}

#[derive(Debug)]
pub struct SessionWorkspace {
    session_id: String,
    dir: PathBuf,
}

impl SessionWorkspace {
    /// Create `<root>/<uuid-v7>/`, making `root` absolute first.
    pub fn create(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };

        let session_id = Uuid::now_v7().to_string();
        let dir = root.join(&session_id);
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Created session workspace");

        Ok(Self { session_id, dir })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under the base name of `name`; returns the absolute path.
    pub fn stage(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let base = Path::new(name)
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidName(name.to_string()))?;
        let path = self.dir.join(base);
        std::fs::write(&path, bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Staged file");
        Ok(path)
    }

    /// Remove the directory and everything staged in it.
    pub fn cleanup(&self) {
        if self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove session workspace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_uses_base_name() {
        let root = tempfile::tempdir().unwrap();
        let ws = SessionWorkspace::create(root.path()).unwrap();

        let path = ws.stage("../../etc/data.csv", b"a,b\n1,2").unwrap();
        assert_eq!(path, ws.dir().join("data.csv"));
        assert!(path.is_absolute());
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n1,2");

        assert!(matches!(ws.stage("..", b""), Err(WorkspaceError::InvalidName(_))));
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = SessionWorkspace::create(root.path()).unwrap();
        ws.stage("x.txt", b"x").unwrap();

        ws.cleanup();
        assert!(!ws.dir().exists());
        // Second cleanup is a no-op
        ws.cleanup();
    }

    #[test]
    fn test_sessions_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let a = SessionWorkspace::create(root.path()).unwrap();
        let b = SessionWorkspace::create(root.path()).unwrap();
        assert_ne!(a.dir(), b.dir());
    }
}
