//! Scoped temporary directories for jobs

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::ServiceConfig;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Creates one directory per job below a common root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.model_temp_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty workspace.
    ///
    /// `name` is sanitized to a single path segment; an existing directory
    /// with the same name is wiped first.
    pub async fn acquire(&self, name: &str) -> Result<Workspace, WorkspaceError> {
        let path = self.root.join(sanitize(name));
        if fs::try_exists(&path).await.unwrap_or(false) {
            let _ = fs::remove_dir_all(&path).await;
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;
        debug!(workspace = %path.display(), "workspace acquired");
        Ok(Workspace {
            path,
            released: false,
        })
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// A job's temporary directory.
///
/// Call [`Workspace::release`] to remove it and observe failures. A
/// workspace dropped without release is removed synchronously.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) -> Result<(), WorkspaceError> {
        self.released = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace = %self.path.display(), error = %e, "failed to remove workspace on drop");
            }
        }
    }
}
