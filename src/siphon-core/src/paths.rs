use crate::{APP_AUTHOR, APP_NAME, APP_QUALIFIER};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-user directories for config and logs.
#[derive(Debug, Clone)]
pub struct AppDirs {
    config_dir: PathBuf,
    log_dir: PathBuf,
}

impl AppDirs {
    pub fn discover() -> Result<Self, DirsError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_AUTHOR, APP_NAME)
            .ok_or(DirsError::MissingProjectDirs)?;
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            log_dir: dirs.data_local_dir().join("logs"),
        })
    }

    /// Root everything under one directory (portable installs, tests).
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            log_dir: root.join("logs"),
        }
    }

    pub fn ensure_exists(&self) -> Result<(), DirsError> {
        for dir in [&self.config_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| DirsError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

#[derive(Debug, Error)]
pub enum DirsError {
    #[error("unable to determine project directories for Siphon")]
    MissingProjectDirs,
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}
