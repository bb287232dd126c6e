//! On-disk layout under the genoflow home directory.

use std::path::{Path, PathBuf};

/// ```text
/// <home>/
///   config.json      (optional)
///   db/genoflow.db
///   logs/genoflow.log.<date>
/// ```
#[derive(Debug, Clone)]
pub struct HomeLayout {
    home_dir: PathBuf,
}

impl HomeLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("genoflow.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_dir.join("config.json")
    }

    /// Create every directory the orchestrator writes into.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home_dir)?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
