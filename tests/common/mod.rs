use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated home, config and cache directories for one test run.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        for dir in ["home", "config", "cache"] {
            std::fs::create_dir_all(temp_dir.path().join(dir))?;
        }
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn home(&self) -> PathBuf {
        self.path().join("home")
    }

    pub fn config_home(&self) -> PathBuf {
        self.path().join("config")
    }

    pub fn cache_home(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_home().join("smartdub").join("config.toml")
    }

    /// Path of a file under `tests/fixtures`
    pub fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }
}
