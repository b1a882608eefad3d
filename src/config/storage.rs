use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where the go command keeps its module cache. Unset means the toolchain's own GOPATH.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if let Some(dir) = self.cache_dir.as_mut().filter(|dir| dir.is_relative()) {
            *dir = base_dir.join(&*dir);
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if let Some(dir) = &self.cache_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
