use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod logging;
pub mod rules;
pub mod server;
pub mod storage;
pub mod toolchain;


pub use logging::LoggingConfig;
pub use rules::RulesConfig;
pub use server::ServerConfig;
pub use storage::StorageConfig;
pub use toolchain::ToolchainConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from("govein.toml"));
        if candidate.exists() {
            // go refuses a relative GOPATH, so anchor the file before resolving against it
            let candidate = std::path::absolute(&candidate)
                .with_context(|| format!("resolving config path {}", candidate.display()))?;
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config.normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            Ok(config)
        } else {
            tracing::warn!(
                "configuration file {} not found, using defaults",
                candidate.display()
            );
            Ok(Config::default())
        }
    }

    /// Resolves relative file settings against `base_dir`.
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        self.storage.normalize_paths(base_dir);
        self.rules.normalize_paths(base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        if self.toolchain.list_ttl_secs == 0 {
            bail!("toolchain.list_ttl_secs must be at least 1");
        }
        if self.toolchain.go_binary.trim().is_empty() {
            bail!("toolchain.go_binary must not be empty");
        }
        Ok(())
    }
}
