use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Access rule files, one regular expression per line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub allow_list: Option<PathBuf>,
    #[serde(default)]
    pub deny_list: Option<PathBuf>,
}

impl RulesConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        for path in [&mut self.allow_list, &mut self.deny_list]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}
