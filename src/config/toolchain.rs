use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "ToolchainConfig::default_go_binary")]
    pub go_binary: String,
    #[serde(default = "ToolchainConfig::default_list_ttl_secs")]
    pub list_ttl_secs: u64,
}

impl ToolchainConfig {
    fn default_go_binary() -> String {
        "go".to_string()
    }

    fn default_list_ttl_secs() -> u64 {
        300
    }

    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            go_binary: ToolchainConfig::default_go_binary(),
            list_ttl_secs: ToolchainConfig::default_list_ttl_secs(),
        }
    }
}
