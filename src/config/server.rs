use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl ServerConfig {
    /// Applies a `host:port` listen address, as given on the command line.
    pub fn set_listen(&mut self, listen: &str) -> Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("listen address {listen} must be host:port"))?;
        self.port = port
            .parse()
            .with_context(|| format!("invalid port in listen address {listen}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        self.host = if host.is_empty() {
            default_host()
        } else {
            host.to_string()
        };
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_workers() -> usize {
    num_cpus::get()
}
