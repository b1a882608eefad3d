//! Allow/deny rules evaluated against module paths before any resolution work.

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("reading rule file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: invalid pattern {pattern:?}: {source}", .path.display())]
    Pattern {
        path: PathBuf,
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Module path filter built from anchored regular expressions.
///
/// Deny rules win over allow rules. With no rules configured every path is
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl AccessFilter {
    pub fn new(allow: Vec<Regex>, deny: Vec<Regex>) -> Self {
        Self { allow, deny }
    }

    /// Reads the optional allow-list and deny-list files.
    pub fn load(allow_file: Option<&Path>, deny_file: Option<&Path>) -> Result<Self, RuleError> {
        let allow = allow_file.map(load_rules).transpose()?.unwrap_or_default();
        let deny = deny_file.map(load_rules).transpose()?.unwrap_or_default();
        Ok(Self { allow, deny })
    }

    pub fn allows(&self, module_path: &str) -> bool {
        if self.deny.iter().any(|rule| rule.is_match(module_path)) {
            return false;
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|rule| rule.is_match(module_path)) {
            return false;
        }
        true
    }

    pub fn allow_count(&self) -> usize {
        self.allow.len()
    }

    pub fn deny_count(&self) -> usize {
        self.deny.len()
    }
}

pub fn load_rules(path: &Path) -> Result<Vec<Regex>, RuleError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rules(&raw, path)
}

/// Compiles one whole-path pattern per line. Blank lines and `#` comments are skipped.
pub fn parse_rules(source: &str, origin: &Path) -> Result<Vec<Regex>, RuleError> {
    source
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, pattern)| {
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| RuleError::Pattern {
                path: origin.to_path_buf(),
                line,
                pattern: pattern.to_string(),
                source,
            })
        })
        .collect()
}
