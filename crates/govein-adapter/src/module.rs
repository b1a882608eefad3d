//! Module coordinates and the case-escaping scheme used by the go command.
//!
//! Module paths are case-sensitive but module caches live on filesystems that
//! may not be, so every upper-case ASCII letter is stored as `!` followed by its
//! lower-case form (`github.com/Azure` becomes `github.com/!azure`).

use std::fmt;

use thiserror::Error;

/// Version query that resolves to the newest available version.
pub const LATEST: &str = "latest";

const WINDOWS_RESERVED: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FILE_NAME_PUNCTUATION: &str = "!#$%&()+,-.=@[]^_{}~ ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("malformed module path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("invalid escaped module path {0:?}")]
    InvalidEscapedPath(String),
    #[error("invalid escaped version {0:?}")]
    InvalidEscapedVersion(String),
}

/// A module path paired with a version or version query such as `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleVersion {
    pub path: String,
    pub version: String,
}

impl ModuleVersion {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    pub fn latest(path: impl Into<String>) -> Self {
        Self::new(path, LATEST)
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}@{}", self.path, self.version)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElemKind {
    Module,
    File,
}

/// Checks that `path` is a valid module path.
pub fn check_path(path: &str) -> Result<(), ModuleError> {
    let invalid = |reason: String| ModuleError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    check_path_elements(path).map_err(invalid)?;

    let first = path.split('/').next().unwrap_or(path);
    if first.is_empty() {
        return Err(invalid("leading slash".into()));
    }
    if !first.contains('.') {
        return Err(invalid("missing dot in first path element".into()));
    }
    if first.starts_with('-') {
        return Err(invalid("leading dash in first path element".into()));
    }
    if let Some(c) = first
        .chars()
        .find(|c| !matches!(c, '-' | '.' | '0'..='9' | 'a'..='z'))
    {
        return Err(invalid(format!("invalid char {c:?} in first path element")));
    }
    if split_path_version(path).is_none() {
        return Err(invalid("invalid version".into()));
    }
    Ok(())
}

fn check_path_elements(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty string".into());
    }
    if path.starts_with('-') {
        return Err("leading dash".into());
    }
    if path.contains("//") {
        return Err("double slash".into());
    }
    if path.ends_with('/') {
        return Err("trailing slash".into());
    }
    path.split('/')
        .try_for_each(|elem| check_elem(elem, ElemKind::Module))
}

fn check_elem(elem: &str, kind: ElemKind) -> Result<(), String> {
    if elem.is_empty() {
        return Err("empty path element".into());
    }
    if elem.chars().all(|c| c == '.') {
        return Err(format!("invalid path element {elem:?}"));
    }
    if elem.starts_with('.') && kind == ElemKind::Module {
        return Err("leading dot in path element".into());
    }
    if elem.ends_with('.') {
        return Err("trailing dot in path element".into());
    }
    if let Some(c) = elem.chars().find(|&c| !char_allowed(c, kind)) {
        return Err(format!("invalid char {c:?}"));
    }

    let short = elem.split('.').next().unwrap_or(elem);
    if WINDOWS_RESERVED
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(short))
    {
        return Err(format!(
            "{short:?} disallowed as path element component on Windows"
        ));
    }
    if kind == ElemKind::File {
        return Ok(());
    }

    // Reject components that look like Windows 8.3 short names.
    if let Some(tilde) = short.rfind('~')
        && tilde < short.len() - 1
        && short[tilde + 1..].bytes().all(|b| b.is_ascii_digit())
    {
        return Err("trailing tilde and digits in path element".into());
    }
    Ok(())
}

fn char_allowed(c: char, kind: ElemKind) -> bool {
    match kind {
        ElemKind::Module => c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'),
        ElemKind::File => {
            if c.is_ascii() {
                c.is_ascii_alphanumeric() || FILE_NAME_PUNCTUATION.contains(c)
            } else {
                c.is_alphabetic()
            }
        }
    }
}

/// Splits a module path into its prefix and major-version suffix.
///
/// Returns `None` when the suffix is malformed, such as `/v1` or `/v0`, which
/// are never written out explicitly.
///
/// - `"example.com/mod"` -> `("example.com/mod", "")`
/// - `"example.com/mod/v2"` -> `("example.com/mod", "/v2")`
/// - `"gopkg.in/yaml.v3"` -> `("gopkg.in/yaml", ".v3")`
pub fn split_path_version(path: &str) -> Option<(&str, &str)> {
    if path.starts_with("gopkg.in/") {
        return split_gopkg_in(path);
    }

    let bytes = path.as_bytes();
    let mut i = bytes.len();
    let mut dot = false;
    while i > 0 && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.') {
        if bytes[i - 1] == b'.' {
            dot = true;
        }
        i -= 1;
    }
    if i <= 1 || i == bytes.len() || bytes[i - 1] != b'v' || bytes[i - 2] != b'/' {
        return Some((path, ""));
    }

    let (prefix, major) = path.split_at(i - 2);
    if dot || major.len() <= 2 || major.as_bytes()[2] == b'0' || major == "/v1" {
        return None;
    }
    Some((prefix, major))
}

fn split_gopkg_in(path: &str) -> Option<(&str, &str)> {
    let bytes = path.as_bytes();
    let mut i = bytes.len();
    if path.ends_with("-unstable") {
        i -= "-unstable".len();
    }
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i <= 1 || bytes[i - 1] != b'v' || bytes[i - 2] != b'.' {
        return None;
    }

    let (prefix, major) = path.split_at(i - 2);
    if major.len() <= 2 || (major.as_bytes()[2] == b'0' && major != ".v0") {
        return None;
    }
    Some((prefix, major))
}

/// Returns the safe on-disk encoding of a module path.
pub fn escape_path(path: &str) -> Result<String, ModuleError> {
    check_path(path)?;
    escape_string(path).ok_or_else(|| ModuleError::InvalidPath {
        path: path.to_string(),
        reason: "internal error: inconsistency in escape_path".into(),
    })
}

/// Reverses [`escape_path`] and validates the result.
pub fn unescape_path(escaped: &str) -> Result<String, ModuleError> {
    let path = unescape_string(escaped)
        .ok_or_else(|| ModuleError::InvalidEscapedPath(escaped.to_string()))?;
    check_path(&path)?;
    Ok(path)
}

/// Returns the safe on-disk encoding of a version string.
pub fn escape_version(version: &str) -> Result<String, ModuleError> {
    let invalid = |reason: String| ModuleError::InvalidVersion {
        version: version.to_string(),
        reason,
    };

    check_elem(version, ElemKind::File).map_err(invalid)?;
    if version.contains('!') {
        return Err(invalid("disallowed version string".into()));
    }
    escape_string(version).ok_or_else(|| invalid("non-ASCII version".into()))
}

/// Reverses [`escape_version`] and validates the result.
pub fn unescape_version(escaped: &str) -> Result<String, ModuleError> {
    let version = unescape_string(escaped)
        .ok_or_else(|| ModuleError::InvalidEscapedVersion(escaped.to_string()))?;
    check_elem(&version, ElemKind::File).map_err(|reason| ModuleError::InvalidVersion {
        version: version.clone(),
        reason,
    })?;
    Ok(version)
}

fn escape_string(s: &str) -> Option<String> {
    if s.chars().any(|c| c == '!' || !c.is_ascii()) {
        return None;
    }
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    Some(escaped)
}

fn unescape_string(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut bang = false;
    for c in escaped.chars() {
        if !c.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !c.is_ascii_lowercase() {
                return None;
            }
            out.push(c.to_ascii_uppercase());
            continue;
        }
        if c == '!' {
            bang = true;
            continue;
        }
        if c.is_ascii_uppercase() {
            return None;
        }
        out.push(c);
    }
    (!bang).then_some(out)
}
