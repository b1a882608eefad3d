use govein_adapter::{ModuleError, StorageError};
use thiserror::Error;

use crate::toolchain::{FileRole, ToolchainError};

/// Failure of a proxy operation, handed to the front end for status mapping.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("module {0} is not allowed by proxy policy")]
    Forbidden(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    /// The toolchain resolved a different module than the one requested.
    #[error("go list -m: asked for {requested} but got {resolved}")]
    PathMismatch { requested: String, resolved: String },
    #[error("go mod download: no {role} file reported for {module}")]
    MissingFile { role: FileRole, module: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}
