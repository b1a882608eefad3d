use govein_adapter::{LATEST, ModuleError, ModuleVersion, unescape_path, unescape_version};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no such path")]
    NoSuchPath,
    #[error("unsupported file {0:?}")]
    UnknownFile(String),
    #[error("latest is not a version, use /@latest")]
    LatestAsVersion,
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// A parsed module proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    /// `/<module>/@v/list`
    List { module: String },
    /// `/<module>/@latest`
    Latest { module: String },
    /// `/<module>/@v/<version>.info`
    Info(ModuleVersion),
    /// `/<module>/@v/<version>.mod`
    GoMod(ModuleVersion),
    /// `/<module>/@v/<version>.zip`
    Zip(ModuleVersion),
}

impl ProxyRequest {
    /// Parses an already percent-decoded request path.
    pub fn from_path(path: &str) -> Result<Self, RouteError> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let Some(split) = path.find("/@") else {
            return Err(RouteError::NoSuchPath);
        };
        let module = unescape_path(&path[..split])?;

        match &path[split..] {
            "/@latest" => Ok(Self::Latest { module }),
            "/@v/list" => Ok(Self::List { module }),
            what => {
                let file = what.strip_prefix("/@v/").ok_or(RouteError::NoSuchPath)?;
                let Some((escaped_version, ext)) = file.rsplit_once('.') else {
                    return Err(RouteError::UnknownFile(file.to_string()));
                };
                if !matches!(ext, "info" | "mod" | "zip") {
                    return Err(RouteError::UnknownFile(file.to_string()));
                }

                let version = unescape_version(escaped_version)?;
                if version == LATEST {
                    return Err(RouteError::LatestAsVersion);
                }
                let coordinate = ModuleVersion::new(module, version);
                Ok(match ext {
                    "info" => Self::Info(coordinate),
                    "mod" => Self::GoMod(coordinate),
                    _ => Self::Zip(coordinate),
                })
            }
        }
    }

    pub fn module_path(&self) -> &str {
        match self {
            Self::List { module } | Self::Latest { module } => module,
            Self::Info(mv) | Self::GoMod(mv) | Self::Zip(mv) => &mv.path,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::List { .. } | Self::GoMod(_) => "text/plain; charset=UTF-8",
            Self::Latest { .. } | Self::Info(_) => "application/json",
            Self::Zip(_) => "application/zip",
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Latest { .. } => "latest",
            Self::Info(_) => "info",
            Self::GoMod(_) => "mod",
            Self::Zip(_) => "zip",
        }
    }
}
