//! Invocation of the `go` command, the only place an external process is spawned.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use govein_adapter::ModuleVersion;
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolchainConfig;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("{command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command}:\n{stderr}{stdout}")]
    Failed {
        command: String,
        stderr: String,
        stdout: String,
    },
    #[error("{command}: reading json: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Output of `go list -m -json -versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VersionList {
    pub path: String,
    pub versions: Vec<String>,
}

/// Output of `go mod download -json`: local paths inside the module cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DownloadInfo {
    pub path: String,
    pub version: String,
    pub info: String,
    pub go_mod: String,
    pub zip: String,
    pub dir: String,
    pub sum: String,
    pub go_mod_sum: String,
    pub error: String,
}

/// Which file of a resolved module version a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Info,
    GoMod,
    Zip,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Info => write!(f, "info"),
            FileRole::GoMod => write!(f, "go.mod"),
            FileRole::Zip => write!(f, "zip"),
        }
    }
}

impl DownloadInfo {
    /// Local path of the requested file, `None` when the toolchain left it out.
    pub fn file(&self, role: FileRole) -> Option<&Path> {
        let path = match role {
            FileRole::Info => &self.info,
            FileRole::GoMod => &self.go_mod,
            FileRole::Zip => &self.zip,
        };
        (!path.is_empty()).then(|| Path::new(path.as_str()))
    }
}

/// Module resolution backend consumed by the proxy operations.
pub trait Toolchain: Send + Sync + 'static {
    fn list_versions(
        &self,
        module_path: &str,
    ) -> impl Future<Output = Result<VersionList, ToolchainError>> + Send;

    fn download(
        &self,
        module: &ModuleVersion,
    ) -> impl Future<Output = Result<DownloadInfo, ToolchainError>> + Send;
}

/// [`Toolchain`] backed by the local `go` binary.
#[derive(Debug, Clone)]
pub struct GoCommand {
    program: String,
    envs: Vec<(String, String)>,
}

impl GoCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            envs: git_defaults(|key| std::env::var_os(key).filter(|v| !v.is_empty()).is_some()),
        }
    }

    pub fn from_config(config: &ToolchainConfig, cache_dir: Option<&Path>) -> Self {
        let go = Self::new(config.go_binary.clone());
        match cache_dir {
            Some(dir) => go.with_gopath(dir),
            None => go,
        }
    }

    /// Points the child's GOPATH, and with it the module cache, at `dir`.
    pub fn with_gopath(mut self, dir: &Path) -> Self {
        self.envs
            .push(("GOPATH".to_string(), dir.to_string_lossy().into_owned()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// First GOPATH entry reported by `go env`, if any.
    pub async fn gopath(&self) -> Result<Option<PathBuf>, ToolchainError> {
        #[derive(Deserialize)]
        struct Env {
            #[serde(rename = "GOPATH", default)]
            gopath: String,
        }

        let env: Env = self.run(&["env", "-json", "GOPATH"]).await?;
        Ok(first_gopath_entry(&env.gopath))
    }

    async fn run<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, ToolchainError> {
        run_json(&self.program, args, &self.envs).await
    }
}

impl Toolchain for GoCommand {
    async fn list_versions(&self, module_path: &str) -> Result<VersionList, ToolchainError> {
        let query = format!("{module_path}@latest");
        self.run(&["list", "-m", "-json", "-versions", &query]).await
    }

    async fn download(&self, module: &ModuleVersion) -> Result<DownloadInfo, ToolchainError> {
        let coordinate = module.to_string();
        self.run(&["mod", "download", "-json", &coordinate]).await
    }
}

/// Runs `program` and decodes its standard output as JSON.
pub async fn run_json<T: DeserializeOwned>(
    program: &str,
    args: &[&str],
    envs: &[(String, String)],
) -> Result<T, ToolchainError> {
    let command = command_line(program, args);
    debug!(%command, "invoking toolchain");

    let output = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ToolchainError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolchainError::Failed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| ToolchainError::Decode { command, source })
}

/// Module cache directory below a GOPATH entry.
pub fn download_root(gopath: &Path) -> PathBuf {
    gopath.join("pkg").join("mod").join("cache").join("download")
}

fn first_gopath_entry(raw: &str) -> Option<PathBuf> {
    std::env::split_paths(raw)
        .next()
        .filter(|entry| !entry.as_os_str().is_empty())
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

// Keeps git from prompting for credentials or sharing ssh masters with the host.
fn git_defaults(is_set: impl Fn(&str) -> bool) -> Vec<(String, String)> {
    let mut envs = Vec::new();
    if !is_set("GIT_TERMINAL_PROMPT") {
        envs.push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));
    }
    if !is_set("GIT_SSH") && !is_set("GIT_SSH_COMMAND") {
        envs.push((
            "GIT_SSH_COMMAND".to_string(),
            "ssh -o ControlMaster=no".to_string(),
        ));
    }
    envs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_version_list() {
        let raw = r#"{"Path":"golang.org/x/mod","Version":"v0.20.0","Versions":["v0.1.0","v0.2.0"],"Time":"2024-08-01T00:00:00Z"}"#;
        let list: VersionList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.path, "golang.org/x/mod");
        assert_eq!(list.versions, vec!["v0.1.0", "v0.2.0"]);
    }

    #[test]
    fn decodes_version_list_without_versions() {
        let list: VersionList = serde_json::from_str(r#"{"Path":"example.com/new"}"#).unwrap();
        assert!(list.versions.is_empty());
    }

    #[test]
    fn decodes_download_info() {
        let raw = r#"{
            "Path": "golang.org/x/mod",
            "Version": "v0.20.0",
            "Info": "/go/pkg/mod/cache/download/golang.org/x/mod/@v/v0.20.0.info",
            "GoMod": "/go/pkg/mod/cache/download/golang.org/x/mod/@v/v0.20.0.mod",
            "Zip": "/go/pkg/mod/cache/download/golang.org/x/mod/@v/v0.20.0.zip",
            "Dir": "/go/pkg/mod/golang.org/x/mod@v0.20.0",
            "Sum": "h1:abc=",
            "GoModSum": "h1:def="
        }"#;
        let info: DownloadInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.version, "v0.20.0");
        assert_eq!(info.go_mod_sum, "h1:def=");
        assert_eq!(
            info.file(FileRole::GoMod),
            Some(Path::new(
                "/go/pkg/mod/cache/download/golang.org/x/mod/@v/v0.20.0.mod"
            ))
        );
        assert!(info.error.is_empty());
    }

    #[test]
    fn missing_file_role_is_none() {
        let info = DownloadInfo {
            info: "/x.info".into(),
            ..Default::default()
        };
        assert_eq!(info.file(FileRole::Info), Some(Path::new("/x.info")));
        assert_eq!(info.file(FileRole::Zip), None);
    }

    #[test]
    fn file_role_display() {
        assert_eq!(FileRole::Info.to_string(), "info");
        assert_eq!(FileRole::GoMod.to_string(), "go.mod");
        assert_eq!(FileRole::Zip.to_string(), "zip");
    }

    #[test]
    fn gopath_uses_first_entry() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let raw = format!("/home/go{sep}/opt/go");
        assert_eq!(first_gopath_entry(&raw), Some(PathBuf::from("/home/go")));
        assert_eq!(first_gopath_entry(""), None);
        assert_eq!(first_gopath_entry(&format!("{sep}/opt/go")), None);
    }

    #[test]
    fn download_root_layout() {
        assert_eq!(
            download_root(Path::new("/home/go")),
            PathBuf::from("/home/go/pkg/mod/cache/download")
        );
    }

    #[test]
    fn git_defaults_respect_existing_environment() {
        let defaults = git_defaults(|_| false);
        assert_eq!(
            defaults,
            vec![
                ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
                (
                    "GIT_SSH_COMMAND".to_string(),
                    "ssh -o ControlMaster=no".to_string()
                ),
            ]
        );

        let with_ssh = git_defaults(|key| key == "GIT_SSH");
        assert_eq!(with_ssh.len(), 1);
        assert_eq!(with_ssh[0].0, "GIT_TERMINAL_PROMPT");

        assert!(git_defaults(|_| true).is_empty());
    }

    #[test]
    fn with_gopath_adds_child_env() {
        let go = GoCommand::new("go").with_gopath(Path::new("/srv/gocache"));
        assert!(
            go.envs
                .contains(&("GOPATH".to_string(), "/srv/gocache".to_string()))
        );
        assert_eq!(go.program(), "go");
    }

    #[test]
    fn command_line_joins_arguments() {
        assert_eq!(
            command_line("go", &["mod", "download", "-json", "a.com/b@v1.0.0"]),
            "go mod download -json a.com/b@v1.0.0"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_json_decodes_stdout() {
        #[derive(Deserialize)]
        struct Env {
            #[serde(rename = "GOPATH")]
            gopath: String,
        }

        let env: Env = run_json(
            "sh",
            &["-c", r#"printf '{"GOPATH":"%s"}' "$GOPATH""#],
            &[("GOPATH".to_string(), "/tmp/gopath".to_string())],
        )
        .await
        .unwrap();
        assert_eq!(env.gopath, "/tmp/gopath");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_json_reports_exit_failure_with_output() {
        let err = run_json::<serde_json::Value>(
            "sh",
            &["-c", "echo partial; echo 'unknown revision' >&2; exit 1"],
            &[],
        )
        .await
        .unwrap_err();

        match &err {
            ToolchainError::Failed { stderr, stdout, .. } => {
                assert_eq!(stderr, "unknown revision\n");
                assert_eq!(stdout, "partial\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("sh -c "));
        assert!(err.to_string().ends_with(":\nunknown revision\npartial\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_json_reports_malformed_output() {
        let err = run_json::<VersionList>("sh", &["-c", "echo not-json"], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolchainError::Decode { .. }));
        assert!(err.to_string().contains(": reading json: "));
    }

    #[tokio::test]
    async fn run_json_reports_missing_binary() {
        let err = run_json::<VersionList>("govein-definitely-missing-binary", &["env"], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }
}
