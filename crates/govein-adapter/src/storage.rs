use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tokio::{
    fs::{self, DirBuilder, File, OpenOptions},
    io::AsyncWriteExt,
};

/// File name of the cached version list inside a module's `@v` directory.
pub const LIST_CACHE_FILE: &str = "listproxy";

#[derive(Debug, Error)]
#[error("{action} {}: {source}", .path.display())]
pub struct StorageError {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

impl StorageError {
    fn new(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The go command's module download cache, extended with proxy-owned list files.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Self {
        CacheStorage { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn prepare(&self) -> Result<(), StorageError> {
        create_dir_all(&self.root).await
    }

    /// Location of the cached version list for an already escaped module path.
    pub fn list_path(&self, escaped_module: &str) -> PathBuf {
        self.root
            .join(escaped_module)
            .join("@v")
            .join(LIST_CACHE_FILE)
    }

    /// Opens `path` if it was modified less than `ttl` ago.
    ///
    /// A missing or unreadable entry counts as stale. Timestamps in the future
    /// count as fresh.
    pub async fn open_fresh(
        &self,
        path: &Path,
        ttl: Duration,
    ) -> Result<Option<ProxyFile>, StorageError> {
        let Ok(metadata) = fs::metadata(path).await else {
            return Ok(None);
        };
        let Ok(modified) = metadata.modified() else {
            return Ok(None);
        };
        if modified.elapsed().unwrap_or_default() >= ttl {
            return Ok(None);
        }
        ProxyFile::open(path).await.map(Some)
    }

    /// Replaces `path` with `data` through a sibling temp file and a rename.
    pub async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut temp = TempFile::create(path).await?;
        if let Err(err) = temp.file.write_all(data).await {
            let err = StorageError::new("writing", &temp.tmp_path, err);
            if let Err(cleanup) = temp.rollback().await {
                tracing::debug!(error = %cleanup, "failed to remove temp file");
            }
            return Err(err);
        }
        temp.commit().await
    }
}

/// An open file ready to be served to a client.
#[derive(Debug)]
pub struct ProxyFile {
    pub file: File,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub path: PathBuf,
}

impl ProxyFile {
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path)
            .await
            .map_err(|err| StorageError::new("opening", path, err))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|err| StorageError::new("reading metadata of", path, err))?;

        Ok(ProxyFile {
            file,
            size: metadata.len(),
            modified: metadata.modified().ok(),
            path: path.to_path_buf(),
        })
    }
}

struct TempFile {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
}

impl TempFile {
    async fn create(final_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = final_path.parent() {
            create_dir_all(parent).await?;
        }

        let tmp_path = temp_path_for(final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .map_err(|err| StorageError::new("creating temp file", &tmp_path, err))?;

        Ok(TempFile {
            tmp_path,
            final_path: final_path.to_path_buf(),
            file,
        })
    }

    async fn commit(self) -> Result<(), StorageError> {
        let Self {
            tmp_path,
            final_path,
            mut file,
        } = self;

        file.flush()
            .await
            .map_err(|err| StorageError::new("flushing", &tmp_path, err))?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|err| StorageError::new("moving temp file to", &final_path, err))
    }

    async fn rollback(self) -> Result<(), StorageError> {
        let Self { tmp_path, file, .. } = self;
        drop(file);
        match fs::remove_file(&tmp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::new("removing temp file", &tmp_path, e)),
        }
    }
}

async fn create_dir_all(path: &Path) -> Result<(), StorageError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(path)
        .await
        .map_err(|err| StorageError::new("creating directory", path, err))
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    let tmp_name = match final_path.file_name().and_then(|s| s.to_str()) {
        Some(name) => format!("{name}.tmp-{pid}-{timestamp}"),
        None => format!("tmp-{pid}-{timestamp}"),
    };
    final_path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn age(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn test_prepare_creates_root_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("download");
        let storage = CacheStorage::new(root.clone());

        assert!(!root.exists());
        storage.prepare().await.unwrap();
        assert!(root.is_dir());
        storage.prepare().await.unwrap();
    }

    #[test]
    fn test_list_path_layout() {
        let storage = CacheStorage::new(PathBuf::from("/cache"));
        assert_eq!(
            storage.list_path("github.com/!azure/go"),
            PathBuf::from("/cache/github.com/!azure/go/@v/listproxy")
        );
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(temp_dir.path().to_path_buf());
        let path = storage.list_path("example.com/mod");

        storage.write_atomic(&path, b"v1.0.0\n").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"v1.0.0\n");

        storage.write_atomic(&path, b"").await.unwrap();
        assert!(fs::read(&path).await.unwrap().is_empty());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(LIST_CACHE_FILE)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_created_directories_use_conventional_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(temp_dir.path().to_path_buf());
        let path = storage.list_path("example.com/mod");
        storage.write_atomic(&path, b"").await.unwrap();

        let mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        // umask may only clear bits
        assert_eq!(mode & !0o755 & 0o777, 0);
    }

    #[tokio::test]
    async fn test_open_fresh_missing_file_is_stale() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(temp_dir.path().to_path_buf());
        let path = storage.list_path("example.com/mod");

        let result = storage
            .open_fresh(&path, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_open_fresh_respects_ttl() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(temp_dir.path().to_path_buf());
        let path = storage.list_path("example.com/mod");
        storage.write_atomic(&path, b"v1.0.0\n").await.unwrap();

        let mut fresh = storage
            .open_fresh(&path, Duration::from_secs(300))
            .await
            .unwrap()
            .expect("fresh entry");
        let mut buf = Vec::new();
        fresh.file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"v1.0.0\n");
        assert_eq!(fresh.size, 7);

        age(&path, Duration::from_secs(301));
        let stale = storage
            .open_fresh(&path, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_proxy_file_open_reports_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = ProxyFile::open(&temp_dir.path().join("missing.zip"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("opening "));
    }

    #[test]
    fn test_temp_path_generation() {
        let tmp_path = temp_path_for(Path::new("foo/listproxy"));
        assert!(
            tmp_path
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("listproxy.tmp-")
        );
        assert_eq!(tmp_path.parent(), Some(Path::new("foo")));
    }
}
