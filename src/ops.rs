//! [`ServerOps`] backed by the go command and its module download cache.


use std::time::Duration;

use govein_adapter::{CacheStorage, ModuleVersion, ProxyFile, escape_path};
use tracing::debug;

use crate::{
    error::ProxyError,
    filter::AccessFilter,
    server::{RequestContext, ServerOps},
    toolchain::{FileRole, Toolchain},
};

/// How long a cached version list is served without asking the toolchain again.
pub const LIST_EXPIRE: Duration = Duration::from_secs(5 * 60);

pub struct GoOps<T> {
    filter: AccessFilter,
    storage: CacheStorage,
    toolchain: T,
    list_ttl: Duration,
}

impl<T: Toolchain> GoOps<T> {
    pub fn new(filter: AccessFilter, storage: CacheStorage, toolchain: T) -> Self {
        Self {
            filter,
            storage,
            toolchain,
            list_ttl: LIST_EXPIRE,
        }
    }

    pub fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = ttl;
        self
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    async fn list_versions(&self, module_path: &str) -> Result<ProxyFile, ProxyError> {
        let escaped = escape_path(module_path)?;
        let file = self.storage.list_path(&escaped);

        if let Some(cached) = self.storage.open_fresh(&file, self.list_ttl).await? {
            debug!(module = %module_path, "version list served from cache");
            return Ok(cached);
        }

        let list = self.toolchain.list_versions(module_path).await?;
        if list.path != module_path {
            return Err(ProxyError::PathMismatch {
                requested: module_path.to_string(),
                resolved: list.path,
            });
        }

        self.storage
            .write_atomic(&file, &serialize_versions(&list.versions))
            .await?;
        debug!(
            module = %module_path,
            versions = list.versions.len(),
            "version list refreshed"
        );
        Ok(ProxyFile::open(&file).await?)
    }

    async fn download_file(
        &self,
        module: &ModuleVersion,
        role: FileRole,
    ) -> Result<ProxyFile, ProxyError> {
        let info = self.toolchain.download(module).await?;
        let Some(path) = info.file(role) else {
            return Err(ProxyError::MissingFile {
                role,
                module: module.to_string(),
            });
        };
        Ok(ProxyFile::open(path).await?)
    }
}

impl<T: Toolchain> ServerOps for GoOps<T> {
    fn filter(&self, _ctx: &RequestContext, module_path: &str) -> bool {
        self.filter.allows(module_path)
    }

    async fn list(&self, _ctx: &RequestContext, module_path: &str) -> Result<ProxyFile, ProxyError> {
        self.list_versions(module_path).await
    }

    async fn latest(
        &self,
        _ctx: &RequestContext,
        module_path: &str,
    ) -> Result<ProxyFile, ProxyError> {
        self.download_file(&ModuleVersion::latest(module_path), FileRole::Info)
            .await
    }

    async fn info(
        &self,
        _ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> Result<ProxyFile, ProxyError> {
        self.download_file(module, FileRole::Info).await
    }

    async fn go_mod(
        &self,
        _ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> Result<ProxyFile, ProxyError> {
        self.download_file(module, FileRole::GoMod).await
    }

    async fn zip(
        &self,
        _ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> Result<ProxyFile, ProxyError> {
        self.download_file(module, FileRole::Zip).await
    }
}

/// Newline-terminated version list; no versions yields no bytes at all.
pub fn serialize_versions(versions: &[String]) -> Vec<u8> {
    let mut data = versions.join("\n").into_bytes();
    data.push(b'\n');
    if data.len() == 1 {
        data.clear();
    }
    data
}
