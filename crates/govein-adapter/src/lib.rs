pub mod module;
mod storage;

pub use module::{
    LATEST, ModuleError, ModuleVersion, check_path, escape_path, escape_version, unescape_path,
    unescape_version,
};
pub use storage::{CacheStorage, LIST_CACHE_FILE, ProxyFile, StorageError};
