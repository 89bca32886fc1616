use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use provider_identity::ProviderIdentity;

use crate::auth::PackageAuthContext;

pub type CacheKey = (String, String, String, String, String, String);

/// One cache entry per canonical `(registry, namespace, name, version, os,
/// arch)` tuple that has been requested at least once.
pub struct CacheEntry {
    pub identity: ProviderIdentity,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
    pub lock_path: PathBuf,
    pub keep_archive: bool,
    /// Authentication material captured alongside this entry, if the
    /// find-package response carried a `shasum` and checksum-document URLs.
    /// `None` means the populate worker skips authentication for this
    /// entry rather than failing it outright — registries that omit this
    /// metadata are not treated as a hard error.
    pub auth: Option<PackageAuthContext>,
    ready: AtomicBool,
}

impl CacheEntry {
    pub fn new(
        identity: ProviderIdentity,
        archive_path: PathBuf,
        extract_dir: PathBuf,
        lock_path: PathBuf,
        keep_archive: bool,
        auth: Option<PackageAuthContext>,
    ) -> Self {
        Self {
            identity,
            archive_path,
            extract_dir,
            lock_path,
            keep_archive,
            auth,
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Transitions `ready` from `false` to `true`. Never mutated back to
    /// `false` afterwards.
    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// A snapshot of this entry as exposed to callers outside the cache
    /// crate (the downloader controller, admin health endpoint).
    pub fn snapshot(&self) -> CacheEntrySnapshot {
        CacheEntrySnapshot {
            identity: self.identity.clone(),
            archive_path: self.archive_path.clone(),
            extract_dir: self.extract_dir.clone(),
            ready: self.is_ready(),
            keep_archive: self.keep_archive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntrySnapshot {
    pub identity: ProviderIdentity,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
    pub ready: bool,
    pub keep_archive: bool,
}
