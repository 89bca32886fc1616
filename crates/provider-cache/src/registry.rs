use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use provider_identity::ProviderIdentity;
use tokio::sync::{mpsc, Mutex, RwLock as AsyncRwLock};

use crate::auth::PackageAuthContext;
use crate::entry::{CacheEntry, CacheEntrySnapshot, CacheKey};
use crate::layout::CacheLayout;

/// The in-memory cache-entry table plus the channel new entries are
/// scheduled on and the "cache-ready" barrier populate tasks hold open
/// while they work.
///
/// Cloning is cheap: every clone shares the same underlying table,
/// channel, and barrier.
#[derive(Clone)]
pub struct ProviderCache {
    inner: Arc<Inner>,
}

struct Inner {
    layout: CacheLayout,
    entries: SyncRwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    tx: mpsc::UnboundedSender<Arc<CacheEntry>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<CacheEntry>>>>,
    /// Readers are populate tasks (held for the duration of their work);
    /// the writer is [`ProviderCache::wait_for_cache_ready`].
    ready_barrier: AsyncRwLock<()>,
}

impl ProviderCache {
    pub fn new(layout: CacheLayout) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                layout,
                entries: SyncRwLock::new(HashMap::new()),
                tx,
                rx: Mutex::new(Some(rx)),
                ready_barrier: AsyncRwLock::new(()),
            }),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.inner.layout
    }

    /// Non-blocking. Creates the cache entry if absent and schedules it on
    /// the worker channel. A no-op if `download_url` is unset or an entry
    /// for this identity already exists — callers never enqueue duplicate
    /// populate work for the same identity.
    ///
    /// `keep_archive` is taken as an explicit parameter rather than
    /// re-derived from `identity.sentinel()`: callers substitute the
    /// sentinel's `os`/`arch` with the host platform before this point,
    /// so the sentinel is no longer observable on `identity` itself.
    ///
    /// `auth` carries the checksum/signature material captured from the
    /// find-package response, if any was present; the populate worker
    /// authenticates the archive against it before marking the entry ready.
    pub fn cache_provider(
        &self,
        identity: ProviderIdentity,
        keep_archive: bool,
        auth: Option<PackageAuthContext>,
    ) {
        if identity.download_url.is_none() {
            return;
        }
        let key = identity.cache_key();
        let mut entries = self.inner.entries.write();
        if entries.contains_key(&key) {
            return;
        }

        let layout = &self.inner.layout;
        let archive_filename = archive_filename_for(&identity);
        let entry = Arc::new(CacheEntry::new(
            identity.clone(),
            layout.archive_path(&identity, &archive_filename),
            layout.extract_dir(&identity),
            layout.lock_path(&identity),
            keep_archive,
            auth,
        ));
        entries.insert(key, entry.clone());
        drop(entries);

        // An unbounded channel send only fails if the worker has shut down;
        // the entry stays in the table (never ready) and the downloader
        // controller falls back to proxying, same as any other populate
        // failure.
        let _ = self.inner.tx.send(entry);
    }

    /// Returns a snapshot of the entry iff it exists, is ready, and its
    /// archive file still exists on disk.
    pub fn get_provider_cache(&self, identity: &ProviderIdentity) -> Option<CacheEntrySnapshot> {
        let key = identity.cache_key();
        let entry = self.inner.entries.read().get(&key)?.clone();
        if !entry.is_ready() {
            return None;
        }
        if !entry.archive_path.exists() {
            return None;
        }
        Some(entry.snapshot())
    }

    /// Finds a ready entry whose captured `download_url` matches the given
    /// upstream URL — used by the downloader controller, which only knows
    /// the reconstructed upstream URL, not the full identity.
    ///
    /// Compared with the query string (and fragment) stripped from both
    /// sides: the downloader controller's `/downloads/provider/:host/*path`
    /// route can only reconstruct the scheme/host/path, never the query a
    /// signed download URL (e.g. a GitHub release asset) may have carried,
    /// while the entry's `download_url` is the full pre-rewrite URL used to
    /// actually fetch the archive.
    pub fn find_by_download_url(&self, download_url: &str) -> Option<CacheEntrySnapshot> {
        let target = strip_query(download_url);
        let entries = self.inner.entries.read();
        entries
            .values()
            .find(|e| {
                e.is_ready()
                    && e.identity
                        .download_url
                        .as_deref()
                        .map(strip_query)
                        == Some(target)
            })
            .map(|e| e.snapshot())
    }

    /// Blocks until every in-flight population has finished by taking the
    /// ready-barrier's write lock: it can only be acquired once every
    /// populate task holding a read guard has released it.
    pub async fn wait_for_cache_ready(&self) {
        let _guard = self.inner.ready_barrier.write().await;
    }

    pub(crate) async fn hold_ready_barrier(
        &self,
    ) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.inner.ready_barrier.read().await
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Arc<CacheEntry>>> {
        self.inner.rx.try_lock().ok()?.take()
    }

    pub(crate) fn all_entries(&self) -> Vec<Arc<CacheEntry>> {
        self.inner.entries.read().values().cloned().collect()
    }

    /// A point-in-time count of tracked entries and how many are `ready`,
    /// for the `/healthz` liveness endpoint.
    pub fn cache_stats(&self) -> CacheStats {
        let entries = self.inner.entries.read();
        let ready = entries.values().filter(|e| e.is_ready()).count();
        CacheStats {
            total: entries.len(),
            ready,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub ready: usize,
}

/// Drops a URL's query string and fragment, leaving scheme/host/path.
fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// The archive is named after the provider binary it contains; the
/// upstream response doesn't hand us a filename directly, so we derive a
/// stable one from the identity the same way the registry protocol's
/// reference clients do.
pub fn archive_filename_for(identity: &ProviderIdentity) -> String {
    format!(
        "terraform-provider-{}_{}_{}_{}.zip",
        identity.name, identity.version, identity.os, identity.arch
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_query_drops_query_and_fragment() {
        assert_eq!(
            strip_query("https://github.com/acme/releases/a.zip?X-Amz-Signature=abc&Expires=1"),
            "https://github.com/acme/releases/a.zip"
        );
        assert_eq!(strip_query("https://example.com/a.zip#frag"), "https://example.com/a.zip");
        assert_eq!(strip_query("https://example.com/a.zip"), "https://example.com/a.zip");
    }

    #[tokio::test]
    async fn find_by_download_url_matches_despite_signed_query_string() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProviderCache::new(CacheLayout::new(dir.path()));
        let mut identity = ProviderIdentity::new("registry.example.com", "foo", "bar", "1.0.0", "linux", "amd64");
        identity.download_url = Some(
            "https://github.com/acme/releases/terraform-provider-bar.zip?X-Amz-Signature=abc"
                .to_string(),
        );
        cache.cache_provider(identity, false, None);

        let key = (
            "registry.example.com".to_string(),
            "foo".to_string(),
            "bar".to_string(),
            "1.0.0".to_string(),
            "linux".to_string(),
            "amd64".to_string(),
        );
        cache.inner.entries.read().get(&key).unwrap().mark_ready();

        let found = cache.find_by_download_url(
            "https://github.com/acme/releases/terraform-provider-bar.zip",
        );
        assert!(found.is_some());
    }
}
