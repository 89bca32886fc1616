use std::path::PathBuf;

use provider_identity::ProviderIdentity;

/// `<base>/<registry>/<namespace>/<name>/<version>/` and the paths nested
/// under it for a single provider identity.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    base: PathBuf,
}

impl CacheLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// OS user-cache-dir convention, used when no `provider_cache_dir` is
    /// configured.
    pub fn default_base() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tfrelay")
            .join("providers")
    }

    pub fn base(&self) -> &std::path::Path {
        &self.base
    }

    fn version_dir(&self, id: &ProviderIdentity) -> PathBuf {
        self.base
            .join(&id.registry_name)
            .join(&id.namespace)
            .join(&id.name)
            .join(&id.version)
    }

    pub fn archive_path(&self, id: &ProviderIdentity, archive_filename: &str) -> PathBuf {
        self.version_dir(id).join(archive_filename)
    }

    pub fn lock_path(&self, id: &ProviderIdentity) -> PathBuf {
        self.version_dir(id).join(format!("{}.lock", id.platform()))
    }

    pub fn extract_dir(&self, id: &ProviderIdentity) -> PathBuf {
        self.version_dir(id).join(id.platform())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_the_documented_tree() {
        let layout = CacheLayout::new("/cache");
        let id = ProviderIdentity::new(
            "registry.example.com",
            "foo",
            "bar",
            "1.0.0",
            "linux",
            "amd64",
        );
        assert_eq!(
            layout.extract_dir(&id),
            PathBuf::from("/cache/registry.example.com/foo/bar/1.0.0/linux_amd64")
        );
        assert_eq!(
            layout.lock_path(&id),
            PathBuf::from("/cache/registry.example.com/foo/bar/1.0.0/linux_amd64.lock")
        );
        assert_eq!(
            layout.archive_path(&id, "terraform-provider-bar_1.0.0.zip"),
            PathBuf::from(
                "/cache/registry.example.com/foo/bar/1.0.0/terraform-provider-bar_1.0.0.zip"
            )
        );
    }
}
