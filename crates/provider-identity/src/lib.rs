//! Provider identity: the stable `(registry, namespace, name, version, os,
//! arch)` key used throughout the cache, plus the pure URL builders for the
//! upstream provider-registry protocol.

use serde::{Deserialize, Serialize};
use url::Url;

/// Sentinel platform value: cache this provider under the host's actual
/// `os`/`arch`, but do not keep the archive once it has been extracted.
pub const SENTINEL_CACHE_PROVIDER: &str = "cache_provider";

/// Sentinel platform value: same as [`SENTINEL_CACHE_PROVIDER`], but also
/// retain the downloaded archive file after extraction.
pub const SENTINEL_CACHE_PROVIDER_AND_ARCHIVE: &str = "cache_providerandarchive";

/// The six-tuple identity of a cacheable provider artifact, plus the
/// upstream download URL captured from a find-package response (when
/// known).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub registry_name: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid registry host {0:?}: {1}")]
    InvalidRegistry(String, url::ParseError),
}

impl ProviderIdentity {
    pub fn new(
        registry_name: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            registry_name: registry_name.into(),
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
            download_url: None,
        }
    }

    /// `<os>_<arch>`, the name of the per-platform extraction directory.
    pub fn platform(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    /// Whether `os`/`arch` name one of the two recognized caching
    /// sentinels, and if so whether the sentinel additionally requests
    /// archive retention.
    pub fn sentinel(&self) -> Option<Sentinel> {
        if self.os == SENTINEL_CACHE_PROVIDER_AND_ARCHIVE
            || self.arch == SENTINEL_CACHE_PROVIDER_AND_ARCHIVE
        {
            Some(Sentinel::CacheProviderAndArchive)
        } else if self.os == SENTINEL_CACHE_PROVIDER || self.arch == SENTINEL_CACHE_PROVIDER {
            Some(Sentinel::CacheProvider)
        } else {
            None
        }
    }

    /// `https://<registry>/v1/providers/<namespace>/<name>/versions`
    pub fn versions_url(&self) -> Result<Url, IdentityError> {
        self.build_url(&format!(
            "/v1/providers/{}/{}/versions",
            self.namespace, self.name
        ))
    }

    /// `https://<registry>/v1/providers/<namespace>/<name>/<version>/download/<os>/<arch>`
    pub fn package_url(&self) -> Result<Url, IdentityError> {
        self.build_url(&format!(
            "/v1/providers/{}/{}/{}/download/{}/{}",
            self.namespace, self.name, self.version, self.os, self.arch
        ))
    }

    fn build_url(&self, path: &str) -> Result<Url, IdentityError> {
        let raw = format!("https://{}{path}", self.registry_name);
        Url::parse(&raw).map_err(|e| IdentityError::InvalidRegistry(raw, e))
    }

    /// Returns a copy with `os`/`arch` replaced, used when substituting the
    /// host platform for a sentinel value.
    pub fn with_platform(&self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            ..self.clone()
        }
    }

    /// The canonical tuple used as the cache key: every field except
    /// `download_url`.
    pub fn cache_key(&self) -> (String, String, String, String, String, String) {
        (
            self.registry_name.clone(),
            self.namespace.clone(),
            self.name.clone(),
            self.version.clone(),
            self.os.clone(),
            self.arch.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    CacheProvider,
    CacheProviderAndArchive,
}

/// Pointwise "both equal or either empty" matcher: two identities match
/// when, for every field, at least one side is empty or both sides are
/// equal.
pub fn identity_match(a: &ProviderIdentity, b: &ProviderIdentity) -> bool {
    field_match(&a.registry_name, &b.registry_name)
        && field_match(&a.namespace, &b.namespace)
        && field_match(&a.name, &b.name)
        && field_match(&a.version, &b.version)
        && field_match(&a.os, &b.os)
        && field_match(&a.arch, &b.arch)
}

fn field_match(a: &str, b: &str) -> bool {
    a.is_empty() || b.is_empty() || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(os: &str, arch: &str) -> ProviderIdentity {
        ProviderIdentity::new("registry.example.com", "foo", "bar", "1.0.0", os, arch)
    }

    #[test]
    fn urls_are_built_verbatim() {
        let p = id("linux", "amd64");
        assert_eq!(
            p.versions_url().unwrap().as_str(),
            "https://registry.example.com/v1/providers/foo/bar/versions"
        );
        assert_eq!(
            p.package_url().unwrap().as_str(),
            "https://registry.example.com/v1/providers/foo/bar/1.0.0/download/linux/amd64"
        );
        assert_eq!(p.platform(), "linux_amd64");
    }

    #[test]
    fn sentinel_detection() {
        assert_eq!(id("linux", "amd64").sentinel(), None);
        assert_eq!(
            id("cache_provider", "cache_provider").sentinel(),
            Some(Sentinel::CacheProvider)
        );
        assert_eq!(
            id(
                "cache_providerandarchive",
                "cache_providerandarchive"
            )
            .sentinel(),
            Some(Sentinel::CacheProviderAndArchive)
        );
    }

    #[test]
    fn match_is_reflexive_symmetric_and_empty_is_wildcard() {
        let a = id("linux", "amd64");
        let b = id("linux", "amd64");
        assert!(identity_match(&a, &a));
        assert!(identity_match(&a, &b));
        assert!(identity_match(&b, &a));

        let mut cleared = a.clone();
        cleared.arch = String::new();
        assert!(identity_match(&a, &cleared));

        let mismatched = id("darwin", "arm64");
        assert!(!identity_match(&a, &mismatched));
    }
}
