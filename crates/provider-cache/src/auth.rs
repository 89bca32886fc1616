use provider_auth::{Hash, SigningKey};

/// Authentication material captured from a find-package response: the
/// expected archive hash plus everything needed to fetch and verify the
/// registry's checksum document. Carried on a [`crate::CacheEntry`] so the
/// populate worker can authenticate the archive before marking it ready.
#[derive(Debug, Clone)]
pub struct PackageAuthContext {
    pub expected_hash: Hash,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    pub signing_keys: Vec<SigningKey>,
}
