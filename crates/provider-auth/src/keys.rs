//! Signing keys: the baked-in HashiCorp and partners trust keys, plus the
//! registry-supplied signing keys carried on a find-package response.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// ASCII-armored public key plus an optional ASCII-armored trust signature
/// issued by the registry operator over that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub ascii_armored_public_key: String,
    #[serde(default)]
    pub trust_signature: Option<String>,
}

impl SigningKey {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            ascii_armored_public_key: public_key.into(),
            trust_signature: None,
        }
    }

    pub fn with_trust_signature(mut self, sig: impl Into<String>) -> Self {
        self.trust_signature = Some(sig.into());
        self
    }
}

/// The well-known "official" registry signing key. Operators deploying
/// against a real upstream should replace `keys/hashicorp.asc` with that
/// registry's actual published key.
pub static OFFICIAL_KEY: Lazy<String> =
    Lazy::new(|| include_str!("../keys/hashicorp.asc").to_string());

/// The well-known "partners" trust key: a third-party signing key's trust
/// signature verifies under this key to earn [`crate::AuthResult::Partner`].
pub static PARTNERS_KEY: Lazy<String> =
    Lazy::new(|| include_str!("../keys/partners.asc").to_string());
