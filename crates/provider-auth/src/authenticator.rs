use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;

use pgp::composed::{Deserializable, SignedPublicKey, StandaloneSignature};

use crate::hash::Hash;
use crate::keys::{SigningKey, OFFICIAL_KEY, PARTNERS_KEY};
use crate::result::AuthResult;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("archive has incorrect checksum {actual} (expected {expected})")]
    ArchiveChecksumMismatch { actual: Hash, expected: Hash },

    #[error("checksum list has unexpected SHA-256 hash {actual} (expected {expected})")]
    ChecksumListMismatch { actual: Hash, expected: Hash },

    #[error("archive {0:?} not listed in checksum document")]
    FileNotInChecksumList(String),

    #[error("no signing key verified the checksum document")]
    NoValidSignature,

    #[error("signature verification error: {0}")]
    Crypto(String),

    #[error("io error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The inputs a single `(registry, namespace, name, version, os, arch)`
/// lookup's authentication pass needs: the downloaded archive, the expected
/// hash from the find-package response, and the checksum/signature
/// documents and candidate keys fetched alongside it.
pub struct PackageAuthInput {
    pub archive_path: PathBuf,
    pub archive_filename: String,
    pub expected_hash: Hash,
    pub shasums_document: Vec<u8>,
    pub shasums_signature: Vec<u8>,
    pub signing_keys: Vec<SigningKey>,
}

pub trait Authenticator {
    fn authenticate(&self, input: &PackageAuthInput) -> Result<Option<AuthResult>, AuthError>;
}

/// SHA-256 of the archive file on disk must match the expected hash from
/// the find-package response.
pub struct ArchiveChecksumAuthenticator;

impl Authenticator for ArchiveChecksumAuthenticator {
    fn authenticate(&self, input: &PackageAuthInput) -> Result<Option<AuthResult>, AuthError> {
        let actual = Hash::of_file(&input.archive_path).map_err(|source| AuthError::Io {
            path: input.archive_path.clone(),
            source,
        })?;
        if actual != input.expected_hash {
            return Err(AuthError::ArchiveChecksumMismatch {
                actual,
                expected: input.expected_hash.clone(),
            });
        }
        Ok(Some(AuthResult::VerifiedChecksum))
    }
}

/// Confirms the expected hash also appears, under the archive's own
/// filename, in the registry's `SHA256SUMS` document. Never itself
/// produces a trust verdict — it passes the baton to [`SignatureAuthenticator`].
pub struct MatchingChecksumAuthenticator;

impl Authenticator for MatchingChecksumAuthenticator {
    fn authenticate(&self, input: &PackageAuthInput) -> Result<Option<AuthResult>, AuthError> {
        let doc = String::from_utf8_lossy(&input.shasums_document);
        for line in doc.lines() {
            if let Some((hex, filename)) = parse_checksum_line(line) {
                if filename == input.archive_filename {
                    let decoded = hex::decode(&hex)
                        .map_err(|_| AuthError::FileNotInChecksumList(filename.clone()))?;
                    let actual = Hash::from_hex(hex::encode(decoded));
                    if actual != input.expected_hash {
                        return Err(AuthError::ChecksumListMismatch {
                            actual,
                            expected: input.expected_hash.clone(),
                        });
                    }
                    return Ok(None);
                }
            }
        }
        Err(AuthError::FileNotInChecksumList(
            input.archive_filename.clone(),
        ))
    }
}

/// Verifies the detached signature over the checksum document under the
/// baked-in official key, a supplied key's trust chain, or bare community
/// trust.
pub struct SignatureAuthenticator;

impl SignatureAuthenticator {
    /// The set of `zh:<hex>` hashes the checksum document vouches for.
    /// Returns an empty set if any line doesn't look like
    /// `<64-hex> <filename>` — i.e. the document isn't treated as a
    /// checksums file at all.
    pub fn acceptable_hashes(&self, document: &[u8]) -> HashSet<Hash> {
        let doc = String::from_utf8_lossy(document);
        let mut out = HashSet::new();
        for line in doc.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_checksum_line(line) {
                Some((hex, _filename)) => {
                    out.insert(Hash::from_hex(hex));
                }
                None => return HashSet::new(),
            }
        }
        out
    }
}

impl Authenticator for SignatureAuthenticator {
    fn authenticate(&self, input: &PackageAuthInput) -> Result<Option<AuthResult>, AuthError> {
        match verify_detached(&OFFICIAL_KEY, &input.shasums_document, &input.shasums_signature) {
            VerifyOutcome::Valid | VerifyOutcome::Expired => {
                return Ok(Some(AuthResult::Official))
            }
            VerifyOutcome::UnknownIssuer => {}
            VerifyOutcome::Other(msg) => return Err(AuthError::Crypto(msg)),
        }

        for key in &input.signing_keys {
            match verify_detached(
                &key.ascii_armored_public_key,
                &input.shasums_document,
                &input.shasums_signature,
            ) {
                VerifyOutcome::UnknownIssuer => continue,
                VerifyOutcome::Other(msg) => return Err(AuthError::Crypto(msg)),
                VerifyOutcome::Valid | VerifyOutcome::Expired => match &key.trust_signature {
                    None => return Ok(Some(AuthResult::Community)),
                    Some(trust_sig) => {
                        let trust_msg = key.ascii_armored_public_key.as_bytes();
                        match verify_detached(&PARTNERS_KEY, trust_msg, trust_sig.as_bytes()) {
                            VerifyOutcome::Valid | VerifyOutcome::Expired => {
                                return Ok(Some(AuthResult::Partner))
                            }
                            VerifyOutcome::UnknownIssuer => continue,
                            VerifyOutcome::Other(msg) => return Err(AuthError::Crypto(msg)),
                        }
                    }
                },
            }
        }

        Err(AuthError::NoValidSignature)
    }
}

enum VerifyOutcome {
    Valid,
    /// Signature verifies against a key that has since expired; treated as
    /// non-fatal per spec — logged and accepted.
    Expired,
    UnknownIssuer,
    Other(String),
}

fn verify_detached(armored_key: &str, message: &[u8], armored_signature: &[u8]) -> VerifyOutcome {
    // An unparseable *key* (most commonly an operator-left placeholder
    // baked-in key, or a malformed candidate key supplied by the registry)
    // can't vouch for anything, but it shouldn't be fatal for the whole
    // authentication pass — treat it the same as "this key didn't sign it"
    // so the caller moves on to the next candidate. A malformed *signature*
    // is the attacker-controlled half and stays fatal, below.
    let public_key = match SignedPublicKey::from_armor_single(Cursor::new(armored_key.as_bytes()))
    {
        Ok((key, _headers)) => key,
        Err(e) => {
            tracing::warn!(error = %e, "signing key could not be parsed, skipping");
            return VerifyOutcome::UnknownIssuer;
        }
    };

    let signature = match StandaloneSignature::from_armor_single(Cursor::new(armored_signature)) {
        Ok((sig, _headers)) => sig,
        Err(e) => return VerifyOutcome::Other(format!("malformed signature: {e}")),
    };

    match signature.verify(&public_key, message) {
        Ok(()) => VerifyOutcome::Valid,
        Err(e) => classify_verify_error(&e),
    }
}

fn classify_verify_error(e: &pgp::errors::Error) -> VerifyOutcome {
    let text = e.to_string().to_lowercase();
    if text.contains("expired") {
        tracing::warn!(error = %e, "signing key expired, accepting signature anyway");
        VerifyOutcome::Expired
    } else if text.contains("unknown issuer") || text.contains("no matching key") {
        VerifyOutcome::UnknownIssuer
    } else {
        VerifyOutcome::Other(e.to_string())
    }
}

fn parse_checksum_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    let hex = parts.next()?;
    let filename = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((hex.to_string(), filename.to_string()))
}

/// Runs the three authenticators in order (archive checksum, matching
/// checksum, signature), short-circuiting on the first error. The result
/// of the last authenticator that returned `Some` wins.
pub fn authenticate_all(
    authenticators: &[&dyn Authenticator],
    input: &PackageAuthInput,
) -> Result<AuthResult, AuthError> {
    let mut last = None;
    for auth in authenticators {
        if let Some(result) = auth.authenticate(input)? {
            last = Some(result);
        }
    }
    last.ok_or(AuthError::NoValidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn input_with_archive(bytes: &[u8], expected: Hash) -> (tempfile::TempDir, PackageAuthInput) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terraform-provider-foo_1.0.0_linux_amd64.zip");
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        let input = PackageAuthInput {
            archive_path: path.clone(),
            archive_filename: path.file_name().unwrap().to_string_lossy().to_string(),
            expected_hash: expected,
            shasums_document: Vec::new(),
            shasums_signature: Vec::new(),
            signing_keys: Vec::new(),
        };
        (dir, input)
    }

    #[test]
    fn archive_checksum_matches() {
        let expected = Hash::of_bytes(b"archive-bytes");
        let (_dir, input) = input_with_archive(b"archive-bytes", expected);
        let result = ArchiveChecksumAuthenticator.authenticate(&input).unwrap();
        assert_eq!(result, Some(AuthResult::VerifiedChecksum));
    }

    #[test]
    fn archive_checksum_mismatch_is_reported_with_both_hashes() {
        let expected = Hash::from_hex(format!("4fb398{}", "0".repeat(58)));
        let (_dir, input) = input_with_archive(b"archive-bytes", expected.clone());
        let err = ArchiveChecksumAuthenticator
            .authenticate(&input)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("archive has incorrect checksum"));
        assert!(msg.contains(expected.hex()));
    }

    #[test]
    fn matching_checksum_document_hit() {
        let expected = Hash::of_bytes(b"archive-bytes");
        let (_dir, mut input) = input_with_archive(b"archive-bytes", expected.clone());
        input.shasums_document = format!(
            "{} README.txt\n{} {}\n",
            "a".repeat(64),
            expected.hex(),
            input.archive_filename
        )
        .into_bytes();
        let result = MatchingChecksumAuthenticator.authenticate(&input).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn matching_checksum_document_mismatch() {
        let expected = Hash::of_bytes(b"archive-bytes");
        let (_dir, mut input) = input_with_archive(b"archive-bytes", expected.clone());
        let wrong = "b".repeat(64);
        input.shasums_document =
            format!("{} {}\n", wrong, input.archive_filename).into_bytes();
        let err = MatchingChecksumAuthenticator
            .authenticate(&input)
            .unwrap_err();
        assert!(err.to_string().contains("checksum list has unexpected"));
    }

    #[test]
    fn acceptable_hashes_empty_on_malformed_line() {
        let auth = SignatureAuthenticator;
        let doc = format!("{} my-package.zip\nnot-a-valid-line\n", "c".repeat(64));
        assert!(auth.acceptable_hashes(doc.as_bytes()).is_empty());
    }

    #[test]
    fn acceptable_hashes_parses_valid_document() {
        let auth = SignatureAuthenticator;
        let h1 = "a".repeat(64);
        let h2 = "b".repeat(64);
        let doc = format!("{h1} README.txt\n{h2} my-package.zip\n");
        let hashes = auth.acceptable_hashes(doc.as_bytes());
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains(&Hash::from_hex(h1)));
        assert!(hashes.contains(&Hash::from_hex(h2)));
    }
}
