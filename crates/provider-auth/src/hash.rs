use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// A `zh:<hex-sha256>` tagged hash, as used to identify a provider archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(String);

const PREFIX: &str = "zh:";

impl Hash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(format!("{PREFIX}{}", hex.into()))
    }

    pub fn parse(tagged: &str) -> Option<Self> {
        tagged.strip_prefix(PREFIX).map(|_| Self(tagged.to_owned()))
    }

    pub fn hex(&self) -> &str {
        self.0.strip_prefix(PREFIX).unwrap_or(&self.0)
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self::from_hex(hex::encode(digest))
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::of_bytes(&bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string_form() {
        let h = Hash::from_hex("abcd");
        assert_eq!(h.to_string(), "zh:abcd");
        assert_eq!(Hash::parse("zh:abcd").unwrap(), h);
        assert_eq!(h.hex(), "abcd");
    }

    #[test]
    fn of_bytes_matches_sha256() {
        let h = Hash::of_bytes(b"hello");
        let expected = hex::encode(Sha256::digest(b"hello"));
        assert_eq!(h.hex(), expected);
    }
}
