use std::fmt;

/// Trust level established for a cached archive, ordered from strongest to
/// weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthResult {
    VerifiedChecksum,
    Official,
    Partner,
    Community,
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthResult::VerifiedChecksum => "verified_checksum",
            AuthResult::Official => "official",
            AuthResult::Partner => "partner",
            AuthResult::Community => "community",
        };
        write!(f, "{s}")
    }
}

/// Renders `None` as `"unauthenticated"`, matching the textual rendering an
/// absent authentication result is given in diagnostics.
pub fn render(result: Option<AuthResult>) -> String {
    result
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unauthenticated".to_string())
}
