mod authenticator;
mod hash;
mod keys;
mod result;

pub use authenticator::{
    authenticate_all, ArchiveChecksumAuthenticator, AuthError, Authenticator,
    MatchingChecksumAuthenticator, PackageAuthInput, SignatureAuthenticator,
};
pub use hash::Hash;
pub use keys::{SigningKey, OFFICIAL_KEY, PARTNERS_KEY};
pub use result::{render, AuthResult};
