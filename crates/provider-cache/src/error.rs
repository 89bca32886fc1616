use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PopulateError {
    #[error("creating extract dir {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock contended after {attempts} attempts: {path:?}")]
    LockContended { path: PathBuf, attempts: u32 },

    #[error("locking {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned status {status} for {url}")]
    FetchStatus { url: String, status: u16 },

    #[error("writing archive {path:?}: {source}")]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extracting archive {path:?}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extracting archive {path:?}: corrupt archive: {source}")]
    ExtractZip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("reading extract dir {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no download_url set for identity")]
    MissingDownloadUrl,

    #[error("authenticating archive: {0}")]
    Authentication(#[from] provider_auth::AuthError),
}

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("removing archive {path:?}: {source}")]
    RemoveArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The aggregated errors `run_cache_worker` returns at shutdown: every
/// per-entry populate failure plus every cleanup failure, none of which
/// individually crash the server.
#[derive(Debug, Default)]
pub struct MultiError {
    pub populate: Vec<PopulateError>,
    pub cleanup: Vec<CleanupError>,
}

impl MultiError {
    pub fn is_empty(&self) -> bool {
        self.populate.is_empty() && self.cleanup.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} populate error(s), {} cleanup error(s)",
            self.populate.len(),
            self.cleanup.len()
        )?;
        for e in &self.populate {
            writeln!(f, "  populate: {e}")?;
        }
        for e in &self.cleanup {
            writeln!(f, "  cleanup: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
