use std::io::Write;
use std::time::Duration;

use fs4::tokio::AsyncFileExt;
use futures_util::StreamExt;
use provider_auth::{
    authenticate_all, ArchiveChecksumAuthenticator, MatchingChecksumAuthenticator,
    PackageAuthInput, SignatureAuthenticator,
};
use tokio::fs::File;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::entry::CacheEntry;
use crate::error::{CleanupError, MultiError, PopulateError};
use crate::registry::ProviderCache;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const LOCK_MAX_ATTEMPTS: u32 = 60;

/// Default file-mode bits applied to extracted provider binaries. `0o755`
/// matches the executable permissions the downstream tool expects to find.
pub const DEFAULT_EXTRACTED_FILE_MODE: u32 = 0o755;

/// Consumes the cache's internal channel; for each scheduled entry spawns
/// a concurrent populate task. On cancellation, waits for all outstanding
/// tasks to complete, then removes archive files for entries with
/// `keep_archive == false`, aggregating every error along the way.
pub async fn run_cache_worker(
    cache: ProviderCache,
    http: reqwest::Client,
    file_mode: u32,
    cancel: CancellationToken,
) -> Result<(), MultiError> {
    let mut rx = cache
        .take_receiver()
        .expect("run_cache_worker must only be called once per ProviderCache");

    let mut tasks: JoinSet<Result<(), PopulateError>> = JoinSet::new();
    let mut errors = MultiError::default();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break;
            }

            maybe_entry = rx.recv() => {
                match maybe_entry {
                    Some(entry) => {
                        let cache = cache.clone();
                        let http = http.clone();
                        tasks.spawn(async move {
                            let _barrier = cache.hold_ready_barrier().await;
                            populate_one(&entry, &http, file_mode).await
                        });
                    }
                    None => break,
                }
            }

            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                record_populate_result(&mut errors, result);
            }
        }
    }

    // Drain remaining outstanding tasks before cleaning up.
    while let Some(result) = tasks.join_next().await {
        record_populate_result(&mut errors, result);
    }

    for entry in cache.all_entries() {
        if entry.keep_archive {
            continue;
        }
        if entry.archive_path.exists() {
            if let Err(source) = std::fs::remove_file(&entry.archive_path) {
                errors.cleanup.push(CleanupError::RemoveArchive {
                    path: entry.archive_path.clone(),
                    source,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn record_populate_result(
    errors: &mut MultiError,
    result: Result<Result<(), PopulateError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "provider cache populate failed");
            errors.populate.push(e);
        }
        Err(join_err) => {
            tracing::warn!(error = %join_err, "provider cache populate task panicked");
        }
    }
}

async fn populate_one(
    entry: &CacheEntry,
    http: &reqwest::Client,
    file_mode: u32,
) -> Result<(), PopulateError> {
    let span = tracing::info_span!(
        "cache_populate",
        registry = %entry.identity.registry_name,
        namespace = %entry.identity.namespace,
        name = %entry.identity.name,
        version = %entry.identity.version,
        platform = %entry.identity.platform(),
    );
    let _enter = span.enter();

    tokio::fs::create_dir_all(&entry.extract_dir)
        .await
        .map_err(|source| PopulateError::CreateDir {
            path: entry.extract_dir.clone(),
            source,
        })?;

    let lock_file = acquire_lock(&entry.lock_path).await?;

    if already_extracted(&entry.extract_dir).await? && !entry.keep_archive {
        tracing::debug!("already extracted, skipping fetch");
        entry.mark_ready();
        drop(lock_file);
        return Ok(());
    }

    if !entry.archive_path.exists() {
        fetch_archive(entry, http).await?;
        authenticate_archive(entry, http).await?;
    }

    if !already_extracted(&entry.extract_dir).await? {
        extract_archive(&entry.archive_path, &entry.extract_dir, file_mode).await?;
    }

    entry.mark_ready();
    drop(lock_file);
    Ok(())
}

/// Cross-process mutual exclusion for the duration of one entry's
/// fetch+extract sequence.
async fn acquire_lock(lock_path: &std::path::Path) -> Result<File, PopulateError> {
    let file = File::options()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .await
        .map_err(|source| PopulateError::Lock {
            path: lock_path.to_path_buf(),
            source,
        })?;

    for attempt in 0..LOCK_MAX_ATTEMPTS {
        match file.try_lock_exclusive() {
            Ok(true) => return Ok(file),
            Ok(false) => {
                tracing::debug!(attempt, path = %lock_path.display(), "provider cache lock contended, retrying");
                tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            }
            Err(source) => return Err(PopulateError::Lock {
                path: lock_path.to_path_buf(),
                source,
            }),
        }
    }

    Err(PopulateError::LockContended {
        path: lock_path.to_path_buf(),
        attempts: LOCK_MAX_ATTEMPTS,
    })
}

async fn already_extracted(extract_dir: &std::path::Path) -> Result<bool, PopulateError> {
    let mut read_dir =
        match tokio::fs::read_dir(extract_dir)
            .await
            .map_err(|source| PopulateError::ReadDir {
                path: extract_dir.to_path_buf(),
                source,
            }) {
            Ok(rd) => rd,
            Err(_) => return Ok(false),
        };

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|source| PopulateError::ReadDir {
            path: extract_dir.to_path_buf(),
            source,
        })?
    {
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with("terraform-provider")
        {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn fetch_archive(entry: &CacheEntry, http: &reqwest::Client) -> Result<(), PopulateError> {
    let url = entry
        .identity
        .download_url
        .clone()
        .ok_or(PopulateError::MissingDownloadUrl)?;

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|source| PopulateError::Fetch { url: url.clone(), source })?;

    if !response.status().is_success() {
        return Err(PopulateError::FetchStatus {
            url,
            status: response.status().as_u16(),
        });
    }

    let mut file =
        std::fs::File::create(&entry.archive_path).map_err(|source| PopulateError::WriteArchive {
            path: entry.archive_path.clone(),
            source,
        })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| PopulateError::Fetch {
            url: url.clone(),
            source,
        })?;
        file.write_all(&chunk)
            .map_err(|source| PopulateError::WriteArchive {
                path: entry.archive_path.clone(),
                source,
            })?;
    }
    file.flush().map_err(|source| PopulateError::WriteArchive {
        path: entry.archive_path.clone(),
        source,
    })?;
    Ok(())
}

/// Authenticates a freshly-fetched archive against its entry's captured
/// `auth` context, if any. Entries with no auth context (registries whose
/// find-package response omitted `shasum`/checksum-document URLs) skip
/// authentication rather than failing — the archive is served unverified.
async fn authenticate_archive(
    entry: &CacheEntry,
    http: &reqwest::Client,
) -> Result<(), PopulateError> {
    let Some(auth) = &entry.auth else {
        return Ok(());
    };

    let shasums_document = fetch_bytes(http, &auth.shasums_url).await?;
    let shasums_signature = fetch_bytes(http, &auth.shasums_signature_url).await?;
    let archive_filename = entry
        .archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let input = PackageAuthInput {
        archive_path: entry.archive_path.clone(),
        archive_filename,
        expected_hash: auth.expected_hash.clone(),
        shasums_document,
        shasums_signature,
        signing_keys: auth.signing_keys.clone(),
    };

    let authenticators: [&dyn provider_auth::Authenticator; 3] = [
        &ArchiveChecksumAuthenticator,
        &MatchingChecksumAuthenticator,
        &SignatureAuthenticator,
    ];
    let result = authenticate_all(&authenticators, &input)?;
    tracing::info!(%result, "archive authenticated");
    Ok(())
}

async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, PopulateError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|source| PopulateError::Fetch {
            url: url.to_string(),
            source,
        })?;
    if !response.status().is_success() {
        return Err(PopulateError::FetchStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|source| PopulateError::Fetch {
            url: url.to_string(),
            source,
        })
}

async fn extract_archive(
    archive_path: &std::path::Path,
    extract_dir: &std::path::Path,
    file_mode: u32,
) -> Result<(), PopulateError> {
    let archive_path = archive_path.to_path_buf();
    let extract_dir = extract_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        extract_archive_blocking(&archive_path, &extract_dir, file_mode)
    })
    .await
    .expect("extract task panicked")
}

fn extract_archive_blocking(
    archive_path: &std::path::Path,
    extract_dir: &std::path::Path,
    file_mode: u32,
) -> Result<(), PopulateError> {
    let file = std::fs::File::open(archive_path).map_err(|source| PopulateError::Extract {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| PopulateError::ExtractZip {
        path: archive_path.to_path_buf(),
        source,
    })?;

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|source| PopulateError::ExtractZip {
                path: archive_path.to_path_buf(),
                source,
            })?;
        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let out_path = extract_dir.join(name);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| PopulateError::Extract {
                path: out_path.clone(),
                source,
            })?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PopulateError::Extract {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut out_file =
            std::fs::File::create(&out_path).map_err(|source| PopulateError::Extract {
                path: out_path.clone(),
                source,
            })?;
        std::io::copy(&mut file, &mut out_file).map_err(|source| PopulateError::Extract {
            path: out_path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &out_path,
                std::fs::Permissions::from_mode(file_mode),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_identity::ProviderIdentity;
    use std::sync::Arc;

    fn identity() -> ProviderIdentity {
        let mut id = ProviderIdentity::new(
            "registry.example.com",
            "foo",
            "bar",
            "1.0.0",
            "linux",
            "amd64",
        );
        id.download_url = Some("https://upstream.example.com/archive.zip".to_string());
        id
    }

    #[tokio::test]
    async fn authenticate_archive_skips_when_no_auth_context() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("archive.zip");
        std::fs::write(&archive_path, b"archive-bytes").unwrap();

        let entry = CacheEntry::new(
            identity(),
            archive_path,
            dir.path().join("extracted"),
            dir.path().join("lock"),
            false,
            None,
        );

        let http = reqwest::Client::new();
        authenticate_archive(&entry, &http).await.unwrap();
    }

    #[tokio::test]
    async fn authenticate_archive_fails_on_checksum_mismatch() {
        use crate::auth::PackageAuthContext;
        use provider_auth::Hash;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SHA256SUMS"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "{} archive.zip\n",
                "a".repeat(64)
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SHA256SUMS.sig"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not-a-real-signature".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("archive.zip");
        std::fs::write(&archive_path, b"archive-bytes").unwrap();

        let entry = CacheEntry::new(
            identity(),
            archive_path,
            dir.path().join("extracted"),
            dir.path().join("lock"),
            false,
            Some(PackageAuthContext {
                expected_hash: Hash::from_hex("b".repeat(64)),
                shasums_url: format!("{}/SHA256SUMS", server.uri()),
                shasums_signature_url: format!("{}/SHA256SUMS.sig", server.uri()),
                signing_keys: Vec::new(),
            }),
        );

        let http = reqwest::Client::new();
        let err = authenticate_archive(&entry, &http).await.unwrap_err();
        assert!(err.to_string().contains("authenticating archive"));
    }

    #[tokio::test]
    async fn populate_is_idempotent_when_already_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let extract_dir = dir.path().join("extracted");
        tokio::fs::create_dir_all(&extract_dir).await.unwrap();
        tokio::fs::write(extract_dir.join("terraform-provider-bar"), b"binary")
            .await
            .unwrap();

        let entry = Arc::new(CacheEntry::new(
            identity(),
            dir.path().join("archive.zip"),
            extract_dir,
            dir.path().join("lock"),
            false,
            None,
        ));

        let http = reqwest::Client::new();
        populate_one(&entry, &http, DEFAULT_EXTRACTED_FILE_MODE).await.unwrap();
        assert!(entry.is_ready());
        // The archive was never fetched since extraction was already present.
        assert!(!entry.archive_path.exists());

        // Running again must be a no-op (the extracted marker is still there).
        populate_one(&entry, &http, DEFAULT_EXTRACTED_FILE_MODE).await.unwrap();
        assert!(entry.is_ready());
    }
}
