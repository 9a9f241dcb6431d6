//! Resumable HTTP download into a temp file, hashing as it goes.
//!
//! A partial temp file is never deleted on transport failure; the next
//! pull re-hashes the existing prefix and continues with a ranged request,
//! so a resumed download produces a blob byte-identical to a fresh one.

use std::path::Path;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use sha2::{Digest as _, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tutu_types::{Digest, PullProgress, RegistryError};

/// Chunk size for re-hashing an existing temp-file prefix.
const HASH_CHUNK_BYTES: usize = 256 * 1024;

/// Result of a completed download.
#[derive(Debug)]
pub(crate) struct DownloadOutcome {
    /// SHA-256 over the full file, prefix included.
    pub digest: Digest,
    /// Total bytes now in the temp file.
    pub size: u64,
}

/// Invoke the optional progress callback.
pub(crate) fn emit(progress: Option<&PullProgress>, status: &str, percent: f64) {
    if let Some(f) = progress {
        f(status, percent);
    }
}

/// Download `url` into `temp`, resuming from whatever is already there.
///
/// `expected_size` (catalog estimate) is used as the percent denominator
/// when the origin sends no usable content length; zero disables percent
/// reporting (the callback still fires with 0).
pub(crate) async fn download_resumable(
    client: &reqwest::Client,
    url: &str,
    temp: &Path,
    expected_size: u64,
    progress: Option<&PullProgress>,
) -> Result<DownloadOutcome, RegistryError> {
    if let Some(parent) = temp.parent() {
        fs::create_dir_all(parent).await.map_err(|e| RegistryError::Store(e.into()))?;
    }

    // Re-hash the existing prefix so the final digest covers the whole file.
    let mut hasher = Sha256::new();
    let mut start_byte: u64 = 0;
    if let Ok(mut existing) = fs::File::open(temp).await {
        let mut buf = vec![0u8; HASH_CHUNK_BYTES];
        loop {
            let n = existing
                .read(&mut buf)
                .await
                .map_err(|e| RegistryError::Store(e.into()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            start_byte += n as u64;
        }
    }

    let mut request = client.get(url);
    if start_byte > 0 {
        tracing::info!(url, start_byte, "resuming partial download");
        request = request.header(RANGE, format!("bytes={start_byte}-"));
    }
    let response = request
        .send()
        .await
        .map_err(|e| RegistryError::Interrupted(e.to_string()))?;

    let mut file = match response.status() {
        StatusCode::OK => {
            // The origin ignored (or never saw) the range: start over.
            if start_byte > 0 {
                tracing::debug!(url, "origin returned 200 to a ranged request, restarting");
                hasher = Sha256::new();
                start_byte = 0;
            }
            fs::File::create(temp)
                .await
                .map_err(|e| RegistryError::Store(e.into()))?
        }
        StatusCode::PARTIAL_CONTENT => fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(temp)
            .await
            .map_err(|e| RegistryError::Store(e.into()))?,
        status => {
            return Err(RegistryError::Download(format!(
                "unexpected status {status} from {url}"
            )));
        }
    };

    let total = match response.content_length() {
        Some(len) if len > 0 => len + start_byte,
        _ => expected_size,
    };

    let mut downloaded = start_byte;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        // Failure here keeps the temp file for a later resume.
        let chunk = chunk.map_err(|e| RegistryError::Interrupted(e.to_string()))?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| RegistryError::Store(e.into()))?;
        downloaded += chunk.len() as u64;

        let percent = if total > 0 {
            (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 99.9)
        } else {
            0.0
        };
        emit(progress, "downloading", percent);
    }
    file.flush()
        .await
        .map_err(|e| RegistryError::Store(e.into()))?;

    let digest = Digest::from_hex(hex::encode(hasher.finalize()))
        .map_err(|e| RegistryError::Other(e.into()))?;
    Ok(DownloadOutcome {
        digest,
        size: downloaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha_hex(data: &[u8]) -> String {
        let mut h = Sha256::new();
        h.update(data);
        hex::encode(h.finalize())
    }

    #[tokio::test]
    async fn fresh_download_hashes_full_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"model-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".download-m.tmp");
        let client = reqwest::Client::new();

        let outcome = download_resumable(&client, &server.uri(), &temp, 0, None)
            .await
            .unwrap();
        assert_eq!(outcome.size, 11);
        assert_eq!(outcome.digest.hex(), sha_hex(b"model-bytes"));
    }

    #[tokio::test]
    async fn resume_sends_range_and_appends() {
        let server = MockServer::start().await;
        // Origin honours the range request for the remaining bytes.
        Mock::given(method("GET"))
            .and(header("range", "bytes=5-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".download-m.tmp");
        fs::write(&temp, b"model").await.unwrap();
        let client = reqwest::Client::new();

        let outcome = download_resumable(&client, &server.uri(), &temp, 0, None)
            .await
            .unwrap();
        assert_eq!(outcome.size, 11);
        assert_eq!(outcome.digest.hex(), sha_hex(b"model-bytes"));
        assert_eq!(fs::read(&temp).await.unwrap(), b"model-bytes");
    }

    #[tokio::test]
    async fn two_hundred_resets_a_stale_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".download-m.tmp");
        fs::write(&temp, b"stale-partial").await.unwrap();
        let client = reqwest::Client::new();

        let outcome = download_resumable(&client, &server.uri(), &temp, 0, None)
            .await
            .unwrap();
        assert_eq!(outcome.digest.hex(), sha_hex(b"fresh"));
        assert_eq!(fs::read(&temp).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn server_error_status_fails_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".download-m.tmp");
        let client = reqwest::Client::new();

        let err = download_resumable(&client, &server.uri(), &temp, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Download(_)), "got: {err}");
    }

    #[tokio::test]
    async fn progress_reaches_under_one_hundred() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".download-m.tmp");
        let client = reqwest::Client::new();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let progress: PullProgress =
            std::sync::Arc::new(move |status: &str, pct: f64| {
                seen_cb.lock().unwrap().push((status.to_string(), pct));
            });

        download_resumable(&client, &server.uri(), &temp, 0, Some(&progress))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        for (status, pct) in seen.iter() {
            assert_eq!(status, "downloading");
            assert!(*pct >= 0.0 && *pct < 100.0, "pct out of range: {pct}");
        }
    }
}
