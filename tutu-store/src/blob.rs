//! Content-addressed blob storage with atomic publication.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest as _, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use tutu_types::{Digest, StoreError};

use crate::layout::StoreLayout;

/// Chunk size for streaming writes and hashing.
const WRITE_CHUNK_BYTES: usize = 256 * 1024;

/// Monotonic suffix so concurrent writers never share a temp file.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stores immutable blobs under `blobs/`, named by their SHA-256.
///
/// No blob is ever rewritten in place: content streams to a temp file and
/// is renamed to its digest-derived name once the hash is known.
#[derive(Debug, Clone)]
pub struct BlobStore {
    layout: StoreLayout,
}

impl BlobStore {
    /// Blob store over the given layout.
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Final path of a blob. Total; no I/O.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.layout.blob_path(digest)
    }

    /// Whether the blob exists on disk.
    pub async fn has_blob(&self, digest: &Digest) -> bool {
        fs::try_exists(self.blob_path(digest)).await.unwrap_or(false)
    }

    /// Stream `reader` into the store, hashing while writing, and publish
    /// under the computed digest. If `expected_size` is given and the byte
    /// count differs, the temp file is discarded and the write fails.
    pub async fn write_blob(
        &self,
        mut reader: impl AsyncRead + Unpin,
        expected_size: Option<u64>,
    ) -> Result<Digest, StoreError> {
        let blobs = self.layout.blobs_dir();
        fs::create_dir_all(&blobs).await?;

        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp = blobs.join(format!(".write-{}-{seq}.tmp", std::process::id()));
        let mut file = fs::File::create(&temp).await?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buf = vec![0u8; WRITE_CHUNK_BYTES];
        let result: Result<(), StoreError> = loop {
            match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    hasher.update(&buf[..n]);
                    if let Err(e) = file.write_all(&buf[..n]).await {
                        break Err(e.into());
                    }
                    written += n as u64;
                }
                Err(e) => break Err(e.into()),
            }
        };
        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = expected_size {
            if written != expected {
                let _ = fs::remove_file(&temp).await;
                return Err(StoreError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        let digest = Digest::from_hex(hex::encode(hasher.finalize()))
            .map_err(StoreError::Serialization)?;
        self.publish(&temp, &digest).await?;
        Ok(digest)
    }

    /// Move a fully written temp file to its final digest-derived name.
    ///
    /// Rename is atomic within a directory; when it fails (e.g. the temp
    /// file sits on another device) the content is copied and the temp
    /// file removed, which is safe because the destination name is only
    /// observed once complete.
    pub async fn publish(&self, temp: &Path, digest: &Digest) -> Result<PathBuf, StoreError> {
        let dest = self.blob_path(digest);
        fs::create_dir_all(self.layout.blobs_dir()).await?;
        match fs::rename(temp, &dest).await {
            Ok(()) => {}
            Err(rename_err) => {
                tracing::debug!(
                    error = %rename_err,
                    temp = %temp.display(),
                    "rename failed, falling back to copy"
                );
                fs::copy(temp, &dest).await?;
                fs::remove_file(temp).await?;
            }
        }
        Ok(dest)
    }

    /// Delete a blob. Deleting a missing blob is not an error.
    pub async fn remove_blob(&self, digest: &Digest) -> Result<(), StoreError> {
        match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
