//! Path derivation under the daemon home directory.

use std::path::{Path, PathBuf};

use tutu_types::{Digest, ModelRef};

/// Prefix of resumable partial-download files inside `blobs/`.
pub const TEMP_DOWNLOAD_PREFIX: &str = ".download-";

/// Derives every on-disk path from the daemon home. All methods are total
/// and perform no I/O.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Layout rooted at the given home directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The home directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of content-addressed blobs.
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// Final path of a blob with the given digest.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir().join(digest.file_name())
    }

    /// Partial-download path for a model reference. The name is flattened
    /// into a single safe path component.
    pub fn temp_download_path(&self, reference: &ModelRef) -> PathBuf {
        let safe = sanitize(&reference.canonical());
        self.blobs_dir()
            .join(format!("{TEMP_DOWNLOAD_PREFIX}{safe}.tmp"))
    }

    /// Directory of manifests.
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Manifest path for a model reference: `manifests/<name>/<tag>`.
    pub fn manifest_path(&self, reference: &ModelRef) -> PathBuf {
        self.manifests_dir()
            .join(sanitize(&reference.name))
            .join(sanitize(&reference.tag))
    }

    /// Directory of per-model metadata records.
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    /// Directory holding the inference binary and its companion files.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Directory holding the node identity keypair.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }
}

/// Flatten a reference component into a filesystem-safe name.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect()
}
