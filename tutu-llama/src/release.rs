//! Acquiring the inference binary from the public release feed.
//!
//! Assets on the feed are named with OS/arch tokens
//! (`llama-b4458-bin-macos-arm64.zip`, `…-bin-win-cuda-x64.zip`, …).
//! Selection picks the plain CPU build for the current platform, skipping
//! GPU-specialised archives and checksum files, then extracts every
//! companion file (executable, shared libraries, platform kernels, DLLs)
//! flattened into the target directory.

use std::io::Read;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use tutu_types::BackendError;

use crate::locate::{SERVER_BINARY, binary_file_name};

/// Release feed queried for the latest archive.
pub const RELEASE_FEED_URL: &str =
    "https://api.github.com/repos/ggml-org/llama.cpp/releases/latest";

/// Asset name tokens that mark GPU-specialised or non-archive assets.
const EXCLUDED_TOKENS: &[&str] = &[
    "cuda", "hip", "rocm", "vulkan", "sycl", "kompute", "sha256",
];

/// One downloadable asset of a release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    /// Asset file name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<ReleaseAsset>,
}

/// Pick the archive for the current platform.
pub fn select_asset(assets: &[ReleaseAsset]) -> Option<&ReleaseAsset> {
    select_asset_for(assets, std::env::consts::OS, std::env::consts::ARCH)
}

fn select_asset_for<'a>(
    assets: &'a [ReleaseAsset],
    os: &str,
    arch: &str,
) -> Option<&'a ReleaseAsset> {
    let os_tokens: &[&str] = match os {
        "macos" => &["macos"],
        "windows" => &["win"],
        _ => &["ubuntu", "linux"],
    };
    let arch_tokens: &[&str] = match arch {
        "aarch64" => &["arm64", "aarch64"],
        _ => &["x64", "x86_64"],
    };

    assets.iter().find(|asset| {
        let name = asset.name.to_lowercase();
        name.ends_with(".zip")
            && os_tokens.iter().any(|t| name.contains(t))
            && arch_tokens.iter().any(|t| name.contains(t))
            && !EXCLUDED_TOKENS.iter().any(|t| name.contains(t))
    })
}

/// Download the latest matching archive and extract it into `bin_dir`.
/// Returns the path of the extracted server binary.
pub async fn download_and_extract(
    client: &reqwest::Client,
    bin_dir: &Path,
) -> Result<PathBuf, BackendError> {
    download_and_extract_from(client, RELEASE_FEED_URL, bin_dir).await
}

/// As [`download_and_extract`], with an explicit feed URL (test hook).
pub async fn download_and_extract_from(
    client: &reqwest::Client,
    feed_url: &str,
    bin_dir: &Path,
) -> Result<PathBuf, BackendError> {
    // The feed rejects requests without a user agent.
    let release: Release = client
        .get(feed_url)
        .header(reqwest::header::USER_AGENT, "tutu")
        .send()
        .await
        .map_err(|e| BackendError::Transport(format!("release feed: {e}")))?
        .error_for_status()
        .map_err(|e| BackendError::Transport(format!("release feed: {e}")))?
        .json()
        .await
        .map_err(|e| BackendError::Protocol(format!("release feed: {e}")))?;

    let asset = select_asset(&release.assets).ok_or_else(|| {
        BackendError::Protocol(format!(
            "no release asset matches {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    })?;
    tracing::info!(asset = %asset.name, "downloading inference backend");

    tokio::fs::create_dir_all(bin_dir)
        .await
        .map_err(|e| BackendError::Other(Box::new(e)))?;
    let archive_path = bin_dir.join(".archive.tmp");
    let mut file = tokio::fs::File::create(&archive_path)
        .await
        .map_err(|e| BackendError::Other(Box::new(e)))?;

    let response = client
        .get(&asset.browser_download_url)
        .header(reqwest::header::USER_AGENT, "tutu")
        .send()
        .await
        .map_err(|e| BackendError::Transport(format!("archive download: {e}")))?
        .error_for_status()
        .map_err(|e| BackendError::Transport(format!("archive download: {e}")))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BackendError::Transport(format!("archive download: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| BackendError::Other(Box::new(e)))?;
    }
    file.flush().await.map_err(|e| BackendError::Other(Box::new(e)))?;
    drop(file);

    let dest = bin_dir.to_path_buf();
    let archive = archive_path.clone();
    tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
        .await
        .map_err(|e| BackendError::Other(Box::new(e)))?
        .map_err(|e| BackendError::Other(Box::new(e)))?;
    let _ = tokio::fs::remove_file(&archive_path).await;

    let binary = bin_dir.join(binary_file_name(SERVER_BINARY));
    if !binary.is_file() {
        return Err(BackendError::Protocol(format!(
            "archive {} did not contain {}",
            asset.name, SERVER_BINARY
        )));
    }
    Ok(binary)
}

/// Extract every file in the archive directly into `dest`, flattening any
/// nested directories. The executable bit is preserved on Unix.
fn extract_archive(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(std::io::Error::other)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(std::io::Error::other)?;
        if entry.is_dir() {
            continue;
        }
        let Some(file_name) = Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
        else {
            continue;
        };
        let out_path = dest.join(&file_name);
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        std::fs::write(&out_path, &contents)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}
