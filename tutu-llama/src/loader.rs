//! Locate-or-download of the backend binary and the load path the pool
//! calls into.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tutu_types::{BackendError, BackendLoader, ModelBackend};

use crate::handle::LlamaServerHandle;
use crate::locate::{companions_present, find_binary};
use crate::release;
use crate::spawn::{SpawnOptions, SpawnedServer, free_loopback_port, kill_stale_orphans, spawn_server};

/// How often the readiness wait polls the child's `/health`.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often a "still loading" progress line is logged.
const READY_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    /// Directory the binary and its companions live in (`<home>/bin`).
    pub bin_dir: PathBuf,
    /// Child tuning knobs.
    pub spawn: SpawnOptions,
    /// Ceiling on the readiness wait. Large models take minutes to load.
    pub readiness_timeout: Duration,
}

impl LlamaConfig {
    /// Defaults for a given bin directory: 5-minute readiness ceiling.
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            spawn: SpawnOptions::default(),
            readiness_timeout: Duration::from_secs(300),
        }
    }
}

/// [`BackendLoader`] that spawns one `llama-server` child per model.
///
/// The binary is acquired lazily on the first load and cached; loads are
/// already serialised by the pool, so the lazy path sees no contention in
/// practice.
pub struct LlamaLoader {
    config: LlamaConfig,
    http: reqwest::Client,
    binary: Mutex<Option<PathBuf>>,
}

impl LlamaLoader {
    /// Loader over the given configuration.
    pub fn new(config: LlamaConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            binary: Mutex::new(None),
        }
    }

    /// Resolve the backend binary, downloading the release archive when
    /// nothing usable is installed.
    async fn binary(&self) -> Result<PathBuf, BackendError> {
        let mut cached = self.binary.lock().await;
        if let Some(path) = cached.as_ref() {
            return Ok(path.clone());
        }

        let bin_dir = self.config.bin_dir.clone();
        let found = tokio::task::spawn_blocking({
            let bin_dir = bin_dir.clone();
            move || find_binary(&bin_dir)
        })
        .await
        .map_err(|e| BackendError::Other(Box::new(e)))?;

        let path = match found {
            // A managed binary without its companion libraries will not
            // start; refresh the whole archive.
            Some(path) if path.starts_with(&bin_dir) && !companions_present(&bin_dir) => {
                tracing::warn!(
                    bin_dir = %bin_dir.display(),
                    "companion libraries missing, re-downloading backend archive"
                );
                release::download_and_extract(&self.http, &bin_dir).await?
            }
            Some(path) => path,
            None => release::download_and_extract(&self.http, &bin_dir).await?,
        };

        tracing::info!(binary = %path.display(), "using inference backend");
        *cached = Some(path.clone());
        Ok(path)
    }
}

#[async_trait]
impl BackendLoader for LlamaLoader {
    async fn load(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<Arc<dyn ModelBackend>, BackendError> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            BackendError::load_failed(format!("model file {}: {e}", path.display()), "")
        })?;
        let mem_bytes = meta.len();

        let binary = self.binary().await?;
        kill_stale_orphans(&binary).await;

        let port = free_loopback_port().map_err(|e| BackendError::Other(Box::new(e)))?;
        let mut spawned = spawn_server(&binary, path, port, &self.config.spawn)
            .map_err(|e| BackendError::load_failed(format!("spawn failed: {e}"), ""))?;

        tracing::info!(model = name, port, "waiting for llama-server to become ready");
        if let Err(err) = wait_ready(
            &mut spawned,
            &self.http,
            self.config.readiness_timeout,
        )
        .await
        {
            let _ = spawned.child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), spawned.child.wait()).await;
            return Err(err);
        }

        Ok(Arc::new(LlamaServerHandle::new(
            spawned.child,
            port,
            path.to_path_buf(),
            mem_bytes,
            spawned.stderr,
        )))
    }
}

/// Poll `/health` until the child answers, racing its early exit.
async fn wait_ready(
    server: &mut SpawnedServer,
    http: &reqwest::Client,
    ceiling: Duration,
) -> Result<(), BackendError> {
    let health_url = format!("http://127.0.0.1:{}/health", server.port);
    let started = tokio::time::Instant::now();
    let mut last_log = started;

    loop {
        tokio::select! {
            status = server.child.wait() => {
                // Give the stderr drain task a moment to catch up before
                // snapshotting the tail.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| format!("wait failed: {e}"));
                return Err(BackendError::load_failed(
                    format!("exited during startup ({status})"),
                    &server.stderr.tail_lines(10),
                ));
            }
            _ = tokio::time::sleep(READY_POLL_INTERVAL) => {
                if let Ok(resp) = http
                    .get(&health_url)
                    .timeout(READY_POLL_INTERVAL)
                    .send()
                    .await
                {
                    if resp.status().is_success() {
                        tracing::info!(elapsed = ?started.elapsed(), "llama-server ready");
                        return Ok(());
                    }
                }

                if started.elapsed() > ceiling {
                    return Err(BackendError::load_failed(
                        format!("not ready after {}s", ceiling.as_secs()),
                        &server.stderr.tail_lines(10),
                    ));
                }
                if last_log.elapsed() >= READY_LOG_INTERVAL {
                    last_log = tokio::time::Instant::now();
                    tracing::info!(
                        elapsed_secs = started.elapsed().as_secs(),
                        "still loading model"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = LlamaConfig::new("/home/u/.tutu/bin");
        assert_eq!(config.readiness_timeout, Duration::from_secs(300));
        assert_eq!(config.spawn.context_size, 4096);
    }

    #[tokio::test]
    async fn load_missing_model_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LlamaLoader::new(LlamaConfig::new(dir.path().join("bin")));
        let err = loader
            .load("m", Path::new("/definitely/not/here.gguf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::LoadFailed { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn load_surfaces_stderr_when_child_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();

        // A script that fails immediately stands in for the binary.
        let script = bin_dir.join("llama-server");
        std::fs::write(&script, "#!/bin/sh\necho 'model load failed: bad magic' >&2\nexit 3\n")
            .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"not really weights").unwrap();

        let mut config = LlamaConfig::new(&bin_dir);
        config.readiness_timeout = Duration::from_secs(10);
        let loader = LlamaLoader::new(config);

        let err = loader.load("m", &model).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("failed to start"), "got: {text}");
        assert!(text.contains("bad magic"), "stderr tail attached: {text}");
    }
}
