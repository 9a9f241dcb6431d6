//! Spawning `llama-server` children.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::ring::{StderrRing, attach_reader};

/// Tuning knobs passed to the child on its command line.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Context window size (`--ctx-size`).
    pub context_size: u32,
    /// GPU layer hint (`--n-gpu-layers`).
    pub gpu_layers: u32,
    /// Worker thread count (`--threads`).
    pub threads: u32,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            context_size: 4096,
            gpu_layers: 0,
            threads: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(4),
        }
    }
}

/// A freshly spawned, not-yet-ready child.
pub struct SpawnedServer {
    /// The child process. Ownership moves into the handle once ready.
    pub child: Child,
    /// Loopback port the child was told to bind.
    pub port: u16,
    /// Ring buffer capturing the child's stderr.
    pub stderr: StderrRing,
}

/// Reserve a loopback port by binding port zero and closing the listener.
///
/// The port is free at return time; the child binds it a moment later. The
/// window is accepted; collisions surface as a failed readiness wait.
pub fn free_loopback_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Spawn the server binary against one model file.
///
/// Stdout is discarded; stderr feeds the ring buffer. `--no-mmap` keeps
/// the child's resident size aligned with the pool's file-size accounting.
pub fn spawn_server(
    binary: &Path,
    model: &Path,
    port: u16,
    opts: &SpawnOptions,
) -> std::io::Result<SpawnedServer> {
    let mut cmd = Command::new(binary);
    cmd.arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--model")
        .arg(model)
        .arg("--ctx-size")
        .arg(opts.context_size.to_string())
        .arg("--n-gpu-layers")
        .arg(opts.gpu_layers.to_string())
        .arg("--threads")
        .arg(opts.threads.to_string())
        .arg("--no-mmap")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_platform(&mut cmd);

    tracing::debug!(binary = %binary.display(), model = %model.display(), port, "spawning llama-server");
    let mut child = cmd.spawn()?;

    let stderr = StderrRing::new();
    if let Some(pipe) = child.stderr.take() {
        attach_reader(stderr.clone(), pipe);
    }

    Ok(SpawnedServer {
        child,
        port,
        stderr,
    })
}

/// Windows children get their own process group so the whole tree can be
/// terminated, and no console window.
#[cfg(windows)]
fn configure_platform(cmd: &mut Command) {
    use std::os::windows::process::CommandExt as _;

    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// Unix default process semantics suffice: `kill_on_drop` plus an explicit
/// kill in `close` reach the child directly.
#[cfg(not(windows))]
fn configure_platform(_cmd: &mut Command) {}

/// Best-effort cleanup of children orphaned by a previous daemon crash.
///
/// Linux only: any process running our managed binary whose parent is init
/// is assumed stale and killed. Failures are logged and ignored.
pub async fn kill_stale_orphans(binary: &Path) {
    #[cfg(target_os = "linux")]
    {
        let pattern = binary.display().to_string();
        let output = match Command::new("pgrep").arg("-f").arg(&pattern).output().await {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(error = %e, "pgrep unavailable, skipping orphan sweep");
                return;
            }
        };
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Ok(pid) = line.trim().parse::<u32>() else {
                continue;
            };
            let Ok(status) = tokio::fs::read_to_string(format!("/proc/{pid}/status")).await else {
                continue;
            };
            let orphaned = status
                .lines()
                .find_map(|l| l.strip_prefix("PPid:"))
                .map(str::trim)
                == Some("1");
            if orphaned {
                tracing::info!(pid, "killing stale llama-server orphan");
                let _ = Command::new("kill").arg("-9").arg(pid.to_string()).output().await;
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = binary;
    }
}
