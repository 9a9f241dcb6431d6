//! Bounded ring buffer for child stderr.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;

/// Default capture capacity: the last 8 KiB of stderr.
pub const DEFAULT_RING_BYTES: usize = 8 * 1024;

/// Thread-safe bounded writer over the child's stderr.
///
/// Writers append; readers get a snapshot of the most recent bytes. Used
/// to attach diagnostics to load failures without unbounded growth.
#[derive(Clone)]
pub struct StderrRing {
    buf: Arc<Mutex<VecDeque<u8>>>,
    cap: usize,
}

impl StderrRing {
    /// Ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_BYTES)
    }

    /// Ring with an explicit capacity in bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(VecDeque::with_capacity(cap.min(4096)))),
            cap,
        }
    }

    /// Append bytes, dropping the oldest once over capacity.
    pub fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().expect("stderr ring lock poisoned");
        for &b in bytes {
            if buf.len() == self.cap {
                buf.pop_front();
            }
            buf.push_back(b);
        }
    }

    /// Snapshot of everything currently buffered, lossily decoded.
    pub fn tail(&self) -> String {
        let buf = self.buf.lock().expect("stderr ring lock poisoned");
        let bytes: Vec<u8> = buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Snapshot of the last `n` lines.
    pub fn tail_lines(&self, n: usize) -> String {
        let tail = self.tail();
        let lines: Vec<&str> = tail.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

impl Default for StderrRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain a child's stderr into the ring until EOF.
pub fn attach_reader(ring: StderrRing, mut stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => ring.push(&buf[..n]),
            }
        }
    });
}
