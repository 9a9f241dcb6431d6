//! Locating the inference binary and its companion files.

use std::path::{Path, PathBuf};

/// Primary binary name.
pub const SERVER_BINARY: &str = "llama-server";

/// Alternative names accepted when the primary is absent.
pub const ALT_BINARY_NAMES: &[&str] = &["llama-cli", "llama"];

/// Platform binary file name (adds `.exe` on Windows).
pub fn binary_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Search for the binary: `<home>/bin` first, then every `PATH` entry,
/// trying the primary name before the alternates.
pub fn find_binary(bin_dir: &Path) -> Option<PathBuf> {
    let names: Vec<String> = std::iter::once(SERVER_BINARY)
        .chain(ALT_BINARY_NAMES.iter().copied())
        .map(binary_file_name)
        .collect();

    for name in &names {
        let candidate = bin_dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in &names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Heuristic: does the directory hold the companion files this platform
/// needs alongside the binary? Windows builds ship DLLs; macOS builds ship
/// dylibs; elsewhere a lone binary is acceptable.
pub fn companions_present(dir: &Path) -> bool {
    let needle = if cfg!(windows) {
        Some("dll")
    } else if cfg!(target_os = "macos") {
        Some("dylib")
    } else {
        None
    };
    let Some(needle) = needle else {
        return true;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        e.path()
            .extension()
            .and_then(|x| x.to_str())
            .is_some_and(|x| x.eq_ignore_ascii_case(needle))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_primary_binary_in_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(binary_file_name(SERVER_BINARY));
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        assert_eq!(find_binary(dir.path()), Some(path));
    }

    #[test]
    fn falls_back_to_alternate_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(binary_file_name("llama-cli"));
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        assert_eq!(find_binary(dir.path()), Some(path));
    }

    #[test]
    fn primary_name_wins_over_alternates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(binary_file_name("llama")), b"x").unwrap();
        let primary = dir.path().join(binary_file_name(SERVER_BINARY));
        std::fs::write(&primary, b"x").unwrap();
        assert_eq!(find_binary(dir.path()), Some(primary));
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn linux_needs_no_companions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(companions_present(dir.path()));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn macos_requires_a_dylib() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!companions_present(dir.path()));
        std::fs::write(dir.path().join("libggml.dylib"), b"x").unwrap();
        assert!(companions_present(dir.path()));
    }
}
