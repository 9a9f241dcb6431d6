//! Model references, content digests, and metadata records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag used when a model reference omits one.
pub const DEFAULT_TAG: &str = "latest";

/// A human-facing model reference: `name[:tag]`, tag defaulting to `latest`.
///
/// The canonical string form `name:tag` is the key used by the metadata
/// store, the manifest directory layout, and the engine pool.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ModelRef {
    /// Model name, e.g. `llama3`.
    pub name: String,
    /// Tag, e.g. `latest` or `8b`.
    pub tag: String,
}

impl ModelRef {
    /// Parse a reference from user input. A missing tag becomes `latest`.
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((name, tag)) if !tag.is_empty() && !name.is_empty() => Self {
                name: name.to_string(),
                tag: tag.to_string(),
            },
            _ => Self {
                name: reference.trim_end_matches(':').to_string(),
                tag: DEFAULT_TAG.to_string(),
            },
        }
    }

    /// The canonical `name:tag` form.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl From<&str> for ModelRef {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// A SHA-256 content digest, rendered as `sha256:<64 hex>`.
///
/// The digest is the primary identity of a blob; the blob's on-disk file
/// name derives from it mechanically ([`Digest::file_name`]).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Wrap a 64-character lowercase hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self, String> {
        let hex = hex.into();
        if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(hex.to_lowercase()))
        } else {
            Err(format!("invalid sha256 hex: {hex:?}"))
        }
    }

    /// Parse the `sha256:<hex>` wire form.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.strip_prefix("sha256:") {
            Some(hex) => Self::from_hex(hex),
            None => Err(format!("digest missing sha256: prefix: {s:?}")),
        }
    }

    /// The bare hex portion.
    pub fn hex(&self) -> &str {
        &self.0
    }

    /// The blob file name derived from this digest (`sha256-<hex>`).
    pub fn file_name(&self) -> String {
        format!("sha256-{}", self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.to_string()
    }
}

/// Durable metadata for one pulled model, keyed by its canonical reference.
///
/// This record is the authoritative source for listing endpoints; the
/// manifest is authoritative for which blobs the model is made of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// Canonical `name:tag` reference.
    pub name: String,
    /// Digest of the weights blob.
    pub digest: Digest,
    /// Weights size in bytes.
    pub size: u64,
    /// Weights format, e.g. `gguf`.
    pub format: String,
    /// Model family, e.g. `llama`.
    pub family: String,
    /// Parameter-count label, e.g. `8B`.
    pub parameter_size: String,
    /// Quantization label, e.g. `Q4_K_M`.
    pub quantization: String,
    /// When the model was pulled.
    pub pulled_at: DateTime<Utc>,
    /// Last time the model was resolved for use.
    pub last_used: DateTime<Utc>,
}

/// Progress callback for long-running pulls: `(status, percent)`.
///
/// Invoked on the task performing the download, possibly thousands of
/// times; callers throttle display. Implementations must not block.
pub type PullProgress = Arc<dyn Fn(&str, f64) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_name_defaults_tag() {
        let r = ModelRef::parse("llama3");
        assert_eq!(r.name, "llama3");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.canonical(), "llama3:latest");
    }

    #[test]
    fn parse_name_with_tag() {
        let r = ModelRef::parse("llama3:8b");
        assert_eq!(r.name, "llama3");
        assert_eq!(r.tag, "8b");
        assert_eq!(r.to_string(), "llama3:8b");
    }

    #[test]
    fn parse_trailing_colon_defaults_tag() {
        let r = ModelRef::parse("llama3:");
        assert_eq!(r.name, "llama3");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn digest_roundtrip() {
        let hex = "a".repeat(64);
        let d = Digest::from_hex(&hex).unwrap();
        assert_eq!(d.to_string(), format!("sha256:{hex}"));
        assert_eq!(Digest::parse(&d.to_string()).unwrap(), d);
        assert_eq!(d.file_name(), format!("sha256-{hex}"));
    }

    #[test]
    fn digest_rejects_short_hex() {
        assert!(Digest::from_hex("abc").is_err());
    }

    #[test]
    fn digest_rejects_missing_prefix() {
        assert!(Digest::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn digest_rejects_non_hex() {
        assert!(Digest::from_hex("z".repeat(64)).is_err());
    }

    #[test]
    fn digest_serde_uses_wire_form() {
        let d = Digest::from_hex("b".repeat(64)).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", "b".repeat(64)));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
