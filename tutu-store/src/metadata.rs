//! Filesystem-backed implementation of the metadata store.
//!
//! One JSON file per model under `registry/`. The canonical reference is
//! percent-encoded into the file name so any reference is representable.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use tutu_types::{MetadataStore, ModelMetadata, StoreError};

use crate::layout::StoreLayout;

/// Filesystem metadata store.
///
/// Suitable for a single daemon on one machine; writes replace the whole
/// record file, which is small.
pub struct FsMetadataStore {
    dir: PathBuf,
}

impl FsMetadataStore {
    /// Store writing under the layout's `registry/` directory.
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.registry_dir(),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(key_to_filename(name))
    }
}

/// Encode a reference into a safe filename.
fn key_to_filename(key: &str) -> String {
    let mut encoded = String::new();
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.json")
}

/// Decode a filename back to a reference.
fn filename_to_key(filename: &str) -> Option<String> {
    let name = filename.strip_suffix(".json")?;
    let mut result = Vec::new();
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            result.push(byte);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(result).ok()
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn upsert(&self, record: &ModelMetadata) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let contents = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(self.record_path(&record.name), contents).await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ModelMetadata>, StoreError> {
        match fs::read_to_string(self.record_path(name)).await {
            Ok(contents) => {
                let record = serde_json::from_str(&contents)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ModelMetadata>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if filename_to_key(&filename).is_none() {
                continue;
            }
            match fs::read_to_string(entry.path()).await {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!(file = %filename, error = %e, "skipping unreadable metadata record");
                    }
                },
                Err(e) => {
                    tracing::warn!(file = %filename, error = %e, "skipping unreadable metadata record");
                }
            }
        }
        Ok(records)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn touch(&self, name: &str, when: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut record) = self.get(name).await? {
            record.last_used = when;
            self.upsert(&record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutu_types::Digest;

    fn record(name: &str) -> ModelMetadata {
        ModelMetadata {
            name: name.to_string(),
            digest: Digest::from_hex("f".repeat(64)).unwrap(),
            size: 1234,
            format: "gguf".into(),
            family: "llama".into(),
            parameter_size: "8B".into(),
            quantization: "Q4_K_M".into(),
            pulled_at: Utc::now(),
            last_used: Utc::now(),
        }
    }

    #[test]
    fn key_encoding_roundtrip() {
        let keys = ["llama3:latest", "org/model:8b", "has spaces", "emoji🎉"];
        for key in &keys {
            let filename = key_to_filename(key);
            let decoded = filename_to_key(&filename).unwrap();
            assert_eq!(*key, decoded, "roundtrip failed for {key}");
        }
    }

    #[test]
    fn filename_to_key_rejects_non_json() {
        assert!(filename_to_key("record.txt").is_none());
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));

        let rec = record("llama3:latest");
        store.upsert(&rec).await.unwrap();
        let back = store.get("llama3:latest").await.unwrap().unwrap();
        assert_eq!(back, rec);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));
        assert!(store.get("ghost:latest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));

        store.upsert(&record("a:latest")).await.unwrap();
        store.upsert(&record("b:latest")).await.unwrap();

        let mut names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a:latest", "b:latest"]);
    }

    #[tokio::test]
    async fn delete_is_tolerant_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));

        store.delete("ghost:latest").await.unwrap();
        store.upsert(&record("a:latest")).await.unwrap();
        store.delete("a:latest").await.unwrap();
        assert!(store.get("a:latest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_updates_last_used_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));

        let rec = record("a:latest");
        store.upsert(&rec).await.unwrap();

        let later = rec.last_used + chrono::Duration::seconds(60);
        store.touch("a:latest", later).await.unwrap();

        let back = store.get("a:latest").await.unwrap().unwrap();
        assert_eq!(back.last_used, later);
        assert_eq!(back.pulled_at, rec.pulled_at);
    }

    #[tokio::test]
    async fn touch_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetadataStore::new(&StoreLayout::new(dir.path()));
        store.touch("ghost:latest", Utc::now()).await.unwrap();
    }

    #[test]
    fn fs_store_implements_metadata_store() {
        fn _assert<T: MetadataStore>() {}
        _assert::<FsMetadataStore>();
    }
}
