//! Manifest JSON files: one per `name:tag`.

use tokio::fs;

use tutu_types::{Manifest, ModelRef, StoreError};

use crate::layout::StoreLayout;

/// Reads and writes manifests under `manifests/<name>/<tag>`.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    layout: StoreLayout,
}

impl ManifestStore {
    /// Manifest store over the given layout.
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Whether a manifest exists for the reference.
    pub async fn exists(&self, reference: &ModelRef) -> bool {
        fs::try_exists(self.layout.manifest_path(reference))
            .await
            .unwrap_or(false)
    }

    /// Load the manifest for a reference.
    pub async fn read(&self, reference: &ModelRef) -> Result<Manifest, StoreError> {
        let path = self.layout.manifest_path(reference);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(reference.canonical()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Write the manifest for a reference, creating parent directories.
    ///
    /// Callers publish the referenced blobs first so no reader can observe
    /// a manifest pointing at a missing blob.
    pub async fn write(&self, reference: &ModelRef, manifest: &Manifest) -> Result<(), StoreError> {
        let path = self.layout.manifest_path(reference);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(manifest)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&path, contents).await?;
        Ok(())
    }

    /// Remove the manifest for a reference. Missing manifests are not an
    /// error. Empty per-name directories are cleaned up opportunistically.
    pub async fn remove(&self, reference: &ModelRef) -> Result<(), StoreError> {
        let path = self.layout.manifest_path(reference);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }

    /// Every stored `(reference, manifest)` pair. Used to decide whether a
    /// blob is still referenced before deleting it.
    pub async fn list_all(&self) -> Result<Vec<(ModelRef, Manifest)>, StoreError> {
        let dir = self.layout.manifests_dir();
        let mut names = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(name_entry) = names.next_entry().await? {
            let Some(name) = name_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let mut tags = match fs::read_dir(name_entry.path()).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(tag_entry) = tags.next_entry().await? {
                let Some(tag) = tag_entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let reference = ModelRef { name: name.clone(), tag };
                match self.read(&reference).await {
                    Ok(manifest) => out.push((reference, manifest)),
                    Err(e) => {
                        tracing::warn!(reference = %reference, error = %e, "skipping unreadable manifest");
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutu_types::Digest;

    fn manifest() -> Manifest {
        Manifest::for_weights(Digest::from_hex("a".repeat(64)).unwrap(), 10)
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(StoreLayout::new(dir.path()));
        let reference = ModelRef::parse("llama3");

        store.write(&reference, &manifest()).await.unwrap();
        assert!(store.exists(&reference).await);
        let back = store.read(&reference).await.unwrap();
        assert_eq!(back, manifest());
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(StoreLayout::new(dir.path()));
        let err = store.read(&ModelRef::parse("ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(StoreLayout::new(dir.path()));
        store.remove(&ModelRef::parse("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn list_all_walks_names_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(StoreLayout::new(dir.path()));

        store.write(&ModelRef::parse("a"), &manifest()).await.unwrap();
        store.write(&ModelRef::parse("a:8b"), &manifest()).await.unwrap();
        store.write(&ModelRef::parse("b"), &manifest()).await.unwrap();

        let mut refs: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|(r, _)| r.canonical())
            .collect();
        refs.sort();
        assert_eq!(refs, vec!["a:8b", "a:latest", "b:latest"]);
    }

    #[tokio::test]
    async fn remove_cleans_empty_name_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(StoreLayout::new(dir.path()));
        let reference = ModelRef::parse("solo");

        store.write(&reference, &manifest()).await.unwrap();
        store.remove(&reference).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
