//! The model registry: the only writer of blobs, manifests, and metadata.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tutu_store::{BlobStore, FsMetadataStore, ManifestStore, StoreLayout};
use tutu_types::{
    Manifest, MetadataStore, ModelMetadata, ModelRef, ModelResolver, PullProgress, RegistryError,
};

use crate::catalog::Catalog;
use crate::pull::{download_resumable, emit};
use crate::tutufile;

/// Registry over one store layout.
///
/// Cloneable collaborator handed to the façade and the pool (as a
/// [`ModelResolver`]).
pub struct Registry {
    layout: StoreLayout,
    blobs: BlobStore,
    manifests: ManifestStore,
    metadata: Arc<dyn MetadataStore>,
    catalog: Catalog,
    http: reqwest::Client,
}

impl Registry {
    /// Build a registry with an explicit metadata store and catalog.
    pub fn new(layout: StoreLayout, metadata: Arc<dyn MetadataStore>, catalog: Catalog) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            blobs: BlobStore::new(layout.clone()),
            manifests: ManifestStore::new(layout.clone()),
            layout,
            metadata,
            catalog,
            http,
        }
    }

    /// Convenience constructor wiring the filesystem metadata store.
    pub fn with_fs_metadata(layout: StoreLayout, catalog: Catalog) -> Self {
        let metadata = Arc::new(FsMetadataStore::new(&layout));
        Self::new(layout, metadata, catalog)
    }

    /// Whether the model is fully present: manifest on disk and every
    /// referenced blob on disk.
    pub async fn has_local(&self, reference: &str) -> bool {
        let reference = ModelRef::parse(reference);
        let Ok(manifest) = self.manifests.read(&reference).await else {
            return false;
        };
        for layer in &manifest.layers {
            if !self.blobs.has_blob(&layer.digest).await {
                return false;
            }
        }
        true
    }

    /// Resolve a reference to the weights blob path, touching `last_used`.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        let reference = ModelRef::parse(name);
        let canonical = reference.canonical();
        let Some(_record) = self.metadata.get(&canonical).await? else {
            return Err(RegistryError::NotFound(canonical));
        };
        self.metadata.touch(&canonical, Utc::now()).await?;

        let manifest = self.manifests.read(&reference).await.map_err(|_| {
            RegistryError::Corrupted(format!("{canonical}: manifest missing"))
        })?;
        let layer = manifest.weights_layer().ok_or_else(|| {
            RegistryError::Corrupted(format!("{canonical}: manifest has no weights layer"))
        })?;
        let path = self.blobs.blob_path(&layer.digest);
        if !self.blobs.has_blob(&layer.digest).await {
            return Err(RegistryError::Corrupted(format!(
                "{canonical}: blob {} is missing",
                layer.digest
            )));
        }
        Ok(path)
    }

    /// All known models.
    pub async fn list(&self) -> Result<Vec<ModelMetadata>, RegistryError> {
        Ok(self.metadata.list().await?)
    }

    /// Metadata for one model.
    pub async fn show(&self, name: &str) -> Result<ModelMetadata, RegistryError> {
        let canonical = ModelRef::parse(name).canonical();
        self.metadata
            .get(&canonical)
            .await?
            .ok_or(RegistryError::NotFound(canonical))
    }

    /// Delete a model: blobs referenced only by its manifest, then the
    /// manifest, then the metadata row.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let reference = ModelRef::parse(name);
        let canonical = reference.canonical();

        let manifest = match self.manifests.read(&reference).await {
            Ok(m) => Some(m),
            Err(tutu_types::StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let record = self.metadata.get(&canonical).await?;
        if manifest.is_none() && record.is_none() {
            return Err(RegistryError::NotFound(canonical));
        }

        if let Some(manifest) = manifest {
            let still_referenced: std::collections::HashSet<_> = self
                .manifests
                .list_all()
                .await?
                .into_iter()
                .filter(|(r, _)| r != &reference)
                .flat_map(|(_, m)| m.layers.into_iter().map(|l| l.digest))
                .collect();
            for layer in &manifest.layers {
                if !still_referenced.contains(&layer.digest) {
                    self.blobs.remove_blob(&layer.digest).await?;
                }
            }
        }

        self.manifests.remove(&reference).await?;
        self.metadata.delete(&canonical).await?;
        tracing::info!(model = %canonical, "removed model");
        Ok(())
    }

    /// Download a model into the blob store and publish it.
    ///
    /// Idempotent: pulling a fully present model emits
    /// `("already exists", 100)` and returns. A pull interrupted mid-stream
    /// leaves its temp file in place; the next pull resumes from it.
    pub async fn pull(
        &self,
        name: &str,
        progress: Option<PullProgress>,
    ) -> Result<(), RegistryError> {
        let reference = ModelRef::parse(name);
        let canonical = reference.canonical();

        if self.has_local(&canonical).await {
            emit(progress.as_ref(), "already exists", 100.0);
            return Ok(());
        }

        let entry = self.catalog.lookup(&reference).ok_or_else(|| {
            RegistryError::UnknownModel {
                name: canonical.clone(),
                known: self.catalog.known_names(),
            }
        })?;

        tracing::info!(model = %canonical, url = %entry.url, "pulling model");
        let temp = self.layout.temp_download_path(&reference);
        let outcome =
            download_resumable(&self.http, &entry.url, &temp, entry.size, progress.as_ref())
                .await?;

        // Blob first, manifest second: a resolve racing this pull either
        // sees no manifest or a manifest whose blob is already in place.
        self.blobs.publish(&temp, &outcome.digest).await?;
        let manifest = Manifest::for_weights(outcome.digest.clone(), outcome.size);
        self.manifests.write(&reference, &manifest).await?;

        let now = Utc::now();
        self.metadata
            .upsert(&ModelMetadata {
                name: canonical.clone(),
                digest: outcome.digest,
                size: outcome.size,
                format: entry.format,
                family: entry.family,
                parameter_size: entry.parameter_size,
                quantization: entry.quantization,
                pulled_at: now,
                last_used: now,
            })
            .await?;

        tracing::info!(model = %canonical, size = outcome.size, "pull complete");
        emit(progress.as_ref(), "done", 100.0);
        Ok(())
    }

    /// Create a model from a Tutufile. A `FROM` naming a local model reuses
    /// its weights; otherwise a small marker blob stands in for them.
    pub async fn create_from_tutufile(
        &self,
        name: &str,
        contents: &str,
    ) -> Result<(), RegistryError> {
        let spec = tutufile::Tutufile::parse(contents)
            .map_err(|e| RegistryError::Other(e.into()))?;
        let reference = ModelRef::parse(name);
        let canonical = reference.canonical();

        let base = ModelRef::parse(&spec.from);
        let (manifest, size, format, family) = if self.has_local(&base.canonical()).await {
            let base_manifest = self.manifests.read(&base).await?;
            let layer = base_manifest.weights_layer().ok_or_else(|| {
                RegistryError::Corrupted(format!("{}: manifest has no weights layer", base))
            })?;
            let base_record = self.metadata.get(&base.canonical()).await?;
            (
                Manifest::for_weights(layer.digest.clone(), layer.size),
                layer.size,
                base_record.as_ref().map_or("gguf".into(), |r| r.format.clone()),
                base_record.map_or(base.name.clone(), |r| r.family),
            )
        } else {
            let marker = format!("# tutu model\nFROM {}\n", spec.from);
            let digest = self
                .blobs
                .write_blob(marker.as_bytes(), None)
                .await?;
            (
                Manifest::for_weights(digest, marker.len() as u64),
                marker.len() as u64,
                "tutu".to_string(),
                "custom".to_string(),
            )
        };

        self.manifests.write(&reference, &manifest).await?;
        let now = Utc::now();
        let digest = manifest
            .weights_layer()
            .expect("manifest was just built with a weights layer")
            .digest
            .clone();
        self.metadata
            .upsert(&ModelMetadata {
                name: canonical.clone(),
                digest,
                size,
                format,
                family,
                parameter_size: String::new(),
                quantization: String::new(),
                pulled_at: now,
                last_used: now,
            })
            .await?;
        tracing::info!(model = %canonical, from = %spec.from, "created model from Tutufile");
        Ok(())
    }
}

#[async_trait]
impl ModelResolver for Registry {
    async fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        Registry::resolve(self, name).await
    }
}
