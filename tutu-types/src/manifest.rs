//! Manifests: the JSON record binding a model reference to its blobs.

use serde::{Deserialize, Serialize};

use crate::model::Digest;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 2;

/// Media type of the primary weights layer.
pub const WEIGHTS_MEDIA_TYPE: &str = "application/vnd.tutu.model.weights";

/// One layer of a manifest: a blob reference plus its media type and size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    /// Media type, distinguishing weights from auxiliary layers.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Content digest of the referenced blob.
    pub digest: Digest,
    /// Blob size in bytes.
    pub size: u64,
}

/// A small JSON document per `name:tag` recording an ordered list of layers.
///
/// A model is "present" iff its manifest exists and every referenced blob
/// exists on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Schema version; always [`MANIFEST_SCHEMA_VERSION`] when written.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Layers in stable order; the weights layer comes first by convention.
    pub layers: Vec<Layer>,
}

impl Manifest {
    /// Build a single-layer manifest for a weights blob.
    pub fn for_weights(digest: Digest, size: u64) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            layers: vec![Layer {
                media_type: WEIGHTS_MEDIA_TYPE.to_string(),
                digest,
                size,
            }],
        }
    }

    /// The primary weights layer, if present.
    pub fn weights_layer(&self) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.media_type == WEIGHTS_MEDIA_TYPE)
    }
}
