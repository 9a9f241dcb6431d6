//! Metadata persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::ModelMetadata;

/// Durable mapping from canonical model reference to its metadata record.
///
/// The store is a small collaborator: the registry is its only writer, and
/// implementations must be safe to call from concurrent tasks.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record for `record.name`.
    async fn upsert(&self, record: &ModelMetadata) -> Result<(), StoreError>;

    /// Fetch the record for a canonical reference, if present.
    async fn get(&self, name: &str) -> Result<Option<ModelMetadata>, StoreError>;

    /// All records, in unspecified order.
    async fn list(&self) -> Result<Vec<ModelMetadata>, StoreError>;

    /// Remove the record for a canonical reference. Removing a missing
    /// record is not an error.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Update `last_used` for a canonical reference. Touching a missing
    /// record is not an error.
    async fn touch(&self, name: &str, when: DateTime<Utc>) -> Result<(), StoreError>;
}
