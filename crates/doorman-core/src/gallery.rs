//! Gallery store interface.
//!
//! Recognition only reads the gallery; enrollment appends to it. Writes may
//! happen while a recognition session holds a snapshot, so implementations
//! must never expose a partially written identity to `load_all`.

use crate::types::Identity;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("gallery store: {0}")]
pub struct GalleryError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl GalleryError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

pub trait GalleryStore: Send + Sync {
    /// Every stored identity, in insertion order.
    fn load_all(&self) -> Result<Vec<Identity>, GalleryError>;

    fn append(&self, identity: &Identity) -> Result<(), GalleryError>;

    /// Number of stored embeddings for `name`.
    fn count_by_name(&self, name: &str) -> Result<usize, GalleryError>;

    /// Distinct names with their embedding counts, sorted by name.
    fn list_names(&self) -> Result<Vec<(String, usize)>, GalleryError>;

    /// Remove every identity. Returns the number of rows removed.
    fn clear(&self) -> Result<usize, GalleryError>;
}
