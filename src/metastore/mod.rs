mod fjall_store;
mod memory_store;
mod traits;

pub use fjall_store::FjallStore;
pub use memory_store::MemoryStore;
pub use traits::{BaseMetaTree, Durability, StorageEngine, Store};

use std::path::Path;
use std::sync::Arc;

/// Errors raised by the credential store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage engine failed (I/O, journal, lock poisoning, ...)
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<fjall::Error> for StoreError {
    fn from(err: fjall::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Opens the store selected by `engine`.
///
/// `meta_root` is only used by persistent engines.
pub fn open_store(
    engine: StorageEngine,
    meta_root: &Path,
    durability: Durability,
) -> Result<Arc<dyn Store>, StoreError> {
    match engine {
        StorageEngine::Fjall => Ok(Arc::new(FjallStore::open(meta_root, durability)?)),
        StorageEngine::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
