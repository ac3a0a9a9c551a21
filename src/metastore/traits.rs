use super::StoreError;

use std::fmt::{self, Debug};
use std::str::FromStr;

/// Store is the interface to the key/value engine holding users and sessions.
///
/// Data is organised in named trees, each an independent ordered keyspace.
/// Implementations must be safe to share between request tasks.
pub trait Store: Send + Sync + Debug + 'static {
    /// Returns the tree with the given name, creating it if it does not exist yet.
    fn tree_open(&self, name: &str) -> Result<Box<dyn BaseMetaTree>, StoreError>;

    /// Returns the number of keys in the tree with the given name.
    fn num_keys(&self, name: &str) -> Result<usize, StoreError>;
}

/// BaseMetaTree provides the record level operations on a single tree.
///
/// Every method is atomic with respect to the key it touches. `insert_if_absent`,
/// `insert_if_present` and `take` are compound read-modify-write steps and must not interleave with
/// other writers of the same tree.
pub trait BaseMetaTree: Send + Sync {
    /// Inserts a key-value pair into the tree, replacing any previous value.
    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    /// Inserts a key-value pair only if the key is not present yet.
    ///
    /// Returns `false` (and leaves the tree untouched) if the key already exists.
    fn insert_if_absent(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError>;

    /// Overwrites the value of an existing key.
    ///
    /// Returns `false` (and inserts nothing) if the key is not present.
    fn insert_if_present(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError>;

    /// Removes a key from the tree. Removing a missing key is not an error.
    fn remove(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Removes a key and returns the value it held, if any.
    fn take(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Checks if the tree contains the given key.
    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Gets the value associated with the given key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns every pair whose key starts with `prefix`, in key order.
    /// An empty prefix returns the whole tree.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Buffer,
    Fsync,
    Fdatasync,
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffer" => Ok(Durability::Buffer),
            "fsync" => Ok(Durability::Fsync),
            "fdatasync" => Ok(Durability::Fdatasync),
            _ => Err(format!("Unknown durability option: {}", s)),
        }
    }
}

/// Backend used for the credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEngine {
    /// Persistent fjall keyspace under the meta root
    Fjall,
    /// Process-local maps, lost on exit
    Memory,
}

impl FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fjall" => Ok(StorageEngine::Fjall),
            "memory" => Ok(StorageEngine::Memory),
            _ => Err(format!("Unknown storage engine: {}", s)),
        }
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageEngine::Fjall => f.write_str("fjall"),
            StorageEngine::Memory => f.write_str("memory"),
        }
    }
}
