use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::debug;

use super::{BaseMetaTree, Durability, Store, StoreError};

/// Persistent store on top of a fjall keyspace; every tree is a fjall partition.
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    persist_mode: Option<PersistMode>,
    // Serializes compound read-modify-write steps across all partitions.
    write_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for FjallStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FjallStore")
            .field("persist_mode", &self.persist_mode)
            .finish_non_exhaustive()
    }
}

impl FjallStore {
    /// Opens (or creates) the keyspace located at `path`
    pub fn open(path: impl AsRef<Path>, durability: Durability) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!("Opening fjall keyspace at {}", path.display());
        let keyspace = Config::new(path).open()?;

        let persist_mode = match durability {
            Durability::Buffer => None,
            Durability::Fsync => Some(PersistMode::SyncAll),
            Durability::Fdatasync => Some(PersistMode::SyncData),
        };

        Ok(Self {
            keyspace,
            persist_mode,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn partition(&self, name: &str) -> Result<PartitionHandle, StoreError> {
        Ok(self
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())?)
    }
}

impl Store for FjallStore {
    fn tree_open(&self, name: &str) -> Result<Box<dyn BaseMetaTree>, StoreError> {
        Ok(Box::new(FjallTree {
            keyspace: self.keyspace.clone(),
            partition: self.partition(name)?,
            persist_mode: self.persist_mode,
            write_lock: self.write_lock.clone(),
        }))
    }

    fn num_keys(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self.partition(name)?.len()?)
    }
}

struct FjallTree {
    keyspace: Keyspace,
    partition: PartitionHandle,
    persist_mode: Option<PersistMode>,
    write_lock: Arc<Mutex<()>>,
}

impl FjallTree {
    fn persist(&self) -> Result<(), StoreError> {
        if let Some(mode) = self.persist_mode {
            self.keyspace.persist(mode)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded unit carries no state, so a poisoned lock is still usable.
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BaseMetaTree for FjallTree {
    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.partition.insert(key, value)?;
        self.persist()
    }

    fn insert_if_absent(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError> {
        let _guard = self.lock();
        if self.partition.contains_key(key)? {
            return Ok(false);
        }
        self.partition.insert(key, value)?;
        self.persist()?;
        Ok(true)
    }

    fn insert_if_present(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError> {
        let _guard = self.lock();
        if !self.partition.contains_key(key)? {
            return Ok(false);
        }
        self.partition.insert(key, value)?;
        self.persist()?;
        Ok(true)
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.partition.remove(key)?;
        self.persist()
    }

    fn take(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.lock();
        let previous = match self.partition.get(key)? {
            Some(value) => value.to_vec(),
            None => return Ok(None),
        };
        self.partition.remove(key)?;
        self.persist()?;
        Ok(Some(previous))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.partition.contains_key(key)?)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.partition.get(key)?.map(|value| value.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut pairs = Vec::new();
        for item in self.partition.prefix(prefix) {
            let (key, value) = item?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }
}
