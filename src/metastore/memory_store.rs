use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::{BaseMetaTree, Store, StoreError};

type Tree = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

/// In-memory store, used for tests and throwaway servers
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    trees: Arc<RwLock<HashMap<String, Tree>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self, name: &str) -> Result<Tree, StoreError> {
        {
            let trees = self.trees.read().map_err(poisoned)?;
            if let Some(tree) = trees.get(name) {
                return Ok(tree.clone());
            }
        }

        let mut trees = self.trees.write().map_err(poisoned)?;
        Ok(trees.entry(name.to_string()).or_default().clone())
    }
}

impl Store for MemoryStore {
    fn tree_open(&self, name: &str) -> Result<Box<dyn BaseMetaTree>, StoreError> {
        Ok(Box::new(MemoryTree {
            inner: self.tree(name)?,
        }))
    }

    fn num_keys(&self, name: &str) -> Result<usize, StoreError> {
        let tree = self.tree(name)?;
        let len = tree.read().map_err(poisoned)?.len();
        Ok(len)
    }
}

struct MemoryTree {
    inner: Tree,
}

impl BaseMetaTree for MemoryTree {
    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().map_err(poisoned)?.insert(key.to_vec(), value);
        Ok(())
    }

    fn insert_if_absent(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError> {
        let mut tree = self.inner.write().map_err(poisoned)?;
        if tree.contains_key(key) {
            return Ok(false);
        }
        tree.insert(key.to_vec(), value);
        Ok(true)
    }

    fn insert_if_present(&self, key: &[u8], value: Vec<u8>) -> Result<bool, StoreError> {
        let mut tree = self.inner.write().map_err(poisoned)?;
        match tree.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn take(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.write().map_err(poisoned)?.remove(key))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.contains_key(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let tree = self.inner.read().map_err(poisoned)?;
        Ok(tree
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
