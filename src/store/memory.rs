use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{normalize_address, BlockRef, WatchedAddress};
use crate::store::{StoreError, WatchStore};

#[derive(Default)]
struct StoreState {
    /// Keyed by normalized address
    watched: HashMap<String, WatchedAddress>,
    processed: HashSet<String>,
    last_block: Option<BlockRef>,
}

/// In-memory `WatchStore` guarded by a single reader/writer lock.
///
/// Every mutation happens under the write guard, so a reader sees the cursor
/// either before or after `set_last_block`, never in between.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Lock("Failed to acquire write lock".to_string()))
    }

    /// Snapshot of all watched addresses
    pub fn watched_addresses(&self) -> Result<Vec<WatchedAddress>, StoreError> {
        let state = self.read()?;
        Ok(state.watched.values().cloned().collect())
    }
}

fn normalize_hash(tx_hash: &str) -> String {
    tx_hash.trim().to_lowercase()
}

impl WatchStore for InMemoryStore {
    fn add_watch(&self, address: &str) -> Result<String, StoreError> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Err(StoreError::EmptyAddress);
        }

        let watched = WatchedAddress {
            address: address.trim().to_string(),
            subscriber_id: format!("user-{}", address.trim()),
        };
        let subscriber_id = watched.subscriber_id.clone();

        let mut state = self.write()?;
        state.watched.insert(key, watched);
        Ok(subscriber_id)
    }

    fn is_watched(&self, address: &str) -> Result<bool, StoreError> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Ok(false);
        }
        let state = self.read()?;
        Ok(state.watched.contains_key(&key))
    }

    fn subscriber_for(&self, address: &str) -> Result<Option<String>, StoreError> {
        let key = normalize_address(address);
        let state = self.read()?;
        Ok(state.watched.get(&key).map(|w| w.subscriber_id.clone()))
    }

    fn mark_processed(&self, tx_hash: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.processed.insert(normalize_hash(tx_hash));
        Ok(())
    }

    fn is_processed(&self, tx_hash: &str) -> Result<bool, StoreError> {
        let state = self.read()?;
        Ok(state.processed.contains(&normalize_hash(tx_hash)))
    }

    fn clear_processed(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.processed.clear();
        Ok(())
    }

    fn set_last_block(&self, block: BlockRef) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.last_block = Some(block);
        Ok(())
    }

    fn last_block(&self) -> Result<Option<BlockRef>, StoreError> {
        let state = self.read()?;
        Ok(state.last_block.clone())
    }

    fn watched_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.watched.len())
    }

    fn processed_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.processed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_poisoned_lock_surfaces_as_store_error() {
        let store = Arc::new(InMemoryStore::new());
        store.add_watch("0xabc").unwrap();

        let poisoner = store.clone();
        let result = thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(result.is_err());

        assert!(matches!(store.add_watch("0xdef"), Err(StoreError::Lock(_))));
        assert!(matches!(store.last_block(), Err(StoreError::Lock(_))));
        assert!(matches!(store.is_watched("0xabc"), Err(StoreError::Lock(_))));
        assert!(matches!(store.set_last_block(BlockRef::from_number(1)), Err(StoreError::Lock(_))));
    }
}
