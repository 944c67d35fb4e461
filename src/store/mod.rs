pub mod memory;


use thiserror::Error;

use crate::models::BlockRef;

pub use memory::InMemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Address must not be empty")]
    EmptyAddress,
    #[error("Lock acquisition failed: {0}")]
    Lock(String),
}

/// Registry of watched addresses, the per-cycle processed set and the block cursor.
///
/// HTTP handlers only call `add_watch` and the read accessors; the block
/// listener is the only writer of the processed set and the cursor.
pub trait WatchStore: Send + Sync {
    /// Register an address and return its subscriber id. Re-adding overwrites.
    fn add_watch(&self, address: &str) -> Result<String, StoreError>;

    fn is_watched(&self, address: &str) -> Result<bool, StoreError>;

    fn subscriber_for(&self, address: &str) -> Result<Option<String>, StoreError>;

    fn mark_processed(&self, tx_hash: &str) -> Result<(), StoreError>;

    fn is_processed(&self, tx_hash: &str) -> Result<bool, StoreError>;

    fn clear_processed(&self) -> Result<(), StoreError>;

    fn set_last_block(&self, block: BlockRef) -> Result<(), StoreError>;

    fn last_block(&self) -> Result<Option<BlockRef>, StoreError>;

    fn watched_count(&self) -> Result<usize, StoreError>;

    fn processed_count(&self) -> Result<usize, StoreError>;
}
