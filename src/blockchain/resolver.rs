use async_trait::async_trait;

use crate::error::{ResolverError, WatcherError};
use crate::models::{BlockRef, Transaction};

/// Read access to chain data. Implementations perform exactly one upstream
/// round-trip per lookup, never retry and never touch shared state.
#[async_trait]
pub trait TransactionResolver: Send + Sync {
    /// All transactions of `block`, in block order
    async fn fetch_block_transactions(&self, block: &BlockRef) -> Result<Vec<Transaction>, ResolverError>;

    /// Recent token transfers sent or received by `address`
    async fn fetch_address_history(&self, address: &str) -> Result<Vec<Transaction>, WatcherError>;
}
