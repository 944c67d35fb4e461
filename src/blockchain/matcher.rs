use std::sync::Arc;

use crate::error::WatcherError;
use crate::logging::LogContext;
use crate::models::{Notification, Transaction};
use crate::notifier::NotificationDispatcher;
use crate::store::{StoreError, WatchStore};

/// Outcome of matching one block's transactions
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchSummary {
    pub examined: usize,
    /// Already processed during the previous cycle
    pub skipped: usize,
    pub matched: Vec<Notification>,
}

/// Matches resolved transactions against the watch set and queues a
/// notification for every hit.
#[derive(Clone)]
pub struct TransactionMatcher {
    store: Arc<dyn WatchStore>,
    dispatcher: NotificationDispatcher,
}

impl TransactionMatcher {
    pub fn new(store: Arc<dyn WatchStore>, dispatcher: NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Watched address involved in `tx`. The sender wins when both sides are watched.
    pub fn match_transaction(&self, tx: &Transaction) -> Result<Option<String>, StoreError> {
        if self.store.is_watched(&tx.from)? {
            return Ok(Some(tx.from.clone()));
        }
        if self.store.is_watched(&tx.to)? {
            return Ok(Some(tx.to.clone()));
        }
        Ok(None)
    }

    /// Match one block's transactions in order.
    ///
    /// Transactions already in the processed set are skipped. Every examined
    /// transaction is marked processed, matched or not, so the next cycle's
    /// catch-up pass does not notify it again.
    pub async fn process_block(&self, transactions: &[Transaction]) -> Result<MatchSummary, WatcherError> {
        let mut summary = MatchSummary::default();

        for tx in transactions {
            if self.store.is_processed(&tx.hash)? {
                summary.skipped += 1;
                continue;
            }
            summary.examined += 1;

            if let Some(address) = self.match_transaction(tx)? {
                let notification = Notification {
                    tx_hash: tx.hash.clone(),
                    address,
                    block_number: tx.block_number,
                };

                LogContext::new("matcher", "process_block")
                    .with_transaction_hash(&tx.hash)
                    .with_address(&notification.address)
                    .with_block_number(tx.block_number)
                    .debug("Watched address matched");

                self.dispatcher.dispatch(notification.clone()).await?;
                summary.matched.push(notification);
            }

            self.store.mark_processed(&tx.hash)?;
        }

        Ok(summary)
    }
}
