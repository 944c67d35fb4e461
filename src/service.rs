use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::blockchain::{ListenerState, TransactionResolver};
use crate::error::{ValidationError, WatcherError};
use crate::logging::LogContext;
use crate::models::{validate_address, Transaction};
use crate::store::WatchStore;

/// Snapshot reported by `GET /status`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub listener_state: ListenerState,
    pub current_block: u64,
    pub watched_addresses: usize,
}

/// Read and subscribe operations offered to API clients
pub struct WatchService {
    store: Arc<dyn WatchStore>,
    resolver: Arc<dyn TransactionResolver>,
    listener_state: Option<watch::Receiver<ListenerState>>,
}

impl WatchService {
    pub fn new(store: Arc<dyn WatchStore>, resolver: Arc<dyn TransactionResolver>) -> Self {
        Self {
            store,
            resolver,
            listener_state: None,
        }
    }

    pub fn with_listener_state(mut self, state: watch::Receiver<ListenerState>) -> Self {
        self.listener_state = Some(state);
        self
    }

    /// Number of the last fully processed block, 0 before the first cycle completes
    pub fn current_block(&self) -> Result<u64, WatcherError> {
        Ok(self.store.last_block()?.map(|block| block.number).unwrap_or(0))
    }

    /// Watch `address` and return the subscriber id assigned to it
    pub fn subscribe(&self, address: &str) -> Result<String, WatcherError> {
        let subscriber_id = self.store.add_watch(address)?;
        LogContext::new("service", "subscribe")
            .with_address(address)
            .with_metadata("subscriber_id", serde_json::json!(subscriber_id))
            .info(&format!("Address {} subscribed", address));
        Ok(subscriber_id)
    }

    /// Recent transfers involving `address`, straight from the chain
    pub async fn transactions(&self, address: &str) -> Result<Vec<Transaction>, WatcherError> {
        if address.trim().is_empty() {
            return Err(ValidationError::MissingAddress.into());
        }
        validate_address(address).map_err(|e| ValidationError::InvalidAddress(e.to_string()))?;
        self.resolver.fetch_address_history(address.trim()).await
    }

    pub fn status(&self) -> Result<ServiceStatus, WatcherError> {
        let listener_state = self
            .listener_state
            .as_ref()
            .map(|state| *state.borrow())
            .unwrap_or(ListenerState::Disconnected);

        Ok(ServiceStatus {
            listener_state,
            current_block: self.current_block()?,
            watched_addresses: self.store.watched_count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolverError;
    use crate::models::BlockRef;
    use crate::store::{InMemoryStore, StoreError};
    use async_trait::async_trait;

    struct FixedResolver;

    #[async_trait]
    impl TransactionResolver for FixedResolver {
        async fn fetch_block_transactions(&self, _block: &BlockRef) -> Result<Vec<Transaction>, ResolverError> {
            Ok(Vec::new())
        }

        async fn fetch_address_history(&self, address: &str) -> Result<Vec<Transaction>, WatcherError> {
            Ok(vec![Transaction {
                hash: "0x1".to_string(),
                from: address.to_string(),
                to: "0x2".to_string(),
                value: "0x0".to_string(),
                block_number: 1,
            }])
        }
    }

    fn service() -> (WatchService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (WatchService::new(store.clone(), Arc::new(FixedResolver)), store)
    }

    #[test]
    fn test_current_block_defaults_to_zero() {
        let (service, store) = service();
        assert_eq!(service.current_block().unwrap(), 0);

        store.set_last_block(BlockRef::new(42, "0xh42")).unwrap();
        assert_eq!(service.current_block().unwrap(), 42);
    }

    #[test]
    fn test_subscribe() {
        let (service, store) = service();
        assert_eq!(service.subscribe("0xabc").unwrap(), "user-0xabc");
        assert!(store.is_watched("0xABC").unwrap());

        assert!(matches!(
            service.subscribe(""),
            Err(WatcherError::Store(StoreError::EmptyAddress))
        ));
    }

    #[tokio::test]
    async fn test_transactions_validates_address() {
        let (service, _) = service();

        assert!(matches!(
            service.transactions(" ").await,
            Err(WatcherError::Validation(ValidationError::MissingAddress))
        ));
        assert!(matches!(
            service.transactions("0x123").await,
            Err(WatcherError::Validation(ValidationError::InvalidAddress(_)))
        ));

        let txs = service
            .transactions("0xf977814e90da44bfa03b6295a0616a897441acec")
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
    }

    #[test]
    fn test_status_reports_listener_state() {
        let (service, store) = service();
        store.add_watch("0xabc").unwrap();

        let status = service.status().unwrap();
        assert_eq!(status.listener_state, ListenerState::Disconnected);
        assert_eq!(status.watched_addresses, 1);

        let (_tx, rx) = watch::channel(ListenerState::AwaitingBlock);
        let service = service.with_listener_state(rx);
        assert_eq!(service.status().unwrap().listener_state, ListenerState::AwaitingBlock);
    }
}
