use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use eth_tx_watcher::api::{ApiServer, CliError, CliHandler, Commands};
use eth_tx_watcher::blockchain::TransactionResolver;
use eth_tx_watcher::error::{ResolverError, WatcherError};
use eth_tx_watcher::models::{BlockRef, Transaction};
use eth_tx_watcher::service::WatchService;
use eth_tx_watcher::store::{InMemoryStore, WatchStore};

struct NoHistory;

#[async_trait]
impl TransactionResolver for NoHistory {
    async fn fetch_block_transactions(&self, _block: &BlockRef) -> Result<Vec<Transaction>, ResolverError> {
        Ok(Vec::new())
    }

    async fn fetch_address_history(&self, _address: &str) -> Result<Vec<Transaction>, WatcherError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_api_server_creation() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(WatchService::new(store, Arc::new(NoHistory)));

    let server = ApiServer::new(service, "127.0.0.1".to_string(), 3000);

    assert_eq!(server.host, "127.0.0.1");
    assert_eq!(server.port, 3000);
}

#[tokio::test]
async fn test_serve_answers_cli_and_shuts_down() {
    let store = Arc::new(InMemoryStore::new());
    store.set_last_block(BlockRef::new(19_000_000, "0xabc")).unwrap();
    let service = Arc::new(WatchService::new(store.clone(), Arc::new(NoHistory)));

    let server = ApiServer::new(service, "127.0.0.1".to_string(), 0);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.serve(listener, async move {
        let _ = stop_rx.await;
    }));

    let cli = CliHandler::new(&format!("http://{}", addr), 5).unwrap();

    let block = cli.fetch(&Commands::CurrentBlock).await.unwrap();
    assert_eq!(block, 19_000_000);

    let subscribed = cli
        .fetch(&Commands::Subscribe {
            address: "0xF977814e90dA44bFA03b6295A0616a897441aceC".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(subscribed, "Subscription successful");
    assert!(store.is_watched("0xf977814e90da44bfa03b6295a0616a897441acec").unwrap());

    let history = cli
        .fetch(&Commands::Transactions {
            address: "0xf977814e90da44bfa03b6295a0616a897441acec".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(history, serde_json::json!([]));

    let status = cli.fetch(&Commands::Status).await.unwrap();
    assert_eq!(status["watched_addresses"], 1);

    let rejected = cli
        .fetch(&Commands::Transactions {
            address: "nope".to_string(),
        })
        .await;
    assert!(matches!(rejected, Err(CliError::Server { status: 400, .. })));

    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_reports_address_in_use() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let service = Arc::new(WatchService::new(Arc::new(InMemoryStore::new()), Arc::new(NoHistory)));
    let server = ApiServer::new(service, "127.0.0.1".to_string(), port);

    assert!(server.bind().await.is_err());
}
