use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::oneshot;

use eth_tx_watcher::api::ApiServer;
use eth_tx_watcher::blockchain::{BlockListener, RpcClient, TransactionMatcher, TransactionResolver};
use eth_tx_watcher::config::AppConfig;
use eth_tx_watcher::logging::{init_logging, ErrorLogger, LogContext};
use eth_tx_watcher::notifier::{LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier};
use eth_tx_watcher::service::WatchService;
use eth_tx_watcher::store::{InMemoryStore, WatchStore};

#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watches Ethereum heads and notifies subscribers of their transactions")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to $CONFIG_FILE or ./config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Override the API port
    #[arg(long)]
    port: Option<u16>,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", AppConfig::generate_sample_config()?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(port) = args.port {
        config.api.port = port;
    }

    init_logging(&config.logging)?;
    info!("Starting Ethereum transaction watcher");

    let store: Arc<dyn WatchStore> = Arc::new(InMemoryStore::new());
    let rpc_client = RpcClient::new_with_config(config.rpc.http_endpoint.clone(), config.rpc.timeout_seconds)?
        .with_history_block_range(config.history.block_range);
    let resolver: Arc<dyn TransactionResolver> = Arc::new(rpc_client);

    let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
        Some(url) => {
            info!("Delivering notifications to webhook {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), config.notifier.webhook_timeout_seconds)?)
        }
        None => Arc::new(LogNotifier),
    };
    let (dispatcher, notification_worker) = NotificationDispatcher::spawn(notifier, config.notifier.queue_capacity);

    let listener = BlockListener::new(
        config.rpc.ws_endpoint.clone(),
        config.stream.clone(),
        resolver.clone(),
        store.clone(),
        TransactionMatcher::new(store.clone(), dispatcher),
    );

    let listener = match listener.start().await {
        Ok(handle) => handle,
        Err(e) => {
            ErrorLogger::log_error(
                &e,
                Some(LogContext::new("main", "start_listener")
                    .with_metadata("endpoint", serde_json::json!(config.rpc.ws_endpoint))),
            );
            return Err(e.into());
        }
    };

    let service = Arc::new(WatchService::new(store, resolver).with_listener_state(listener.state_receiver()));
    let server = ApiServer::new(service, config.api.host.clone(), config.api.port);
    let tcp_listener = server.bind().await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.serve(tcp_listener, async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Unable to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");

            let _ = stop_tx.send(());
            let grace = Duration::from_secs(config.api.shutdown_grace_seconds);
            match tokio::time::timeout(grace, &mut server_task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("HTTP server failed: {}", e),
                Ok(Err(e)) => error!("HTTP server task failed: {}", e),
                Err(_) => {
                    warn!("In-flight requests still running after {}s, dropping them", grace.as_secs());
                    server_task.abort();
                }
            }
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("HTTP server exited"),
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }
    }

    listener.stop().await?;

    // The listener held the last dispatcher; the worker drains what is queued and exits
    if let Err(e) = notification_worker.await {
        error!("Notification worker failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
