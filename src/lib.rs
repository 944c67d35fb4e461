pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod retry;
pub mod service;
pub mod store;

pub use blockchain::{BlockListener, ListenerHandle, ListenerState, RpcClient, TransactionMatcher, TransactionResolver};
pub use config::{ApiConfig, AppConfig, HistoryConfig, LoggingConfig, NotifierConfig, RpcConfig, StreamConfig};
pub use error::{Result, WatcherError};
pub use logging::{init_logging, ErrorLogger, LogContext, MetricsLogger, PerformanceMonitor};
pub use notifier::{LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier};
pub use retry::{RetryConfig, RetryManager};
pub use service::{ServiceStatus, WatchService};
pub use store::{InMemoryStore, WatchStore};
