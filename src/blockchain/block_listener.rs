use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::error::{SystemError, WatcherError};
use crate::logging::{ErrorLogger, LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::BlockRef;
use crate::retry::{RetryConfig, RetryManager};
use crate::store::WatchStore;

use super::head_stream::HeadStream;
use super::matcher::TransactionMatcher;
use super::resolver::TransactionResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
    AwaitingBlock,
    ProcessingCycle,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Subscribed => "subscribed",
            ListenerState::AwaitingBlock => "awaiting_block",
            ListenerState::ProcessingCycle => "processing_cycle",
            ListenerState::Reconnecting => "reconnecting",
            ListenerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of one processing cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed { catch_up_blocks: usize, notified: usize },
    /// Head equal to the cursor, already processed
    DuplicateHead,
}

enum SessionEnd {
    Shutdown,
    Closed(String),
}

/// Drives one processing cycle per announced head.
///
/// The listener task is the only writer of the processed set and the cursor.
pub struct BlockListener {
    endpoint: String,
    config: StreamConfig,
    resolver: Arc<dyn TransactionResolver>,
    store: Arc<dyn WatchStore>,
    matcher: TransactionMatcher,
    state: watch::Sender<ListenerState>,
}

impl BlockListener {
    pub fn new(
        endpoint: String,
        config: StreamConfig,
        resolver: Arc<dyn TransactionResolver>,
        store: Arc<dyn WatchStore>,
        matcher: TransactionMatcher,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Disconnected);
        Self {
            endpoint,
            config,
            resolver,
            store,
            matcher,
            state,
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ListenerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Listener state {} -> {}", previous, state);
        }
    }

    fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.config.subscribe_timeout_seconds)
    }

    /// Connect and subscribe, then run the listener on its own task.
    /// Connection or subscription failure here is returned to the caller.
    pub async fn start(self) -> Result<ListenerHandle, WatcherError> {
        self.set_state(ListenerState::Connecting);
        let stream = match HeadStream::open(&self.endpoint, self.subscribe_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(ListenerState::Stopped);
                return Err(e);
            }
        };
        self.set_state(ListenerState::Subscribed);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state_receiver();
        let task = tokio::spawn(self.run(stream, shutdown_rx));

        Ok(ListenerHandle {
            shutdown: shutdown_tx,
            state,
            task,
        })
    }

    async fn run(self, mut stream: HeadStream, mut shutdown: watch::Receiver<bool>) {
        LogContext::new("block_listener", "run")
            .with_metadata("endpoint", serde_json::json!(self.endpoint))
            .with_metadata("subscription_id", serde_json::json!(stream.subscription_id()))
            .info("Block listener started");

        loop {
            match self.consume(&mut stream, &mut shutdown).await {
                SessionEnd::Shutdown => {
                    stream.close().await;
                    break;
                }
                SessionEnd::Closed(reason) => {
                    LogContext::new("block_listener", "run")
                        .with_metadata("endpoint", serde_json::json!(self.endpoint))
                        .warn(&format!("Head stream ended: {}", reason));

                    if !self.config.reconnect_enabled {
                        break;
                    }

                    match self.reconnect(&mut shutdown).await {
                        Some(reopened) => stream = reopened,
                        None => break,
                    }
                }
            }
        }

        self.set_state(ListenerState::Stopped);
        log::info!("Block listener stopped");
    }

    /// Read heads until the stream ends or shutdown is requested
    async fn consume(&self, stream: &mut HeadStream, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        loop {
            if *shutdown.borrow() {
                return SessionEnd::Shutdown;
            }
            self.set_state(ListenerState::AwaitingBlock);

            let next = tokio::select! {
                next = stream.next_head() => next,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };

            match next {
                Ok(Some(head)) => {
                    self.set_state(ListenerState::ProcessingCycle);
                    // A failed cycle is logged and retried with the next head
                    let _ = self.process_head(head).await;
                }
                Ok(None) => return SessionEnd::Closed("closed by server".to_string()),
                Err(e) => return SessionEnd::Closed(e.to_string()),
            }
        }
    }

    /// Reopen the stream with backoff. `None` on shutdown or when attempts run out.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<HeadStream> {
        self.set_state(ListenerState::Reconnecting);
        let retry = RetryManager::new("head_stream_reconnect", RetryConfig::for_reconnect(&self.config));
        let timeout = self.subscribe_timeout();

        let attempt = retry.execute(|| HeadStream::open(&self.endpoint, timeout));
        tokio::select! {
            result = attempt => match result {
                Ok(stream) => {
                    let mut context = LogContext::new("block_listener", "reconnect");
                    match self.store.last_block() {
                        Ok(Some(cursor)) => {
                            context = context.with_block(&cursor);
                            context.info(&format!("Resuming from block {}", cursor.number));
                        }
                        _ => context.info("Resuming with no processed block"),
                    }
                    self.set_state(ListenerState::Subscribed);
                    Some(stream)
                }
                Err(e) => {
                    ErrorLogger::log_error(
                        &e,
                        Some(LogContext::new("block_listener", "reconnect")
                            .with_metadata("endpoint", serde_json::json!(self.endpoint))),
                    );
                    None
                }
            },
            _ = shutdown.changed() => None,
        }
    }

    /// Run one processing cycle for `head`.
    ///
    /// Catch up the cursor block (plus any skipped blocks), clear the processed
    /// set, process `head`, then advance the cursor. Any failure aborts the cycle
    /// and leaves the cursor where it was.
    pub async fn process_head(&self, head: BlockRef) -> Result<CycleOutcome, WatcherError> {
        let context = LogContext::new("block_listener", "process_head").with_block(&head);
        let monitor = PerformanceMonitor::new("processing_cycle").with_metadata("block_number", serde_json::json!(head.number));

        let result = self.run_cycle(&head).await;
        let duration = monitor.finish_with_result(&result);

        match &result {
            Ok(CycleOutcome::Completed { catch_up_blocks, notified }) => {
                MetricsLogger::log_cycle_completed(&head, *catch_up_blocks, *notified, duration);
            }
            Ok(CycleOutcome::DuplicateHead) => {
                context.debug("Head already processed, ignoring");
            }
            Err(e) => {
                ErrorLogger::log_error(e, Some(context.with_metadata("stage", serde_json::json!("cycle_aborted"))));
            }
        }

        result
    }

    async fn run_cycle(&self, head: &BlockRef) -> Result<CycleOutcome, WatcherError> {
        let previous = self.store.last_block()?;
        let mut notified = 0;
        let mut catch_up_blocks = 0;

        if let Some(prev) = &previous {
            if prev.is_same_block(head) {
                return Ok(CycleOutcome::DuplicateHead);
            }

            for block in self.catch_up_blocks(prev, head) {
                let transactions = self.resolver.fetch_block_transactions(&block).await?;
                let summary = self.matcher.process_block(&transactions).await?;
                notified += summary.matched.len();
                catch_up_blocks += 1;
            }
        }

        self.store.clear_processed()?;

        let transactions = self.resolver.fetch_block_transactions(head).await?;
        let summary = self.matcher.process_block(&transactions).await?;
        notified += summary.matched.len();

        self.store.set_last_block(head.clone())?;

        Ok(CycleOutcome::Completed {
            catch_up_blocks,
            notified,
        })
    }

    /// Cursor block followed by the blocks skipped between it and `head`, oldest first
    fn catch_up_blocks(&self, prev: &BlockRef, head: &BlockRef) -> Vec<BlockRef> {
        let mut blocks = vec![prev.clone()];

        if head.number <= prev.number {
            LogContext::new("block_listener", "catch_up")
                .with_block(head)
                .with_metadata("cursor", serde_json::json!(prev.number))
                .warn("Head is not ahead of the cursor, chain may have reorganized");
            return blocks;
        }

        let first_missing = prev.number + 1;
        let missing = head.number - first_missing;
        let backfill = missing.min(self.config.max_backfill_blocks);
        if missing > backfill {
            LogContext::new("block_listener", "catch_up")
                .with_block(head)
                .with_metadata("missing_blocks", serde_json::json!(missing))
                .warn(&format!(
                    "{} blocks missed, backfilling {} and skipping the rest",
                    missing, backfill
                ));
        }

        blocks.extend((first_missing..first_missing + backfill).map(BlockRef::from_number));
        blocks
    }
}

/// Control handle for a running listener
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request shutdown and wait for the listener task. A cycle in progress
    /// is allowed to complete.
    pub async fn stop(self) -> Result<(), WatcherError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| WatcherError::System(SystemError::Task(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transaction;
    use crate::notifier::{LogNotifier, NotificationDispatcher};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves empty blocks and records every lookup
    #[derive(Default)]
    struct RecordingResolver {
        requested: Mutex<Vec<BlockRef>>,
    }

    #[async_trait]
    impl TransactionResolver for RecordingResolver {
        async fn fetch_block_transactions(
            &self,
            block: &BlockRef,
        ) -> Result<Vec<Transaction>, crate::error::ResolverError> {
            self.requested.lock().unwrap().push(block.clone());
            Ok(Vec::new())
        }

        async fn fetch_address_history(&self, _address: &str) -> Result<Vec<Transaction>, WatcherError> {
            Ok(Vec::new())
        }
    }

    fn listener(max_backfill_blocks: u64) -> (BlockListener, Arc<InMemoryStore>, Arc<RecordingResolver>) {
        let store = Arc::new(InMemoryStore::new());
        let resolver = Arc::new(RecordingResolver::default());
        let (dispatcher, _worker) = NotificationDispatcher::spawn(Arc::new(LogNotifier), 8);
        let matcher = TransactionMatcher::new(store.clone(), dispatcher);
        let config = StreamConfig {
            max_backfill_blocks,
            ..StreamConfig::default()
        };
        let listener = BlockListener::new(
            "ws://127.0.0.1:1".to_string(),
            config,
            resolver.clone(),
            store.clone(),
            matcher,
        );
        (listener, store, resolver)
    }

    fn requested_numbers(resolver: &RecordingResolver) -> Vec<u64> {
        resolver.requested.lock().unwrap().iter().map(|b| b.number).collect()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (listener, _, _) = listener(4);
        assert_eq!(listener.state(), ListenerState::Disconnected);
        assert_eq!(ListenerState::AwaitingBlock.to_string(), "awaiting_block");
    }

    #[tokio::test]
    async fn test_first_head_has_no_catch_up() {
        let (listener, store, resolver) = listener(4);

        let outcome = listener.process_head(BlockRef::new(100, "0xh100")).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { catch_up_blocks: 0, notified: 0 });
        assert_eq!(requested_numbers(&resolver), vec![100]);
        assert_eq!(store.last_block().unwrap(), Some(BlockRef::new(100, "0xh100")));
    }

    #[tokio::test]
    async fn test_duplicate_head_is_ignored() {
        let (listener, _, resolver) = listener(4);
        listener.process_head(BlockRef::new(100, "0xh100")).await.unwrap();

        let outcome = listener.process_head(BlockRef::new(100, "0xH100")).await.unwrap();
        assert_eq!(outcome, CycleOutcome::DuplicateHead);
        assert_eq!(requested_numbers(&resolver), vec![100]);
    }

    #[tokio::test]
    async fn test_gap_is_backfilled_oldest_first() {
        let (listener, _, resolver) = listener(4);
        listener.process_head(BlockRef::new(100, "0xh100")).await.unwrap();

        let outcome = listener.process_head(BlockRef::new(103, "0xh103")).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { catch_up_blocks: 3, notified: 0 });
        assert_eq!(requested_numbers(&resolver), vec![100, 100, 101, 102, 103]);

        // Announced hash is carried for the cursor block, backfilled blocks have none
        let requested = resolver.requested.lock().unwrap();
        assert_eq!(requested[1].hash.as_deref(), Some("0xh100"));
        assert!(requested[2].hash.is_none());
    }

    #[tokio::test]
    async fn test_backfill_is_bounded() {
        let (listener, _, resolver) = listener(2);
        listener.process_head(BlockRef::new(100, "0xh100")).await.unwrap();
        listener.process_head(BlockRef::new(110, "0xh110")).await.unwrap();

        assert_eq!(requested_numbers(&resolver), vec![100, 100, 101, 102, 110]);
    }

    #[tokio::test]
    async fn test_stale_head_only_catches_up_cursor() {
        let (listener, store, resolver) = listener(4);
        listener.process_head(BlockRef::new(100, "0xh100")).await.unwrap();
        listener.process_head(BlockRef::new(100, "0xother")).await.unwrap();

        assert_eq!(requested_numbers(&resolver), vec![100, 100, 100]);
        assert_eq!(store.last_block().unwrap(), Some(BlockRef::new(100, "0xother")));
    }

    #[tokio::test]
    async fn test_start_fails_when_feed_unreachable() {
        let (listener, _, _) = listener(4);
        let state = listener.state_receiver();

        let result = listener.start().await;
        assert!(matches!(result, Err(WatcherError::Connection(_))));
        assert_eq!(*state.borrow(), ListenerState::Stopped);
    }
}
