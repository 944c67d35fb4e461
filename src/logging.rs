use log::{debug, error, info, trace, warn, LevelFilter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::LoggingConfig;
use crate::error::{ErrorSeverity, WatcherError};
use crate::models::BlockRef;

/// Structured logging context for the watcher
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.with_metadata("block_number", json!(block_number))
    }

    pub fn with_block(self, block: &BlockRef) -> Self {
        let context = self.with_block_number(block.number);
        match &block.hash {
            Some(hash) => context.with_metadata("block_hash", json!(hash)),
            None => context,
        }
    }

    pub fn with_transaction_hash(self, tx_hash: &str) -> Self {
        self.with_metadata("transaction_hash", json!(tx_hash))
    }

    pub fn with_address(self, address: &str) -> Self {
        self.with_metadata("address", json!(address))
    }

    pub fn with_duration_ms(self, duration_ms: u64) -> Self {
        self.with_metadata("duration_ms", json!(duration_ms))
    }

    pub fn with_retry_count(self, retry_count: u32) -> Self {
        self.with_metadata("retry_count", json!(retry_count))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut log_entry = json!({
            "timestamp": timestamp,
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }

    pub fn trace(&self, message: &str) {
        trace!("{}", self.format_message("TRACE", message));
    }
}

/// Times an operation and logs its duration when finished
pub struct PerformanceMonitor {
    pub start_time: SystemTime,
    operation: String,
    metadata: HashMap<String, Value>,
}

impl PerformanceMonitor {
    pub fn new(operation: &str) -> Self {
        Self {
            start_time: SystemTime::now(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    fn elapsed_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn context(&self, duration: u64) -> LogContext {
        let mut context = LogContext::new("performance", &self.operation).with_duration_ms(duration);
        for (key, value) in &self.metadata {
            context = context.with_metadata(key, value.clone());
        }
        context
    }

    pub fn finish(self) -> u64 {
        let duration = self.elapsed_ms();
        self.context(duration)
            .debug(&format!("Operation completed in {}ms", duration));
        duration
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) -> u64
    where
        E: std::fmt::Display,
    {
        let duration = self.elapsed_ms();
        let context = self.context(duration);

        match result {
            Ok(_) => {
                context.debug(&format!("Operation completed successfully in {}ms", duration));
            }
            Err(e) => {
                context
                    .with_metadata("error", json!(e.to_string()))
                    .warn(&format!("Operation failed after {}ms: {}", duration, e));
            }
        }

        duration
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &WatcherError, context: Option<LogContext>) {
        let severity = error.severity();

        let mut log_context = context.unwrap_or_else(|| LogContext::new("error", "unknown"));
        log_context = log_context
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("recoverable", json!(error.is_recoverable()));

        if let Some(delay) = error.retry_delay() {
            log_context = log_context.with_metadata("retry_delay_seconds", json!(delay));
        }

        let message = format!("Error occurred: {}", error);

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => log_context.error(&message),
            ErrorSeverity::Medium => log_context.warn(&message),
            ErrorSeverity::Low => log_context.info(&message),
        }
    }

    pub fn log_reconnect_attempt(error: &WatcherError, attempt: u32, delay_ms: u64) {
        LogContext::new("recovery", "reconnect_attempt")
            .with_retry_count(attempt)
            .with_metadata("delay_ms", json!(delay_ms))
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .warn(&format!("Reconnect attempt {} in {}ms: {}", attempt, delay_ms, error));
    }

    pub fn log_reconnected(attempts: u32) {
        LogContext::new("recovery", "reconnected")
            .with_retry_count(attempts)
            .info(&format!("Head stream re-established after {} attempts", attempts));
    }
}

/// Operational events emitted as structured log lines
pub struct MetricsLogger;

impl MetricsLogger {
    pub fn log_cycle_completed(block: &BlockRef, catch_up_blocks: usize, notified: usize, duration_ms: u64) {
        LogContext::new("metrics", "cycle_completed")
            .with_block(block)
            .with_metadata("catch_up_blocks", json!(catch_up_blocks))
            .with_metadata("notified", json!(notified))
            .with_duration_ms(duration_ms)
            .info(&format!(
                "Cycle for block {} completed: {} catch-up blocks, {} notifications",
                block.number, catch_up_blocks, notified
            ));
    }

    pub fn log_rpc_call(method: &str, duration_ms: u64, success: bool) {
        let context = LogContext::new("metrics", "rpc_call")
            .with_metadata("method", json!(method))
            .with_duration_ms(duration_ms)
            .with_metadata("success", json!(success));

        if success {
            context.debug(&format!("RPC call {} completed in {}ms", method, duration_ms));
        } else {
            context.warn(&format!("RPC call {} failed after {}ms", method, duration_ms));
        }
    }

    pub fn log_notification(tx_hash: &str, address: &str, delivered: bool) {
        LogContext::new("metrics", "notification")
            .with_transaction_hash(tx_hash)
            .with_address(address)
            .with_metadata("delivered", json!(delivered))
            .debug("Notification handed to notifier");
    }

    pub fn log_stream_event(event: &str, endpoint: &str) {
        LogContext::new("metrics", "stream_event")
            .with_metadata("event", json!(event))
            .with_metadata("endpoint", json!(endpoint))
            .info(&format!("Head stream {}: {}", event, endpoint));
    }
}

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize logging. `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_filter(&config.level));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    let json_format = config.format == "json";
    builder.format(move |buf, record| {
        use std::io::Write;

        let message = record.args().to_string();
        let structured = serde_json::from_str::<Value>(&message).ok();

        match (json_format, structured) {
            (true, Some(value)) => writeln!(buf, "{}", value),
            (true, None) => writeln!(
                buf,
                "{}",
                json!({
                    "timestamp": chrono::Utc::now().timestamp(),
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "message": message,
                })
            ),
            (false, Some(value)) => writeln!(
                buf,
                "{} [{}] {}/{}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                value["component"].as_str().unwrap_or("-"),
                value["operation"].as_str().unwrap_or("-"),
                value
            ),
            (false, None) => writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ),
        }
    });

    builder.try_init()?;
    info!("Logging initialized (level={}, format={})", config.level, config.format);
    Ok(())
}
