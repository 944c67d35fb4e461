use thiserror::Error;

pub use crate::notifier::NotifyError;
pub use crate::store::StoreError;

/// Main error type for the transaction watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures of a single upstream chain-RPC round-trip
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream returned HTTP {status}: {message}")]
    UpstreamError { status: u16, message: String },

    #[error("RPC method error: code={code}, message={message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed upstream payload: {0}")]
    Decode(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Bad caller input
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Address is required")]
    MissingAddress,

    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),
}

/// System-level errors
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The process cannot continue
    Critical,
    /// Functionality is lost until the condition clears
    High,
    /// A single operation failed and will be revisited
    Medium,
    /// Caller mistakes
    Low,
}

impl WatcherError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WatcherError::Config(_) => ErrorSeverity::Critical,
            WatcherError::Store(StoreError::Lock(_)) => ErrorSeverity::Critical,

            WatcherError::Connection(_) => ErrorSeverity::High,
            WatcherError::Subscription(_) => ErrorSeverity::High,
            WatcherError::System(_) => ErrorSeverity::High,

            WatcherError::Resolver(_) => ErrorSeverity::Medium,
            WatcherError::Notify(_) => ErrorSeverity::Medium,

            WatcherError::Validation(_) => ErrorSeverity::Low,
            WatcherError::Store(StoreError::EmptyAddress) => ErrorSeverity::Low,
        }
    }

    /// Check if the error clears up on its own when the operation is attempted again
    pub fn is_recoverable(&self) -> bool {
        match self {
            WatcherError::Connection(_) => true,
            WatcherError::Subscription(_) => true,
            WatcherError::Resolver(ResolverError::UpstreamUnavailable(_)) => true,
            WatcherError::Resolver(ResolverError::UpstreamError { .. }) => true,
            WatcherError::Resolver(ResolverError::Rpc { .. }) => true,

            WatcherError::Resolver(ResolverError::Decode(_)) => false,
            WatcherError::Config(_) => false,
            WatcherError::Validation(_) => false,
            WatcherError::Store(_) => false,

            _ => false,
        }
    }

    /// Get suggested retry delay in seconds for recoverable errors
    pub fn retry_delay(&self) -> Option<u64> {
        if !self.is_recoverable() {
            return None;
        }

        match self {
            WatcherError::Resolver(ResolverError::UpstreamError { status: 429, .. }) => Some(60),
            WatcherError::Connection(_) => Some(10),
            WatcherError::Subscription(_) => Some(10),
            _ => Some(5),
        }
    }

    /// Whether this error is the caller's fault rather than ours
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WatcherError::Validation(_) | WatcherError::Store(StoreError::EmptyAddress)
        )
    }
}
