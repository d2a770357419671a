//! Unified error types for parley-bot.
//!
//! Every subsystem has its own error enum; all of them convert into
//! [`BotError`] so the binary and the engine can propagate with `?`.

use crate::events::ChatId;
use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for parley-bot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Event bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Transport gateway error.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// User directory or session store error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// The session actor for this chat is no longer running.
    #[error("session {0} is closed")]
    SessionClosed(ChatId),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine is stopping and takes no more events.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Task join error.
    #[error("task: {0}")]
    Task(String),

    /// Generic internal error.
    #[error("{0}")]
    Internal(String),
}

impl BotError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<tokio::task::JoinError> for BotError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for parley-bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Event Bus Errors
// ============================================================================

/// Error type for event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The inbound queue has no consumer any more.
    #[error("inbound channel closed")]
    InboundClosed,
}

/// Result type for event bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

// ============================================================================
// Transport Errors
// ============================================================================

/// Error type for transport gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to start receiving events.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// Failed to send a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to edit a message or its keyboard.
    #[error("edit failed: {0}")]
    EditFailed(String),

    /// The interaction is unknown or was already acknowledged.
    #[error("unknown interaction: {0}")]
    UnknownInteraction(String),

    /// Rate limited.
    #[error("rate limited: retry after {0}s")]
    RateLimited(u64),

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// Internal error.
    #[error("{0}")]
    Internal(String),
}

impl TransportError {
    /// Create a start failed error.
    #[inline]
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }

    /// Create a send failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Create an edit failed error.
    #[inline]
    pub fn edit(msg: impl Into<String>) -> Self {
        Self::EditFailed(msg.into())
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Missing required field or collaborator.
    #[error("missing: {0}")]
    Missing(String),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a missing field error.
    #[inline]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for storage operations (users, session snapshots).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Error Context Extension
// ============================================================================

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<BotError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| BotError::Internal(format!("{}: {}", msg.into(), e.into())))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| BotError::Internal(format!("{}: {}", f(), e.into())))
    }
}

// ============================================================================
// Display Helpers
// ============================================================================

/// A wrapper that displays errors in a user-friendly format.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a BotError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BotError::Bus(e) => write!(f, "Event bus error: {e}"),
            BotError::Transport(e) => write!(f, "Transport error: {e}"),
            BotError::Config(e) => write!(f, "Configuration error: {e}"),
            BotError::Storage(e) => write!(f, "Storage error: {e}"),
            BotError::SessionClosed(chat) => write!(f, "Session for chat {chat} is closed"),
            BotError::Io(e) => write!(f, "IO error: {e}"),
            BotError::Json(e) => write!(f, "JSON error: {e}"),
            BotError::ShuttingDown => write!(f, "The engine is shutting down"),
            BotError::Task(e) => write!(f, "Task error: {e}"),
            BotError::Internal(e) => write!(f, "Internal error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let bot_err: BotError = BusError::InboundClosed.into();
        assert!(matches!(bot_err, BotError::Bus(_)));

        let bot_err: BotError = TransportError::NotConnected.into();
        assert!(matches!(bot_err, BotError::Transport(_)));

        let bot_err: BotError = StorageError::not_found("42").into();
        assert!(matches!(bot_err, BotError::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn test_error_helpers() {
        let err = BotError::config("invalid value");
        assert!(matches!(err, BotError::Config(ConfigError::Invalid(_))));

        let err = TransportError::edit("gone");
        assert_eq!(err.to_string(), "edit failed: gone");
    }

    #[test]
    fn test_context_wraps_message() {
        let res: std::result::Result<(), ConfigError> = Err(ConfigError::missing("transport"));
        let err = res.context("building engine").unwrap_err();
        assert_eq!(
            err.to_string(),
            "building engine: config: missing: transport"
        );
    }

    #[test]
    fn test_display_error() {
        let err = BotError::SessionClosed(ChatId(7));
        assert_eq!(
            DisplayError(&err).to_string(),
            "Session for chat 7 is closed"
        );
        assert_eq!(
            DisplayError(&BotError::ShuttingDown).to_string(),
            "The engine is shutting down"
        );
    }

    #[test]
    fn test_with_context_labels_storage_failure() {
        let res: StorageResult<()> = Err(StorageError::not_found("users.json"));
        let err = res
            .with_context(|| "failed to open users.json".to_string())
            .unwrap_err();
        assert!(matches!(err, BotError::Internal(_)));
        assert!(err.to_string().starts_with("failed to open users.json: "));
    }
}
