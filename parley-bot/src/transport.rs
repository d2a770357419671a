//! Transport gateway abstraction.
//!
//! A transport receives platform updates, publishes them on the
//! [`EventBus`] and performs the outbound request/response calls the
//! sessions need (send, edit, acknowledge).

use crate::bus::EventBus;
use crate::error::TransportResult;
use crate::events::{ChatId, InteractionId, MessageId};
use crate::keyboard::{InlineKeyboard, SendOptions};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Transport lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Not started.
    #[default]
    Stopped,
    /// Starting up.
    Starting,
    /// Receiving events.
    Running,
    /// Shutting down.
    Stopping,
    /// Failed to start or lost its connection.
    Error,
}

/// Transport status information.
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    /// Transport name.
    pub name: String,
    /// Current state.
    pub state: TransportState,
    /// Events received from the platform.
    pub events_received: u64,
    /// Messages sent to the platform.
    pub messages_sent: u64,
    /// Last error message, if any.
    pub last_error: Option<String>,
    /// Whether the transport is healthy.
    pub healthy: bool,
}

/// Who the bot is on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotIdentity {
    /// Platform user id of the bot.
    pub id: i64,
    /// Handle used to address the bot (without `@`).
    pub username: String,
}

/// A command advertised to the platform's command menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    /// Command name without the slash.
    pub name: String,
    /// One-line description.
    pub description: String,
}

impl CommandInfo {
    /// Create a command description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Trait for implementing transport gateways.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique name of this transport.
    fn name(&self) -> &str;

    /// Start receiving platform updates and publish them on `bus`.
    ///
    /// Must return once background tasks are spawned.
    async fn start(&self, bus: &EventBus) -> TransportResult<()>;

    /// Stop receiving updates and release resources.
    async fn stop(&self) -> TransportResult<()>;

    /// Send a message and return the id the platform assigned to it.
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<MessageId>;

    /// Replace the text and inline keyboard of a sent message.
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> TransportResult<()>;

    /// Remove the inline keyboard from a sent message.
    async fn remove_keyboard(&self, chat_id: ChatId, message_id: MessageId) -> TransportResult<()>;

    /// Acknowledge a button press, optionally showing `alert` to the user.
    async fn acknowledge_interaction(
        &self,
        interaction_id: &InteractionId,
        alert: Option<&str>,
    ) -> TransportResult<()>;

    /// Who the bot is.
    async fn identity(&self) -> TransportResult<BotIdentity>;

    /// Publish the command menu. Transports without one ignore it.
    async fn set_commands(&self, commands: &[CommandInfo]) -> TransportResult<()> {
        debug!(
            transport = %self.name(),
            count = commands.len(),
            "transport has no command menu"
        );
        Ok(())
    }

    /// Current transport status.
    async fn status(&self) -> TransportStatus;

    /// Whether the transport is currently running.
    async fn is_running(&self) -> bool {
        self.status().await.state == TransportState::Running
    }
}

/// Shared bookkeeping for transport implementations.
pub struct TransportBase {
    name: String,
    state: RwLock<TransportState>,
    stats: RwLock<TransportStats>,
}

impl std::fmt::Debug for TransportBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportBase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct TransportStats {
    events_received: u64,
    messages_sent: u64,
    last_error: Option<String>,
}

impl TransportBase {
    /// Create a new transport base.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(TransportState::default()),
            stats: RwLock::new(TransportStats::default()),
        }
    }

    /// Transport name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    /// Set the state.
    pub async fn set_state(&self, state: TransportState) {
        *self.state.write().await = state;
        debug!(transport = %self.name, ?state, "transport state changed");
    }

    /// Record an event received from the platform.
    pub async fn record_received(&self) {
        self.stats.write().await.events_received += 1;
    }

    /// Record a sent message.
    pub async fn record_sent(&self) {
        self.stats.write().await.messages_sent += 1;
    }

    /// Record an error.
    pub async fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(transport = %self.name, %error, "transport error");
        self.stats.write().await.last_error = Some(error);
    }

    /// Build status from current state and stats.
    pub async fn build_status(&self) -> TransportStatus {
        let state = *self.state.read().await;
        let stats = self.stats.read().await;

        TransportStatus {
            name: self.name.clone(),
            state,
            events_received: stats.events_received,
            messages_sent: stats.messages_sent,
            last_error: stats.last_error.clone(),
            healthy: state == TransportState::Running && stats.last_error.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_base() {
        let base = TransportBase::new("test");
        assert_eq!(base.name(), "test");
        assert_eq!(base.state().await, TransportState::Stopped);

        base.set_state(TransportState::Running).await;
        base.record_received().await;
        base.record_sent().await;

        let status = base.build_status().await;
        assert_eq!(status.events_received, 1);
        assert_eq!(status.messages_sent, 1);
        assert!(status.healthy);

        base.record_error("boom").await;
        let status = base.build_status().await;
        assert!(!status.healthy);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
    }
}
