//! In-process transport that records every outbound call.
//!
//! Useful for tests and for embedding the engine behind another gateway:
//! inbound events are published directly on the bus, outbound calls are
//! kept in memory for inspection.

use crate::bus::EventBus;
use crate::error::{TransportError, TransportResult};
use crate::events::{ChatId, InteractionId, MessageId};
use crate::keyboard::{InlineKeyboard, SendOptions};
use crate::transport::{
    BotIdentity, CommandInfo, Transport, TransportBase, TransportState, TransportStatus,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;

/// A message handed to [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Target chat.
    pub chat_id: ChatId,
    /// Id assigned by the transport.
    pub message_id: MessageId,
    /// Message text.
    pub text: String,
    /// Options it was sent with.
    pub options: SendOptions,
}

/// A call to [`MemoryTransport::edit_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedMessage {
    /// Chat of the edited message.
    pub chat_id: ChatId,
    /// Edited message.
    pub message_id: MessageId,
    /// New text.
    pub text: String,
    /// New inline keyboard.
    pub keyboard: Option<InlineKeyboard>,
}

/// A call to [`MemoryTransport::acknowledge_interaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Acknowledged interaction.
    pub interaction_id: InteractionId,
    /// Alert shown to the user, if any.
    pub alert: Option<String>,
}

#[derive(Debug, Default)]
struct Journal {
    sent: Vec<SentMessage>,
    edits: Vec<EditedMessage>,
    removed_keyboards: Vec<(ChatId, MessageId)>,
    acknowledgements: Vec<Acknowledgement>,
    commands: Vec<CommandInfo>,
}

/// Transport that keeps outbound traffic in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    base: TransportBase,
    identity: BotIdentity,
    next_message_id: AtomicI64,
    fail_sends: AtomicBool,
    journal: RwLock<Journal>,
}

impl MemoryTransport {
    /// Create a transport named `memory`.
    #[must_use]
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a transport with a custom name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            base: TransportBase::new(name),
            identity: BotIdentity {
                id: 1,
                username: "parley_bot".to_string(),
            },
            next_message_id: AtomicI64::new(1),
            fail_sends: AtomicBool::new(false),
            journal: RwLock::new(Journal::default()),
        }
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// All messages sent so far.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.journal.read().await.sent.clone()
    }

    /// Texts of the messages sent to one chat, in order.
    pub async fn texts_for(&self, chat_id: ChatId) -> Vec<String> {
        self.journal
            .read()
            .await
            .sent
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text.clone())
            .collect()
    }

    /// The most recent message sent to a chat.
    pub async fn last_sent(&self, chat_id: ChatId) -> Option<SentMessage> {
        self.journal
            .read()
            .await
            .sent
            .iter()
            .rev()
            .find(|m| m.chat_id == chat_id)
            .cloned()
    }

    /// All message edits so far.
    pub async fn edits(&self) -> Vec<EditedMessage> {
        self.journal.read().await.edits.clone()
    }

    /// Messages whose inline keyboard was removed.
    pub async fn removed_keyboards(&self) -> Vec<(ChatId, MessageId)> {
        self.journal.read().await.removed_keyboards.clone()
    }

    /// Interaction acknowledgements so far.
    pub async fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.journal.read().await.acknowledgements.clone()
    }

    /// The last published command menu.
    pub async fn commands(&self) -> Vec<CommandInfo> {
        self.journal.read().await.commands.clone()
    }

    /// Forget everything recorded so far.
    pub async fn clear(&self) {
        *self.journal.write().await = Journal::default();
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, _bus: &EventBus) -> TransportResult<()> {
        self.base.set_state(TransportState::Running).await;
        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        self.base.set_state(TransportState::Stopped).await;
        Ok(())
    }

    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            self.base.record_error("send refused").await;
            return Err(TransportError::send("send refused"));
        }

        let message_id = MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst));
        self.journal.write().await.sent.push(SentMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            options: options.clone(),
        });
        self.base.record_sent().await;
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> TransportResult<()> {
        self.journal.write().await.edits.push(EditedMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn remove_keyboard(&self, chat_id: ChatId, message_id: MessageId) -> TransportResult<()> {
        self.journal
            .write()
            .await
            .removed_keyboards
            .push((chat_id, message_id));
        Ok(())
    }

    async fn acknowledge_interaction(
        &self,
        interaction_id: &InteractionId,
        alert: Option<&str>,
    ) -> TransportResult<()> {
        self.journal
            .write()
            .await
            .acknowledgements
            .push(Acknowledgement {
                interaction_id: interaction_id.clone(),
                alert: alert.map(String::from),
            });
        Ok(())
    }

    async fn identity(&self) -> TransportResult<BotIdentity> {
        Ok(self.identity.clone())
    }

    async fn set_commands(&self, commands: &[CommandInfo]) -> TransportResult<()> {
        self.journal.write().await.commands = commands.to_vec();
        Ok(())
    }

    async fn status(&self) -> TransportStatus {
        self.base.build_status().await
    }
}
