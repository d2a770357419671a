//! Telegram transport using teloxide.
//!
//! # Setup
//!
//! 1. Create a bot via [@BotFather](https://t.me/botfather)
//! 2. Put the token in the config file or `TELEGRAM_BOT_TOKEN`
//! 3. Enable the transport with `telegram.enabled = true`
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_bot::transports::{TelegramTransport, TelegramTransportConfig};
//!
//! let telegram = TelegramTransport::new(TelegramTransportConfig::new("YOUR_BOT_TOKEN"));
//! let engine = Engine::builder().transport(Arc::new(telegram))/* ... */.build()?;
//! ```

use crate::bus::EventBus;
use crate::error::{TransportError, TransportResult};
use crate::events::{
    self, ChatId, InboundEvent, Interaction, InteractionId, MessageId, Sender,
};
use crate::keyboard::{InlineKeyboard, Keyboard, Markup, SendOptions};
use crate::transport::{
    BotIdentity, CommandInfo, Transport, TransportBase, TransportState, TransportStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, ChatId as TgChatId, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton,
    KeyboardMarkup, KeyboardRemove, MessageId as TgMessageId, ReplyMarkup, User,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Telegram's message length limit.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram transport configuration.
#[derive(Debug, Clone)]
pub struct TelegramTransportConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// Maximum message length before splitting.
    pub max_message_length: usize,
}

impl TelegramTransportConfig {
    /// Create a new Telegram transport config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Try to create config from `TELEGRAM_BOT_TOKEN`.
    #[must_use]
    pub fn try_from_env() -> Option<Self> {
        std::env::var(crate::config::TOKEN_ENV).ok().map(Self::new)
    }
}

/// Telegram stops accepting answers to a callback query after a few seconds.
const PENDING_TTL: Duration = Duration::from_secs(30);

/// Unanswered items keyed by interaction id. Entries older than the ttl are
/// evicted on every insert, so interactions the engine drops never pile up.
#[derive(Debug)]
struct Pending<T> {
    ttl: Duration,
    items: HashMap<InteractionId, (Instant, T)>,
}

impl<T> Pending<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: HashMap::new(),
        }
    }

    fn insert(&mut self, id: InteractionId, item: T) {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.items.len();
        self.items.retain(|_, (at, _)| now.duration_since(*at) < ttl);
        let evicted = before - self.items.len();
        if evicted > 0 {
            debug!(evicted, "dropped stale callback queries");
        }
        self.items.insert(id, (now, item));
    }

    fn remove(&mut self, id: &InteractionId) -> Option<T> {
        self.items.remove(id).map(|(_, item)| item)
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.len()
    }
}

type PendingQueries = Arc<RwLock<Pending<CallbackQuery>>>;

/// Telegram transport.
pub struct TelegramTransport {
    base: Arc<TransportBase>,
    config: TelegramTransportConfig,
    bot: RwLock<Option<Bot>>,
    /// Callback queries waiting for an answer, keyed by the id handed to the engine.
    pending: PendingQueries,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("base", &self.base)
            .field("max_message_length", &self.config.max_message_length)
            .finish_non_exhaustive()
    }
}

impl TelegramTransport {
    /// Create a new Telegram transport with the given configuration.
    #[must_use]
    pub fn new(config: TelegramTransportConfig) -> Self {
        Self {
            base: Arc::new(TransportBase::new("telegram")),
            config,
            bot: RwLock::new(None),
            pending: Arc::new(RwLock::new(Pending::new(PENDING_TTL))),
            dispatcher: Mutex::new(None),
        }
    }

    async fn bot(&self) -> TransportResult<Bot> {
        self.bot
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    /// Split a long message into chunks of at most `max_len` bytes.
    fn split_message(text: &str, max_len: usize) -> Vec<String> {
        if text.len() <= max_len {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if current.len() + line.len() + 1 > max_len {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                if line.len() > max_len {
                    let mut piece = String::new();
                    for c in line.chars() {
                        if piece.len() + c.len_utf8() > max_len {
                            chunks.push(std::mem::take(&mut piece));
                        }
                        piece.push(c);
                    }
                    if !piece.is_empty() {
                        chunks.push(piece);
                    }
                    continue;
                }
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    fn reply_markup(markup: &Markup) -> Option<ReplyMarkup> {
        match markup {
            Markup::RemoveKeyboard => Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
            Markup::KeepKeyboard => None,
            Markup::Reply(keyboard) => Some(ReplyMarkup::Keyboard(Self::keyboard(keyboard))),
            Markup::Inline(keyboard) => {
                Some(ReplyMarkup::InlineKeyboard(Self::inline_keyboard(keyboard)))
            }
        }
    }

    fn keyboard(keyboard: &Keyboard) -> KeyboardMarkup {
        let rows: Vec<Vec<KeyboardButton>> = keyboard
            .rows
            .iter()
            .map(|row| row.iter().map(KeyboardButton::new).collect())
            .collect();
        KeyboardMarkup::new(rows).resize_keyboard()
    }

    fn inline_keyboard(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.data.clone()))
                    .collect()
            })
            .collect();
        InlineKeyboardMarkup::new(rows)
    }

    fn message_id(message_id: MessageId) -> TransportResult<TgMessageId> {
        i32::try_from(message_id.0)
            .map(TgMessageId)
            .map_err(|_| TransportError::edit(format!("message id {message_id} out of range")))
    }
}

fn request_error(error: teloxide::RequestError, wrap: fn(String) -> TransportError) -> TransportError {
    match error {
        teloxide::RequestError::RetryAfter(after) => {
            TransportError::RateLimited(u64::from(after.seconds()))
        }
        other => wrap(other.to_string()),
    }
}

fn sender_of(user: &User) -> Option<Sender> {
    let id = i64::try_from(user.id.0).ok()?;
    let name = events::display_name(
        user.username.as_deref(),
        Some(user.first_name.as_str()),
        user.last_name.as_deref(),
    );
    Some(Sender::new(id, name))
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &EventBus) -> TransportResult<()> {
        self.base.set_state(TransportState::Starting).await;

        let bot = Bot::new(&self.config.token);
        *self.bot.write().await = Some(bot.clone());

        let message_bus = bus.inbound_handle();
        let message_base = Arc::clone(&self.base);
        let message_handler = Update::filter_message().endpoint(move |msg: Message| {
            let bus = message_bus.clone();
            let base = Arc::clone(&message_base);

            async move {
                let Some(text) = msg.text() else {
                    debug!(chat_id = msg.chat.id.0, "ignoring non-text message");
                    return Ok::<(), teloxide::RequestError>(());
                };
                let Some(sender) = msg.from.as_ref().and_then(sender_of) else {
                    debug!(chat_id = msg.chat.id.0, "ignoring message without sender");
                    return Ok(());
                };

                base.record_received().await;
                let event = InboundEvent::from_text("telegram", sender, ChatId(msg.chat.id.0), text);
                if let Err(e) = bus.publish(event).await {
                    error!(error = %e, "failed to publish telegram message to bus");
                }
                Ok(())
            }
        });

        let callback_bus = bus.inbound_handle();
        let callback_base = Arc::clone(&self.base);
        let pending = Arc::clone(&self.pending);
        let callback_handler =
            Update::filter_callback_query().endpoint(move |query: CallbackQuery| {
                let bus = callback_bus.clone();
                let base = Arc::clone(&callback_base);
                let pending = Arc::clone(&pending);

                async move {
                    let Some(sender) = sender_of(&query.from) else {
                        return Ok::<(), teloxide::RequestError>(());
                    };
                    let Some(message) = query.message.as_ref() else {
                        debug!("callback query without message");
                        return Ok(());
                    };
                    let chat_id = ChatId(message.chat().id.0);
                    let message_id = MessageId(i64::from(message.id().0));
                    let data = query.data.clone().unwrap_or_default();

                    let id = InteractionId::generate();
                    pending.write().await.insert(id.clone(), query);

                    base.record_received().await;
                    let interaction = Interaction::new(message_id, data).with_id(id);
                    let event = InboundEvent::interaction("telegram", sender, chat_id, interaction);
                    if let Err(e) = bus.publish(event).await {
                        error!(error = %e, "failed to publish telegram callback to bus");
                    }
                    Ok(())
                }
            });

        let handler = dptree::entry()
            .branch(message_handler)
            .branch(callback_handler);

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });
        *self.dispatcher.lock().await = Some(task);

        self.base.set_state(TransportState::Running).await;
        info!("Telegram transport started");

        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        self.base.set_state(TransportState::Stopping).await;

        if let Some(task) = self.dispatcher.lock().await.take() {
            task.abort();
        }
        *self.bot.write().await = None;
        self.pending.write().await.clear();

        self.base.set_state(TransportState::Stopped).await;
        info!("Telegram transport stopped");

        Ok(())
    }

    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<MessageId> {
        let bot = self.bot().await?;
        let chunks = Self::split_message(text, self.config.max_message_length);
        let last = chunks.len().saturating_sub(1);

        let mut sent = None;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut request = bot
                .send_message(TgChatId(chat_id.0), chunk)
                .disable_notification(!options.notify);
            // markup goes on the last chunk so buttons sit under the whole text
            if i == last {
                if let Some(markup) = Self::reply_markup(&options.markup) {
                    request = request.reply_markup(markup);
                }
            }
            let message = request
                .await
                .map_err(|e| request_error(e, TransportError::SendFailed))?;
            sent = Some(message.id);
        }

        self.base.record_sent().await;
        let id = sent.ok_or_else(|| TransportError::send("empty message"))?;
        Ok(MessageId(i64::from(id.0)))
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> TransportResult<()> {
        let bot = self.bot().await?;
        let mut request =
            bot.edit_message_text(TgChatId(chat_id.0), Self::message_id(message_id)?, text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(Self::inline_keyboard(keyboard));
        }
        request
            .await
            .map_err(|e| request_error(e, TransportError::EditFailed))?;
        Ok(())
    }

    async fn remove_keyboard(&self, chat_id: ChatId, message_id: MessageId) -> TransportResult<()> {
        let bot = self.bot().await?;
        bot.edit_message_reply_markup(TgChatId(chat_id.0), Self::message_id(message_id)?)
            .await
            .map_err(|e| request_error(e, TransportError::EditFailed))?;
        Ok(())
    }

    async fn acknowledge_interaction(
        &self,
        interaction_id: &InteractionId,
        alert: Option<&str>,
    ) -> TransportResult<()> {
        let bot = self.bot().await?;
        let query = self
            .pending
            .write()
            .await
            .remove(interaction_id)
            .ok_or_else(|| TransportError::UnknownInteraction(interaction_id.to_string()))?;

        let mut request = bot.answer_callback_query(query.id.clone());
        if let Some(alert) = alert {
            request = request.text(alert).show_alert(true);
        }
        request
            .await
            .map_err(|e| request_error(e, TransportError::SendFailed))?;
        Ok(())
    }

    async fn identity(&self) -> TransportResult<BotIdentity> {
        let bot = self.bot().await?;
        let me = bot
            .get_me()
            .await
            .map_err(|e| TransportError::internal(e.to_string()))?;
        Ok(BotIdentity {
            id: i64::try_from(me.user.id.0).unwrap_or_default(),
            username: me.username().to_string(),
        })
    }

    async fn set_commands(&self, commands: &[CommandInfo]) -> TransportResult<()> {
        let bot = self.bot().await?;
        let commands: Vec<BotCommand> = commands
            .iter()
            .map(|c| BotCommand::new(c.name.clone(), c.description.clone()))
            .collect();
        bot.set_my_commands(commands)
            .await
            .map_err(|e| request_error(e, TransportError::SendFailed))?;
        Ok(())
    }

    async fn status(&self) -> TransportStatus {
        self.base.build_status().await
    }
}
