//! Session-scoped operations available to states and handlers.

use super::SessionServices;
use super::inline::{InlineHandler, InlineTracker, inline_fn};
use crate::engine::EngineSettings;
use crate::events::{ChatId, Interaction, InteractionId, MessageId, UserId};
use crate::keyboard::{InlineKeyboard, Keyboard, SendOptions};
use crate::state::{AppContext, State};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A stack operation requested from inside a hook or handler.
///
/// Requests are applied by the session in order, after the current hook
/// returns.
pub enum Navigation<C: AppContext> {
    /// Leave the top and push a new state.
    Push(Box<dyn State<C>>),
    /// Leave and remove the top, return to the one below.
    Pop,
    /// Overwrite the top without leaving it.
    Replace(Box<dyn State<C>>),
    /// Discard the history and push a new state.
    Reset(Box<dyn State<C>>),
    /// Remove several states at once.
    Drop(usize),
    /// Enter the current top again.
    Reload,
    /// Reset to a fresh root state.
    Root,
}

impl<C: AppContext> fmt::Debug for Navigation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(s) => write!(f, "Push({})", s.name()),
            Self::Pop => f.write_str("Pop"),
            Self::Replace(s) => write!(f, "Replace({})", s.name()),
            Self::Reset(s) => write!(f, "Reset({})", s.name()),
            Self::Drop(n) => write!(f, "Drop({n})"),
            Self::Reload => f.write_str("Reload"),
            Self::Root => f.write_str("Root"),
        }
    }
}

/// Everything a state can reach while it runs.
///
/// Outbound calls never fail the caller: transport errors are logged and
/// surface as `None`/`false`, so one chat's trouble stays in that chat.
pub struct Context<C: AppContext> {
    user_id: UserId,
    chat_id: ChatId,
    app: C,
    last_activity: Option<SystemTime>,
    inline: InlineTracker<C>,
    navigation: VecDeque<Navigation<C>>,
    answered: bool,
    services: Arc<SessionServices<C>>,
}

impl<C: AppContext> fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("user_id", &self.user_id)
            .field("chat_id", &self.chat_id)
            .field("inline", &self.inline)
            .field("navigation", &self.navigation)
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> Context<C> {
    /// Create a context for one session.
    #[must_use]
    pub fn new(
        user_id: UserId,
        chat_id: ChatId,
        app: C,
        services: Arc<SessionServices<C>>,
    ) -> Self {
        Self {
            user_id,
            chat_id,
            app,
            last_activity: None,
            inline: InlineTracker::new(),
            navigation: VecDeque::new(),
            answered: false,
            services,
        }
    }

    /// The user this session belongs to.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The chat this session belongs to.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Application context.
    #[must_use]
    pub const fn app(&self) -> &C {
        &self.app
    }

    /// Mutable application context.
    pub const fn app_mut(&mut self) -> &mut C {
        &mut self.app
    }

    /// When the user last sent something, if ever.
    #[must_use]
    pub const fn last_activity(&self) -> Option<SystemTime> {
        self.last_activity
    }

    pub(crate) const fn set_last_activity(&mut self, at: Option<SystemTime>) {
        self.last_activity = at;
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Some(SystemTime::now());
    }

    /// The transport this session talks through.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.services.transport
    }

    pub(crate) fn services(&self) -> &Arc<SessionServices<C>> {
        &self.services
    }

    /// Engine settings shared by every session.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.services.settings
    }

    // ------------------------------------------------------------------
    // Outbound messages
    // ------------------------------------------------------------------

    /// Send a silent message that removes any reply keyboard.
    pub async fn send(&self, text: &str) -> Option<MessageId> {
        self.send_with(text, &SendOptions::new()).await
    }

    /// Send a message with a reply keyboard.
    pub async fn send_keyboard(&self, text: &str, keyboard: Keyboard) -> Option<MessageId> {
        self.send_with(text, &SendOptions::new().keyboard(keyboard))
            .await
    }

    /// Send a message with explicit options.
    pub async fn send_with(&self, text: &str, options: &SendOptions) -> Option<MessageId> {
        match self.services.transport.send(self.chat_id, text, options).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(chat_id = %self.chat_id, error = %e, "failed to send message");
                None
            }
        }
    }

    /// Send a message with buttons and bind `handler` to it.
    ///
    /// The binding lives until the current state is left.
    pub async fn send_inline(
        &mut self,
        text: &str,
        keyboard: InlineKeyboard,
        handler: impl InlineHandler<C> + 'static,
    ) -> Option<MessageId> {
        let id = self
            .send_with(text, &SendOptions::new().keep_keyboard().inline(keyboard))
            .await?;
        self.bind_inline(id, handler);
        Some(id)
    }

    /// Replace the text and buttons of a message this session sent.
    pub async fn update_message(
        &self,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> bool {
        match self
            .services
            .transport
            .edit_message(self.chat_id, message_id, text, keyboard)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_id = %self.chat_id, %message_id, error = %e, "failed to edit message");
                false
            }
        }
    }

    /// Remove the buttons from a message.
    pub async fn remove_keyboard(&self, message_id: MessageId) {
        if let Err(e) = self
            .services
            .transport
            .remove_keyboard(self.chat_id, message_id)
            .await
        {
            debug!(chat_id = %self.chat_id, %message_id, error = %e, "failed to remove keyboard");
        }
    }

    /// Acknowledge a button press, optionally with an alert.
    pub async fn answer_interaction(&mut self, interaction: &Interaction, alert: Option<&str>) {
        self.acknowledge(&interaction.id, alert).await;
    }

    pub(crate) async fn acknowledge(&mut self, id: &InteractionId, alert: Option<&str>) {
        self.answered = true;
        if let Err(e) = self
            .services
            .transport
            .acknowledge_interaction(id, alert)
            .await
        {
            debug!(chat_id = %self.chat_id, interaction = %id, error = %e, "failed to acknowledge interaction");
        }
    }

    pub(crate) const fn begin_interaction(&mut self) {
        self.answered = false;
    }

    pub(crate) const fn interaction_answered(&self) -> bool {
        self.answered
    }

    /// Tell the user something went wrong.
    pub async fn send_error(&self, error: &(dyn fmt::Display + Sync)) {
        warn!(chat_id = %self.chat_id, %error, "reporting error to user");
        self.send(&format!("Error: {error}")).await;
    }

    /// Log `reason`, tell the user `message` and leave the current state.
    pub async fn fail(&mut self, message: &str, reason: &str) {
        warn!(chat_id = %self.chat_id, reason, "state failed");
        self.send(message).await;
        self.pop_state();
    }

    /// The bot's handle on the platform.
    pub async fn bot_name(&self) -> Option<String> {
        match self.services.transport.identity().await {
            Ok(identity) => Some(identity.username),
            Err(e) => {
                warn!(error = %e, "failed to fetch bot identity");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Inline bindings
    // ------------------------------------------------------------------

    /// Bind a handler to a message this session sent.
    pub fn bind_inline(&mut self, message_id: MessageId, handler: impl InlineHandler<C> + 'static) {
        self.inline.bind(message_id, Arc::new(handler));
    }

    /// Bind a closure to a message this session sent.
    pub fn bind_inline_fn<F>(&mut self, message_id: MessageId, f: F)
    where
        F: Fn(&mut Self, &Interaction) -> bool + Send + Sync + 'static,
    {
        self.bind_inline(message_id, inline_fn(f));
    }

    pub(crate) fn inline_unbind(&mut self, message_id: MessageId) -> bool {
        self.inline.unbind(message_id)
    }

    /// Live inline bindings.
    #[must_use]
    pub const fn inline(&self) -> &InlineTracker<C> {
        &self.inline
    }

    /// Drop all inline bindings and strip the buttons from their messages.
    pub async fn clear_inline(&mut self) {
        for message_id in self.inline.clear() {
            self.remove_keyboard(message_id).await;
        }
    }

    // ------------------------------------------------------------------
    // Navigation requests
    // ------------------------------------------------------------------

    /// Request a push.
    pub fn push_state(&mut self, state: impl State<C> + 'static) {
        self.navigate(Navigation::Push(Box::new(state)));
    }

    /// Request a pop.
    pub fn pop_state(&mut self) {
        self.navigate(Navigation::Pop);
    }

    /// Request a replace of the top.
    pub fn replace_state(&mut self, state: impl State<C> + 'static) {
        self.navigate(Navigation::Replace(Box::new(state)));
    }

    /// Request a reset to `state`.
    pub fn reset_state(&mut self, state: impl State<C> + 'static) {
        self.navigate(Navigation::Reset(Box::new(state)));
    }

    /// Request removal of `n` states.
    pub fn drop_states(&mut self, n: usize) {
        self.navigate(Navigation::Drop(n));
    }

    /// Request the current top to be entered again.
    pub fn reload_state(&mut self) {
        self.navigate(Navigation::Reload);
    }

    /// Request a reset to a fresh root state.
    pub fn reset_to_root(&mut self) {
        self.navigate(Navigation::Root);
    }

    /// Queue an arbitrary navigation request.
    pub fn navigate(&mut self, navigation: Navigation<C>) {
        self.navigation.push_back(navigation);
    }

    /// Whether navigation is waiting to be applied.
    #[must_use]
    pub fn has_pending_navigation(&self) -> bool {
        !self.navigation.is_empty()
    }

    pub(crate) fn take_navigation(&mut self) -> Option<Navigation<C>> {
        self.navigation.pop_front()
    }

    pub(crate) fn discard_navigation(&mut self) -> usize {
        let n = self.navigation.len();
        self.navigation.clear();
        n
    }

    /// A fresh root state.
    #[must_use]
    pub fn root_state(&self) -> Box<dyn State<C>> {
        (self.services.root)()
    }

    /// A fresh administrative state, if one is configured.
    #[must_use]
    pub fn admin_state(&self) -> Option<Box<dyn State<C>>> {
        self.services.admin.as_ref().map(|make| make())
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Let unknown users register for `duration`.
    pub fn accept_users(&self, duration: Duration) {
        self.services.accept.open(duration);
    }

    /// Let unknown users register for the configured default window.
    pub fn accept_users_default(&self) {
        self.accept_users(self.services.settings.accept_window);
    }
}
