//! Per-chat sessions.
//!
//! A [`Session`] owns one [`StateStack`], one inline tracker (inside its
//! [`Context`]) and the application context. Sessions are never shared:
//! each one lives inside its own actor task (see [`actor`]) and everything
//! that touches it, user events and broadcasts alike, goes through that
//! actor's queue.

pub mod actor;
mod context;
mod inline;
pub mod registry;

pub use actor::{SessionHandle, spawn_session};
pub use context::{Context, Navigation};
pub use inline::{FnInlineHandler, InlineHandler, InlineTracker, inline_fn};
pub use registry::SessionRegistry;

use crate::admission::AcceptWindow;
use crate::commands::CommandTable;
use crate::engine::EngineSettings;
use crate::events::{ChatId, Command, EventKind, InboundEvent, Interaction, MessageId, UserId};
use crate::keyboard::SendOptions;
use crate::state::{AppContext, StateFactory, StateStack};
use crate::store::StoredSession;
use crate::transport::Transport;
use crate::util::{is_recent, ms_to_system_time, system_time_to_ms, truncate_str};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Collaborators shared by every session of one engine.
pub struct SessionServices<C: AppContext> {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) accept: AcceptWindow,
    pub(crate) root: StateFactory<C>,
    pub(crate) admin: Option<StateFactory<C>>,
    pub(crate) commands: CommandTable<C>,
    pub(crate) settings: EngineSettings,
}

impl<C: AppContext> std::fmt::Debug for SessionServices<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServices")
            .field("transport", &self.transport.name())
            .field("commands", &self.commands)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> SessionServices<C> {
    /// Services with the built-in commands and default settings.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, root: StateFactory<C>) -> Self {
        Self {
            transport,
            accept: AcceptWindow::new(),
            root,
            admin: None,
            commands: CommandTable::with_builtins(false),
            settings: EngineSettings::default(),
        }
    }

    /// Set the administrative state and register its command.
    #[must_use]
    pub fn with_admin(mut self, admin: StateFactory<C>) -> Self {
        self.admin = Some(admin);
        self.commands.enable_admin();
        self
    }

    /// Replace the command table.
    #[must_use]
    pub fn with_commands(mut self, commands: CommandTable<C>) -> Self {
        self.commands = commands;
        if self.admin.is_some() {
            self.commands.enable_admin();
        }
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a specific accept window.
    #[must_use]
    pub fn with_accept_window(mut self, accept: AcceptWindow) -> Self {
        self.accept = accept;
        self
    }

    /// The command table.
    #[must_use]
    pub const fn commands(&self) -> &CommandTable<C> {
        &self.commands
    }

    /// The engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

/// Work applied to every live session by the engine.
pub struct Broadcast<C: AppContext> {
    message: Option<String>,
    reset_to: Option<StateFactory<C>>,
}

impl<C: AppContext> Clone for Broadcast<C> {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            reset_to: self.reset_to.clone(),
        }
    }
}

impl<C: AppContext> std::fmt::Debug for Broadcast<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcast")
            .field("message", &self.message)
            .field("reset", &self.reset_to.is_some())
            .finish()
    }
}

impl<C: AppContext> Default for Broadcast<C> {
    fn default() -> Self {
        Self {
            message: None,
            reset_to: None,
        }
    }
}

impl<C: AppContext> Broadcast<C> {
    /// Broadcast a notification.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            reset_to: None,
        }
    }

    /// Broadcast a stack reset to a fresh state from `factory`.
    #[must_use]
    pub const fn reset(factory: StateFactory<C>) -> Self {
        Self {
            message: None,
            reset_to: Some(factory),
        }
    }

    /// Also reset every stack to a fresh state from `factory`.
    #[must_use]
    pub fn and_reset(mut self, factory: StateFactory<C>) -> Self {
        self.reset_to = Some(factory);
        self
    }

    /// Whether the broadcast would do nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.message.is_none() && self.reset_to.is_none()
    }
}

/// Consistent view of a session, taken inside its actor.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Owning user.
    pub user_id: UserId,
    /// Chat identity.
    pub chat_id: ChatId,
    /// State names, bottom first.
    pub stack: Vec<String>,
    /// Messages with live inline bindings.
    pub inline_bindings: Vec<MessageId>,
    /// Last user activity.
    pub last_activity: Option<SystemTime>,
}

impl SessionInfo {
    /// Name of the top state.
    #[must_use]
    pub fn top(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }
}

/// One chat's conversation: its state stack plus its context.
pub struct Session<C: AppContext> {
    stack: StateStack<C>,
    ctx: Context<C>,
}

impl<C: AppContext> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stack", &self.stack)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<C: AppContext> Session<C> {
    /// Create a session with an empty stack.
    #[must_use]
    pub fn new(user_id: UserId, chat_id: ChatId, app: C, services: Arc<SessionServices<C>>) -> Self {
        let stack = StateStack::new(Arc::clone(&services.root));
        Self {
            stack,
            ctx: Context::new(user_id, chat_id, app, services),
        }
    }

    /// Rebuild a session from a persisted snapshot.
    #[must_use]
    pub fn restore(stored: StoredSession<C>, services: Arc<SessionServices<C>>) -> Self {
        let mut session = Self::new(stored.user_id, stored.chat_id, stored.app, services);
        session
            .ctx
            .set_last_activity(stored.last_activity_ms.map(ms_to_system_time));
        session
    }

    /// The session context.
    #[must_use]
    pub const fn context(&self) -> &Context<C> {
        &self.ctx
    }

    /// The session context, mutably.
    pub const fn context_mut(&mut self) -> &mut Context<C> {
        &mut self.ctx
    }

    /// The state stack.
    #[must_use]
    pub const fn stack(&self) -> &StateStack<C> {
        &self.stack
    }

    /// Make the root state current. With `greet`, the root is also entered.
    pub async fn activate(&mut self, greet: bool) {
        if greet {
            self.stack.current().enter(&mut self.ctx).await;
            self.settle().await;
        } else {
            self.stack.materialize();
        }
    }

    /// Whether the user was active within the engine's reactivation window.
    #[must_use]
    pub fn recently_active(&self) -> bool {
        self.ctx
            .last_activity()
            .is_some_and(|at| is_recent(at, self.ctx.services().settings.reactivate_within))
    }

    /// Route one event through the top state and the fallbacks.
    pub async fn handle(&mut self, event: &InboundEvent) -> bool {
        self.ctx.touch();
        match &event.kind {
            EventKind::Command(command) => self.handle_command(command).await,
            EventKind::Message { text } => {
                debug!(chat_id = %self.ctx.chat_id(), text = %truncate_str(text, 64), "message");
                let handled = self.stack.current().handle_message(&mut self.ctx, text).await;
                self.settle().await;
                handled
            }
            EventKind::Interaction(interaction) => self.handle_interaction(interaction).await,
        }
    }

    async fn handle_command(&mut self, command: &Command) -> bool {
        let handled = self
            .stack
            .current()
            .handle_command(&mut self.ctx, command)
            .await;
        self.settle().await;
        if handled {
            return true;
        }

        let services = Arc::clone(self.ctx.services());
        let handled = services.commands.dispatch(&mut self.ctx, command).await;
        self.settle().await;
        if !handled {
            info!(chat_id = %self.ctx.chat_id(), %command, "unhandled command");
        }
        handled
    }

    async fn handle_interaction(&mut self, interaction: &Interaction) -> bool {
        self.ctx.begin_interaction();
        let mut handled = self
            .stack
            .current()
            .handle_interaction(&mut self.ctx, interaction)
            .await;
        self.settle().await;

        if !handled {
            let handler = interaction
                .message_id
                .and_then(|id| self.ctx.inline().resolve(id));
            if let Some(handler) = handler {
                handled = handler.handle(&mut self.ctx, interaction).await;
                self.settle().await;
            }
        }

        if handled {
            if !self.ctx.interaction_answered() {
                self.ctx.acknowledge(&interaction.id, None).await;
            }
        } else {
            self.expire_interaction(interaction).await;
        }
        true
    }

    async fn expire_interaction(&mut self, interaction: &Interaction) {
        debug!(
            chat_id = %self.ctx.chat_id(),
            message_id = ?interaction.message_id,
            "expired interaction"
        );
        if let Some(message_id) = interaction.message_id {
            self.ctx.inline_unbind(message_id);
            self.ctx.remove_keyboard(message_id).await;
        }
        let note = self.ctx.services().settings.expired_interaction_note.clone();
        self.ctx.acknowledge(&interaction.id, Some(&note)).await;
    }

    /// Apply a navigation request right away, followed by anything it triggers.
    pub async fn navigate(&mut self, navigation: Navigation<C>) {
        self.apply(navigation).await;
        self.settle().await;
    }

    async fn apply(&mut self, navigation: Navigation<C>) {
        let ctx = &mut self.ctx;
        match navigation {
            Navigation::Push(state) => self.stack.push(ctx, state).await,
            Navigation::Pop => self.stack.pop(ctx).await,
            Navigation::Replace(state) => self.stack.replace(ctx, state).await,
            Navigation::Reset(state) => self.stack.reset(ctx, state).await,
            Navigation::Drop(n) if ctx.services().settings.strict_drop => {
                self.stack.drop_states_strict(ctx, n).await;
            }
            Navigation::Drop(n) => self.stack.drop_states(ctx, n).await,
            Navigation::Reload => self.stack.reload(ctx).await,
            Navigation::Root => {
                let root = self.stack.root_state();
                self.stack.reset(ctx, root).await;
            }
        }
    }

    /// Apply queued navigation until the queue is empty or the limit is hit.
    async fn settle(&mut self) {
        let limit = self.ctx.services().settings.navigation_limit;
        let mut applied = 0_usize;
        while let Some(navigation) = self.ctx.take_navigation() {
            if applied >= limit {
                let dropped = self.ctx.discard_navigation() + 1;
                warn!(
                    chat_id = %self.ctx.chat_id(),
                    limit,
                    dropped,
                    "navigation limit reached, dropping requests"
                );
                break;
            }
            self.apply(navigation).await;
            applied += 1;
        }
    }

    /// Apply a broadcast: notify, then optionally reset the stack.
    pub async fn apply_broadcast(&mut self, broadcast: &Broadcast<C>) {
        if let Some(text) = &broadcast.message {
            self.ctx
                .send_with(text, &SendOptions::new().keep_keyboard().notify())
                .await;
        }
        if let Some(factory) = &broadcast.reset_to {
            self.navigate(Navigation::Reset(factory())).await;
        }
    }

    /// Unwind the stack and, for recently active users, send `farewell`.
    pub async fn shutdown(&mut self, farewell: Option<&str>) {
        self.stack.unwind(&mut self.ctx).await;
        let discarded = self.ctx.discard_navigation();
        if discarded > 0 {
            debug!(chat_id = %self.ctx.chat_id(), discarded, "navigation ignored during shutdown");
        }
        if let Some(text) = farewell
            && self.recently_active()
        {
            self.ctx.send_with(text, &SendOptions::new().keep_keyboard()).await;
        }
    }

    /// Persistable snapshot of identity, activity and application context.
    #[must_use]
    pub fn snapshot(&self) -> StoredSession<C> {
        StoredSession {
            user_id: self.ctx.user_id(),
            chat_id: self.ctx.chat_id(),
            last_activity_ms: self.ctx.last_activity().map(system_time_to_ms),
            app: self.ctx.app().clone(),
        }
    }

    /// Inspection view of the session.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            user_id: self.ctx.user_id(),
            chat_id: self.ctx.chat_id(),
            stack: self.stack.names(),
            inline_bindings: self.ctx.inline().message_ids(),
            last_activity: self.ctx.last_activity(),
        }
    }
}
