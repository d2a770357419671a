//! Parley Bot - a conversational session engine for chat bots.
//!
//! Every chat gets its own session: a stack of [`State`](state::State)s, the
//! inline-button bindings of the messages it sent, and an application
//! context. Transports publish platform updates on the event bus, the
//! engine routes each one to the session of its chat, and the top state
//! decides what happens next.
//!
//! # Architecture
//!
//! - **Event Bus** ([`bus`]) - Single ordered stream from transports to the engine
//! - **Transports** ([`transport`], [`transports`]) - Platform integrations (CLI, Telegram, memory)
//! - **States** ([`state`]) - Conversation screens and the per-session stack
//! - **Sessions** ([`session`]) - Per-chat actors, inline bindings and the registry
//! - **Engine** ([`engine`]) - Admission, dispatch, broadcast, persistence, shutdown
//! - **Commands** ([`commands`]) - Slash-commands every state inherits
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use parley_bot::prelude::*;
//!
//! struct Home;
//!
//! #[async_trait::async_trait]
//! impl State<()> for Home {
//!     async fn enter(&mut self, ctx: &mut Context<()>) {
//!         ctx.send("Welcome!").await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Engine::builder()
//!         .transport(Arc::new(CliTransport::new()))
//!         .users(Arc::new(MemoryUserDirectory::new()))
//!         .store(Arc::new(MemorySessionStore::new()))
//!         .root(state_factory(|| Home))
//!         .app_factory(|_, _| ())
//!         .build()?;
//!     engine.open_accept_window(None);
//!     engine.run().await
//! }
//! ```
//!
//! # Features
//!
//! - `telegram` - Enable the Telegram transport via teloxide

pub mod admission;
pub mod bus;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod keyboard;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod transports;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types (centralized)
    pub use crate::error::{
        BotError, BusError, BusResult, ConfigError, ConfigResult, ErrorContext, Result,
        StorageError, StorageResult, TransportError, TransportResult,
    };

    // Admission
    pub use crate::admission::{
        AcceptWindow, FileUserDirectory, KnownUser, MemoryUserDirectory, UserDirectory,
    };

    // Bus
    pub use crate::bus::{EventBus, InboundHandle};

    // Commands
    pub use crate::commands::{BuiltinCommand, CommandHandler, CommandTable, command_fn};

    // Config
    pub use crate::config::{
        BotConfig, ConfigIssue, EngineConfig, IssueLevel, StorageConfig, TelegramConfig,
        config_path, init_config, load_config, load_config_from, save_config,
    };

    // Engine
    pub use crate::engine::{AppFactory, Engine, EngineBuilder, EngineSettings, EngineStatus};

    // Events
    pub use crate::events::{
        ChatId, Command, EventKind, InboundEvent, Interaction, InteractionId, MessageId, Sender,
        UserId,
    };

    // Keyboards
    pub use crate::keyboard::{InlineButton, InlineKeyboard, Keyboard, Markup, SendOptions};

    // Sessions
    pub use crate::session::{
        Broadcast, Context, InlineHandler, Navigation, Session, SessionHandle, SessionInfo,
        SessionRegistry, SessionServices, inline_fn,
    };

    // States
    pub use crate::state::{
        AppContext, ButtonHandler, ButtonMenu, Prompt, State, StateFactory, StateStack, button_fn,
        state_factory,
    };

    // Storage
    pub use crate::store::{FileSessionStore, MemorySessionStore, SessionStore, StoredSession};

    // Transports
    pub use crate::transport::{
        BotIdentity, CommandInfo, Transport, TransportBase, TransportState, TransportStatus,
    };
    pub use crate::transports::{CliTransport, CliTransportConfig, MemoryTransport};
    #[cfg(feature = "telegram")]
    pub use crate::transports::{TelegramTransport, TelegramTransportConfig};

    pub use std::sync::Arc;
}

/// Shared fixtures for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use crate::session::{Context, SessionServices};
    use crate::state::{AppContext, State};
    use crate::transports::MemoryTransport;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Ordered record of lifecycle calls, shared between recorders.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        pub(crate) fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        pub(crate) fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        pub(crate) fn reset(&self) {
            self.0.lock().unwrap().clear();
        }
    }

    /// Navigation a recorder requests from one of its hooks.
    #[derive(Debug, Clone, Copy, Default)]
    pub(crate) enum RecorderAction {
        #[default]
        None,
        Push(&'static str),
        Reload,
    }

    impl RecorderAction {
        const fn is_set(self) -> bool {
            !matches!(self, Self::None)
        }

        fn apply<C: AppContext>(self, ctx: &mut Context<C>, journal: &Journal) {
            match self {
                Self::None => {}
                Self::Push(name) => ctx.push_state(Recorder::new(name, journal)),
                Self::Reload => ctx.reload_state(),
            }
        }
    }

    /// State that writes every hook into a [`Journal`].
    ///
    /// `return:NAME` is only recorded with [`with_return`](Self::with_return);
    /// otherwise returning re-enters and shows up as `enter:NAME`.
    #[derive(Debug)]
    pub(crate) struct Recorder {
        name: String,
        journal: Journal,
        custom_return: bool,
        on_enter: RecorderAction,
        on_message: RecorderAction,
    }

    impl Recorder {
        pub(crate) fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                custom_return: false,
                on_enter: RecorderAction::None,
                on_message: RecorderAction::None,
            }
        }

        pub(crate) fn boxed<C: AppContext>(name: &str, journal: &Journal) -> Box<dyn State<C>> {
            Box::new(Self::new(name, journal))
        }

        pub(crate) const fn with_return(mut self) -> Self {
            self.custom_return = true;
            self
        }

        pub(crate) const fn on_enter(mut self, action: RecorderAction) -> Self {
            self.on_enter = action;
            self
        }

        pub(crate) const fn on_message(mut self, action: RecorderAction) -> Self {
            self.on_message = action;
            self
        }
    }

    #[async_trait]
    impl<C: AppContext> State<C> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn enter(&mut self, ctx: &mut Context<C>) {
            self.journal.push(format!("enter:{}", self.name));
            self.on_enter.apply(ctx, &self.journal);
        }

        async fn leave(&mut self, _ctx: &mut Context<C>) {
            self.journal.push(format!("leave:{}", self.name));
        }

        async fn return_to(&mut self, ctx: &mut Context<C>) {
            if self.custom_return {
                self.journal.push(format!("return:{}", self.name));
            } else {
                self.enter(ctx).await;
            }
        }

        async fn handle_message(&mut self, ctx: &mut Context<C>, text: &str) -> bool {
            self.journal.push(format!("message:{}:{text}", self.name));
            self.on_message.apply(ctx, &self.journal);
            self.on_message.is_set()
        }
    }

    /// Services over a fresh memory transport, rooted at `Recorder "R"`.
    pub(crate) fn test_services(journal: &Journal) -> (SessionServices<()>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let shared: Arc<dyn crate::transport::Transport> = Arc::<MemoryTransport>::clone(&transport);
        let journal = journal.clone();
        let services = SessionServices::new(
            shared,
            Arc::new(move || -> Box<dyn State<()>> { Recorder::boxed("R", &journal) }),
        );
        (services, transport)
    }

    /// A context for chat 10 whose root journal is discarded.
    pub(crate) fn test_context() -> (Context<()>, Arc<MemoryTransport>) {
        let (services, transport) = test_services(&Journal::default());
        let ctx = Context::new(
            crate::events::UserId(1),
            crate::events::ChatId(10),
            (),
            Arc::new(services),
        );
        (ctx, transport)
    }
}
