//! Fallback slash-commands.
//!
//! A command first goes to the top state's `handle_command`. When the state
//! declines, the session consults the engine's [`CommandTable`], which holds
//! the navigation built-ins plus whatever the application registered.

use crate::events::Command;
use crate::session::Context;
use crate::state::AppContext;
use crate::transport::CommandInfo;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Handles one named command.
#[async_trait]
pub trait CommandHandler<C: AppContext>: Send + Sync {
    /// Handle the command. Returns whether it was handled.
    async fn handle(&self, ctx: &mut Context<C>, command: &Command) -> bool;
}

/// The navigation shortcuts every engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    /// Leave the current state, back to the previous one.
    Back,
    /// Enter the current state again.
    Reload,
    /// Reset to a fresh root state.
    Home,
    /// Reset to the administrative state.
    Users,
    /// Send the help text.
    Help,
}

impl BuiltinCommand {
    /// Command name, without the slash.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Back => "back",
            Self::Reload => "reload",
            Self::Home => "home",
            Self::Users => "users",
            Self::Help => "help",
        }
    }

    /// Description published to the transport.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Back => "Stop the current operation, go to the previous state",
            Self::Reload => "Reload the current state",
            Self::Home => "Go back to the root state",
            Self::Users => "Go to the user management",
            Self::Help => "Show general help",
        }
    }
}

#[async_trait]
impl<C: AppContext> CommandHandler<C> for BuiltinCommand {
    async fn handle(&self, ctx: &mut Context<C>, _command: &Command) -> bool {
        match self {
            Self::Back => ctx.pop_state(),
            Self::Reload => ctx.reload_state(),
            Self::Home => ctx.reset_to_root(),
            Self::Users => match ctx.admin_state() {
                Some(state) => ctx.navigate(crate::session::Navigation::Reset(state)),
                None => return false,
            },
            Self::Help => {
                let text = ctx.settings().help_text.clone();
                ctx.send(&text).await;
            }
        }
        true
    }
}

/// [`CommandHandler`] backed by a synchronous closure.
pub struct FnCommandHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnCommandHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCommandHandler").finish_non_exhaustive()
    }
}

/// Wrap a closure as a command handler.
pub fn command_fn<C, F>(f: F) -> FnCommandHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>, &Command) -> bool + Send + Sync,
{
    FnCommandHandler { f }
}

#[async_trait]
impl<C, F> CommandHandler<C> for FnCommandHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>, &Command) -> bool + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<C>, command: &Command) -> bool {
        (self.f)(ctx, command)
    }
}

struct Entry<C: AppContext> {
    info: CommandInfo,
    handler: Arc<dyn CommandHandler<C>>,
}

/// Named commands in registration order.
pub struct CommandTable<C: AppContext> {
    entries: Vec<Entry<C>>,
}

impl<C: AppContext> Clone for CommandTable<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| Entry {
                    info: e.info.clone(),
                    handler: Arc::clone(&e.handler),
                })
                .collect(),
        }
    }
}

impl<C: AppContext> std::fmt::Debug for CommandTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|e| e.info.name.as_str()).collect();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl<C: AppContext> Default for CommandTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AppContext> CommandTable<C> {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The built-ins. `users` is only present with an administrative state.
    #[must_use]
    pub fn with_builtins(has_admin: bool) -> Self {
        let mut table = Self::new();
        table.register_builtin(BuiltinCommand::Home);
        if has_admin {
            table.register_builtin(BuiltinCommand::Users);
        }
        table.register_builtin(BuiltinCommand::Back);
        table.register_builtin(BuiltinCommand::Reload);
        table.register_builtin(BuiltinCommand::Help);
        table
    }

    fn register_builtin(&mut self, builtin: BuiltinCommand) {
        self.register(builtin.name(), builtin.description(), builtin);
    }

    /// Add the `users` built-in if it is missing.
    pub fn enable_admin(&mut self) {
        if self.get(BuiltinCommand::Users.name()).is_none() {
            self.register_builtin(BuiltinCommand::Users);
        }
    }

    /// Register `handler` under `name`, replacing an existing entry in place.
    ///
    /// A leading slash in `name` is ignored.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        handler: impl CommandHandler<C> + 'static,
    ) -> &mut Self {
        let name = name.trim_start_matches('/');
        let entry = Entry {
            info: CommandInfo::new(name, description),
            handler: Arc::new(handler),
        };
        match self.entries.iter_mut().find(|e| e.info.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(
        mut self,
        name: &str,
        description: &str,
        handler: impl CommandHandler<C> + 'static,
    ) -> Self {
        self.register(name, description, handler);
        self
    }

    /// The handler registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler<C>>> {
        self.entries
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| Arc::clone(&e.handler))
    }

    /// Run the handler for `command`. Unknown commands are not handled.
    pub async fn dispatch(&self, ctx: &mut Context<C>, command: &Command) -> bool {
        let Some(handler) = self.get(&command.name) else {
            return false;
        };
        debug!(chat_id = %ctx.chat_id(), command = %command.name, "fallback command");
        handler.handle(ctx, command).await
    }

    /// Names and descriptions, in registration order.
    #[must_use]
    pub fn infos(&self) -> Vec<CommandInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    fn names(table: &CommandTable<()>) -> Vec<String> {
        table.infos().into_iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_builtins_order() {
        assert_eq!(
            names(&CommandTable::with_builtins(false)),
            vec!["home", "back", "reload", "help"]
        );
        assert_eq!(
            names(&CommandTable::with_builtins(true)),
            vec!["home", "users", "back", "reload", "help"]
        );

        let mut table = CommandTable::<()>::with_builtins(false);
        table.enable_admin();
        table.enable_admin();
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut table = CommandTable::<()>::with_builtins(false);
        table.register("/help", "Custom help", command_fn(|_: &mut Context<()>, _: &Command| true));
        assert_eq!(names(&table), vec!["home", "back", "reload", "help"]);
        assert_eq!(table.infos()[3].description, "Custom help");
    }

    #[tokio::test]
    async fn test_dispatch_builtins_request_navigation() {
        let (mut ctx, _) = test_context();
        let table = CommandTable::<()>::with_builtins(false);

        assert!(table.dispatch(&mut ctx, &Command::new("back")).await);
        assert!(table.dispatch(&mut ctx, &Command::new("home")).await);
        assert_eq!(
            format!("{:?}", ctx.take_navigation()),
            "Some(Pop)"
        );
        assert_eq!(format!("{:?}", ctx.take_navigation()), "Some(Root)");
        assert!(!ctx.has_pending_navigation());
    }

    #[tokio::test]
    async fn test_users_without_admin_is_not_handled() {
        let (mut ctx, _) = test_context();
        assert!(!BuiltinCommand::Users.handle(&mut ctx, &Command::new("users")).await);
        assert!(!ctx.has_pending_navigation());
    }

    #[tokio::test]
    async fn test_help_sends_text() {
        let (mut ctx, transport) = test_context();
        let table = CommandTable::<()>::with_builtins(false);
        assert!(table.dispatch(&mut ctx, &Command::new("help")).await);
        let sent = transport.last_sent(ctx.chat_id()).await.unwrap();
        assert_eq!(sent.text, ctx.settings().help_text);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (mut ctx, _) = test_context();
        let table = CommandTable::<()>::new().with(
            "ping",
            "Answer pong",
            command_fn(|ctx: &mut Context<()>, _: &Command| {
                ctx.reload_state();
                true
            }),
        );
        assert!(!table.dispatch(&mut ctx, &Command::new("pong")).await);
        assert!(table.dispatch(&mut ctx, &Command::new("ping")).await);
        assert!(ctx.has_pending_navigation());
    }
}
