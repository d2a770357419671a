//! Conversation states and the per-session navigation stack.
//!
//! A [`State`] is one screen of a conversation: it is entered when it
//! becomes the top of the stack, left when something is pushed over it or
//! it is popped, and returned to when the states above it go away.
//!
//! [`ButtonMenu`] routes reply-keyboard presses to per-button handlers and
//! [`Prompt`] is a ready-made yes/cancel screen.

mod buttons;
mod prompt;
mod stack;

pub use buttons::{ButtonHandler, ButtonMenu, FnButtonHandler, button_fn};
pub use prompt::Prompt;
pub use stack::StateStack;

use crate::events::{Command, Interaction};
use crate::session::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// Bound for the application-defined value carried by every session.
pub trait AppContext: Clone + Send + Sync + 'static {}

impl<T> AppContext for T where T: Clone + Send + Sync + 'static {}

/// A unit of conversation behaviour living on a session's stack.
///
/// Only [`enter`](State::enter) is required. `return_to` falls back to
/// `enter`, the handlers report "not handled", and `leave` does nothing.
#[async_trait]
pub trait State<C: AppContext>: Send + Sync {
    /// Name used in logs and session inspection.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// The state became the top of the stack for the first time.
    async fn enter(&mut self, ctx: &mut Context<C>);

    /// The state stops being the top (pushed over or popped).
    async fn leave(&mut self, _ctx: &mut Context<C>) {}

    /// The state is the top again after the states above it were removed.
    async fn return_to(&mut self, ctx: &mut Context<C>) {
        self.enter(ctx).await;
    }

    /// Handle a plain text message. Returns whether it was handled.
    async fn handle_message(&mut self, _ctx: &mut Context<C>, _text: &str) -> bool {
        false
    }

    /// Handle a slash-command. Unhandled commands go to the command table.
    async fn handle_command(&mut self, _ctx: &mut Context<C>, _command: &Command) -> bool {
        false
    }

    /// Handle a button press. Unhandled presses go to the inline bindings.
    async fn handle_interaction(
        &mut self,
        _ctx: &mut Context<C>,
        _interaction: &Interaction,
    ) -> bool {
        false
    }
}

/// Builds fresh states on demand (root, admin, broadcast resets).
pub type StateFactory<C> = Arc<dyn Fn() -> Box<dyn State<C>> + Send + Sync>;

/// Wrap a constructor closure into a [`StateFactory`].
pub fn state_factory<C, S, F>(make: F) -> StateFactory<C>
where
    C: AppContext,
    S: State<C> + 'static,
    F: Fn() -> S + Send + Sync + 'static,
{
    Arc::new(move || -> Box<dyn State<C>> { Box::new(make()) })
}
