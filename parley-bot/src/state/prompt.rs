//! Yes/cancel confirmation screen.

use super::{AppContext, ButtonHandler, ButtonMenu, State};
use crate::session::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// Asks a yes/cancel question, then drops itself and the states below it.
///
/// Either answer removes `drop_states` levels (the prompt included) and
/// returns to the state under them. The confirm handler runs first on
/// "yes"; "cancel" sends a short notice instead.
///
/// ```rust,ignore
/// // confirm, then leave both the prompt and the editor that pushed it
/// ctx.push_state(Prompt::new(button_fn(|ctx: &mut Context<App>| ctx.app_mut().saved = true))
///     .message("Discard your changes?")
///     .drop_states(2));
/// ```
pub struct Prompt<C: AppContext> {
    message: String,
    yes: String,
    cancel: String,
    cancelled_note: String,
    drop_states: usize,
    on_confirm: Arc<dyn ButtonHandler<C>>,
    menu: ButtonMenu<C>,
}

impl<C: AppContext> std::fmt::Debug for Prompt<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("message", &self.message)
            .field("drop_states", &self.drop_states)
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> Prompt<C> {
    /// A prompt that runs `on_confirm` when the user says yes.
    pub fn new(on_confirm: impl ButtonHandler<C> + 'static) -> Self {
        Self {
            message: "Are you sure?".to_string(),
            yes: "Yes".to_string(),
            cancel: "Cancel".to_string(),
            cancelled_note: "Aborted.".to_string(),
            drop_states: 1,
            on_confirm: Arc::new(on_confirm),
            menu: ButtonMenu::new(),
        }
    }

    /// Set the question.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the button labels.
    #[must_use]
    pub fn labels(mut self, yes: impl Into<String>, cancel: impl Into<String>) -> Self {
        self.yes = yes.into();
        self.cancel = cancel.into();
        self
    }

    /// Set the notice sent on cancel.
    #[must_use]
    pub fn cancelled_note(mut self, note: impl Into<String>) -> Self {
        self.cancelled_note = note.into();
        self
    }

    /// How many states to drop once answered, the prompt included.
    #[must_use]
    pub const fn drop_states(mut self, n: usize) -> Self {
        self.drop_states = n;
        self
    }
}

struct Confirm<C: AppContext> {
    on_confirm: Arc<dyn ButtonHandler<C>>,
    drop_states: usize,
}

#[async_trait]
impl<C: AppContext> ButtonHandler<C> for Confirm<C> {
    async fn handle(&self, ctx: &mut Context<C>, label: &str) {
        self.on_confirm.handle(ctx, label).await;
        ctx.drop_states(self.drop_states);
    }
}

struct Cancel {
    note: String,
    drop_states: usize,
}

#[async_trait]
impl<C: AppContext> ButtonHandler<C> for Cancel {
    async fn handle(&self, ctx: &mut Context<C>, _label: &str) {
        ctx.send(&self.note).await;
        ctx.drop_states(self.drop_states);
    }
}

#[async_trait]
impl<C: AppContext> State<C> for Prompt<C> {
    fn name(&self) -> &str {
        "Prompt"
    }

    async fn enter(&mut self, ctx: &mut Context<C>) {
        self.menu.reset();
        self.menu.add(
            self.yes.clone(),
            Confirm {
                on_confirm: Arc::clone(&self.on_confirm),
                drop_states: self.drop_states,
            },
        );
        self.menu.add(
            self.cancel.clone(),
            Cancel {
                note: self.cancelled_note.clone(),
                drop_states: self.drop_states,
            },
        );
        ctx.send_keyboard(&self.message, self.menu.keyboard()).await;
    }

    async fn handle_message(&mut self, ctx: &mut Context<C>, text: &str) -> bool {
        self.menu.handle(ctx, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChatId, InboundEvent, Sender, UserId};
    use crate::keyboard::{Keyboard, Markup};
    use crate::session::{Navigation, Session};
    use crate::state::button_fn;
    use crate::testing::{Journal, Recorder, test_services};

    fn text(body: &str) -> InboundEvent {
        InboundEvent::message("test", Sender::new(1, "u"), ChatId(10), body)
    }

    async fn prompt_over_editor(
        prompt: Prompt<()>,
    ) -> (Session<()>, Journal, Arc<crate::transports::MemoryTransport>) {
        let journal = Journal::default();
        let (services, transport) = test_services(&journal);
        let mut session = Session::new(UserId(1), ChatId(10), (), Arc::new(services));
        session.activate(false).await;
        session
            .navigate(Navigation::Push(Box::new(Recorder::new("Editor", &journal))))
            .await;
        session.navigate(Navigation::Push(Box::new(prompt))).await;
        journal.reset();
        transport.clear().await;
        (session, journal, transport)
    }

    #[tokio::test]
    async fn test_prompt_shows_yes_and_cancel() {
        let journal = Journal::default();
        let (services, transport) = test_services(&journal);
        let mut session = Session::new(UserId(1), ChatId(10), (), Arc::new(services));
        session
            .navigate(Navigation::Push(Box::new(
                Prompt::new(button_fn(|_: &mut Context<()>| {})).message("Delete it?"),
            )))
            .await;

        let sent = transport.last_sent(ChatId(10)).await.unwrap();
        assert_eq!(sent.text, "Delete it?");
        assert_eq!(
            sent.options.markup,
            Markup::Reply(Keyboard::new().row(["Yes", "Cancel"]))
        );
    }

    #[tokio::test]
    async fn test_confirm_runs_handler_and_drops_levels() {
        let confirmed = Journal::default();
        let record = confirmed.clone();
        let prompt = Prompt::new(button_fn(move |_: &mut Context<()>| record.push("confirmed")))
            .drop_states(2);
        let (mut session, journal, _) = prompt_over_editor(prompt).await;

        assert!(session.handle(&text("Yes")).await);

        assert_eq!(confirmed.entries(), vec!["confirmed"]);
        assert_eq!(session.info().stack, vec!["R"]);
        // dropped levels are not left; the root is returned to once
        assert_eq!(journal.entries(), vec!["enter:R"]);
    }

    #[tokio::test]
    async fn test_cancel_notifies_and_returns() {
        let confirmed = Journal::default();
        let record = confirmed.clone();
        let prompt = Prompt::new(button_fn(move |_: &mut Context<()>| record.push("confirmed")))
            .cancelled_note("Kept.");
        let (mut session, journal, transport) = prompt_over_editor(prompt).await;

        assert!(session.handle(&text("Cancel")).await);

        assert!(confirmed.entries().is_empty());
        assert_eq!(session.info().stack, vec!["R", "Editor"]);
        assert_eq!(journal.entries(), vec!["enter:Editor"]);
        assert_eq!(transport.texts_for(ChatId(10)).await, vec!["Kept."]);
    }

    #[tokio::test]
    async fn test_other_text_is_not_handled() {
        let prompt = Prompt::new(button_fn(|_: &mut Context<()>| {}));
        let (mut session, _, _) = prompt_over_editor(prompt).await;
        assert!(!session.handle(&text("maybe")).await);
        assert_eq!(session.info().top(), Some("Prompt"));
    }
}
