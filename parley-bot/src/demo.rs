//! The conversation served by the `parley` binary.
//!
//! A home menu, a counter driven by inline buttons, an invitation switch
//! and a user administration screen reachable with `/users`.

use async_trait::async_trait;
use parley_bot::admission::UserDirectory;
use parley_bot::events::{Interaction, UserId};
use parley_bot::keyboard::{InlineButton, InlineKeyboard, Keyboard};
use parley_bot::session::{Context, InlineHandler};
use parley_bot::state::{ButtonHandler, ButtonMenu, Prompt, State, StateFactory, button_fn};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

const COUNTER: &str = "Counter";
const INVITE: &str = "Invite";
const DONE: &str = "Done";

/// Per-chat application data, persisted with the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoApp {
    /// Value of the counter screen.
    pub counter: i64,
}

/// Root state factory.
pub fn root() -> StateFactory<DemoApp> {
    Arc::new(|| -> Box<dyn State<DemoApp>> { Box::new(Home::new()) })
}

/// Administrative state factory over `directory`.
pub fn admin(directory: Arc<dyn UserDirectory>) -> StateFactory<DemoApp> {
    Arc::new(move || -> Box<dyn State<DemoApp>> {
        Box::new(Users {
            directory: Arc::clone(&directory),
            menu: ButtonMenu::new().button(INVITE, Invite),
        })
    })
}

/// Opens the accept window.
struct Invite;

#[async_trait]
impl ButtonHandler<DemoApp> for Invite {
    async fn handle(&self, ctx: &mut Context<DemoApp>, _label: &str) {
        ctx.accept_users_default();
        let minutes = ctx.settings().accept_window.as_secs() / 60;
        ctx.send(&format!(
            "New users can join during the next {minutes} minutes."
        ))
        .await;
    }
}

struct Home {
    menu: ButtonMenu<DemoApp>,
}

impl Home {
    fn new() -> Self {
        Self {
            menu: ButtonMenu::new()
                .button(COUNTER, button_fn(|ctx: &mut Context<DemoApp>| ctx.push_state(Counter)))
                .button(INVITE, Invite),
        }
    }
}

#[async_trait]
impl State<DemoApp> for Home {
    fn name(&self) -> &str {
        "Home"
    }

    async fn enter(&mut self, ctx: &mut Context<DemoApp>) {
        ctx.send_keyboard("What would you like to do?", self.menu.keyboard())
            .await;
    }

    async fn handle_message(&mut self, ctx: &mut Context<DemoApp>, text: &str) -> bool {
        if !self.menu.handle(ctx, text).await {
            ctx.send("Pick one of the buttons, or /help.").await;
        }
        true
    }
}

fn counter_text(value: i64) -> String {
    format!("Counter: {value}")
}

fn counter_keyboard() -> InlineKeyboard {
    InlineKeyboard::new()
        .row([
            InlineButton::new("-", "dec"),
            InlineButton::new("+", "inc"),
        ])
        .button("Reset", "reset")
}

struct Counter;

#[async_trait]
impl State<DemoApp> for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    async fn enter(&mut self, ctx: &mut Context<DemoApp>) {
        ctx.send_keyboard("Use the buttons below.", Keyboard::new().row([DONE]))
            .await;
        let text = counter_text(ctx.app().counter);
        ctx.send_inline(&text, counter_keyboard(), CounterButtons)
            .await;
    }

    async fn handle_message(&mut self, ctx: &mut Context<DemoApp>, text: &str) -> bool {
        if text.trim() == DONE {
            ctx.pop_state();
            return true;
        }
        false
    }
}

struct CounterButtons;

#[async_trait]
impl InlineHandler<DemoApp> for CounterButtons {
    async fn handle(&self, ctx: &mut Context<DemoApp>, interaction: &Interaction) -> bool {
        let counter = &mut ctx.app_mut().counter;
        match interaction.data.as_str() {
            "inc" => *counter = counter.saturating_add(1),
            "dec" => *counter = counter.saturating_sub(1),
            "reset" => *counter = 0,
            _ => return false,
        }
        let text = counter_text(ctx.app().counter);
        if let Some(message_id) = interaction.message_id {
            ctx.update_message(message_id, &text, Some(&counter_keyboard()))
                .await;
        }
        true
    }
}

/// Forgets one user once the prompt is confirmed.
struct RemoveUser {
    directory: Arc<dyn UserDirectory>,
    user: UserId,
}

#[async_trait]
impl ButtonHandler<DemoApp> for RemoveUser {
    async fn handle(&self, ctx: &mut Context<DemoApp>, _label: &str) {
        match self.directory.remove(self.user).await {
            Ok(()) => {
                ctx.send(&format!("User {} removed.", self.user)).await;
            }
            Err(e) => ctx.send_error(&e).await,
        }
    }
}

struct Users {
    directory: Arc<dyn UserDirectory>,
    menu: ButtonMenu<DemoApp>,
}

impl Users {
    async fn remove(&self, ctx: &mut Context<DemoApp>, arg: &str) {
        let Ok(id) = arg.trim().parse::<i64>() else {
            ctx.send("Usage: remove <user id>").await;
            return;
        };
        if UserId(id) == ctx.user_id() {
            ctx.send("You cannot remove yourself.").await;
            return;
        }
        // the prompt drops itself and the list is entered again
        ctx.push_state(
            Prompt::new(RemoveUser {
                directory: Arc::clone(&self.directory),
                user: UserId(id),
            })
            .message(format!("Remove user {id}?")),
        );
    }
}

#[async_trait]
impl State<DemoApp> for Users {
    fn name(&self) -> &str {
        "Users"
    }

    async fn enter(&mut self, ctx: &mut Context<DemoApp>) {
        let users = match self.directory.list().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "failed to list users");
                ctx.fail("Could not read the user list.", &e.to_string()).await;
                return;
            }
        };

        let mut text = format!("{} known users:", users.len());
        for user in &users {
            let _ = write!(text, "\n  {} {}", user.id, user.name);
        }
        text.push_str("\n\nSend \"remove <id>\" to forget a user.");
        ctx.send_keyboard(&text, self.menu.keyboard()).await;
    }

    async fn handle_message(&mut self, ctx: &mut Context<DemoApp>, text: &str) -> bool {
        if self.menu.handle(ctx, text).await {
            return true;
        }
        match text.trim().strip_prefix("remove ") {
            Some(arg) => {
                self.remove(ctx, arg).await;
                true
            }
            None => false,
        }
    }
}
