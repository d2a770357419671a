//! Command-line transport.
//!
//! Reads lines from stdin and prints outbound messages to stdout, acting as
//! a single fixed user in a single chat. Lines starting with `/` are
//! commands, `#<message id> <data>` presses a button of an earlier message,
//! anything else is plain text.

use crate::bus::EventBus;
use crate::error::{TransportError, TransportResult};
use crate::events::{ChatId, Command, InboundEvent, Interaction, InteractionId, MessageId, Sender};
use crate::keyboard::{InlineKeyboard, Markup, SendOptions};
use crate::transport::{
    BotIdentity, CommandInfo, Transport, TransportBase, TransportState, TransportStatus,
};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// CLI transport configuration.
#[derive(Debug, Clone)]
pub struct CliTransportConfig {
    /// Prompt printed before user input.
    pub prompt: String,
    /// Identity of the terminal user.
    pub user_id: i64,
    /// Chat the terminal user talks in.
    pub chat_id: i64,
    /// Display name of the terminal user.
    pub display_name: String,
}

impl Default for CliTransportConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            user_id: 1,
            chat_id: 1,
            display_name: "cli".to_string(),
        }
    }
}

impl CliTransportConfig {
    /// Create a new CLI transport config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prompt string.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the user and chat ids.
    #[must_use]
    pub const fn identity(mut self, user_id: i64, chat_id: i64) -> Self {
        self.user_id = user_id;
        self.chat_id = chat_id;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// Terminal transport.
#[derive(Debug)]
pub struct CliTransport {
    base: TransportBase,
    config: CliTransportConfig,
    next_message_id: AtomicI64,
    closed: watch::Sender<bool>,
}

impl Default for CliTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CliTransport {
    /// Create a CLI transport with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CliTransportConfig::default())
    }

    /// Create a CLI transport with the given configuration.
    #[must_use]
    pub fn with_config(config: CliTransportConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            base: TransportBase::new("cli"),
            config,
            next_message_id: AtomicI64::new(1),
            closed,
        }
    }

    /// Resolves once stdin is exhausted or the user typed `quit`.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Turn one input line into an event. Blank lines yield nothing.
    #[must_use]
    pub fn parse_line(config: &CliTransportConfig, line: &str) -> Option<InboundEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let sender = Sender::new(config.user_id, config.display_name.clone());
        let chat_id = ChatId(config.chat_id);

        if let Some(rest) = line.strip_prefix('#') {
            let (id, data) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if let Ok(id) = id.parse::<i64>() {
                let interaction = Interaction::new(MessageId(id), data.trim());
                return Some(InboundEvent::interaction("cli", sender, chat_id, interaction));
            }
        }
        if let Some(command) = Command::parse(line) {
            return Some(InboundEvent::command("cli", sender, chat_id, command));
        }
        Some(InboundEvent::message("cli", sender, chat_id, line))
    }

    /// Render an outbound message the way it is printed.
    #[must_use]
    pub fn render(message_id: MessageId, text: &str, options: &SendOptions) -> String {
        let mut out = format!("[{message_id}] {text}");
        match &options.markup {
            Markup::Reply(keyboard) => {
                for row in &keyboard.rows {
                    let _ = write!(out, "\n  | {} |", row.join(" | "));
                }
            }
            Markup::Inline(keyboard) => render_inline(&mut out, message_id, keyboard),
            Markup::RemoveKeyboard | Markup::KeepKeyboard => {}
        }
        out
    }

    #[allow(clippy::print_stdout)] // CLI transport intentionally prints to stdout
    fn print(&self, content: &str) {
        println!("\n{content}\n");
        print!("{}", self.config.prompt);
        let _ = io::stdout().flush();
    }
}

fn render_inline(out: &mut String, message_id: MessageId, keyboard: &InlineKeyboard) {
    for row in &keyboard.rows {
        let buttons: Vec<String> = row
            .iter()
            .map(|b| format!("[{}] #{message_id} {}", b.label, b.data))
            .collect();
        let _ = write!(out, "\n  {}", buttons.join("   "));
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &EventBus) -> TransportResult<()> {
        self.base.set_state(TransportState::Starting).await;

        let handle = bus.inbound_handle();
        let config = self.config.clone();
        let closed = self.closed.clone();

        // stdin reads cannot be cancelled, so the reader lives on a plain
        // thread that dies with the process
        std::thread::Builder::new()
            .name("parley-cli-reader".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "failed to read stdin");
                            break;
                        }
                    };
                    if matches!(line.trim(), "quit" | "exit") {
                        break;
                    }
                    let Some(event) = Self::parse_line(&config, &line) else {
                        continue;
                    };
                    if let Err(e) = handle.blocking_publish(event) {
                        warn!(error = %e, "failed to publish cli input");
                        break;
                    }
                }
                debug!("cli reader finished");
                closed.send_replace(true);
            })
            .map_err(|e| TransportError::start(e.to_string()))?;

        self.base.set_state(TransportState::Running).await;
        info!("CLI transport started");
        self.print("Type /help for commands, #<id> <data> to press a button, quit to leave.");
        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        self.base.set_state(TransportState::Stopped).await;
        info!("CLI transport stopped");
        Ok(())
    }

    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<MessageId> {
        let message_id = MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst));
        debug!(%chat_id, %message_id, "cli send");
        self.print(&Self::render(message_id, text, options));
        self.base.record_sent().await;
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> TransportResult<()> {
        let mut out = format!("[{message_id}, edited] {text}");
        if let Some(keyboard) = keyboard {
            render_inline(&mut out, message_id, keyboard);
        }
        self.print(&out);
        Ok(())
    }

    async fn remove_keyboard(&self, _chat_id: ChatId, message_id: MessageId) -> TransportResult<()> {
        debug!(%message_id, "cli buttons removed");
        Ok(())
    }

    async fn acknowledge_interaction(
        &self,
        _interaction_id: &InteractionId,
        alert: Option<&str>,
    ) -> TransportResult<()> {
        if let Some(alert) = alert {
            self.print(&format!("(!) {alert}"));
        }
        Ok(())
    }

    async fn identity(&self) -> TransportResult<BotIdentity> {
        Ok(BotIdentity {
            id: 0,
            username: "parley".to_string(),
        })
    }

    async fn set_commands(&self, commands: &[CommandInfo]) -> TransportResult<()> {
        let mut out = String::from("Commands:");
        for command in commands {
            let _ = write!(out, "\n  /{} - {}", command.name, command.description);
        }
        self.print(&out);
        Ok(())
    }

    async fn status(&self) -> TransportStatus {
        self.base.build_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::keyboard::Keyboard;

    #[test]
    fn test_parse_line_kinds() {
        let config = CliTransportConfig::new().identity(4, 9);

        assert!(CliTransport::parse_line(&config, "   ").is_none());

        let text = CliTransport::parse_line(&config, "hello there").unwrap();
        assert_eq!(text.chat_id, Some(ChatId(9)));
        assert!(matches!(text.kind, EventKind::Message { ref text } if text == "hello there"));

        let command = CliTransport::parse_line(&config, "/back now").unwrap();
        assert!(matches!(command.kind, EventKind::Command(ref c) if c.name == "back"));

        let press = CliTransport::parse_line(&config, "#12 inc").unwrap();
        match press.kind {
            EventKind::Interaction(i) => {
                assert_eq!(i.message_id, Some(MessageId(12)));
                assert_eq!(i.data, "inc");
            }
            other => panic!("unexpected {other:?}"),
        }

        // not a number, so it stays text
        let hashtag = CliTransport::parse_line(&config, "#rust rocks").unwrap();
        assert!(matches!(hashtag.kind, EventKind::Message { .. }));
    }

    #[test]
    fn test_render_keyboards() {
        let reply = SendOptions::new().keyboard(Keyboard::new().row(["Yes", "No"]));
        assert_eq!(
            CliTransport::render(MessageId(3), "Sure?", &reply),
            "[3] Sure?\n  | Yes | No |"
        );

        let inline = SendOptions::new().inline(InlineKeyboard::new().button("+", "inc"));
        assert_eq!(
            CliTransport::render(MessageId(4), "Count: 0", &inline),
            "[4] Count: 0\n  [+] #4 inc"
        );
    }

    #[tokio::test]
    async fn test_sends_assign_increasing_ids() {
        let transport = CliTransport::new();
        let a = transport.send(ChatId(1), "a", &SendOptions::new()).await.unwrap();
        let b = transport.send(ChatId(1), "b", &SendOptions::new()).await.unwrap();
        assert!(b > a);
        assert_eq!(transport.status().await.messages_sent, 2);
    }
}
