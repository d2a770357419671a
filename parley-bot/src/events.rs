//! Inbound events and the identities they carry.
//!
//! Transports translate platform updates into [`InboundEvent`]s and publish
//! them on the [`EventBus`](crate::bus::EventBus). The engine never looks at
//! platform wire formats; everything it needs is in these types.

use crate::util::generate_id;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::SystemTime;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Whether this is the zero id, which no platform hands out.
            #[must_use]
            pub const fn is_unset(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Remote user identity.
    UserId
);
numeric_id!(
    /// Remote chat identity. One session exists per chat.
    ChatId
);
numeric_id!(
    /// Identity of an outbound message, as assigned by the transport.
    MessageId
);

/// Opaque identity of a button-press interaction, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(pub String);

impl InteractionId {
    /// Create a fresh random interaction id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id("int"))
    }
}

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Remote user id.
    pub user_id: UserId,
    /// Human-readable name used when the user is registered.
    pub display_name: String,
}

impl Sender {
    /// Create a sender.
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Pick a display name from the parts a platform profile usually has.
///
/// Falls back from username to first name to last name, then to `"Unknown"`.
#[must_use]
pub fn display_name(username: Option<&str>, first_name: Option<&str>, last_name: Option<&str>) -> String {
    [username, first_name, last_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// A slash-command such as `/start` or `/back@parley_bot now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command name without the leading slash or bot suffix, lowercased.
    pub name: String,
    /// Whitespace-separated arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").expect("valid regex")
    })
}

impl Command {
    /// Create a command without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim_start_matches('/').to_lowercase(),
            args: Vec::new(),
        }
    }

    /// Add an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse message text as a command. Returns `None` for plain text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let caps = command_pattern().captures(text.trim())?;
        let name = caps.get(1)?.as_str().to_lowercase();
        let args = caps
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        Some(Self { name, args })
    }

    /// Arguments joined back into one string.
    #[must_use]
    pub fn args_text(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A button press on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Id used to acknowledge the press.
    pub id: InteractionId,
    /// The message carrying the pressed button, when the platform still knows it.
    pub message_id: Option<MessageId>,
    /// Callback payload attached to the button.
    pub data: String,
}

impl Interaction {
    /// Create an interaction for a button on `message_id`.
    pub fn new(message_id: MessageId, data: impl Into<String>) -> Self {
        Self {
            id: InteractionId::generate(),
            message_id: Some(message_id),
            data: data.into(),
        }
    }

    /// Override the interaction id.
    #[must_use]
    pub fn with_id(mut self, id: InteractionId) -> Self {
        self.id = id;
        self
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Plain text message.
    Message {
        /// Message text.
        text: String,
    },
    /// Slash-command.
    Command(Command),
    /// Button press.
    Interaction(Interaction),
}

/// An inbound event from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Unique event ID.
    pub id: String,
    /// Transport name (e.g., "telegram", "cli").
    pub transport: String,
    /// Sender, if the platform identified one.
    pub sender: Option<Sender>,
    /// Chat the event belongs to, if known.
    pub chat_id: Option<ChatId>,
    /// Event payload.
    pub kind: EventKind,
    /// Timestamp when the event was received.
    pub timestamp: SystemTime,
}

impl InboundEvent {
    /// Create an event with all identity fields present.
    pub fn new(transport: impl Into<String>, sender: Sender, chat_id: ChatId, kind: EventKind) -> Self {
        Self {
            id: generate_id("evt"),
            transport: transport.into(),
            sender: Some(sender),
            chat_id: Some(chat_id),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a text event, turning `/command` text into a command event.
    pub fn from_text(
        transport: impl Into<String>,
        sender: Sender,
        chat_id: ChatId,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let kind = Command::parse(&text).map_or(EventKind::Message { text }, EventKind::Command);
        Self::new(transport, sender, chat_id, kind)
    }

    /// Create a plain message event.
    pub fn message(
        transport: impl Into<String>,
        sender: Sender,
        chat_id: ChatId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(transport, sender, chat_id, EventKind::Message { text: text.into() })
    }

    /// Create a command event.
    pub fn command(transport: impl Into<String>, sender: Sender, chat_id: ChatId, command: Command) -> Self {
        Self::new(transport, sender, chat_id, EventKind::Command(command))
    }

    /// Create an interaction event.
    pub fn interaction(
        transport: impl Into<String>,
        sender: Sender,
        chat_id: ChatId,
        interaction: Interaction,
    ) -> Self {
        Self::new(transport, sender, chat_id, EventKind::Interaction(interaction))
    }

    /// Drop the sender, producing an event the engine cannot attribute.
    #[must_use]
    pub fn without_sender(mut self) -> Self {
        self.sender = None;
        self
    }

    /// Short label of the event kind, for logs.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self.kind {
            EventKind::Message { .. } => "message",
            EventKind::Command(_) => "command",
            EventKind::Interaction(_) => "interaction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        let cmd = Command::parse("/Back").unwrap();
        assert_eq!(cmd.name, "back");
        assert!(cmd.args.is_empty());

        let cmd = Command::parse("/greet@parley_bot  Alice   Bob ").unwrap();
        assert_eq!(cmd.name, "greet");
        assert_eq!(cmd.args, vec!["Alice", "Bob"]);
        assert_eq!(cmd.to_string(), "/greet Alice Bob");

        assert!(Command::parse("hello /back").is_none());
        assert!(Command::parse("/").is_none());
    }

    #[test]
    fn test_command_new_normalizes() {
        assert_eq!(Command::new("/Home").name, "home");
    }

    #[test]
    fn test_from_text_detects_commands() {
        let sender = Sender::new(1, "ann");
        let evt = InboundEvent::from_text("test", sender.clone(), ChatId(9), "/help");
        assert!(matches!(evt.kind, EventKind::Command(ref c) if c.name == "help"));

        let evt = InboundEvent::from_text("test", sender, ChatId(9), "hi there");
        assert_eq!(evt.kind_label(), "message");
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name(Some("ann"), Some("Ann"), None), "ann");
        assert_eq!(display_name(None, Some("Ann"), Some("Lee")), "Ann");
        assert_eq!(display_name(Some(" "), None, Some("Lee")), "Lee");
        assert_eq!(display_name(None, None, None), "Unknown");
    }

    #[test]
    fn test_event_serde_shape() {
        let evt = InboundEvent::interaction(
            "test",
            Sender::new(3, "c"),
            ChatId(4),
            Interaction::new(MessageId(5), "inc"),
        );
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["kind"]["type"], "interaction");
        assert_eq!(json["chat_id"], 4);
    }
}
