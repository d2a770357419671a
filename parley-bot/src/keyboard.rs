//! Keyboards and per-message send options.

use serde::{Deserialize, Serialize};

/// A reply keyboard shown under the input field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    /// Button labels, row by row.
    pub rows: Vec<Vec<String>>,
}

impl Keyboard {
    /// Create an empty keyboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row of buttons.
    #[must_use]
    pub fn row<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the keyboard has any button.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

/// A button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    /// Visible label.
    pub label: String,
    /// Payload delivered back in the interaction.
    pub data: String,
}

impl InlineButton {
    /// Create a button.
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Buttons attached to one outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    /// Buttons, row by row.
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Create an empty inline keyboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row of buttons.
    #[must_use]
    pub fn row(mut self, buttons: impl IntoIterator<Item = InlineButton>) -> Self {
        self.rows.push(buttons.into_iter().collect());
        self
    }

    /// Append a single-button row.
    #[must_use]
    pub fn button(self, label: impl Into<String>, data: impl Into<String>) -> Self {
        self.row([InlineButton::new(label, data)])
    }

    /// Iterate over all buttons.
    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// What happens to the keyboard area when a message is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "keyboard", rename_all = "snake_case")]
pub enum Markup {
    /// Remove any reply keyboard currently shown.
    #[default]
    RemoveKeyboard,
    /// Leave the current reply keyboard alone.
    KeepKeyboard,
    /// Show a new reply keyboard.
    Reply(Keyboard),
    /// Attach buttons to the message itself.
    Inline(InlineKeyboard),
}

/// Options for one outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Keyboard handling.
    pub markup: Markup,
    /// Whether the recipient gets a notification sound.
    pub notify: bool,
}

impl SendOptions {
    /// Default options: silent, reply keyboard removed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a reply keyboard.
    #[must_use]
    pub fn keyboard(mut self, keyboard: Keyboard) -> Self {
        self.markup = Markup::Reply(keyboard);
        self
    }

    /// Attach an inline keyboard.
    #[must_use]
    pub fn inline(mut self, keyboard: InlineKeyboard) -> Self {
        self.markup = Markup::Inline(keyboard);
        self
    }

    /// Keep whatever reply keyboard is shown.
    #[must_use]
    pub fn keep_keyboard(mut self) -> Self {
        self.markup = Markup::KeepKeyboard;
        self
    }

    /// Notify the recipient.
    #[must_use]
    pub const fn notify(mut self) -> Self {
        self.notify = true;
        self
    }

    /// The inline keyboard, if any.
    #[must_use]
    pub const fn inline_keyboard(&self) -> Option<&InlineKeyboard> {
        match &self.markup {
            Markup::Inline(kb) => Some(kb),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_remove_keyboard_silently() {
        let opts = SendOptions::new();
        assert_eq!(opts.markup, Markup::RemoveKeyboard);
        assert!(!opts.notify);
        assert!(opts.inline_keyboard().is_none());
    }

    #[test]
    fn test_builders() {
        let kb = Keyboard::new().row(["Yes", "No"]).row(["Cancel"]);
        assert_eq!(kb.rows.len(), 2);
        assert!(!kb.is_empty());
        assert!(Keyboard::new().row(Vec::<String>::new()).is_empty());

        let inline = InlineKeyboard::new().button("+", "inc").button("-", "dec");
        assert_eq!(inline.buttons().count(), 2);

        let opts = SendOptions::new().inline(inline).notify();
        assert!(opts.notify);
        assert_eq!(opts.inline_keyboard().map(|k| k.rows.len()), Some(2));
    }
}
