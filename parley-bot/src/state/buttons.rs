//! Reply keyboards whose buttons carry their own handlers.
//!
//! A state builds a [`ButtonMenu`], shows [`ButtonMenu::keyboard`] and
//! forwards `handle_message` to [`ButtonMenu::handle`], instead of matching
//! labels by hand.

use super::AppContext;
use crate::keyboard::Keyboard;
use crate::session::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Reacts to one reply-keyboard button.
#[async_trait]
pub trait ButtonHandler<C: AppContext>: Send + Sync {
    /// The button labelled `label` was pressed.
    async fn handle(&self, ctx: &mut Context<C>, label: &str);
}

/// [`ButtonHandler`] backed by a synchronous closure.
pub struct FnButtonHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnButtonHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnButtonHandler").finish_non_exhaustive()
    }
}

/// Wrap a closure as a button handler.
pub fn button_fn<C, F>(f: F) -> FnButtonHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>) + Send + Sync,
{
    FnButtonHandler { f }
}

#[async_trait]
impl<C, F> ButtonHandler<C> for FnButtonHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>) + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<C>, _label: &str) {
        (self.f)(ctx);
    }
}

/// Reply keyboard plus the handler behind each label.
pub struct ButtonMenu<C: AppContext> {
    rows: Vec<Vec<String>>,
    handlers: HashMap<String, Arc<dyn ButtonHandler<C>>>,
}

impl<C: AppContext> std::fmt::Debug for ButtonMenu<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonMenu").field("rows", &self.rows).finish()
    }
}

impl<C: AppContext> Default for ButtonMenu<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AppContext> Clone for ButtonMenu<C> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<C: AppContext> ButtonMenu<C> {
    /// An empty menu.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Add a button to the last row.
    #[must_use]
    pub fn button(mut self, label: impl Into<String>, handler: impl ButtonHandler<C> + 'static) -> Self {
        self.add(label, handler);
        self
    }

    /// Start a new row for the buttons added next.
    #[must_use]
    pub fn next_row(mut self) -> Self {
        if self.rows.last().is_none_or(|row| !row.is_empty()) {
            self.rows.push(Vec::new());
        }
        self
    }

    /// Re-flow every button into rows of at most `columns` buttons.
    ///
    /// Rows started with [`next_row`](Self::next_row) are discarded. Zero
    /// columns is treated as one.
    #[must_use]
    pub fn auto_layout(mut self, columns: usize) -> Self {
        let columns = columns.max(1);
        let labels: Vec<String> = self.rows.drain(..).flatten().collect();
        self.rows = labels.chunks(columns).map(<[String]>::to_vec).collect();
        self
    }

    /// Add a button to the last row. A label added twice keeps its first
    /// position and the newer handler.
    pub fn add(&mut self, label: impl Into<String>, handler: impl ButtonHandler<C> + 'static) {
        let label = label.into();
        let known = self
            .handlers
            .insert(label.clone(), Arc::new(handler))
            .is_some();
        if known {
            return;
        }
        match self.rows.last_mut() {
            Some(row) => row.push(label),
            None => self.rows.push(vec![label]),
        }
    }

    /// Add a button, starting a new row once the last one holds
    /// `row_limit` buttons. A limit of zero never wraps.
    pub fn add_wrapped(
        &mut self,
        label: impl Into<String>,
        handler: impl ButtonHandler<C> + 'static,
        row_limit: usize,
    ) {
        if row_limit > 0 && self.rows.last().is_some_and(|row| row.len() >= row_limit) {
            self.rows.push(Vec::new());
        }
        self.add(label, handler);
    }

    /// Remove every button.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.handlers.clear();
    }

    /// Whether the menu has no buttons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The reply keyboard to attach to a message.
    #[must_use]
    pub fn keyboard(&self) -> Keyboard {
        self.rows
            .iter()
            .filter(|row| !row.is_empty())
            .fold(Keyboard::new(), |keyboard, row| keyboard.row(row.iter().cloned()))
    }

    /// Run the handler of the button labelled `text`.
    ///
    /// Returns `false` when no button has that label.
    pub async fn handle(&self, ctx: &mut Context<C>, text: &str) -> bool {
        let label = text.trim();
        let Some(handler) = self.handlers.get(label) else {
            return false;
        };
        handler.handle(ctx, label).await;
        true
    }
}
