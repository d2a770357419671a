//! Bindings from outbound messages to the handlers of their buttons.

use super::Context;
use crate::events::{Interaction, MessageId};
use crate::state::AppContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles button presses on one interactive message.
#[async_trait]
pub trait InlineHandler<C: AppContext>: Send + Sync {
    /// Handle a press. Returns whether it was handled.
    async fn handle(&self, ctx: &mut Context<C>, interaction: &Interaction) -> bool;
}

/// [`InlineHandler`] backed by a synchronous closure.
///
/// The closure may change the application context and request navigation;
/// use a full [`InlineHandler`] implementation to talk to the transport.
pub struct FnInlineHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnInlineHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInlineHandler").finish_non_exhaustive()
    }
}

/// Wrap a closure as an inline handler.
pub fn inline_fn<C, F>(f: F) -> FnInlineHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>, &Interaction) -> bool + Send + Sync,
{
    FnInlineHandler { f }
}

#[async_trait]
impl<C, F> InlineHandler<C> for FnInlineHandler<F>
where
    C: AppContext,
    F: Fn(&mut Context<C>, &Interaction) -> bool + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<C>, interaction: &Interaction) -> bool {
        (self.f)(ctx, interaction)
    }
}

/// Per-session map from outbound message to its live handler.
pub struct InlineTracker<C: AppContext> {
    bindings: HashMap<MessageId, Arc<dyn InlineHandler<C>>>,
}

impl<C: AppContext> std::fmt::Debug for InlineTracker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineTracker")
            .field("messages", &self.message_ids())
            .finish()
    }
}

impl<C: AppContext> Default for InlineTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AppContext> InlineTracker<C> {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind `handler` to `message_id`, replacing any previous binding.
    pub fn bind(&mut self, message_id: MessageId, handler: Arc<dyn InlineHandler<C>>) {
        self.bindings.insert(message_id, handler);
    }

    /// Look up the handler for a message.
    #[must_use]
    pub fn resolve(&self, message_id: MessageId) -> Option<Arc<dyn InlineHandler<C>>> {
        self.bindings.get(&message_id).cloned()
    }

    /// Drop one binding. Returns whether it existed.
    pub fn unbind(&mut self, message_id: MessageId) -> bool {
        self.bindings.remove(&message_id).is_some()
    }

    /// Drop every binding and return the affected message ids, sorted.
    pub fn clear(&mut self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self.bindings.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    /// Bound message ids, sorted.
    #[must_use]
    pub fn message_ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self.bindings.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether there are no live bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
