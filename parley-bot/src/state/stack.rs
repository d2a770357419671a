use super::{AppContext, State, StateFactory};
use crate::session::Context;
use tracing::trace;

/// Ordered stack of active states for one session.
///
/// The stack is never observably empty: [`current`](Self::current)
/// materializes a root state from the factory when needed, without
/// entering it.
pub struct StateStack<C: AppContext> {
    states: Vec<Box<dyn State<C>>>,
    root: StateFactory<C>,
}

impl<C: AppContext> std::fmt::Debug for StateStack<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStack")
            .field("states", &self.names())
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> StateStack<C> {
    /// Create an empty stack rooted at `root`.
    #[must_use]
    pub fn new(root: StateFactory<C>) -> Self {
        Self {
            states: Vec::new(),
            root,
        }
    }

    /// Number of states on the stack (zero until first access).
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether nothing has been materialized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State names, bottom first.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name().to_string()).collect()
    }

    /// Name of the top state, if any.
    #[must_use]
    pub fn top_name(&self) -> Option<&str> {
        self.states.last().map(|s| s.name())
    }

    /// A fresh instance of the root state.
    #[must_use]
    pub fn root_state(&self) -> Box<dyn State<C>> {
        (self.root)()
    }

    /// Push the root state if the stack is empty. Returns whether it did.
    pub fn materialize(&mut self) -> bool {
        if self.states.is_empty() {
            self.states.push((self.root)());
            true
        } else {
            false
        }
    }

    /// The top state, materializing the root if the stack is empty.
    pub fn current(&mut self) -> &mut dyn State<C> {
        self.materialize();
        let top = self.states.len() - 1;
        self.states[top].as_mut()
    }

    /// Leave the current top, clear inline bindings, then push and enter `state`.
    pub async fn push(&mut self, ctx: &mut Context<C>, state: Box<dyn State<C>>) {
        if let Some(top) = self.states.last_mut() {
            top.leave(ctx).await;
            ctx.clear_inline().await;
        }
        trace!(chat_id = %ctx.chat_id(), state = state.name(), "push");
        self.states.push(state);
        self.current().enter(ctx).await;
    }

    /// Leave and remove the top, then return to the state below it.
    ///
    /// Popping the last state returns to a fresh root.
    pub async fn pop(&mut self, ctx: &mut Context<C>) {
        let Some(top) = self.states.last_mut() else {
            self.materialize();
            return;
        };
        top.leave(ctx).await;
        ctx.clear_inline().await;
        self.states.pop();
        trace!(chat_id = %ctx.chat_id(), depth = self.states.len(), "pop");
        self.current().return_to(ctx).await;
    }

    /// Overwrite the top with `state` and enter it.
    ///
    /// The outgoing state is not left and inline bindings survive.
    pub async fn replace(&mut self, ctx: &mut Context<C>, state: Box<dyn State<C>>) {
        trace!(chat_id = %ctx.chat_id(), state = state.name(), "replace");
        match self.states.last_mut() {
            Some(top) => *top = state,
            None => self.states.push(state),
        }
        self.current().enter(ctx).await;
    }

    /// Discard the whole history and push `state` on the empty stack.
    ///
    /// Nothing is left; inline bindings are cleared.
    pub async fn reset(&mut self, ctx: &mut Context<C>, state: Box<dyn State<C>>) {
        self.states.clear();
        ctx.clear_inline().await;
        self.push(ctx, state).await;
    }

    /// Remove up to `n` states without leaving them, then return to the new top.
    ///
    /// Inline bindings are kept. Use [`drop_states_strict`](Self::drop_states_strict)
    /// to leave every removed level.
    pub async fn drop_states(&mut self, ctx: &mut Context<C>, n: usize) {
        let keep = self.states.len().saturating_sub(n);
        self.states.truncate(keep);
        trace!(chat_id = %ctx.chat_id(), dropped = n, depth = keep, "drop");
        self.current().return_to(ctx).await;
    }

    /// Like [`drop_states`](Self::drop_states), but every removed level is
    /// left (top first) and inline bindings are cleared.
    pub async fn drop_states_strict(&mut self, ctx: &mut Context<C>, n: usize) {
        let keep = self.states.len().saturating_sub(n);
        while self.states.len() > keep {
            if let Some(mut state) = self.states.pop() {
                state.leave(ctx).await;
            }
        }
        if n > 0 {
            ctx.clear_inline().await;
        }
        self.current().return_to(ctx).await;
    }

    /// Enter the current top again, as if it replaced itself.
    pub async fn reload(&mut self, ctx: &mut Context<C>) {
        self.current().enter(ctx).await;
    }

    /// Leave every state top to bottom and clear inline bindings.
    ///
    /// Nothing is returned to; the stack ends up empty.
    pub async fn unwind(&mut self, ctx: &mut Context<C>) {
        while let Some(mut state) = self.states.pop() {
            state.leave(ctx).await;
        }
        ctx.clear_inline().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, Recorder, test_context};
    use crate::events::MessageId;

    fn stack(journal: &Journal) -> StateStack<()> {
        let journal = journal.clone();
        StateStack::new(std::sync::Arc::new(move || -> Box<dyn State<()>> {
            Box::new(Recorder::new("R", &journal).with_return())
        }))
    }

    #[tokio::test]
    async fn test_current_materializes_root_without_entering() {
        let journal = Journal::default();
        let mut stack = stack(&journal);
        assert!(stack.is_empty());
        assert_eq!(stack.current().name(), "R");
        assert_eq!(stack.len(), 1);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_push_then_pop_returns_to_previous_top() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();

        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        assert_eq!(stack.top_name(), Some("A"));
        stack.pop(&mut ctx).await;

        assert_eq!(stack.top_name(), Some("R"));
        assert_eq!(
            journal.entries(),
            vec!["leave:R", "enter:A", "leave:A", "return:R"]
        );
    }

    #[tokio::test]
    async fn test_default_return_to_falls_back_to_enter() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        stack.push(&mut ctx, Recorder::boxed("B", &journal)).await;
        journal.reset();
        stack.pop(&mut ctx).await;

        assert_eq!(journal.entries(), vec!["leave:B", "enter:A"]);
    }

    #[tokio::test]
    async fn test_replace_skips_leave_and_keeps_bindings() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();

        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        ctx.bind_inline_fn(MessageId(10), |_, _| true);
        journal.reset();

        stack.replace(&mut ctx, Recorder::boxed("B", &journal)).await;

        assert_eq!(journal.entries(), vec!["enter:B"]);
        assert_eq!(stack.names(), vec!["R", "B"]);
        assert!(ctx.inline().resolve(MessageId(10)).is_some());
    }

    #[tokio::test]
    async fn test_replace_on_empty_installs_sole_entry() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        stack.replace(&mut ctx, Recorder::boxed("A", &journal)).await;
        assert_eq!(stack.names(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_bindings_unreachable_after_push_pop_and_reset() {
        let (mut ctx, transport) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();

        ctx.bind_inline_fn(MessageId(1), |_, _| true);
        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        assert!(ctx.inline().resolve(MessageId(1)).is_none());

        ctx.bind_inline_fn(MessageId(2), |_, _| true);
        stack.pop(&mut ctx).await;
        assert!(ctx.inline().resolve(MessageId(2)).is_none());

        ctx.bind_inline_fn(MessageId(3), |_, _| true);
        stack.reset(&mut ctx, Recorder::boxed("B", &journal)).await;
        assert!(ctx.inline().resolve(MessageId(3)).is_none());

        let removed: Vec<_> = transport
            .removed_keyboards()
            .await
            .into_iter()
            .map(|(_, id)| id.0)
            .collect();
        assert_eq!(removed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reset_does_not_leave_discarded_states() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        journal.reset();
        stack.reset(&mut ctx, Recorder::boxed("B", &journal)).await;

        assert_eq!(journal.entries(), vec!["enter:B"]);
        assert_eq!(stack.names(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_drop_skips_leave_and_returns_once() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();
        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        stack.push(&mut ctx, Recorder::boxed("B", &journal)).await;
        ctx.bind_inline_fn(MessageId(7), |_, _| true);
        journal.reset();

        stack.drop_states(&mut ctx, 2).await;

        assert_eq!(stack.names(), vec!["R"]);
        assert_eq!(journal.entries(), vec!["return:R"]);
        assert!(ctx.inline().resolve(MessageId(7)).is_some());
    }

    #[tokio::test]
    async fn test_drop_more_than_depth_returns_to_fresh_root() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        journal.reset();

        stack.drop_states(&mut ctx, 5).await;

        assert_eq!(stack.names(), vec!["R"]);
        assert_eq!(journal.entries(), vec!["return:R"]);
    }

    #[tokio::test]
    async fn test_strict_drop_leaves_each_level() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();
        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        stack.push(&mut ctx, Recorder::boxed("B", &journal)).await;
        ctx.bind_inline_fn(MessageId(7), |_, _| true);
        journal.reset();

        stack.drop_states_strict(&mut ctx, 2).await;

        assert_eq!(journal.entries(), vec!["leave:B", "leave:A", "return:R"]);
        assert!(ctx.inline().is_empty());
    }

    #[tokio::test]
    async fn test_pop_on_empty_only_materializes_root() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        stack.pop(&mut ctx).await;

        assert_eq!(stack.names(), vec!["R"]);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_drop_on_empty_returns_to_fresh_root_once() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        stack.drop_states(&mut ctx, 3).await;

        assert_eq!(stack.names(), vec!["R"]);
        assert_eq!(journal.entries(), vec!["return:R"]);
    }

    #[tokio::test]
    async fn test_unwind_leaves_top_to_bottom() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);
        stack.current();
        stack.push(&mut ctx, Recorder::boxed("A", &journal)).await;
        stack.push(&mut ctx, Recorder::boxed("B", &journal)).await;
        journal.reset();

        stack.unwind(&mut ctx).await;

        assert_eq!(journal.entries(), vec!["leave:B", "leave:A", "leave:R"]);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_current_is_never_empty_across_operations() {
        let (mut ctx, _) = test_context();
        let journal = Journal::default();
        let mut stack = stack(&journal);

        for step in 0..40_usize {
            match step % 6 {
                0 => stack.push(&mut ctx, Recorder::boxed("A", &journal)).await,
                1 => stack.pop(&mut ctx).await,
                2 => stack.replace(&mut ctx, Recorder::boxed("B", &journal)).await,
                3 => stack.drop_states(&mut ctx, step % 4).await,
                4 => stack.reset(&mut ctx, Recorder::boxed("C", &journal)).await,
                _ => stack.pop(&mut ctx).await,
            }
            stack.current();
            assert!(!stack.is_empty(), "empty after step {step}");
        }
    }
}
