//! Session actors.
//!
//! Each session runs in its own task and processes its queue one command
//! at a time, so hooks and handlers of a chat never overlap while
//! different chats proceed in parallel.

use super::{Broadcast, Session, SessionInfo};
use crate::error::{BotError, Result};
use crate::events::{ChatId, InboundEvent, UserId};
use crate::state::AppContext;
use crate::store::StoredSession;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Work queued for a session actor.
pub enum SessionCommand<C: AppContext> {
    /// Route a user event. Replies with whether it was handled.
    Dispatch(Box<InboundEvent>, oneshot::Sender<bool>),
    /// Apply an engine-wide broadcast.
    Broadcast(Broadcast<C>, oneshot::Sender<()>),
    /// Take a persistence snapshot.
    Snapshot(oneshot::Sender<StoredSession<C>>),
    /// Take an inspection view.
    Inspect(oneshot::Sender<SessionInfo>),
    /// Unwind, say goodbye and stop. Replies with the final snapshot.
    Shutdown {
        /// Sent to the user if they were active recently.
        farewell: Option<String>,
        /// Receives the final snapshot.
        reply: oneshot::Sender<StoredSession<C>>,
    },
}

impl<C: AppContext> std::fmt::Debug for SessionCommand<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatch(event, _) => write!(f, "Dispatch({})", event.kind_label()),
            Self::Broadcast(b, _) => write!(f, "Broadcast({b:?})"),
            Self::Snapshot(_) => f.write_str("Snapshot"),
            Self::Inspect(_) => f.write_str("Inspect"),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable address of a running session actor.
pub struct SessionHandle<C: AppContext> {
    user_id: UserId,
    chat_id: ChatId,
    tx: mpsc::Sender<SessionCommand<C>>,
}

impl<C: AppContext> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id,
            chat_id: self.chat_id,
            tx: self.tx.clone(),
        }
    }
}

impl<C: AppContext> std::fmt::Debug for SessionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("user_id", &self.user_id)
            .field("chat_id", &self.chat_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Start an actor for `session`.
///
/// With `greet`, the root state is entered before the first command is
/// processed; otherwise it is only materialized.
pub fn spawn_session<C: AppContext>(
    mut session: Session<C>,
    capacity: usize,
    greet: bool,
) -> (SessionHandle<C>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let user_id = session.context().user_id();
    let chat_id = session.context().chat_id();

    let task = tokio::spawn(async move {
        session.activate(greet).await;
        debug!(%chat_id, greet, "session started");

        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Dispatch(event, reply) => {
                    let handled = session.handle(&event).await;
                    let _ = reply.send(handled);
                }
                SessionCommand::Broadcast(broadcast, reply) => {
                    session.apply_broadcast(&broadcast).await;
                    let _ = reply.send(());
                }
                SessionCommand::Snapshot(reply) => {
                    let _ = reply.send(session.snapshot());
                }
                SessionCommand::Inspect(reply) => {
                    let _ = reply.send(session.info());
                }
                SessionCommand::Shutdown { farewell, reply } => {
                    rx.close();
                    session.shutdown(farewell.as_deref()).await;
                    let _ = reply.send(session.snapshot());
                    info!(%chat_id, "session stopped");
                    return;
                }
            }
        }

        // every handle dropped without an explicit shutdown
        session.shutdown(None).await;
        debug!(%chat_id, "session dropped");
    });

    (
        SessionHandle {
            user_id,
            chat_id,
            tx,
        },
        task,
    )
}

impl<C: AppContext> SessionHandle<C> {
    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Chat identity.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SessionCommand<C>) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BotError::SessionClosed(self.chat_id))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand<C>,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| BotError::SessionClosed(self.chat_id))
    }

    /// Queue an event. The receiver resolves once the event was processed.
    pub async fn enqueue(&self, event: InboundEvent) -> Result<oneshot::Receiver<bool>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Dispatch(Box::new(event), tx))
            .await?;
        Ok(rx)
    }

    /// Route an event and wait for the outcome.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<bool> {
        let rx = self.enqueue(event).await?;
        rx.await.map_err(|_| BotError::SessionClosed(self.chat_id))
    }

    /// Apply a broadcast and wait for it to finish.
    pub async fn broadcast(&self, broadcast: Broadcast<C>) -> Result<()> {
        self.request(|tx| SessionCommand::Broadcast(broadcast, tx))
            .await
    }

    /// Persistence snapshot.
    pub async fn snapshot(&self) -> Result<StoredSession<C>> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Inspection view.
    pub async fn inspect(&self) -> Result<SessionInfo> {
        self.request(SessionCommand::Inspect).await
    }

    /// Stop the actor after the commands already queued.
    pub async fn shutdown(&self, farewell: Option<String>) -> Result<StoredSession<C>> {
        self.request(|reply| SessionCommand::Shutdown { farewell, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Command, Sender};
    use crate::session::Navigation;
    use crate::testing::{Journal, Recorder, RecorderAction, test_services};
    use std::sync::Arc;

    fn spawn(journal: &Journal, greet: bool) -> (SessionHandle<()>, JoinHandle<()>) {
        let (services, _) = test_services(journal);
        let session = Session::new(UserId(7), ChatId(70), (), Arc::new(services));
        spawn_session(session, 8, greet)
    }

    fn text(body: &str) -> InboundEvent {
        InboundEvent::from_text("test", Sender::new(7, "u"), ChatId(70), body)
    }

    #[tokio::test]
    async fn test_events_are_processed_in_order() {
        let journal = Journal::default();
        let (handle, _) = spawn(&journal, false);

        let mut pending = Vec::new();
        for body in ["one", "two", "three"] {
            pending.push(handle.enqueue(text(body)).await.unwrap());
        }
        for rx in pending {
            rx.await.unwrap();
        }

        assert_eq!(
            journal.entries(),
            vec!["message:R:one", "message:R:two", "message:R:three"]
        );
    }

    #[tokio::test]
    async fn test_greeting_enters_root_before_first_event() {
        let journal = Journal::default();
        let (handle, _) = spawn(&journal, true);
        handle.dispatch(text("hi")).await.unwrap();
        assert_eq!(journal.entries(), vec!["enter:R", "message:R:hi"]);
    }

    #[tokio::test]
    async fn test_inspect_sees_navigation() {
        let journal = Journal::default();
        let (services, _) = test_services(&journal);
        let mut session = Session::new(UserId(7), ChatId(70), (), Arc::new(services));
        session.activate(false).await;
        session
            .navigate(Navigation::Push(Box::new(
                Recorder::new("A", &journal).on_message(RecorderAction::Push("B")),
            )))
            .await;
        let (handle, _) = spawn_session(session, 4, false);

        assert!(handle.dispatch(text("next")).await.unwrap());
        let info = handle.inspect().await.unwrap();
        assert_eq!(info.stack, vec!["R", "A", "B"]);
        assert_eq!(info.chat_id, ChatId(70));
    }

    #[tokio::test]
    async fn test_shutdown_closes_the_actor() {
        let journal = Journal::default();
        let (handle, task) = spawn(&journal, false);

        let stored = handle.shutdown(None).await.unwrap();
        assert_eq!(stored.user_id, UserId(7));
        task.await.unwrap();

        assert!(handle.is_closed());
        let err = handle
            .dispatch(InboundEvent::command(
                "test",
                Sender::new(7, "u"),
                ChatId(70),
                Command::new("back"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::SessionClosed(ChatId(70))));
    }

    #[tokio::test]
    async fn test_dropping_all_handles_unwinds() {
        let journal = Journal::default();
        let (handle, task) = spawn(&journal, false);
        drop(handle);
        task.await.unwrap();
        assert_eq!(journal.entries(), vec!["leave:R"]);
    }
}
