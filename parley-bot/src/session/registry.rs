//! Registry of live session actors keyed by chat.

use super::SessionHandle;
use crate::events::ChatId;
use crate::state::AppContext;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::RwLock;

/// Concurrent map from chat to session actor.
///
/// Lookups take the read lock; creation re-checks under the write lock so
/// two events racing for a new chat end up on the same session.
pub struct SessionRegistry<C: AppContext> {
    sessions: RwLock<HashMap<ChatId, SessionHandle<C>>>,
}

impl<C: AppContext> std::fmt::Debug for SessionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl<C: AppContext> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AppContext> SessionRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The session for `chat_id`, if one is live.
    pub async fn get(&self, chat_id: ChatId) -> Option<SessionHandle<C>> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    /// The session for `chat_id`, creating it with `create` if absent.
    ///
    /// Returns the handle and whether it was created by this call. `create`
    /// runs at most once per chat.
    pub async fn get_or_insert_with<F>(&self, chat_id: ChatId, create: F) -> (SessionHandle<C>, bool)
    where
        F: FnOnce() -> SessionHandle<C>,
    {
        if let Some(handle) = self.get(chat_id).await
            && !handle.is_closed()
        {
            return (handle, false);
        }

        let mut sessions = self.sessions.write().await;
        match sessions.entry(chat_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    let handle = create();
                    entry.insert(handle.clone());
                    (handle, true)
                } else {
                    (entry.get().clone(), false)
                }
            }
            Entry::Vacant(entry) => {
                let handle = create();
                entry.insert(handle.clone());
                (handle, true)
            }
        }
    }

    /// Insert a session, replacing any previous one for the same chat.
    pub async fn insert(&self, handle: SessionHandle<C>) -> Option<SessionHandle<C>> {
        self.sessions.write().await.insert(handle.chat_id(), handle)
    }

    /// Remove the session for `chat_id`.
    pub async fn remove(&self, chat_id: ChatId) -> Option<SessionHandle<C>> {
        self.sessions.write().await.remove(&chat_id)
    }

    /// Handles of every live session, ordered by chat.
    pub async fn snapshot(&self) -> Vec<SessionHandle<C>> {
        let sessions = self.sessions.read().await;
        let mut handles: Vec<_> = sessions.values().cloned().collect();
        handles.sort_by_key(SessionHandle::chat_id);
        handles
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<SessionHandle<C>> {
        let mut sessions = self.sessions.write().await;
        let mut handles: Vec<_> = sessions.drain().map(|(_, h)| h).collect();
        handles.sort_by_key(SessionHandle::chat_id);
        handles
    }

    /// Number of sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether there are no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
