//! Session persistence.
//!
//! Only identity, last activity and the application context survive a
//! restart. State stacks are rebuilt from the root state on load.

use crate::error::StorageResult;
use crate::events::{ChatId, UserId};
use crate::state::AppContext;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Persisted form of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession<C> {
    /// Owning user.
    pub user_id: UserId,
    /// Chat identity.
    pub chat_id: ChatId,
    /// Last user activity (Unix milliseconds), if any.
    #[serde(default)]
    pub last_activity_ms: Option<u64>,
    /// Application context.
    pub app: C,
}

impl<C> StoredSession<C> {
    /// Whether both ids are set. Records with a zero id are skipped on load.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.user_id.is_unset() && !self.chat_id.is_unset()
    }
}

/// Backend for session snapshots.
#[async_trait]
pub trait SessionStore<C: AppContext>: Send + Sync {
    /// Every stored session.
    async fn load_all(&self) -> StorageResult<Vec<StoredSession<C>>>;

    /// Store or overwrite one session.
    async fn store(&self, session: &StoredSession<C>) -> StorageResult<()>;

    /// Delete the session of `chat_id`. Deleting a missing record is fine.
    async fn remove(&self, chat_id: ChatId) -> StorageResult<()>;
}

/// In-memory session store.
///
/// Fast but not persistent across restarts.
#[derive(Debug)]
pub struct MemorySessionStore<C> {
    sessions: RwLock<BTreeMap<ChatId, StoredSession<C>>>,
}

impl<C> Default for MemorySessionStore<C> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<C: AppContext> MemorySessionStore<C> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `sessions`.
    pub fn with_sessions(sessions: impl IntoIterator<Item = StoredSession<C>>) -> Self {
        Self {
            sessions: RwLock::new(sessions.into_iter().map(|s| (s.chat_id, s)).collect()),
        }
    }

    /// The record for `chat_id`.
    pub async fn get(&self, chat_id: ChatId) -> Option<StoredSession<C>> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl<C: AppContext> SessionStore<C> for MemorySessionStore<C> {
    async fn load_all(&self) -> StorageResult<Vec<StoredSession<C>>> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn store(&self, session: &StoredSession<C>) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.chat_id, session.clone());
        Ok(())
    }

    async fn remove(&self, chat_id: ChatId) -> StorageResult<()> {
        self.sessions.write().await.remove(&chat_id);
        Ok(())
    }
}

/// File-based session store.
///
/// Persists each session as `<chat_id>.json` in a directory.
#[derive(Debug)]
pub struct FileSessionStore<C> {
    base_path: PathBuf,
    _marker: PhantomData<fn() -> C>,
}

impl<C> FileSessionStore<C> {
    /// Create a store in `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            _marker: PhantomData,
        }
    }

    /// Create a store in the default location.
    #[must_use]
    pub fn default_path() -> Self {
        Self::new(crate::util::sessions_dir())
    }

    fn session_path(&self, chat_id: ChatId) -> PathBuf {
        self.base_path.join(format!("{chat_id}.json"))
    }

    async fn ensure_dir(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }
}

#[async_trait]
impl<C> SessionStore<C> for FileSessionStore<C>
where
    C: AppContext + Serialize + DeserializeOwned,
{
    async fn load_all(&self) -> StorageResult<Vec<StoredSession<C>>> {
        self.ensure_dir().await?;

        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            match serde_json::from_str::<StoredSession<C>>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed session file");
                }
            }
        }

        sessions.sort_by_key(|s| s.chat_id);
        debug!(count = sessions.len(), "loaded sessions from files");
        Ok(sessions)
    }

    async fn store(&self, session: &StoredSession<C>) -> StorageResult<()> {
        self.ensure_dir().await?;

        let path = self.session_path(session.chat_id);
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&path, content).await?;
        debug!(chat_id = %session.chat_id, "saved session to file");
        Ok(())
    }

    async fn remove(&self, chat_id: ChatId) -> StorageResult<()> {
        let path = self.session_path(chat_id);

        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
            debug!(%chat_id, "deleted session file");
        }
        Ok(())
    }
}
