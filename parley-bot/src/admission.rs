//! Admission: the known-user directory and the accept window.
//!
//! Events from users the directory does not know are dropped, unless an
//! accept window is open, in which case the user is registered first.

use crate::error::{StorageError, StorageResult};
use crate::events::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownUser {
    /// User identity.
    pub id: UserId,
    /// Display name recorded at registration.
    pub name: String,
}

/// Directory of users allowed to talk to the bot.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether `user` is registered.
    async fn is_known(&self, user: UserId) -> bool;

    /// Register `user` under `name`. Registering twice updates the name.
    async fn register(&self, user: UserId, name: &str) -> StorageResult<()>;

    /// Every registered user, ordered by id.
    async fn list(&self) -> StorageResult<Vec<KnownUser>>;

    /// Forget `user`.
    async fn remove(&self, user: UserId) -> StorageResult<()>;
}

/// In-memory user directory.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<BTreeMap<UserId, String>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory with `users` already registered.
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = (UserId, S)>,
        S: Into<String>,
    {
        Self {
            users: RwLock::new(users.into_iter().map(|(id, n)| (id, n.into())).collect()),
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn is_known(&self, user: UserId) -> bool {
        self.users.read().await.contains_key(&user)
    }

    async fn register(&self, user: UserId, name: &str) -> StorageResult<()> {
        self.users.write().await.insert(user, name.to_string());
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<KnownUser>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .map(|(id, name)| KnownUser {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn remove(&self, user: UserId) -> StorageResult<()> {
        self.users
            .write()
            .await
            .remove(&user)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(user.to_string()))
    }
}

/// User directory persisted as one JSON file.
///
/// The file is read once on open and rewritten after every change.
#[derive(Debug)]
pub struct FileUserDirectory {
    path: PathBuf,
    users: RwLock<BTreeMap<UserId, String>>,
}

impl FileUserDirectory {
    /// Open the directory at `path`. A missing file is an empty directory.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let users = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let list: Vec<KnownUser> = serde_json::from_str(&content)?;
            list.into_iter().map(|u| (u.id, u.name)).collect()
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), users = users.len(), "opened user directory");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn write(&self, users: &BTreeMap<UserId, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<KnownUser> = users
            .iter()
            .map(|(id, name)| KnownUser {
                id: *id,
                name: name.clone(),
            })
            .collect();
        let content = serde_json::to_string_pretty(&list)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for FileUserDirectory {
    async fn is_known(&self, user: UserId) -> bool {
        self.users.read().await.contains_key(&user)
    }

    async fn register(&self, user: UserId, name: &str) -> StorageResult<()> {
        let mut users = self.users.write().await;
        users.insert(user, name.to_string());
        self.write(&users).await
    }

    async fn list(&self) -> StorageResult<Vec<KnownUser>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .map(|(id, name)| KnownUser {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn remove(&self, user: UserId) -> StorageResult<()> {
        let mut users = self.users.write().await;
        if users.remove(&user).is_none() {
            return Err(StorageError::not_found(user.to_string()));
        }
        self.write(&users).await
    }
}

struct AcceptInner {
    open: AtomicBool,
    generation: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Process-wide switch letting unknown users register for a while.
///
/// Every [`open`](Self::open) starts a timer that closes the window when it
/// fires, unless a later `open` superseded it or the window was shut down.
#[derive(Clone)]
pub struct AcceptWindow {
    inner: Arc<AcceptInner>,
}

impl std::fmt::Debug for AcceptWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptWindow")
            .field("open", &self.is_open())
            .finish()
    }
}

impl Default for AcceptWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceptWindow {
    /// A closed window.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AcceptInner {
                open: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Whether unknown users may currently register.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Open the window for `duration`. Must be called inside a tokio runtime.
    ///
    /// Ignored while the window is shut down.
    pub fn open(&self, duration: Duration) {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            warn!("accept window is shut down, not opening");
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.open.store(true, Ordering::SeqCst);
        info!(seconds = duration.as_secs(), "accepting new users");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(duration) => {
                    if inner.generation.load(Ordering::SeqCst) == generation {
                        inner.open.store(false, Ordering::SeqCst);
                        info!("accept window closed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("accept window timer cancelled");
                }
            }
        });
    }

    /// Close the window now.
    pub fn close(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.open.store(false, Ordering::SeqCst);
    }

    /// Close the window, cancel pending timers and refuse to reopen until
    /// [`resume`](Self::resume).
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.close();
    }

    /// Allow the window to be opened again after [`shutdown`](Self::shutdown).
    pub fn resume(&self) {
        self.inner.shutdown.send_replace(false);
    }

    /// Whether the window is shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}
