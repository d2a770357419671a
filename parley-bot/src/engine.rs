//! The engine: event dispatch, admission, broadcast, persistence, shutdown.
//!
//! The engine consumes the [`EventBus`], resolves each event to its session
//! actor (creating it on first contact if admission allows) and enqueues the
//! event there. Different chats are processed in parallel; events of one
//! chat are processed in arrival order.

use crate::admission::{AcceptWindow, UserDirectory};
use crate::bus::EventBus;
use crate::commands::CommandTable;
use crate::config::EngineConfig;
use crate::error::{BotError, ConfigError, ConfigResult, Result};
use crate::events::{ChatId, InboundEvent, UserId};
use crate::session::{
    Broadcast, Session, SessionHandle, SessionInfo, SessionRegistry, SessionServices,
    spawn_session,
};
use crate::state::{AppContext, StateFactory};
use crate::store::{SessionStore, StoredSession};
use crate::transport::{Transport, TransportStatus};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Creates the application context of a brand-new session.
pub type AppFactory<C> = Arc<dyn Fn(UserId, ChatId) -> C + Send + Sync>;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Runtime engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Period of the snapshot ticker.
    pub persist_interval: Duration,
    /// Default accept window length.
    pub accept_window: Duration,
    /// Recency threshold for greeting on load and farewell on shutdown.
    pub reactivate_within: Duration,
    /// Sent to recently active sessions on shutdown.
    pub farewell_message: Option<String>,
    /// Sent by the `help` command.
    pub help_text: String,
    /// Alert for presses on expired buttons.
    pub expired_interaction_note: String,
    /// Queue capacity per session actor.
    pub session_queue_capacity: usize,
    /// Navigation steps applied per hook before the rest is dropped.
    pub navigation_limit: usize,
    /// Leave every dropped state on `drop`.
    pub strict_drop: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            persist_interval: Duration::from_secs(config.persist_interval_secs.max(1)),
            accept_window: Duration::from_secs(config.accept_window_secs),
            reactivate_within: Duration::from_secs(
                config.reactivate_within_days.saturating_mul(SECONDS_PER_DAY),
            ),
            farewell_message: config.farewell_message.clone(),
            help_text: config.help_text.clone(),
            expired_interaction_note: config.expired_interaction_note.clone(),
            session_queue_capacity: config.session_queue_capacity.max(1),
            navigation_limit: config.navigation_limit,
            strict_drop: config.strict_drop,
        }
    }
}

/// Engine status information.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Whether the run loop is active.
    pub running: bool,
    /// Whether unknown users may currently register.
    pub accepting_users: bool,
    /// Live sessions.
    pub sessions: usize,
    /// Events published on the bus.
    pub events_published: u64,
    /// Events taken off the bus.
    pub events_consumed: u64,
    /// Transport status.
    pub transport: TransportStatus,
}

struct EngineInner<C: AppContext> {
    services: Arc<SessionServices<C>>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn SessionStore<C>>,
    app: AppFactory<C>,
    registry: SessionRegistry<C>,
    bus: EventBus,
    running: AtomicBool,
    stopping: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// The conversational session engine.
pub struct Engine<C: AppContext> {
    inner: Arc<EngineInner<C>>,
}

impl<C: AppContext> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: AppContext> std::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.inner.services)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> Engine<C> {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder<C> {
        EngineBuilder::new()
    }

    /// The inbound event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The transport gateway.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.services.transport
    }

    /// The engine settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.services.settings
    }

    /// The accept window.
    #[must_use]
    pub fn accept_window(&self) -> &AcceptWindow {
        &self.inner.services.accept
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry<C> {
        &self.inner.registry
    }

    /// Whether the run loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Let unknown users register, for `duration` or the configured default.
    pub fn open_accept_window(&self, duration: Option<Duration>) {
        let duration = duration.unwrap_or(self.inner.services.settings.accept_window);
        self.inner.services.accept.open(duration);
    }

    /// Ask the run loop to stop.
    pub fn shutdown(&self) {
        info!("engine shutdown requested");
        self.inner.shutdown.send_replace(true);
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    ///
    /// Starts the transport, publishes the commands and loads stored
    /// sessions before consuming events. On exit every session is unwound,
    /// recently active users get the farewell, all snapshots are stored and
    /// the transport is stopped.
    pub async fn run(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(BotError::internal("engine is already running"));
        }
        self.inner.stopping.store(false, Ordering::SeqCst);
        self.inner.services.accept.resume();
        let mut shutdown = self.inner.shutdown.subscribe();
        info!(transport = %self.transport().name(), "engine starting");

        if let Err(e) = self.transport().start(&self.inner.bus).await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let commands = self.inner.services.commands.infos();
        if let Err(e) = self.transport().set_commands(&commands).await {
            warn!(error = %e, "failed to publish commands");
        }

        match self.load_sessions().await {
            Ok(count) => info!(count, "sessions loaded"),
            Err(e) => error!(error = %e, "failed to load sessions"),
        }

        let mut ticker = tokio::time::interval(self.settings().persist_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        info!("engine started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.inner.bus.consume() => {
                    match event {
                        Some(event) => self.submit(event).await,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.persist_all().await;
                }
            }
        }

        self.finish().await;
        self.inner.shutdown.send_replace(false);
        self.inner.running.store(false, Ordering::SeqCst);
        info!("engine stopped");
        Ok(())
    }

    async fn finish(&self) {
        info!("engine stopping");
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.services.accept.shutdown();

        let farewell = self.inner.services.settings.farewell_message.clone();
        let handles = self.inner.registry.drain().await;
        let snapshots = join_all(handles.iter().map(|h| h.shutdown(farewell.clone()))).await;

        let mut stored = 0_usize;
        for (handle, snapshot) in handles.iter().zip(snapshots) {
            match snapshot {
                Ok(snapshot) => {
                    if self.store_snapshot(&snapshot).await {
                        stored += 1;
                    }
                }
                Err(e) => warn!(chat_id = %handle.chat_id(), error = %e, "session lost during shutdown"),
            }
        }
        info!(sessions = handles.len(), stored, "sessions shut down");

        if let Err(e) = self.transport().stop().await {
            warn!(error = %e, "failed to stop transport");
        }
    }

    /// Admit an event and enqueue it on its session without waiting.
    async fn submit(&self, event: InboundEvent) {
        let Some(handle) = self.admit(&event).await else {
            return;
        };
        if let Err(e) = handle.enqueue(event).await {
            warn!(chat_id = %handle.chat_id(), error = %e, "failed to enqueue event");
        }
    }

    /// Route one event and wait until its session processed it.
    ///
    /// Returns `false` for dropped events (unattributable or not admitted)
    /// and for events nothing handled. Fails with
    /// [`BotError::ShuttingDown`] once a run has started stopping.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<bool> {
        if self.is_stopping() {
            return Err(BotError::ShuttingDown);
        }
        let Some(handle) = self.admit(&event).await else {
            return Ok(false);
        };
        if self.is_stopping() {
            // created after the registry was drained
            self.retire(handle.chat_id()).await;
            return Err(BotError::ShuttingDown);
        }
        handle.dispatch(event).await
    }

    /// Whether the last run is stopping or has stopped.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    async fn retire(&self, chat_id: ChatId) {
        let Some(handle) = self.inner.registry.remove(chat_id).await else {
            return;
        };
        match handle.shutdown(None).await {
            Ok(snapshot) => {
                self.store_snapshot(&snapshot).await;
            }
            Err(e) => debug!(%chat_id, error = %e, "late session already closed"),
        }
    }

    /// Resolve the session for an event, applying the admission check.
    async fn admit(&self, event: &InboundEvent) -> Option<SessionHandle<C>> {
        let (Some(sender), Some(chat_id)) = (&event.sender, event.chat_id) else {
            warn!(
                event_id = %event.id,
                transport = %event.transport,
                kind = event.kind_label(),
                "event without sender or chat, dropping"
            );
            return None;
        };

        let users = &self.inner.users;
        if !users.is_known(sender.user_id).await {
            if !self.inner.services.accept.is_open() {
                info!(user_id = %sender.user_id, "user not allowed");
                return None;
            }
            info!(user_id = %sender.user_id, name = %sender.display_name, "registering new user");
            if let Err(e) = users.register(sender.user_id, &sender.display_name).await {
                warn!(user_id = %sender.user_id, error = %e, "failed to register user");
                return None;
            }
        }

        Some(self.session_for(sender.user_id, chat_id).await)
    }

    async fn session_for(&self, user_id: UserId, chat_id: ChatId) -> SessionHandle<C> {
        let inner = &self.inner;
        let (handle, created) = inner
            .registry
            .get_or_insert_with(chat_id, || {
                let app = (inner.app)(user_id, chat_id);
                let session = Session::new(user_id, chat_id, app, Arc::clone(&inner.services));
                spawn_session(session, inner.services.settings.session_queue_capacity, true).0
            })
            .await;
        if created {
            debug!(%chat_id, %user_id, "session created");
        }
        handle
    }

    /// Rebuild sessions from the store. Returns how many were started.
    pub async fn load_sessions(&self) -> Result<usize> {
        let stored = self.inner.store.load_all().await?;
        let mut started = 0;
        for record in stored {
            if !record.is_valid() {
                warn!(chat_id = %record.chat_id, user_id = %record.user_id, "ignoring invalid session");
                continue;
            }
            let session = Session::restore(record, Arc::clone(&self.inner.services));
            let greet = session.recently_active();
            let (handle, _) = spawn_session(
                session,
                self.inner.services.settings.session_queue_capacity,
                greet,
            );
            if let Some(old) = self.inner.registry.insert(handle).await {
                debug!(chat_id = %old.chat_id(), "replaced live session with stored one");
            }
            started += 1;
        }
        Ok(started)
    }

    async fn store_snapshot(&self, snapshot: &StoredSession<C>) -> bool {
        match self.inner.store.store(snapshot).await {
            Ok(()) => true,
            Err(e) => {
                error!(chat_id = %snapshot.chat_id, error = %e, "failed to store session");
                false
            }
        }
    }

    /// Store a snapshot of every live session. Returns how many were stored.
    pub async fn persist_all(&self) -> usize {
        let handles = self.inner.registry.snapshot().await;
        let snapshots = join_all(handles.iter().map(SessionHandle::snapshot)).await;

        let mut stored = 0;
        for (handle, snapshot) in handles.iter().zip(snapshots) {
            match snapshot {
                Ok(snapshot) => {
                    if self.store_snapshot(&snapshot).await {
                        stored += 1;
                    }
                }
                Err(e) => debug!(chat_id = %handle.chat_id(), error = %e, "session gone before snapshot"),
            }
        }
        debug!(stored, "sessions persisted");
        stored
    }

    /// Apply `broadcast` to every live session through its actor.
    ///
    /// Returns how many sessions applied it.
    pub async fn broadcast(&self, broadcast: Broadcast<C>) -> usize {
        let handles = self.inner.registry.snapshot().await;
        let results = join_all(handles.iter().map(|h| h.broadcast(broadcast.clone()))).await;
        let applied = results.iter().filter(|r| r.is_ok()).count();
        info!(sessions = handles.len(), applied, "broadcast delivered");
        applied
    }

    /// The live session of `chat_id`.
    pub async fn session(&self, chat_id: ChatId) -> Option<SessionHandle<C>> {
        self.inner.registry.get(chat_id).await
    }

    /// Inspection views of every live session, ordered by chat.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let handles = self.inner.registry.snapshot().await;
        join_all(handles.iter().map(SessionHandle::inspect))
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Current engine status.
    pub async fn status(&self) -> EngineStatus {
        let bus = self.inner.bus.stats();
        EngineStatus {
            running: self.is_running(),
            accepting_users: self.inner.services.accept.is_open(),
            sessions: self.inner.registry.len().await,
            events_published: bus.published,
            events_consumed: bus.consumed,
            transport: self.transport().status().await,
        }
    }
}

/// Builder for creating an [`Engine`].
pub struct EngineBuilder<C: AppContext> {
    transport: Option<Arc<dyn Transport>>,
    users: Option<Arc<dyn UserDirectory>>,
    store: Option<Arc<dyn SessionStore<C>>>,
    root: Option<StateFactory<C>>,
    app: Option<AppFactory<C>>,
    admin: Option<StateFactory<C>>,
    commands: Option<CommandTable<C>>,
    settings: EngineSettings,
    bus: Option<EventBus>,
    accept: Option<AcceptWindow>,
}

impl<C: AppContext> std::fmt::Debug for EngineBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C: AppContext> Default for EngineBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AppContext> EngineBuilder<C> {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            users: None,
            store: None,
            root: None,
            app: None,
            admin: None,
            commands: None,
            settings: EngineSettings::default(),
            bus: None,
            accept: None,
        }
    }

    /// Set the transport gateway.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the known-user directory.
    #[must_use]
    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    /// Set the session store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore<C>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the root state factory.
    #[must_use]
    pub fn root(mut self, root: StateFactory<C>) -> Self {
        self.root = Some(root);
        self
    }

    /// Set how new sessions get their application context.
    #[must_use]
    pub fn app_factory<F>(mut self, make: F) -> Self
    where
        F: Fn(UserId, ChatId) -> C + Send + Sync + 'static,
    {
        self.app = Some(Arc::new(make));
        self
    }

    /// Set the administrative state reached with `/users`.
    #[must_use]
    pub fn admin(mut self, admin: StateFactory<C>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Replace the fallback command table.
    #[must_use]
    pub fn commands(mut self, commands: CommandTable<C>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Set the engine settings.
    #[must_use]
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use an existing event bus.
    #[must_use]
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use an existing accept window.
    #[must_use]
    pub fn accept_window(mut self, accept: AcceptWindow) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Build the engine.
    ///
    /// Fails with [`ConfigError::Missing`] when a required collaborator was
    /// not provided.
    pub fn build(self) -> ConfigResult<Engine<C>> {
        let transport = self.transport.ok_or_else(|| ConfigError::missing("transport"))?;
        let users = self.users.ok_or_else(|| ConfigError::missing("user directory"))?;
        let store = self.store.ok_or_else(|| ConfigError::missing("session store"))?;
        let root = self.root.ok_or_else(|| ConfigError::missing("root state"))?;
        let app = self.app.ok_or_else(|| ConfigError::missing("app context factory"))?;

        let mut services = SessionServices::new(transport, root).with_settings(self.settings);
        if let Some(commands) = self.commands {
            services = services.with_commands(commands);
        }
        if let Some(admin) = self.admin {
            services = services.with_admin(admin);
        }
        if let Some(accept) = self.accept {
            services = services.with_accept_window(accept);
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Engine {
            inner: Arc::new(EngineInner {
                services: Arc::new(services),
                users,
                store,
                app,
                registry: SessionRegistry::new(),
                bus: self.bus.unwrap_or_default(),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                shutdown,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MemoryUserDirectory;
    use crate::events::{Command, Sender};
    use crate::state::State;
    use crate::store::MemorySessionStore;
    use crate::testing::{Journal, Recorder, RecorderAction};
    use crate::transports::MemoryTransport;
    use crate::util::timestamp_ms;

    struct Fixture {
        engine: Engine<u32>,
        transport: Arc<MemoryTransport>,
        users: Arc<MemoryUserDirectory>,
        store: Arc<MemorySessionStore<u32>>,
        journal: Journal,
    }

    fn fixture(known: &[i64]) -> Fixture {
        fixture_with(known, Vec::new())
    }

    fn fixture_with(known: &[i64], stored: Vec<StoredSession<u32>>) -> Fixture {
        let journal = Journal::default();
        let transport = Arc::new(MemoryTransport::new());
        let users = Arc::new(MemoryUserDirectory::with_users(
            known.iter().map(|id| (UserId(*id), format!("user{id}"))),
        ));
        let store = Arc::new(MemorySessionStore::with_sessions(stored));
        let root_journal = journal.clone();
        let engine = Engine::builder()
            .transport(transport.clone())
            .users(users.clone())
            .store(store.clone())
            .root(Arc::new(move || -> Box<dyn State<u32>> {
                Box::new(Recorder::new("R", &root_journal))
            }))
            .app_factory(|user, _| u32::try_from(user.0).unwrap_or_default())
            .build()
            .unwrap();
        Fixture {
            engine,
            transport,
            users,
            store,
            journal,
        }
    }

    fn text(user: i64, body: &str) -> InboundEvent {
        InboundEvent::from_text("test", Sender::new(user, format!("user{user}")), ChatId(user), body)
    }

    #[test]
    fn test_settings_from_config() {
        let settings = EngineSettings::default();
        assert_eq!(settings.persist_interval, Duration::from_secs(60));
        assert_eq!(settings.accept_window, Duration::from_secs(600));
        assert_eq!(settings.reactivate_within, Duration::from_secs(30 * SECONDS_PER_DAY));
        assert_eq!(settings.navigation_limit, 32);
        assert!(!settings.strict_drop);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = Engine::<()>::builder()
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref what) if what == "user directory"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_dropped_while_window_closed() {
        let f = fixture(&[]);
        assert!(!f.engine.dispatch(text(5, "hello")).await.unwrap());
        assert!(f.engine.session(ChatId(5)).await.is_none());
        assert!(f.users.list().await.unwrap().is_empty());
        assert!(f.journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_open_window_registers_and_greets() {
        let f = fixture(&[]);
        f.engine.open_accept_window(None);

        f.engine.dispatch(text(5, "hello")).await.unwrap();

        assert!(f.users.is_known(UserId(5)).await);
        assert_eq!(f.users.list().await.unwrap()[0].name, "user5");
        assert_eq!(f.journal.entries(), vec!["enter:R", "message:R:hello"]);
        assert!(f.engine.session(ChatId(5)).await.is_some());
    }

    #[tokio::test]
    async fn test_known_user_passes_with_window_closed() {
        let f = fixture(&[5]);
        assert!(f.engine.dispatch(text(5, "/back")).await.unwrap());
        assert!(!f.engine.dispatch(text(5, "/nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_event_without_sender_is_dropped() {
        let f = fixture(&[5]);
        let event = text(5, "hello").without_sender();
        assert!(!f.engine.dispatch(event).await.unwrap());
        assert_eq!(f.engine.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_load_sessions_greets_recent_only() {
        let now = timestamp_ms();
        let record = |chat: i64, last: Option<u64>| StoredSession {
            user_id: UserId(chat),
            chat_id: ChatId(chat),
            last_activity_ms: last,
            app: 0_u32,
        };
        let f = fixture_with(
            &[],
            vec![
                record(1, Some(now - 1_000)),
                record(2, Some(now - 40 * SECONDS_PER_DAY * 1000)),
                record(3, None),
                record(0, Some(now)),
            ],
        );

        assert_eq!(f.engine.load_sessions().await.unwrap(), 3);
        let infos = f.engine.sessions().await;
        assert_eq!(infos.len(), 3);
        assert!(infos.iter().all(|i| i.stack == vec!["R"]));
        assert_eq!(f.journal.entries(), vec!["enter:R"]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let f = fixture(&[1, 2]);
        f.engine.dispatch(text(1, "a")).await.unwrap();
        f.engine.dispatch(text(2, "b")).await.unwrap();

        let journal = f.journal.clone();
        let applied = f
            .engine
            .broadcast(Broadcast::message("update").and_reset(Arc::new(
                move || -> Box<dyn State<u32>> { Recorder::boxed("Fresh", &journal) },
            )))
            .await;

        assert_eq!(applied, 2);
        assert_eq!(f.transport.texts_for(ChatId(1)).await, vec!["update"]);
        assert_eq!(f.transport.texts_for(ChatId(2)).await, vec!["update"]);
        for info in f.engine.sessions().await {
            assert_eq!(info.stack, vec!["Fresh"]);
        }
    }

    #[tokio::test]
    async fn test_persist_all_stores_app_context() {
        let f = fixture(&[7]);
        f.engine.dispatch(text(7, "hi")).await.unwrap();
        assert_eq!(f.engine.persist_all().await, 1);
        let stored = f.store.get(ChatId(7)).await.unwrap();
        assert_eq!(stored.app, 7);
        assert!(stored.last_activity_ms.is_some());
    }

    #[tokio::test]
    async fn test_run_consumes_bus_and_shuts_down_cleanly() {
        let f = fixture(&[3]);
        let engine = f.engine.clone();
        let running = tokio::spawn(async move { engine.run().await });

        f.engine.bus().publish(text(3, "one")).await.unwrap();
        f.engine
            .bus()
            .publish(InboundEvent::command(
                "test",
                Sender::new(3, "user3"),
                ChatId(3),
                Command::new("reload"),
            ))
            .await
            .unwrap();

        // wait until the session saw both events
        for _ in 0..200 {
            if f.journal.entries().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(f.engine.is_running());
        assert_eq!(f.journal.entries(), vec!["enter:R", "message:R:one", "enter:R"]);

        f.engine.shutdown();
        running.await.unwrap().unwrap();

        assert!(!f.engine.is_running());
        assert_eq!(f.engine.registry().len().await, 0);
        assert!(f.journal.entries().ends_with(&["leave:R".to_string()]));
        assert!(f.store.get(ChatId(3)).await.is_some());
        assert_eq!(
            f.transport.last_sent(ChatId(3)).await.unwrap().text,
            EngineSettings::default().farewell_message.unwrap()
        );
        let published: Vec<_> = f.transport.commands().await.into_iter().map(|c| c.name).collect();
        assert_eq!(published, vec!["home", "back", "reload", "help"]);
        assert!(!f.transport.is_running().await);
    }

    #[tokio::test]
    async fn test_users_command_resets_to_admin_state() {
        let journal = Journal::default();
        let root_journal = journal.clone();
        let admin_journal = journal.clone();
        let transport = Arc::new(MemoryTransport::new());
        let engine = Engine::<()>::builder()
            .transport(transport.clone())
            .users(Arc::new(MemoryUserDirectory::with_users([(UserId(1), "a")])))
            .store(Arc::new(MemorySessionStore::new()))
            .root(Arc::new(move || -> Box<dyn State<()>> {
                Recorder::boxed("R", &root_journal)
            }))
            .admin(Arc::new(move || -> Box<dyn State<()>> {
                Recorder::boxed("Admin", &admin_journal)
            }))
            .app_factory(|_, _| ())
            .build()
            .unwrap();

        assert!(engine.dispatch(text(1, "/users")).await.unwrap());
        let handle = engine.session(ChatId(1)).await.unwrap();
        assert_eq!(handle.inspect().await.unwrap().stack, vec!["Admin"]);

        // back from the admin state materializes a fresh root
        assert!(engine.dispatch(text(1, "/back")).await.unwrap());
        assert_eq!(handle.inspect().await.unwrap().stack, vec!["R"]);
        assert_eq!(
            transport.commands().await.len(),
            0,
            "commands are published by run, not by dispatch"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_window_expires_after_rerun() {
        let f = fixture(&[]);
        for _ in 0..2 {
            let engine = f.engine.clone();
            let running = tokio::spawn(async move { engine.run().await });
            while !f.engine.is_running() {
                tokio::task::yield_now().await;
            }
            f.engine.shutdown();
            running.await.unwrap().unwrap();
        }

        let engine = f.engine.clone();
        let running = tokio::spawn(async move { engine.run().await });
        while !f.engine.is_running() {
            tokio::task::yield_now().await;
        }
        f.engine.open_accept_window(Some(Duration::from_millis(100)));
        assert!(f.engine.accept_window().is_open());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!f.engine.accept_window().is_open(), "window outlived its duration");

        f.engine.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_rejected_after_run_stopped() {
        let f = fixture(&[4]);
        let engine = f.engine.clone();
        let running = tokio::spawn(async move { engine.run().await });
        while !f.engine.is_running() {
            tokio::task::yield_now().await;
        }
        f.engine.shutdown();
        running.await.unwrap().unwrap();

        assert!(f.engine.is_stopping());
        assert!(matches!(
            f.engine.dispatch(text(4, "late")).await,
            Err(BotError::ShuttingDown)
        ));
        assert_eq!(f.engine.registry().len().await, 0);
        assert!(!f.journal.entries().iter().any(|e| e == "message:R:late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_gates_only_first_registration() {
        let f = fixture(&[]);
        let window = Duration::from_secs(10);
        f.engine.open_accept_window(Some(window));

        tokio::time::sleep(window / 2).await;
        f.engine.dispatch(text(5, "joining")).await.unwrap();
        assert!(f.users.is_known(UserId(5)).await);

        tokio::time::sleep(window * 2).await;
        assert!(!f.engine.accept_window().is_open());

        f.engine.dispatch(text(5, "still here")).await.unwrap();
        assert!(f.journal.entries().contains(&"message:R:still here".to_string()));

        // a stranger arriving now is turned away
        assert!(!f.engine.dispatch(text(6, "hi")).await.unwrap());
        assert!(!f.users.is_known(UserId(6)).await);
        assert!(f.engine.session(ChatId(6)).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_reset_and_dispatch_are_serialized() {
        let journal = Journal::default();
        let root_journal = journal.clone();
        let engine = Engine::<u32>::builder()
            .transport(Arc::new(MemoryTransport::new()))
            .users(Arc::new(MemoryUserDirectory::with_users([(UserId(1), "a")])))
            .store(Arc::new(MemorySessionStore::new()))
            .root(Arc::new(move || -> Box<dyn State<u32>> {
                Box::new(Recorder::new("R", &root_journal).on_message(RecorderAction::Push("A")))
            }))
            .app_factory(|_, _| 0)
            .build()
            .unwrap();

        engine.dispatch(text(1, "/reload")).await.unwrap();
        journal.reset();

        let fresh_journal = journal.clone();
        let reset = Broadcast::reset(Arc::new(move || -> Box<dyn State<u32>> {
            Box::new(Recorder::new("Fresh", &fresh_journal).on_message(RecorderAction::Push("A")))
        }));
        let by_user = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.dispatch(text(1, "go")).await })
        };
        let by_broadcast = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.broadcast(reset).await })
        };
        by_user.await.unwrap().unwrap();
        assert_eq!(by_broadcast.await.unwrap(), 1);

        let stack = engine.session(ChatId(1)).await.unwrap().inspect().await.unwrap().stack;
        let entries = journal.entries();
        let user_first = (
            vec!["Fresh"],
            vec!["message:R:go", "leave:R", "enter:A", "enter:Fresh"],
        );
        let broadcast_first = (
            vec!["Fresh", "A"],
            vec!["enter:Fresh", "message:Fresh:go", "leave:Fresh", "enter:A"],
        );
        let observed = (stack, entries);
        assert!(
            observed == (
                user_first.0.iter().map(ToString::to_string).collect(),
                user_first.1.iter().map(ToString::to_string).collect()
            ) || observed == (
                broadcast_first.0.iter().map(ToString::to_string).collect(),
                broadcast_first.1.iter().map(ToString::to_string).collect()
            ),
            "interleaved: {observed:?}"
        );
    }
}
