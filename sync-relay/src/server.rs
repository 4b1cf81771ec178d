//! Main SyncRelay coordination.
//!
//! SyncRelay implements [`CommandLog`] on top of SQLite storage. Storage
//! assigns sequence ids; a per-session hub fans new entries out to live
//! subscribers and publishes the session document to ready-state watchers.

use crate::config::{CleanupConfig, Config};
use crate::error::{Result, StorageError};
use crate::storage::{ActionStorage, SqliteStorage};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_client::log::now_millis;
use sync_client::{
    ActionFeed, CommandLog, LogError, SeatConfig, SessionDoc, SessionInfo, SessionStatus,
};
use sync_core::JoinCode;
use sync_types::{Command, LogEntry, PlayerId, SequenceId, SessionId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};

/// Join codes tried before giving up on creating a session.
const MAX_CODE_ATTEMPTS: usize = 16;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions created.
    pub sessions_created: AtomicU64,
    /// Commands appended (new entries only).
    pub appends_total: AtomicU64,
    /// Appends answered from an existing entry (client retries).
    pub duplicate_appends: AtomicU64,
    /// Action feeds opened.
    pub subscriptions_total: AtomicU64,
    /// Live subscribers that fell behind and were caught up from storage.
    pub lagged_catchups: AtomicU64,
    /// Sessions removed by cleanup.
    pub sessions_cleaned: AtomicU64,
}

impl RelayMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Live state for one session.
#[derive(Debug)]
struct SessionHub {
    /// New entries, in sequence order.
    actions: broadcast::Sender<LogEntry>,
    /// Latest session document.
    doc: watch::Sender<SessionDoc>,
    /// Held while writing, so broadcast order matches assignment order.
    write: Mutex<()>,
}

impl SessionHub {
    fn new(doc: SessionDoc, capacity: usize) -> Self {
        let (actions, _) = broadcast::channel(capacity.max(1));
        let (doc, _) = watch::channel(doc);
        Self {
            actions,
            doc,
            write: Mutex::new(()),
        }
    }
}

/// SQLite-backed ordered command log.
pub struct SyncRelay {
    config: Config,
    storage: Arc<SqliteStorage>,
    /// Operational metrics (counters).
    metrics: Arc<RelayMetrics>,
    /// Live hubs per session, created on first use.
    hubs: DashMap<SessionId, Arc<SessionHub>>,
}

impl std::fmt::Debug for SyncRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRelay")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("hubs", &self.hubs.len())
            .finish_non_exhaustive()
    }
}

impl SyncRelay {
    /// Create a new SyncRelay with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        Self {
            config,
            storage: Arc::new(storage),
            metrics: Arc::new(RelayMetrics::default()),
            hubs: DashMap::new(),
        }
    }

    /// Open the database named in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let storage = SqliteStorage::new(&config.storage).await?;
        Ok(Self::new(config, storage))
    }

    /// A relay over an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let storage = SqliteStorage::in_memory().await?;
        Ok(Self::new(Config::default(), storage))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of sessions with a live hub.
    pub fn active_sessions(&self) -> usize {
        self.hubs.len()
    }

    /// The hub for a session, loading the session on first use.
    async fn hub(&self, session_id: SessionId) -> std::result::Result<Arc<SessionHub>, LogError> {
        if let Some(hub) = self.hubs.get(&session_id) {
            return Ok(Arc::clone(hub.value()));
        }

        let doc = self.storage.get_session(session_id).await?;
        let capacity = self.config.delivery.feed_capacity;
        let hub = self
            .hubs
            .entry(session_id)
            .or_insert_with(|| Arc::new(SessionHub::new(doc, capacity)));
        Ok(Arc::clone(hub.value()))
    }

    /// Delete stale sessions per `config` and drop their hubs.
    ///
    /// Returns the number of sessions removed.
    pub async fn cleanup(&self, config: &CleanupConfig) -> std::result::Result<usize, StorageError> {
        let now = now_millis();
        let completed_before = now.saturating_sub(config.completed_ttl_secs.saturating_mul(1000));
        let idle_before = now.saturating_sub(config.idle_ttl_secs.saturating_mul(1000));

        let removed = self
            .storage
            .delete_stale_sessions(completed_before, idle_before)
            .await?;
        for session_id in &removed {
            self.hubs.remove(session_id);
        }
        self.metrics
            .sessions_cleaned
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        Ok(removed.len())
    }
}

/// Store a command and broadcast it if it is new, under the hub's write lock.
async fn commit_append(
    storage: Arc<SqliteStorage>,
    hub: Arc<SessionHub>,
    metrics: Arc<RelayMetrics>,
    session_id: SessionId,
    command: Command,
) -> std::result::Result<SequenceId, LogError> {
    let _guard = hub.write.lock().await;

    let appended = storage
        .append_action(session_id, &command, now_millis())
        .await?;
    let entry = appended.entry;

    if appended.created {
        RelayMetrics::bump(&metrics.appends_total);
        tracing::debug!(
            "Appended {} from {:?} to {} as {:?}",
            entry.command.action.type_name(),
            entry.command.player_id,
            session_id,
            entry.sequence_id
        );
        let next = entry.sequence_id.next();
        hub.doc.send_if_modified(|doc| {
            doc.next_sequence = next;
            false
        });
        // No live subscribers is fine; history covers late ones.
        let _ = hub.actions.send(entry.clone());
    } else {
        RelayMetrics::bump(&metrics.duplicate_appends);
        tracing::debug!(
            "Re-append of {} in {} answered with {:?}",
            command.action_id,
            session_id,
            entry.sequence_id
        );
    }

    Ok(entry.sequence_id)
}

/// Forward history, then live entries, into a subscriber's channel.
///
/// Entries already forwarded are skipped; a lagged receiver is caught up
/// from storage.
async fn forward_entries(
    storage: Arc<SqliteStorage>,
    metrics: Arc<RelayMetrics>,
    session_id: SessionId,
    history: Vec<LogEntry>,
    mut live: broadcast::Receiver<LogEntry>,
    tx: mpsc::UnboundedSender<LogEntry>,
) {
    let mut next = SequenceId::zero();
    for entry in history {
        next = entry.sequence_id.next();
        if tx.send(entry).is_err() {
            return;
        }
    }

    loop {
        match live.recv().await {
            Ok(entry) => {
                if entry.sequence_id < next {
                    continue;
                }
                next = entry.sequence_id.next();
                if tx.send(entry).is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(missed)) => {
                RelayMetrics::bump(&metrics.lagged_catchups);
                tracing::warn!(
                    "Subscriber to {} lagged by {} entries, reading from storage",
                    session_id,
                    missed
                );
                let entries = match storage.get_actions_from(session_id, next).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::error!("Catch-up read for {} failed: {}", session_id, e);
                        return;
                    }
                };
                for entry in entries {
                    next = entry.sequence_id.next();
                    if tx.send(entry).is_err() {
                        return;
                    }
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[async_trait]
impl CommandLog for SyncRelay {
    async fn create_session(
        &self,
        seed: u64,
        seats: [SeatConfig; 2],
    ) -> std::result::Result<SessionInfo, LogError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let join_code =
                JoinCode::generate().map_err(|e| LogError::Unavailable(e.to_string()))?;
            let doc = SessionDoc::new(SessionId::new(), seed, &join_code, seats.clone(), now_millis());

            if self.storage.insert_session(&doc).await? {
                RelayMetrics::bump(&self.metrics.sessions_created);
                tracing::info!("Created session {} with code {}", doc.session_id, join_code);
                return Ok(SessionInfo {
                    session_id: doc.session_id,
                    join_code,
                });
            }
            tracing::debug!("Join code {} taken, drawing another", join_code);
        }

        Err(LogError::Unavailable(
            "could not find a free join code".into(),
        ))
    }

    async fn get_session(&self, session_id: SessionId) -> std::result::Result<SessionDoc, LogError> {
        Ok(self.storage.get_session(session_id).await?)
    }

    async fn find_session_by_join_code(
        &self,
        code: &JoinCode,
    ) -> std::result::Result<SessionId, LogError> {
        self.storage
            .find_by_join_code(code.as_str())
            .await?
            .ok_or_else(|| LogError::JoinCodeNotFound(code.to_string()))
    }

    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
    ) -> std::result::Result<SequenceId, LogError> {
        let hub = self.hub(session_id).await?;

        // Detached so a caller dropping this future cannot leave a committed
        // entry unbroadcast.
        let commit = tokio::spawn(commit_append(
            Arc::clone(&self.storage),
            hub,
            Arc::clone(&self.metrics),
            session_id,
            command.clone(),
        ));
        commit
            .await
            .map_err(|e| LogError::Unavailable(format!("append task failed: {e}")))?
    }

    async fn subscribe_actions(&self, session_id: SessionId) -> std::result::Result<ActionFeed, LogError> {
        let hub = self.hub(session_id).await?;

        // Subscribe before reading history so nothing falls in between.
        let live = hub.actions.subscribe();
        let history = self
            .storage
            .get_actions_from(session_id, SequenceId::zero())
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_entries(
            Arc::clone(&self.storage),
            Arc::clone(&self.metrics),
            session_id,
            history,
            live,
            tx,
        ));

        RelayMetrics::bump(&self.metrics.subscriptions_total);
        Ok(ActionFeed::with_forwarder(rx, forwarder))
    }

    async fn get_all_actions(&self, session_id: SessionId) -> std::result::Result<Vec<LogEntry>, LogError> {
        let entries = self
            .storage
            .get_actions_from(session_id, SequenceId::zero())
            .await?;
        if entries.is_empty() {
            // Distinguish an empty log from a missing session.
            self.storage.get_session(session_id).await?;
        }
        Ok(entries)
    }

    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> std::result::Result<SessionDoc, LogError> {
        let hub = self.hub(session_id).await?;
        let _guard = hub.write.lock().await;

        let doc = self.storage.set_seat_ready(session_id, player_id).await?;
        hub.doc.send_replace(doc.clone());
        Ok(doc)
    }

    async fn subscribe_ready_state(
        &self,
        session_id: SessionId,
    ) -> std::result::Result<watch::Receiver<SessionDoc>, LogError> {
        Ok(self.hub(session_id).await?.doc.subscribe())
    }

    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> std::result::Result<(), LogError> {
        let hub = self.hub(session_id).await?;
        let _guard = hub.write.lock().await;

        let doc = self.storage.update_status(session_id, status).await?;
        tracing::info!("Session {} is now {}", session_id, status.as_str());
        hub.doc.send_replace(doc);
        Ok(())
    }
}
