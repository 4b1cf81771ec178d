//! NetworkSync - moves commands between the engine and the log.
//!
//! Two directions:
//!
//! ```text
//! Engine::applied_actions ──► forwarder ──► UploadQueue ──► CommandLog::append_action
//! CommandLog feed ──► SequenceTracker ──► (drop echo) ──► CommandBuffer
//! ```
//!
//! Local actions are applied optimistically by the engine and uploaded in
//! the background; the log's atomic counter decides their final position.
//! Remote entries are routed into the buffer, where the controller picks
//! them up in order.
//!
//! Every routed sequence id is recorded in a [`SequenceTracker`], so history
//! replay and the live feed can overlap without double-adding.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sync_core::{retry_delay, Recorded, SequenceTracker, UploadQueue};
use sync_types::{DesyncEvent, LogEntry, PlayerId, SequenceId, SessionId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::CommandBuffer;
use crate::config::SyncConfig;
use crate::engine::Engine;
use crate::error::ClientError;
use crate::events::SyncEvent;
use crate::log::CommandLog;
use crate::session::SessionContext;

type DesyncHandler = Box<dyn Fn(&DesyncEvent) + Send + Sync>;

/// Result of replaying the log's history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatchUp {
    /// Remote entries newly added to the buffer.
    pub remote_buffered: usize,
    /// The local seat's own entries, for re-driving the local engine.
    pub local_entries: Vec<LogEntry>,
    /// The id the log will assign next.
    pub next_sequence: SequenceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Buffered,
    Echo,
    Skipped,
}

/// Routes log entries into the buffer, once each.
struct Router {
    local_player: PlayerId,
    buffer: CommandBuffer,
    tracker: Mutex<SequenceTracker>,
}

impl Router {
    fn route(&self, entry: &LogEntry) -> Route {
        let seq = entry.sequence_id;

        let recorded = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(seq);
        match recorded {
            Recorded::Duplicate => {
                debug!("skipping re-delivered {:?}", seq);
                return Route::Skipped;
            }
            Recorded::OutOfOrder { missing_from } => {
                warn!("log delivered {:?} before {:?}", seq, missing_from);
            }
            Recorded::InOrder => {}
        }

        if entry.command.player_id == self.local_player {
            return Route::Echo;
        }

        match self.buffer.add_command(seq, entry.command.clone()) {
            Ok(()) => {
                debug!(
                    "buffered {} from {:?} at {:?}",
                    entry.command.action.type_name(),
                    entry.command.player_id,
                    seq
                );
                Route::Buffered
            }
            Err(e) => {
                warn!("could not buffer {:?}: {}", seq, e);
                Route::Skipped
            }
        }
    }
}

/// Copies the local seat's applied actions off the engine stream.
///
/// Runs apart from the uploader so retry backoff never stalls the engine
/// stream. Actions lost to a lagging stream are reported, never dropped
/// silently.
async fn forward_local_actions(
    mut applied: broadcast::Receiver<sync_types::Command>,
    local_player: PlayerId,
    local_tx: mpsc::UnboundedSender<sync_types::Command>,
    events: broadcast::Sender<SyncEvent>,
) {
    loop {
        match applied.recv().await {
            Ok(command) => {
                if command.player_id != local_player {
                    continue;
                }
                if local_tx.send(command).is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(missed)) => {
                error!("{} applied actions lost before upload", missed);
                let _ = events.send(SyncEvent::UploadsLost { missed });
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("applied action stream closed");
}

/// Drains the upload queue into the log, one command at a time.
struct Uploader<L: CommandLog> {
    log: Arc<L>,
    session_id: SessionId,
    config: SyncConfig,
    queue: UploadQueue,
    events: broadcast::Sender<SyncEvent>,
}

impl<L: CommandLog> Uploader<L> {
    async fn run(
        mut self,
        mut local: mpsc::UnboundedReceiver<sync_types::Command>,
        mut retries: mpsc::UnboundedReceiver<()>,
    ) {
        loop {
            tokio::select! {
                // A stalled, full queue leaves new actions waiting in the channel.
                received = local.recv(), if !self.queue.is_full() => match received {
                    Some(command) => {
                        // A new local action gives a stalled queue another go.
                        self.queue.reset_attempts();
                        if let Err(e) = self.queue.enqueue(command) {
                            error!("dropping local action: {}", e);
                        }
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                Some(()) = retries.recv() => {
                    info!("retrying {} queued uploads", self.queue.len());
                    self.queue.reset_attempts();
                }
                else => break,
            }
            self.drain().await;
        }
        debug!("upload loop finished");
    }

    /// Append everything queued, in order. Stops at a command that has
    /// exhausted its attempts.
    async fn drain(&mut self) {
        while let Some(upload) = self.queue.dequeue() {
            let action_id = upload.action_id();
            match self
                .log
                .append_action(self.session_id, &upload.command)
                .await
            {
                Ok(seq) => {
                    self.queue.ack(&action_id);
                    debug!("uploaded {:?} as {:?}", action_id, seq);
                }
                Err(e) if upload.attempts >= self.config.upload_max_attempts => {
                    self.queue.nack(&action_id);
                    error!(
                        "giving up on {:?} after {} attempts: {}",
                        action_id, upload.attempts, e
                    );
                    let _ = self.events.send(SyncEvent::UploadFailed {
                        action_id,
                        attempts: upload.attempts,
                        error: e.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    self.queue.nack(&action_id);
                    let delay = retry_delay(upload.attempts, self.config.upload_retry_base);
                    warn!(
                        "append of {:?} failed (attempt {}), retrying in {:?}: {}",
                        action_id, upload.attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Orchestrates one peer's traffic with the log.
pub struct NetworkSync<L: CommandLog, E: Engine> {
    log: Arc<L>,
    engine: Arc<E>,
    session_id: SessionId,
    local_player: PlayerId,
    config: SyncConfig,
    router: Arc<Router>,
    events: broadcast::Sender<SyncEvent>,
    desync_handler: Mutex<Option<DesyncHandler>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    retry_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl<L: CommandLog, E: Engine> NetworkSync<L, E> {
    /// Create a sync for the session described by `ctx`. Nothing runs until
    /// [`start_listening`](Self::start_listening) / [`start_uploading`](Self::start_uploading).
    pub fn new(ctx: &SessionContext, log: Arc<L>, engine: Arc<E>) -> Self {
        Self {
            log,
            engine,
            session_id: ctx.session_id,
            local_player: ctx.local_player,
            config: ctx.config.clone(),
            router: Arc::new(Router {
                local_player: ctx.local_player,
                buffer: ctx.buffer.clone(),
                tracker: Mutex::new(SequenceTracker::new()),
            }),
            events: ctx.events.clone(),
            desync_handler: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            retry_tx: Mutex::new(None),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session being synced.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The seat this peer plays.
    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    /// The buffer remote entries are routed into.
    pub fn buffer(&self) -> &CommandBuffer {
        &self.router.buffer
    }

    /// Subscribe to the log and route every remote entry into the buffer.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        let mut feed = self.log.subscribe_actions(self.session_id).await?;
        let router = Arc::clone(&self.router);

        let task = tokio::spawn(async move {
            while let Some(entry) = feed.next().await {
                router.route(&entry);
            }
            debug!("action feed closed");
        });
        self.lock_tasks().push(task);
        info!("listening to session {}", self.session_id);
        Ok(())
    }

    /// Upload every action the local seat applies.
    ///
    /// The engine stream is subscribed before this returns.
    pub fn start_uploading(&self) {
        let applied = self.engine.applied_actions();
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(forward_local_actions(
            applied,
            self.local_player,
            local_tx,
            self.events.clone(),
        ));
        let uploader = Uploader {
            log: Arc::clone(&self.log),
            session_id: self.session_id,
            config: self.config.clone(),
            queue: UploadQueue::new(self.config.upload_queue_capacity),
            events: self.events.clone(),
        };
        let task = tokio::spawn(uploader.run(local_rx, retry_rx));

        *self.retry_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(retry_tx);
        let mut tasks = self.lock_tasks();
        tasks.push(forwarder);
        tasks.push(task);
    }

    /// Retry uploads stalled after exhausting their attempts.
    pub fn retry_uploads(&self) {
        if let Some(tx) = self
            .retry_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(());
        }
    }

    /// Register the callback for detected desyncs, replacing any previous one.
    pub fn on_desync(&self, handler: impl Fn(&DesyncEvent) + Send + Sync + 'static) {
        *self
            .desync_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Compare two state checksums taken after `sequence_id`.
    ///
    /// On mismatch a [`DesyncEvent`] goes to the registered callback and the
    /// event stream. Nothing is repaired.
    pub fn verify_checksum(&self, sequence_id: SequenceId, expected: &str, actual: &str) -> bool {
        if expected == actual {
            return true;
        }

        let event = DesyncEvent {
            sequence_id,
            expected: expected.to_string(),
            actual: actual.to_string(),
        };
        error!(
            "desync at {:?}: expected {}, got {}",
            sequence_id, expected, actual
        );

        if let Some(handler) = self
            .desync_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handler(&event);
        }
        let _ = self.events.send(SyncEvent::DesyncDetected(event));
        false
    }

    /// Replay the whole log into the buffer.
    ///
    /// Afterwards the buffer holds exactly what it would hold had this peer
    /// been listening since sequence 0.
    pub async fn load_all_actions(&self) -> Result<CatchUp, ClientError> {
        let mut entries = self.log.get_all_actions(self.session_id).await?;
        entries.sort_by_key(|e| e.sequence_id);

        let mut catch_up = CatchUp::default();
        for entry in entries {
            catch_up.next_sequence = entry.sequence_id.next();
            match self.router.route(&entry) {
                Route::Buffered => catch_up.remote_buffered += 1,
                Route::Echo | Route::Skipped => {}
            }
            if entry.command.player_id == self.local_player {
                catch_up.local_entries.push(entry);
            }
        }

        info!(
            "caught up on session {}: {} remote entries buffered, next id {:?}",
            self.session_id, catch_up.remote_buffered, catch_up.next_sequence
        );
        Ok(catch_up)
    }

    /// Stop listening and uploading.
    pub fn stop(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.retry_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl<L: CommandLog, E: Engine> Drop for NetworkSync<L, E> {
    fn drop(&mut self) {
        self.stop();
    }
}
