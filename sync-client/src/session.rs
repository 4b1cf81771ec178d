//! Session setup and wiring.
//!
//! A [`SessionContext`] carries everything the per-session pieces share
//! (buffer, seat, config, event channel) and is passed to each of them
//! explicitly. [`SessionManager`] creates or joins sessions on a log and
//! hands back the context plus the seat setup the host needs to build its
//! engine. [`GameSession`] wires a [`NetworkController`] and a
//! [`NetworkSync`] around that engine.
//!
//! ## Example
//!
//! ```ignore
//! let manager = SessionManager::new(log, SyncConfig::default());
//! let setup = manager.join_by_code("ABC234", PlayerId::ONE, my_deck).await?;
//!
//! let engine = Arc::new(MyEngine::new(setup.seed(), &setup.seats));
//! let mut session = GameSession::new(setup.context, log, engine);
//! let catch_up = session.start().await?;
//! session.wait_until_started().await?;
//! ```

use std::sync::Arc;

use sync_core::JoinCode;
use sync_types::{PlayerId, SessionId};
use tokio::sync::broadcast;
use tracing::info;

use crate::buffer::CommandBuffer;
use crate::config::SyncConfig;
use crate::controller::NetworkController;
use crate::engine::Engine;
use crate::error::ClientError;
use crate::events::SyncEvent;
use crate::log::{CommandLog, SeatConfig, SessionDoc, SessionStatus};
use crate::subscription::Subscription;
use crate::sync::{CatchUp, NetworkSync};

/// Per-session state shared by the controller and the sync.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The session.
    pub session_id: SessionId,
    /// The seat played on this device.
    pub local_player: PlayerId,
    /// Join code, when known.
    pub join_code: Option<JoinCode>,
    /// Seed for the deterministic engine.
    pub seed: u64,
    /// Remote commands, keyed by sequence id.
    pub buffer: CommandBuffer,
    /// Sync configuration.
    pub config: SyncConfig,
    /// Session event channel.
    pub events: broadcast::Sender<SyncEvent>,
}

impl SessionContext {
    /// Create a context with an empty buffer and a fresh event channel.
    pub fn new(session_id: SessionId, local_player: PlayerId, seed: u64, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            session_id,
            local_player,
            join_code: None,
            seed,
            buffer: CommandBuffer::new(),
            config,
            events,
        }
    }

    /// Attach the session's join code.
    pub fn with_join_code(mut self, code: JoinCode) -> Self {
        self.join_code = Some(code);
        self
    }

    /// The seat played from the other device.
    pub fn remote_player(&self) -> PlayerId {
        self.local_player.opponent()
    }

    /// Subscribe to session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

/// What the host needs to build its engine for a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Context to pass to [`GameSession::new`].
    pub context: SessionContext,
    /// Seat setup, indexed by player id.
    pub seats: [SeatConfig; 2],
}

impl SessionSetup {
    /// The engine seed.
    pub fn seed(&self) -> u64 {
        self.context.seed
    }

    /// The session id.
    pub fn session_id(&self) -> SessionId {
        self.context.session_id
    }
}

/// Creates and joins sessions on a command log.
pub struct SessionManager<L: CommandLog> {
    log: Arc<L>,
    config: SyncConfig,
}

impl<L: CommandLog> SessionManager<L> {
    /// Manager for sessions on `log`, each using `config`.
    pub fn new(log: Arc<L>, config: SyncConfig) -> Self {
        Self { log, config }
    }

    /// The underlying log.
    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    /// Create a session hosted by `local_player`.
    ///
    /// A seed is drawn from the OS when none is given.
    pub async fn create_session(
        &self,
        local_player: PlayerId,
        local_seat: SeatConfig,
        remote_seat: SeatConfig,
        seed: Option<u64>,
    ) -> Result<SessionSetup, ClientError> {
        let seed = match seed {
            Some(seed) => seed,
            None => random_seed()?,
        };
        let seats = order_seats(local_player, local_seat, remote_seat);

        let info = self.log.create_session(seed, seats.clone()).await?;
        info!(
            "created session {} (code {}) as {:?}",
            info.session_id, info.join_code, local_player
        );

        let context = SessionContext::new(info.session_id, local_player, seed, self.config.clone())
            .with_join_code(info.join_code);
        Ok(SessionSetup { context, seats })
    }

    /// Join a session by its join code.
    ///
    /// The code is matched case-insensitively. The remote seat's setup comes
    /// from the session document; the local seat uses `local_seat`.
    pub async fn join_by_code(
        &self,
        code: &str,
        local_player: PlayerId,
        local_seat: SeatConfig,
    ) -> Result<SessionSetup, ClientError> {
        let code = JoinCode::parse(code)?;
        let session_id = self.log.find_session_by_join_code(&code).await?;
        let doc = self.log.get_session(session_id).await?;

        let remote = doc.seats[local_player.opponent().index()].clone();
        let seats = order_seats(local_player, local_seat, remote);

        info!("joined session {} as {:?}", session_id, local_player);
        let context = SessionContext::new(session_id, local_player, doc.seed, self.config.clone())
            .with_join_code(code);
        Ok(SessionSetup { context, seats })
    }

    /// Return to a session already known by id, keeping the stored seats.
    pub async fn rejoin(
        &self,
        session_id: SessionId,
        local_player: PlayerId,
    ) -> Result<SessionSetup, ClientError> {
        let doc = self.log.get_session(session_id).await?;
        let mut context =
            SessionContext::new(session_id, local_player, doc.seed, self.config.clone());
        if let Ok(code) = JoinCode::parse(&doc.join_code) {
            context = context.with_join_code(code);
        }

        info!("rejoined session {} as {:?}", session_id, local_player);
        Ok(SessionSetup {
            context,
            seats: doc.seats,
        })
    }
}

fn order_seats(local_player: PlayerId, local: SeatConfig, remote: SeatConfig) -> [SeatConfig; 2] {
    if local_player == PlayerId::ZERO {
        [local, remote]
    } else {
        [remote, local]
    }
}

fn random_seed() -> Result<u64, ClientError> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| ClientError::Entropy(e.to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

/// A running game on one device: controller for the remote seat, sync with
/// the log.
pub struct GameSession<L: CommandLog, E: Engine> {
    context: SessionContext,
    log: Arc<L>,
    engine: Arc<E>,
    controller: Arc<NetworkController<E>>,
    sync: NetworkSync<L, E>,
    subscription: Option<Subscription>,
}

impl<L: CommandLog, E: Engine> GameSession<L, E> {
    /// Wire the pieces together. Nothing runs until [`start`](Self::start).
    pub fn new(context: SessionContext, log: Arc<L>, engine: Arc<E>) -> Self {
        let controller = NetworkController::new(&context, Arc::clone(&engine));
        let sync = NetworkSync::new(&context, Arc::clone(&log), Arc::clone(&engine));
        Self {
            context,
            log,
            engine,
            controller,
            sync,
            subscription: None,
        }
    }

    /// Catch up on the log, start syncing, and mark the local seat ready.
    ///
    /// Call before the engine emits its first turn request. The returned
    /// [`CatchUp`] lists the local seat's own history for hosts that need to
    /// re-drive their engine.
    pub async fn start(&mut self) -> Result<CatchUp, ClientError> {
        if self.subscription.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        self.sync.start_listening().await?;
        let catch_up = self.sync.load_all_actions().await?;
        self.sync.start_uploading();
        self.subscription = Some(self.controller.spawn());

        self.log
            .set_seat_ready(self.context.session_id, self.context.local_player)
            .await?;
        info!(
            "session {} running as {:?}",
            self.context.session_id, self.context.local_player
        );
        Ok(catch_up)
    }

    /// Wait until both seats are ready.
    pub async fn wait_until_started(&self) -> Result<SessionDoc, ClientError> {
        let mut ready = self
            .log
            .subscribe_ready_state(self.context.session_id)
            .await?;
        let doc = ready
            .wait_for(|doc| doc.started)
            .await
            .map_err(|_| ClientError::NotRunning)?;
        Ok(doc.clone())
    }

    /// Mark the session completed.
    pub async fn complete(&self) -> Result<(), ClientError> {
        self.log
            .update_session_status(self.context.session_id, SessionStatus::Completed)
            .await?;
        info!("session {} completed", self.context.session_id);
        Ok(())
    }

    /// Stop following the engine and the log.
    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.sync.stop();
        self.controller.stop();
    }

    /// Check if [`start`](Self::start) has run and the session is not shut down.
    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// The session context.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// The remote seat's controller.
    pub fn controller(&self) -> &Arc<NetworkController<E>> {
        &self.controller
    }

    /// The log sync.
    pub fn sync(&self) -> &NetworkSync<L, E> {
        &self.sync
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.context.subscribe_events()
    }
}

impl<L: CommandLog, E: Engine> Drop for GameSession<L, E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
