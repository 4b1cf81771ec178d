//! Two-peer game harness.
//!
//! Hosts and joins sessions on a shared [`CommandLog`], each peer behind its
//! own [`JitterLog`], and plays a random but seeded script of turns:
//!
//! ```text
//!   host peer ──► JitterLog ──┐
//!                             ├──► shared log (MemoryLog / SyncRelay)
//!   guest peer ──► JitterLog ─┘
//! ```
//!
//! Each peer runs a [`GameSession`] around a scripted [`MockEngine`] and a
//! player task that answers its own seat's turn requests. A rejoining peer
//! replays its seat's history from the log before choosing anything new.

use crate::assertions::PeerState;
use crate::jitter::{JitterConfig, JitterLog};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use sync_client::{
    CatchUp, ClientError, CommandLog, Engine, GameSession, MockEngine, SeatConfig,
    SessionManager, SessionSetup, SyncConfig, SyncEvent,
};
use sync_types::{
    Action, ActionId, Command, PlayerId, RequestKind, SequenceId, SessionId, TurnRequest,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Seat that creates the session.
pub const HOST: PlayerId = PlayerId::ZERO;
/// Seat that joins it.
pub const GUEST: PlayerId = PlayerId::ONE;

/// Errors that can occur while running a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Session setup or start failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Log access failed.
    #[error("log error: {0}")]
    Log(#[from] sync_client::LogError),

    /// No session has been hosted yet.
    #[error("no session hosted")]
    NoSession,

    /// A peer did not apply enough commands in time.
    #[error("{peer} applied {applied} of {expected} commands before timing out")]
    Timeout {
        /// The slow peer.
        peer: String,
        /// Commands expected.
        expected: usize,
        /// Commands applied.
        applied: usize,
    },
}

/// A random turn order, starting with the host.
///
/// About a fifth of the turns are input prompts; the seat changes on roughly
/// half of the turns.
pub fn random_script(turns: usize, rng: &mut impl Rng) -> Vec<TurnRequest> {
    let mut seat = HOST;
    (0..turns)
        .map(|turn| {
            if turn > 0 && rng.gen_bool(0.5) {
                seat = seat.opponent();
            }
            if rng.gen_bool(0.2) {
                TurnRequest::input(seat)
            } else {
                TurnRequest::action(seat)
            }
        })
        .collect()
}

/// Index of the first turn at or after `from` that belongs to `seat`.
pub fn next_turn_of(script: &[TurnRequest], seat: PlayerId, from: usize) -> Option<usize> {
    script
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, request)| request.player_id == seat)
        .map(|(index, _)| index)
}

fn random_action(kind: RequestKind, turn: usize, rng: &mut StdRng) -> Action {
    match kind {
        RequestKind::InputRequired => Action::Input {
            input: serde_json::json!({ "choice": rng.gen_range(0..4) }),
        },
        RequestKind::ActionRequired => match rng.gen_range(0..4) {
            0 => Action::PlayCard {
                card_id: format!("card-{turn}"),
                target_slot: None,
            },
            1 => Action::Activate {
                unit_id: format!("unit-{}", rng.gen_range(0..5)),
            },
            2 => Action::ActivateLeader,
            _ => Action::Done,
        },
    }
}

/// Answer `seat`'s turn requests: replay `history` first, then play randomly.
fn spawn_player(
    engine: Arc<MockEngine>,
    seat: PlayerId,
    history: Vec<Command>,
    seed: u64,
) -> JoinHandle<()> {
    // Subscribed before the engine starts, so the first request is seen.
    let mut requests = engine.turn_requests();
    tokio::spawn(async move {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut history: VecDeque<Command> = history.into();
        let mut turn = 0;

        loop {
            let request = match requests.recv().await {
                Ok(request) => request,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("{:?} player missed {} turn requests", seat, missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            turn += 1;
            if request.player_id != seat {
                continue;
            }

            let played = match history.pop_front() {
                Some(command) => engine.replay(command),
                None => engine
                    .apply_local(seat, random_action(request.kind, turn, &mut rng))
                    .map(|_| ()),
            };
            if let Err(e) = played {
                tracing::warn!("{:?} could not play turn {}: {}", seat, turn, e);
            }
        }
    })
}

/// One device in a scenario.
pub struct Peer<L: CommandLog> {
    name: String,
    seat: PlayerId,
    log: Arc<JitterLog<L>>,
    engine: Arc<MockEngine>,
    session: GameSession<JitterLog<L>, MockEngine>,
    catch_up: CatchUp,
    player: Option<JoinHandle<()>>,
}

impl<L: CommandLog> Peer<L> {
    async fn start(
        name: String,
        setup: SessionSetup,
        log: Arc<JitterLog<L>>,
        script: &[TurnRequest],
        seed: u64,
    ) -> Result<Self, HarnessError> {
        let seat = setup.context.local_player;
        let engine = Arc::new(MockEngine::with_script(script.iter().copied()));
        let mut session = GameSession::new(setup.context, Arc::clone(&log), Arc::clone(&engine));

        let catch_up = session.start().await?;
        let history = catch_up
            .local_entries
            .iter()
            .map(|entry| entry.command.clone())
            .collect();
        let player = spawn_player(Arc::clone(&engine), seat, history, seed);
        engine.start();

        tracing::info!(
            "{} started as {:?}, {} remote entries waiting",
            name,
            seat,
            catch_up.remote_buffered
        );
        Ok(Self {
            name,
            seat,
            log,
            engine,
            session,
            catch_up,
            player: Some(player),
        })
    }

    /// Name used in assertion output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seat played.
    pub fn seat(&self) -> PlayerId {
        self.seat
    }

    /// This peer's view of the log.
    pub fn log(&self) -> &Arc<JitterLog<L>> {
        &self.log
    }

    /// The peer's engine.
    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }

    /// The running session.
    pub fn session(&self) -> &GameSession<JitterLog<L>, MockEngine> {
        &self.session
    }

    /// What the peer found in the log when it started.
    pub fn catch_up(&self) -> &CatchUp {
        &self.catch_up
    }

    /// Subscribe to the session's events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.session.events()
    }

    /// Wait until `count` commands have been applied.
    pub async fn wait_for_applied(&self, count: usize, timeout: Duration) -> Result<(), HarnessError> {
        if self.engine.wait_for_applied(count, timeout).await {
            return Ok(());
        }
        Err(HarnessError::Timeout {
            peer: self.name.clone(),
            expected: count,
            applied: self.engine.applied().len(),
        })
    }

    /// Snapshot for the assertion helpers.
    pub fn state(&self) -> PeerState {
        PeerState {
            peer: self.name.clone(),
            applied: self
                .engine
                .applied()
                .iter()
                .map(|command| command.action_id)
                .collect(),
            checksum: self.engine.state_checksum().into_string(),
        }
    }

    /// Check every remote command's checksum against local state.
    ///
    /// Returns the number of mismatches; each one is also reported through
    /// the session's desync handler and event stream.
    pub fn verify_checksums(&self) -> usize {
        let applied = self.engine.applied();
        let mut mismatches = 0;
        for (index, command) in applied.iter().enumerate() {
            if command.player_id == self.seat {
                continue;
            }
            let Some(expected) = &command.checksum else {
                continue;
            };
            let actual = self.engine.checksum_after(index + 1);
            let sequence_id = SequenceId::new(index as u64);
            if !self
                .session
                .sync()
                .verify_checksum(sequence_id, expected, actual.as_str())
            {
                mismatches += 1;
            }
        }
        mismatches
    }

    /// Stop playing and disconnect from the log.
    pub fn leave(mut self) {
        tracing::info!("{} leaving", self.name);
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(player) = self.player.take() {
            player.abort();
        }
        self.session.shutdown();
    }
}

impl<L: CommandLog> Drop for Peer<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds peers for one session on a shared log.
pub struct ChaosHarness<L: CommandLog> {
    log: Arc<L>,
    jitter: JitterConfig,
    sync_config: SyncConfig,
    script: Vec<TurnRequest>,
    rng: StdRng,
    session_id: Option<SessionId>,
    join_code: Option<String>,
    peers_started: usize,
}

impl<L: CommandLog> ChaosHarness<L> {
    /// Harness for a game of `turns` turns, all randomness derived from `seed`.
    ///
    /// Peers wait for remote commands without a bound and retry uploads
    /// quickly, so injected failures slow a game down but never stall it.
    pub fn new(log: Arc<L>, turns: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let script = random_script(turns, &mut rng);
        tracing::info!("chaos harness seed {} ({} turns)", seed, turns);

        Self {
            log,
            jitter: JitterConfig::default(),
            sync_config: SyncConfig::default()
                .with_unbounded_wait()
                .with_upload_attempts(25)
                .with_upload_retry_base(Duration::from_millis(2)),
            script,
            rng,
            session_id: None,
            join_code: None,
            peers_started: 0,
        }
    }

    /// Inject `jitter` for every peer started afterwards.
    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the client configuration.
    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// The turn order both engines follow.
    pub fn script(&self) -> &[TurnRequest] {
        &self.script
    }

    /// The hosted session, once there is one.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// The shared log.
    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    fn peer_log(&mut self, jitter: JitterConfig) -> Arc<JitterLog<L>> {
        let jitter = jitter.with_seed(self.rng.gen());
        Arc::new(JitterLog::new(Arc::clone(&self.log), jitter))
    }

    fn peer_name(&mut self, seat: PlayerId) -> String {
        self.peers_started += 1;
        let role = if seat == HOST { "host" } else { "guest" };
        format!("{}#{}", role, self.peers_started)
    }

    async fn start_peer(
        &mut self,
        setup: SessionSetup,
        log: Arc<JitterLog<L>>,
    ) -> Result<Peer<L>, HarnessError> {
        let name = self.peer_name(setup.context.local_player);
        let seed = self.rng.gen();
        Peer::start(name, setup, log, &self.script, seed).await
    }

    /// Create the session and start the host.
    pub async fn host(&mut self) -> Result<Peer<L>, HarnessError> {
        let jitter = self.jitter.clone();
        self.host_with(jitter).await
    }

    /// Create the session and start the host behind `jitter`.
    pub async fn host_with(&mut self, jitter: JitterConfig) -> Result<Peer<L>, HarnessError> {
        let log = self.peer_log(jitter);
        let manager = SessionManager::new(Arc::clone(&log), self.sync_config.clone());
        let seed = self.rng.gen();
        let setup = manager
            .create_session(
                HOST,
                SeatConfig::new(["rookie", "scout", "archer"]),
                SeatConfig::new(["knight", "priest", "ranger"]),
                Some(seed),
            )
            .await?;

        self.session_id = Some(setup.session_id());
        self.join_code = setup.context.join_code.as_ref().map(|code| code.to_string());
        self.start_peer(setup, log).await
    }

    /// Join the hosted session by code as the guest.
    pub async fn join(&mut self) -> Result<Peer<L>, HarnessError> {
        let jitter = self.jitter.clone();
        self.join_with(jitter).await
    }

    /// Join the hosted session by code as the guest, behind `jitter`.
    pub async fn join_with(&mut self, jitter: JitterConfig) -> Result<Peer<L>, HarnessError> {
        let code = self.join_code.clone().ok_or(HarnessError::NoSession)?;
        let log = self.peer_log(jitter);
        let manager = SessionManager::new(Arc::clone(&log), self.sync_config.clone());
        // Typed the way a player would.
        let setup = manager
            .join_by_code(&code.to_lowercase(), GUEST, SeatConfig::default())
            .await?;
        self.start_peer(setup, log).await
    }

    /// Return to the hosted session on a fresh engine.
    pub async fn rejoin(&mut self, seat: PlayerId) -> Result<Peer<L>, HarnessError> {
        let session_id = self.session_id.ok_or(HarnessError::NoSession)?;
        let log = self.peer_log(self.jitter.clone());
        let manager = SessionManager::new(Arc::clone(&log), self.sync_config.clone());
        let setup = manager.rejoin(session_id, seat).await?;
        self.start_peer(setup, log).await
    }

    /// Wait until the shared log holds at least `count` entries.
    pub async fn wait_for_logged(&self, count: usize, timeout: Duration) -> Result<(), HarnessError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let logged = self.log_order().await?.len();
            if logged >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::Timeout {
                    peer: "log".into(),
                    expected: count,
                    applied: logged,
                });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Action ids in log order, read from the shared log directly.
    pub async fn log_order(&self) -> Result<Vec<ActionId>, HarnessError> {
        let session_id = self.session_id.ok_or(HarnessError::NoSession)?;
        let entries = self.log.get_all_actions(session_id).await?;
        Ok(entries
            .iter()
            .map(|entry| entry.command.action_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::MemoryLog;

    #[test]
    fn script_starts_with_host_and_mixes_seats() {
        let mut rng = StdRng::seed_from_u64(3);
        let script = random_script(200, &mut rng);

        assert_eq!(script.len(), 200);
        assert_eq!(script[0].player_id, HOST);
        assert!(script.iter().any(|r| r.player_id == GUEST));
        assert!(script.iter().any(|r| r.kind == RequestKind::InputRequired));
    }

    #[test]
    fn same_seed_same_script() {
        let a = random_script(50, &mut StdRng::seed_from_u64(9));
        let b = random_script(50, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn next_turn_of_skips_other_seat() {
        let script = [
            TurnRequest::action(HOST),
            TurnRequest::action(GUEST),
            TurnRequest::input(HOST),
        ];

        assert_eq!(next_turn_of(&script, HOST, 1), Some(2));
        assert_eq!(next_turn_of(&script, GUEST, 2), None);
    }

    #[test]
    fn random_action_answers_the_request() {
        let mut rng = StdRng::seed_from_u64(5);
        for turn in 0..50 {
            assert!(random_action(RequestKind::ActionRequired, turn, &mut rng)
                .satisfies(RequestKind::ActionRequired));
            assert!(random_action(RequestKind::InputRequired, turn, &mut rng)
                .satisfies(RequestKind::InputRequired));
        }
    }

    #[tokio::test]
    async fn join_before_host_fails() {
        let mut harness = ChaosHarness::new(Arc::new(MemoryLog::new()), 4, 1);

        let result = harness.join().await;

        assert!(matches!(result, Err(HarnessError::NoSession)));
    }
}
