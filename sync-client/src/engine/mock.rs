//! Mock engine for testing.
//!
//! Records submissions, re-emits every applied command, and can drive a
//! scripted turn order so two peers behave like two copies of the same
//! deterministic game.

use super::{Engine, EngineError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_types::{Action, Command, PlayerId, StateChecksum, TurnRequest};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Mock engine for testing.
///
/// Without a script, turn requests are only emitted by
/// [`request_action`](Self::request_action) / [`request_input`](Self::request_input).
/// With a script, the next request is emitted every time a command is
/// applied, and commands from the wrong seat are rejected.
#[derive(Debug)]
pub struct MockEngine {
    inner: Arc<Mutex<MockEngineInner>>,
    turn_tx: broadcast::Sender<TurnRequest>,
    applied_tx: broadcast::Sender<Command>,
}

#[derive(Debug, Default)]
struct MockEngineInner {
    applied: Vec<Command>,
    submitted: Vec<Command>,
    script: VecDeque<TurnRequest>,
    current: Option<TurnRequest>,
    scripted: bool,
    fail_next_submit: Option<String>,
}

impl MockEngine {
    /// Create a new mock engine with no script.
    pub fn new() -> Self {
        let (turn_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (applied_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MockEngineInner::default())),
            turn_tx,
            applied_tx,
        }
    }

    /// Create a mock engine that walks through `script` one request at a time.
    ///
    /// Nothing is emitted until [`start`](Self::start).
    pub fn with_script(script: impl IntoIterator<Item = TurnRequest>) -> Self {
        let engine = Self::new();
        {
            let mut inner = engine.inner.lock().unwrap();
            inner.script = script.into_iter().collect();
            inner.scripted = true;
        }
        engine
    }

    /// Emit the first scripted request.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.advance(&mut inner);
    }

    /// Emit an ACTION_REQUIRED for `player`.
    pub fn request_action(&self, player: PlayerId) {
        let _ = self.turn_tx.send(TurnRequest::action(player));
    }

    /// Emit an INPUT_REQUIRED for `player`.
    pub fn request_input(&self, player: PlayerId) {
        let _ = self.turn_tx.send(TurnRequest::input(player));
    }

    /// Apply a locally chosen action, as the local UI would.
    ///
    /// The returned command carries the post-apply state checksum.
    pub fn apply_local(&self, player: PlayerId, action: Action) -> Result<Command, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let command = Command::new(player, action);
        self.check_turn(&inner, &command)?;

        let checksum = digest(inner.applied.iter().chain(std::iter::once(&command)));
        let command = command.with_checksum(checksum.into_string());
        self.apply(&mut inner, command.clone());
        Ok(command)
    }

    /// Re-apply a command from history (late-join replay of the local seat).
    pub fn replay(&self, command: Command) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_turn(&inner, &command)?;
        self.apply(&mut inner, command);
        Ok(())
    }

    /// Every command applied, in order.
    pub fn applied(&self) -> Vec<Command> {
        self.inner.lock().unwrap().applied.clone()
    }

    /// Every command received through `submit_action` / `submit_input`.
    pub fn submitted(&self) -> Vec<Command> {
        self.inner.lock().unwrap().submitted.clone()
    }

    /// The scripted request currently waiting for an answer.
    pub fn current_request(&self) -> Option<TurnRequest> {
        self.inner.lock().unwrap().current
    }

    /// Check if the script has been played out.
    pub fn is_finished(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.scripted && inner.current.is_none() && inner.script.is_empty()
    }

    /// Checksum of the current state.
    pub fn state_checksum(&self) -> StateChecksum {
        self.checksum_after(usize::MAX)
    }

    /// Checksum of the state after the first `count` applied commands.
    pub fn checksum_after(&self, count: usize) -> StateChecksum {
        let inner = self.inner.lock().unwrap();
        let end = count.min(inner.applied.len());
        digest(inner.applied[..end].iter())
    }

    /// Cause the next submit to fail with the given error.
    pub fn fail_next_submit(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_submit = Some(error.to_string());
    }

    /// Poll until `count` commands have been applied or `timeout` passes.
    pub async fn wait_for_applied(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.lock().unwrap().applied.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn check_turn(&self, inner: &MockEngineInner, command: &Command) -> Result<(), EngineError> {
        if !inner.scripted {
            return Ok(());
        }
        match inner.current {
            Some(request)
                if request.player_id == command.player_id
                    && command.action.satisfies(request.kind) =>
            {
                Ok(())
            }
            Some(request) => Err(EngineError::Rejected(format!(
                "{} from {:?} does not answer {:?} for {:?}",
                command.action.type_name(),
                command.player_id,
                request.kind,
                request.player_id
            ))),
            None => Err(EngineError::Rejected("no pending turn request".into())),
        }
    }

    fn apply(&self, inner: &mut MockEngineInner, command: Command) {
        inner.applied.push(command.clone());
        let _ = self.applied_tx.send(command);
        if inner.scripted {
            self.advance(inner);
        }
    }

    fn advance(&self, inner: &mut MockEngineInner) {
        inner.current = inner.script.pop_front();
        if let Some(request) = inner.current {
            let _ = self.turn_tx.send(request);
        }
    }

    fn submit(&self, command: Command) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_submit.take() {
            return Err(EngineError::Rejected(error));
        }

        self.check_turn(&inner, &command)?;
        inner.submitted.push(command.clone());
        self.apply(&mut inner, command);
        Ok(())
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of the applied history. Only seat and action count as state.
fn digest<'a>(history: impl Iterator<Item = &'a Command>) -> StateChecksum {
    let state: Vec<_> = history.map(|c| (c.player_id, &c.action)).collect();
    StateChecksum::of(&serde_json::to_vec(&state).unwrap_or_default())
}

#[async_trait]
impl Engine for MockEngine {
    async fn submit_action(&self, command: Command) -> Result<(), EngineError> {
        if matches!(command.action, Action::Input { .. }) {
            return Err(EngineError::Rejected("INPUT sent as an action".into()));
        }
        self.submit(command)
    }

    async fn submit_input(
        &self,
        player_id: PlayerId,
        input: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.submit(Command::new(player_id, Action::Input { input }))
    }

    fn turn_requests(&self) -> broadcast::Receiver<TurnRequest> {
        self.turn_tx.subscribe()
    }

    fn applied_actions(&self) -> broadcast::Receiver<Command> {
        self.applied_tx.subscribe()
    }
}
