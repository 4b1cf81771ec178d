//! In-memory command log for testing.
//!
//! Every operation runs under one lock, so appends are linearizable and a
//! new subscriber's history replay cannot interleave with a concurrent
//! append. Failures can be injected to exercise upload retries.

use super::{
    now_millis, ActionFeed, CommandLog, LogError, SeatConfig, SessionDoc, SessionInfo,
    SessionStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_core::JoinCode;
use sync_types::{ActionId, Command, LogEntry, PlayerId, SequenceId, SessionId};
use tokio::sync::{mpsc, watch};

const MAX_CODE_ATTEMPTS: usize = 16;

/// In-memory command log.
///
/// Clones share the same sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    inner: Arc<Mutex<MemoryLogInner>>,
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    sessions: HashMap<SessionId, MemorySession>,
    join_codes: HashMap<String, SessionId>,
    append_calls: usize,
    fail_next_append: Option<String>,
    fail_next_append_after_commit: Option<String>,
    unavailable: bool,
}

#[derive(Debug)]
struct MemorySession {
    doc: SessionDoc,
    entries: Vec<LogEntry>,
    action_index: HashMap<ActionId, SequenceId>,
    subscribers: Vec<mpsc::UnboundedSender<LogEntry>>,
    ready_tx: watch::Sender<SessionDoc>,
}

impl MemorySession {
    fn publish_doc(&self) {
        self.ready_tx.send_replace(self.doc.clone());
    }
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next append to fail without committing.
    pub fn fail_next_append(&self, error: &str) {
        self.lock().fail_next_append = Some(error.to_string());
    }

    /// Cause the next append to commit but report failure, like a response
    /// lost on the way back.
    pub fn fail_next_append_after_commit(&self, error: &str) {
        self.lock().fail_next_append_after_commit = Some(error.to_string());
    }

    /// Make every append fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Number of `append_action` calls, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.lock().append_calls
    }

    /// Number of live feeds for a session.
    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.lock()
            .sessions
            .get(&session_id)
            .map(|s| s.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

fn session_mut(
    inner: &mut MemoryLogInner,
    session_id: SessionId,
) -> Result<&mut MemorySession, LogError> {
    inner
        .sessions
        .get_mut(&session_id)
        .ok_or(LogError::SessionNotFound(session_id))
}

#[async_trait]
impl CommandLog for MemoryLog {
    async fn create_session(
        &self,
        seed: u64,
        seats: [SeatConfig; 2],
    ) -> Result<SessionInfo, LogError> {
        let mut inner = self.lock();

        let mut join_code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate =
                JoinCode::generate().map_err(|e| LogError::Unavailable(e.to_string()))?;
            if !inner.join_codes.contains_key(candidate.as_str()) {
                join_code = Some(candidate);
                break;
            }
        }
        let join_code = join_code
            .ok_or_else(|| LogError::Unavailable("could not find a free join code".into()))?;

        let session_id = SessionId::new();
        let doc = SessionDoc::new(session_id, seed, &join_code, seats, now_millis());
        let (ready_tx, _) = watch::channel(doc.clone());

        inner
            .join_codes
            .insert(join_code.as_str().to_string(), session_id);
        inner.sessions.insert(
            session_id,
            MemorySession {
                doc,
                entries: Vec::new(),
                action_index: HashMap::new(),
                subscribers: Vec::new(),
                ready_tx,
            },
        );

        Ok(SessionInfo {
            session_id,
            join_code,
        })
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionDoc, LogError> {
        let mut inner = self.lock();
        Ok(session_mut(&mut inner, session_id)?.doc.clone())
    }

    async fn find_session_by_join_code(&self, code: &JoinCode) -> Result<SessionId, LogError> {
        self.lock()
            .join_codes
            .get(code.as_str())
            .copied()
            .ok_or_else(|| LogError::JoinCodeNotFound(code.to_string()))
    }

    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
    ) -> Result<SequenceId, LogError> {
        let mut inner = self.lock();
        inner.append_calls += 1;

        if inner.unavailable {
            return Err(LogError::Unavailable("log offline".into()));
        }
        if let Some(error) = inner.fail_next_append.take() {
            return Err(LogError::AppendFailed(error));
        }
        let lose_response = inner.fail_next_append_after_commit.take();

        let session = session_mut(&mut inner, session_id)?;

        let sequence_id = match session.action_index.get(&command.action_id) {
            Some(existing) => *existing,
            None => {
                let sequence_id = session.doc.next_sequence;
                session.doc.next_sequence = sequence_id.next();

                let entry = LogEntry {
                    sequence_id,
                    command: command.clone(),
                    timestamp: now_millis(),
                };
                session.action_index.insert(command.action_id, sequence_id);
                session.entries.push(entry.clone());
                session
                    .subscribers
                    .retain(|tx| tx.send(entry.clone()).is_ok());
                sequence_id
            }
        };

        match lose_response {
            Some(error) => Err(LogError::Unavailable(error)),
            None => Ok(sequence_id),
        }
    }

    async fn subscribe_actions(&self, session_id: SessionId) -> Result<ActionFeed, LogError> {
        let mut inner = self.lock();
        let session = session_mut(&mut inner, session_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        for entry in &session.entries {
            // Receiver is still in hand; this cannot fail.
            let _ = tx.send(entry.clone());
        }
        session.subscribers.push(tx);
        Ok(ActionFeed::new(rx))
    }

    async fn get_all_actions(&self, session_id: SessionId) -> Result<Vec<LogEntry>, LogError> {
        let mut inner = self.lock();
        Ok(session_mut(&mut inner, session_id)?.entries.clone())
    }

    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> Result<SessionDoc, LogError> {
        let mut inner = self.lock();
        let session = session_mut(&mut inner, session_id)?;
        session.doc.mark_ready(player_id);
        session.publish_doc();
        Ok(session.doc.clone())
    }

    async fn subscribe_ready_state(
        &self,
        session_id: SessionId,
    ) -> Result<watch::Receiver<SessionDoc>, LogError> {
        let mut inner = self.lock();
        Ok(session_mut(&mut inner, session_id)?.ready_tx.subscribe())
    }

    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<(), LogError> {
        let mut inner = self.lock();
        let session = session_mut(&mut inner, session_id)?;
        session.doc.status = status;
        session.publish_doc();
        Ok(())
    }
}
