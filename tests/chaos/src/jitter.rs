//! A command log wrapper that injects delivery jitter and append failures.
//!
//! Each peer talks to the shared log through its own [`JitterLog`]:
//!
//! - Every append is delayed by a random amount.
//! - Appends can fail before reaching the log, or commit and then report
//!   failure (a lost acknowledgement).
//! - Every subscriber gets its own random per-entry delivery delay. Entries
//!   stay in order; only their timing changes.
//! - Checksums on chosen sequence ids can be rewritten on delivery, to
//!   provoke desync detection.
//!
//! All randomness comes from a seeded [`StdRng`], so a failing run can be
//! replayed from its seed.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sync_client::{
    ActionFeed, CommandLog, LogError, SeatConfig, SessionDoc, SessionInfo, SessionStatus,
};
use sync_core::JoinCode;
use sync_types::{Command, LogEntry, PlayerId, SequenceId, SessionId};
use tokio::sync::{mpsc, watch};

/// Checksum written over the real one on corrupted deliveries.
pub const CORRUPT_CHECKSUM: &str = "corrupted";

/// What to inject.
#[derive(Debug, Clone)]
pub struct JitterConfig {
    /// Shortest delay added to an append or a delivery.
    pub min_delay: Duration,
    /// Longest delay added to an append or a delivery.
    pub max_delay: Duration,
    /// Probability that an append fails without reaching the log.
    pub append_failure_rate: f64,
    /// Probability that an append commits but reports failure.
    pub lost_ack_rate: f64,
    /// Sequence ids whose checksum is rewritten on delivery.
    pub corrupt_checksums: HashSet<SequenceId>,
    /// RNG seed.
    pub seed: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::from_millis(5),
            append_failure_rate: 0.0,
            lost_ack_rate: 0.0,
            corrupt_checksums: HashSet::new(),
            seed: 0,
        }
    }
}

impl JitterConfig {
    /// No delay, no failures.
    pub fn calm() -> Self {
        Self {
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the delay range.
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    /// Set the probability of appends failing before they commit.
    pub fn with_append_failures(mut self, rate: f64) -> Self {
        self.append_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the probability of appends committing but reporting failure.
    pub fn with_lost_acks(mut self, rate: f64) -> Self {
        self.lost_ack_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Rewrite the checksum of `sequence_id` on delivery.
    pub fn with_corrupt_checksum(mut self, sequence_id: SequenceId) -> Self {
        self.corrupt_checksums.insert(sequence_id);
        self
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One peer's unreliable view of a shared log.
pub struct JitterLog<L: CommandLog> {
    inner: Arc<L>,
    min_delay: Duration,
    max_delay: Duration,
    append_failure_rate: f64,
    lost_ack_rate: f64,
    corrupt: Arc<HashSet<SequenceId>>,
    rng: Mutex<StdRng>,
    injected: AtomicUsize,
}

impl<L: CommandLog> JitterLog<L> {
    /// Wrap `inner`.
    pub fn new(inner: Arc<L>, config: JitterConfig) -> Self {
        Self {
            inner,
            min_delay: config.min_delay,
            max_delay: config.max_delay.max(config.min_delay),
            append_failure_rate: config.append_failure_rate,
            lost_ack_rate: config.lost_ack_rate,
            corrupt: Arc::new(config.corrupt_checksums),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            injected: AtomicUsize::new(0),
        }
    }

    /// The wrapped log.
    pub fn inner(&self) -> &Arc<L> {
        &self.inner
    }

    /// Number of append failures injected so far.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        f(&mut self.rng.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn delay(&self) -> Duration {
        let (min, max) = (self.min_delay, self.max_delay);
        self.with_rng(|rng| random_delay(rng, min, max))
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.with_rng(|rng| rng.gen_bool(rate))
    }

    fn inject(&self, what: &str) -> LogError {
        self.injected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("injecting failure: {}", what);
        LogError::Unavailable(format!("injected: {what}"))
    }
}

fn random_delay(rng: &mut StdRng, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rng.gen_range(min..=max)
}

fn tamper(corrupt: &HashSet<SequenceId>, mut entry: LogEntry) -> LogEntry {
    if corrupt.contains(&entry.sequence_id) && entry.command.checksum.is_some() {
        entry.command.checksum = Some(CORRUPT_CHECKSUM.to_string());
    }
    entry
}

#[async_trait]
impl<L: CommandLog> CommandLog for JitterLog<L> {
    async fn create_session(
        &self,
        seed: u64,
        seats: [SeatConfig; 2],
    ) -> Result<SessionInfo, LogError> {
        self.inner.create_session(seed, seats).await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionDoc, LogError> {
        self.inner.get_session(session_id).await
    }

    async fn find_session_by_join_code(&self, code: &JoinCode) -> Result<SessionId, LogError> {
        self.inner.find_session_by_join_code(code).await
    }

    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
    ) -> Result<SequenceId, LogError> {
        tokio::time::sleep(self.delay()).await;
        if self.roll(self.append_failure_rate) {
            return Err(self.inject("append dropped"));
        }

        let seq = self.inner.append_action(session_id, command).await?;
        if self.roll(self.lost_ack_rate) {
            return Err(self.inject("acknowledgement lost"));
        }
        Ok(seq)
    }

    async fn subscribe_actions(&self, session_id: SessionId) -> Result<ActionFeed, LogError> {
        let mut feed = self.inner.subscribe_actions(session_id).await?;
        let mut rng = StdRng::seed_from_u64(self.with_rng(|rng| rng.gen()));
        let (min, max) = (self.min_delay, self.max_delay);
        let corrupt = Arc::clone(&self.corrupt);

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(entry) = feed.next().await {
                // One entry at a time keeps delivery order intact.
                tokio::time::sleep(random_delay(&mut rng, min, max)).await;
                if tx.send(tamper(&corrupt, entry)).is_err() {
                    return;
                }
            }
        });
        Ok(ActionFeed::with_forwarder(rx, forwarder))
    }

    async fn get_all_actions(&self, session_id: SessionId) -> Result<Vec<LogEntry>, LogError> {
        tokio::time::sleep(self.delay()).await;
        let entries = self.inner.get_all_actions(session_id).await?;
        Ok(entries
            .into_iter()
            .map(|entry| tamper(&self.corrupt, entry))
            .collect())
    }

    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> Result<SessionDoc, LogError> {
        self.inner.set_seat_ready(session_id, player_id).await
    }

    async fn subscribe_ready_state(
        &self,
        session_id: SessionId,
    ) -> Result<watch::Receiver<SessionDoc>, LogError> {
        self.inner.subscribe_ready_state(session_id).await
    }

    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<(), LogError> {
        self.inner.update_session_status(session_id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::log::contract;
    use sync_client::MemoryLog;
    use sync_types::Action;

    async fn session(log: &JitterLog<MemoryLog>) -> SessionId {
        log.create_session(1, [SeatConfig::default(), SeatConfig::default()])
            .await
            .unwrap()
            .session_id
    }

    // ===========================================
    // Transparency
    // ===========================================

    #[tokio::test]
    async fn delayed_log_still_satisfies_contract() {
        let log = JitterLog::new(
            Arc::new(MemoryLog::new()),
            JitterConfig::default().with_seed(7),
        );
        contract::run_all(Arc::new(log)).await;
    }

    #[tokio::test]
    async fn delivery_keeps_order_under_jitter() {
        let log = JitterLog::new(
            Arc::new(MemoryLog::new()),
            JitterConfig::default()
                .with_delay(Duration::ZERO, Duration::from_millis(3))
                .with_seed(11),
        );
        let id = session(&log).await;
        let mut feed = log.subscribe_actions(id).await.unwrap();

        for _ in 0..25 {
            log.append_action(id, &Command::new(PlayerId::ZERO, Action::Done))
                .await
                .unwrap();
        }

        for expected in 0..25 {
            let entry = feed.next().await.unwrap();
            assert_eq!(entry.sequence_id, SequenceId::new(expected));
        }
    }

    // ===========================================
    // Injection
    // ===========================================

    #[tokio::test]
    async fn certain_failure_never_reaches_the_log() {
        let inner = Arc::new(MemoryLog::new());
        let log = JitterLog::new(
            Arc::clone(&inner),
            JitterConfig::calm().with_append_failures(1.0),
        );
        let id = session(&log).await;

        let result = log
            .append_action(id, &Command::new(PlayerId::ONE, Action::Done))
            .await;

        assert!(matches!(result, Err(LogError::Unavailable(_))));
        assert!(inner.get_all_actions(id).await.unwrap().is_empty());
        assert_eq!(log.injected_failures(), 1);
    }

    #[tokio::test]
    async fn lost_ack_commits_and_retry_finds_it() {
        let inner = Arc::new(MemoryLog::new());
        let log = JitterLog::new(Arc::clone(&inner), JitterConfig::calm().with_lost_acks(1.0));
        let id = session(&log).await;
        let command = Command::new(PlayerId::ONE, Action::Done);

        assert!(log.append_action(id, &command).await.is_err());
        let stored = inner.get_all_actions(id).await.unwrap();
        assert_eq!(stored.len(), 1);

        // The retry goes straight to the log and gets the same id back.
        let seq = inner.append_action(id, &command).await.unwrap();
        assert_eq!(seq, stored[0].sequence_id);
    }

    #[tokio::test]
    async fn chosen_checksum_is_rewritten_on_delivery() {
        let log = JitterLog::new(
            Arc::new(MemoryLog::new()),
            JitterConfig::calm().with_corrupt_checksum(SequenceId::new(1)),
        );
        let id = session(&log).await;
        for _ in 0..2 {
            let command = Command::new(PlayerId::ZERO, Action::Done).with_checksum("abc");
            log.append_action(id, &command).await.unwrap();
        }

        let entries = log.get_all_actions(id).await.unwrap();
        assert_eq!(entries[0].command.checksum.as_deref(), Some("abc"));
        assert_eq!(entries[1].command.checksum.as_deref(), Some(CORRUPT_CHECKSUM));

        let mut feed = log.subscribe_actions(id).await.unwrap();
        feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!(second.command.checksum.as_deref(), Some(CORRUPT_CHECKSUM));
    }

    #[test]
    fn same_seed_same_delays() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let max = Duration::from_millis(50);

        let first: Vec<_> = (0..10).map(|_| random_delay(&mut a, Duration::ZERO, max)).collect();
        let second: Vec<_> = (0..10).map(|_| random_delay(&mut b, Duration::ZERO, max)).collect();

        assert_eq!(first, second);
        assert!(first.iter().all(|d| *d <= max));
    }
}
