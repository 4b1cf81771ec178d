//! Catch-up scenarios.
//!
//! A peer that arrives after play has started, or comes back on a fresh
//! engine, must rebuild the exact same history from the log: remote
//! commands through the buffer, its own seat's commands by replay.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_converged, assert_matches_log};
    use crate::harness::{next_turn_of, ChaosHarness, GUEST, HOST};
    use crate::jitter::JitterConfig;
    use crate::scenarios::init_tracing;
    use std::sync::Arc;
    use std::time::Duration;
    use sync_client::{CommandLog, MemoryLog};
    use sync_relay::SyncRelay;

    const TURNS: usize = 30;
    const TIMEOUT: Duration = Duration::from_secs(20);

    fn jitter() -> JitterConfig {
        JitterConfig::default().with_delay(Duration::ZERO, Duration::from_millis(4))
    }

    async fn late_joiner_catches_up<L: CommandLog>(log: Arc<L>, seed: u64) {
        let mut harness = ChaosHarness::new(log, TURNS, seed).with_jitter(jitter());
        let first_guest_turn =
            next_turn_of(harness.script(), GUEST, 0).expect("script has a guest turn");

        let host = harness.host().await.unwrap();
        // The host plays alone up to the guest's first turn.
        host.wait_for_applied(first_guest_turn, TIMEOUT).await.unwrap();
        harness.wait_for_logged(first_guest_turn, TIMEOUT).await.unwrap();

        let guest = harness.join().await.unwrap();
        assert_eq!(guest.catch_up().remote_buffered, first_guest_turn);
        assert!(guest.catch_up().local_entries.is_empty());

        host.wait_for_applied(TURNS, TIMEOUT).await.unwrap();
        guest.wait_for_applied(TURNS, TIMEOUT).await.unwrap();

        let log_order = harness.log_order().await.unwrap();
        assert_converged(&[host.state(), guest.state()]).unwrap();
        assert_matches_log(&guest.state(), &log_order).unwrap();
    }

    async fn rejoining_guest_replays_its_moves<L: CommandLog>(log: Arc<L>, seed: u64) {
        let mut harness = ChaosHarness::new(log, TURNS, seed).with_jitter(jitter());
        let pause = next_turn_of(harness.script(), HOST, TURNS / 2).expect("script has a late host turn");
        let guest_moves = harness.script()[..pause]
            .iter()
            .filter(|request| request.player_id == GUEST)
            .count();

        let host = harness.host().await.unwrap();
        let guest = harness.join().await.unwrap();

        // Leave on the host's turn, so nothing of the guest's is in flight.
        host.wait_for_applied(pause, TIMEOUT).await.unwrap();
        guest.wait_for_applied(pause, TIMEOUT).await.unwrap();
        guest.leave();

        // The host keeps playing until it needs the guest.
        host.wait_for_applied(pause + 1, TIMEOUT).await.unwrap();

        let guest = harness.rejoin(GUEST).await.unwrap();
        assert_eq!(guest.catch_up().local_entries.len(), guest_moves);

        host.wait_for_applied(TURNS, TIMEOUT).await.unwrap();
        guest.wait_for_applied(TURNS, TIMEOUT).await.unwrap();

        // Replayed moves were re-uploaded but not appended again.
        let log_order = harness.log_order().await.unwrap();
        assert_eq!(log_order.len(), TURNS);
        assert_converged(&[host.state(), guest.state()]).unwrap();
        assert_matches_log(&guest.state(), &log_order).unwrap();
    }

    // ===========================================
    // Late join
    // ===========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_joiner_catches_up_in_memory() {
        init_tracing();
        late_joiner_catches_up(Arc::new(MemoryLog::new()), 21).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_joiner_catches_up_over_relay() {
        init_tracing();
        late_joiner_catches_up(Arc::new(SyncRelay::in_memory().await.unwrap()), 22).await;
    }

    // ===========================================
    // Rejoin
    // ===========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejoining_guest_replays_in_memory() {
        init_tracing();
        rejoining_guest_replays_its_moves(Arc::new(MemoryLog::new()), 23).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejoining_guest_replays_over_relay() {
        init_tracing();
        rejoining_guest_replays_its_moves(Arc::new(SyncRelay::in_memory().await.unwrap()), 24).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejoin_without_session_fails() {
        let mut harness = ChaosHarness::new(Arc::new(MemoryLog::new()), TURNS, 25);

        assert!(harness.rejoin(GUEST).await.is_err());
    }
}
