//! Behavioural checks every [`CommandLog`] implementation must pass.
//!
//! Shared between the in-memory log and the relay so both are held to the
//! same ordering guarantees. Each check creates its own session and panics
//! on the first violation.

use super::{ActionFeed, CommandLog, LogError, SeatConfig, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use sync_core::JoinCode;
use sync_types::{Action, Command, LogEntry, PlayerId, SequenceId, SessionId};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Run every check against `log`.
pub async fn run_all<L: CommandLog>(log: Arc<L>) {
    concurrent_appends_get_distinct_ids(&log).await;
    delivery_is_ascending_with_echo(&log).await;
    subscription_replays_history_then_live(&log).await;
    reappend_is_idempotent(&log).await;
    ready_state_starts_session(&log).await;
    join_code_lookup(&log).await;
    status_updates_are_visible(&log).await;
    unknown_session_is_reported(&log).await;
}

fn seats() -> [SeatConfig; 2] {
    [
        SeatConfig::new(["rookie", "scout", "archer"]),
        SeatConfig::new(["knight", "priest", "ranger"]),
    ]
}

fn command(n: u64) -> Command {
    let player = if n % 2 == 0 { PlayerId::ZERO } else { PlayerId::ONE };
    Command::new(
        player,
        Action::PlayCard {
            card_id: format!("card-{n}"),
            target_slot: None,
        },
    )
}

async fn new_session<L: CommandLog>(log: &Arc<L>) -> SessionId {
    log.create_session(42, seats())
        .await
        .expect("create_session failed")
        .session_id
}

async fn next_entry(feed: &mut ActionFeed) -> LogEntry {
    tokio::time::timeout(RECV_TIMEOUT, feed.next())
        .await
        .expect("timed out waiting for log entry")
        .expect("feed closed early")
}

/// Concurrent appends receive distinct, gap-free ids.
pub async fn concurrent_appends_get_distinct_ids<L: CommandLog>(log: &Arc<L>) {
    const TASKS: u64 = 8;
    const PER_TASK: u64 = 6;

    let session = new_session(log).await;
    let mut handles = Vec::new();
    for t in 0..TASKS {
        let log = Arc::clone(log);
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..PER_TASK {
                let id = log
                    .append_action(session, &command(t * PER_TASK + i))
                    .await
                    .expect("append failed");
                ids.push(id.value());
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("append task panicked"));
    }
    all.sort_unstable();

    let expected: Vec<u64> = (0..TASKS * PER_TASK).collect();
    assert_eq!(all, expected, "ids must be distinct and start at 0");

    let doc = log.get_session(session).await.expect("get_session failed");
    assert_eq!(doc.next_sequence, SequenceId::new(TASKS * PER_TASK));
}

/// Subscribers see every entry, their own included, in ascending order.
pub async fn delivery_is_ascending_with_echo<L: CommandLog>(log: &Arc<L>) {
    let session = new_session(log).await;
    let mut feed = log
        .subscribe_actions(session)
        .await
        .expect("subscribe failed");

    let mut sent = Vec::new();
    for n in 0..10 {
        let cmd = command(n);
        log.append_action(session, &cmd).await.expect("append failed");
        sent.push(cmd);
    }

    for (n, expected) in sent.iter().enumerate() {
        let entry = next_entry(&mut feed).await;
        assert_eq!(entry.sequence_id, SequenceId::new(n as u64));
        assert_eq!(&entry.command, expected);
        assert!(entry.timestamp > 0, "entries carry an append timestamp");
    }

    let all = log.get_all_actions(session).await.expect("get_all failed");
    let ids: Vec<u64> = all.iter().map(|e| e.sequence_id.value()).collect();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
}

/// A late subscription yields the history, then live entries, without gaps.
pub async fn subscription_replays_history_then_live<L: CommandLog>(log: &Arc<L>) {
    let session = new_session(log).await;
    for n in 0..3 {
        log.append_action(session, &command(n))
            .await
            .expect("append failed");
    }

    let mut feed = log
        .subscribe_actions(session)
        .await
        .expect("subscribe failed");
    for n in 3..5 {
        log.append_action(session, &command(n))
            .await
            .expect("append failed");
    }

    for n in 0..5 {
        let entry = next_entry(&mut feed).await;
        assert_eq!(entry.sequence_id, SequenceId::new(n));
    }
    assert!(feed.try_next().is_none(), "no duplicate deliveries");
}

/// Re-appending the same action returns its original id.
pub async fn reappend_is_idempotent<L: CommandLog>(log: &Arc<L>) {
    let session = new_session(log).await;
    let first = command(0);

    let a = log.append_action(session, &first).await.expect("append failed");
    log.append_action(session, &command(1))
        .await
        .expect("append failed");
    let again = log.append_action(session, &first).await.expect("re-append failed");

    assert_eq!(a, again);
    assert_eq!(
        log.get_all_actions(session).await.expect("get_all failed").len(),
        2
    );
}

/// The second ready seat starts the session; watchers see it.
pub async fn ready_state_starts_session<L: CommandLog>(log: &Arc<L>) {
    let session = new_session(log).await;
    let mut ready = log
        .subscribe_ready_state(session)
        .await
        .expect("subscribe_ready_state failed");

    let doc = log
        .set_seat_ready(session, PlayerId::ZERO)
        .await
        .expect("set_seat_ready failed");
    assert_eq!(doc.ready, [true, false]);
    assert!(!doc.started);
    assert_eq!(doc.status, SessionStatus::Waiting);

    let doc = log
        .set_seat_ready(session, PlayerId::ONE)
        .await
        .expect("set_seat_ready failed");
    assert!(doc.started);
    assert_eq!(doc.status, SessionStatus::Active);

    tokio::time::timeout(RECV_TIMEOUT, ready.wait_for(|doc| doc.started))
        .await
        .expect("ready watcher never saw the start")
        .expect("ready watch closed");

    let stored = log.get_session(session).await.expect("get_session failed");
    assert!(stored.started);
    assert_eq!(stored.seats, seats());
    assert_eq!(stored.seed, 42);
}

/// Join codes resolve case-insensitively to their session.
pub async fn join_code_lookup<L: CommandLog>(log: &Arc<L>) {
    let info = log.create_session(7, seats()).await.expect("create failed");

    let found = log
        .find_session_by_join_code(&info.join_code)
        .await
        .expect("lookup failed");
    assert_eq!(found, info.session_id);

    let typed = JoinCode::parse(&info.join_code.as_str().to_lowercase()).expect("parse failed");
    let found = log
        .find_session_by_join_code(&typed)
        .await
        .expect("lowercase lookup failed");
    assert_eq!(found, info.session_id);

    let doc = log.get_session(info.session_id).await.expect("get failed");
    assert_eq!(doc.join_code, info.join_code.as_str());
}

/// Status changes are persisted.
pub async fn status_updates_are_visible<L: CommandLog>(log: &Arc<L>) {
    let session = new_session(log).await;

    log.update_session_status(session, SessionStatus::Completed)
        .await
        .expect("update_session_status failed");

    let doc = log.get_session(session).await.expect("get_session failed");
    assert_eq!(doc.status, SessionStatus::Completed);
}

/// Operations on a missing session fail with `SessionNotFound`.
pub async fn unknown_session_is_reported<L: CommandLog>(log: &Arc<L>) {
    let missing = SessionId::new();

    assert!(matches!(
        log.get_session(missing).await,
        Err(LogError::SessionNotFound(id)) if id == missing
    ));
    assert!(matches!(
        log.append_action(missing, &command(0)).await,
        Err(LogError::SessionNotFound(_))
    ));
    assert!(matches!(
        log.subscribe_actions(missing).await,
        Err(LogError::SessionNotFound(_))
    ));
}
