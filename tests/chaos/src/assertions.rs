//! Assertion helpers for chaos testing.
//!
//! These are pure functions that verify sync state correctness after chaos
//! scenarios complete. They take state as input and return pass/fail.

use std::collections::HashSet;
use sync_types::ActionId;

/// One peer's view of a finished (or paused) game.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerState {
    /// Peer name.
    pub peer: String,
    /// Action ids in the order the engine applied them.
    pub applied: Vec<ActionId>,
    /// Engine state checksum.
    pub checksum: String,
}

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }

    /// Panic with the failure details if the check failed.
    pub fn unwrap(self) {
        if !self.passed {
            panic!(
                "{} failed: {}",
                self.description,
                self.failure_details.unwrap_or_default()
            );
        }
    }
}

/// Assert that every peer applied the same commands in the same order and
/// ended in the same state.
pub fn assert_converged(peers: &[PeerState]) -> AssertionResult {
    let Some(reference) = peers.first() else {
        return AssertionResult::pass("No peers to check");
    };

    for peer in peers.iter().skip(1) {
        if let Some(index) = first_difference(&reference.applied, &peer.applied) {
            return AssertionResult::fail(
                "Convergence",
                &format!(
                    "{} and {} diverge at command {} ({} vs {} applied)",
                    reference.peer,
                    peer.peer,
                    index,
                    reference.applied.len(),
                    peer.applied.len()
                ),
            );
        }
        if peer.checksum != reference.checksum {
            return AssertionResult::fail(
                "Convergence",
                &format!(
                    "{} and {} applied the same commands but report checksums {} and {}",
                    reference.peer, peer.peer, reference.checksum, peer.checksum
                ),
            );
        }
    }

    AssertionResult::pass(&format!(
        "All {} peers applied the same {} commands",
        peers.len(),
        reference.applied.len()
    ))
}

/// Assert that a peer applied exactly the log's commands, in log order.
pub fn assert_matches_log(peer: &PeerState, log_order: &[ActionId]) -> AssertionResult {
    match first_difference(log_order, &peer.applied) {
        None => AssertionResult::pass(&format!(
            "{} applied the {} logged commands in order",
            peer.peer,
            log_order.len()
        )),
        Some(index) => AssertionResult::fail(
            "Log order",
            &format!(
                "{} departs from the log at command {} ({} logged, {} applied)",
                peer.peer,
                index,
                log_order.len(),
                peer.applied.len()
            ),
        ),
    }
}

/// Assert that no command was applied twice.
pub fn assert_no_duplicates(peer: &PeerState) -> AssertionResult {
    let mut seen = HashSet::new();
    for (index, id) in peer.applied.iter().enumerate() {
        if !seen.insert(id) {
            return AssertionResult::fail(
                "No duplicates",
                &format!("{} applied {} twice (again at {})", peer.peer, id, index),
            );
        }
    }
    AssertionResult::pass(&format!("{} applied no command twice", peer.peer))
}

fn first_difference(a: &[ActionId], b: &[ActionId]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(index) => Some(index),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ActionId> {
        (0..n).map(|_| ActionId::new()).collect()
    }

    fn make_peer(name: &str, applied: &[ActionId], checksum: &str) -> PeerState {
        PeerState {
            peer: name.into(),
            applied: applied.to_vec(),
            checksum: checksum.into(),
        }
    }

    #[test]
    fn test_converged_pass() {
        let log = ids(3);
        let result = assert_converged(&[make_peer("A", &log, "c"), make_peer("B", &log, "c")]);
        assert!(result.passed);
    }

    #[test]
    fn test_converged_fail_on_order() {
        let log = ids(3);
        let swapped = [log[0], log[2], log[1]];

        let result =
            assert_converged(&[make_peer("A", &log, "c"), make_peer("B", &swapped, "c")]);

        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("at command 1"));
    }

    #[test]
    fn test_converged_fail_on_length() {
        let log = ids(3);

        let result = assert_converged(&[make_peer("A", &log, "c"), make_peer("B", &log[..2], "c")]);

        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("at command 2"));
    }

    #[test]
    fn test_converged_fail_on_checksum() {
        let log = ids(2);

        let result = assert_converged(&[make_peer("A", &log, "x"), make_peer("B", &log, "y")]);

        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("checksums"));
    }

    #[test]
    fn test_matches_log() {
        let log = ids(4);
        assert!(assert_matches_log(&make_peer("A", &log, ""), &log).passed);
        assert!(!assert_matches_log(&make_peer("A", &log[1..], ""), &log).passed);
    }

    #[test]
    fn test_no_duplicates() {
        let log = ids(2);
        assert!(assert_no_duplicates(&make_peer("A", &log, "")).passed);

        let doubled = [log[0], log[1], log[0]];
        let result = assert_no_duplicates(&make_peer("A", &doubled, ""));
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("again at 2"));
    }

    #[test]
    #[should_panic(expected = "Log order failed")]
    fn test_unwrap_panics_on_failure() {
        let log = ids(1);
        assert_matches_log(&make_peer("A", &[], ""), &log).unwrap();
    }
}
