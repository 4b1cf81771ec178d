//! Position tracking in the global command order.
//!
//! Two trackers live here:
//! - [`CommandCursor`] - the next sequence id a remote-seat controller will
//!   consume. It moves forward by exactly one per processed turn request.
//! - [`SequenceTracker`] - which sequence ids have been routed out of the
//!   log feed, used to drop re-deliveries and to spot gaps.
//!
//! Sequence ids are assigned by the log's atomic counter starting at 0 and
//! shared by both seats, so every decision either seat makes consumes one id.

use std::collections::BTreeSet;
use sync_types::SequenceId;

/// The next global sequence id a controller expects to consume.
///
/// Only two operations move it: [`advance`](Self::advance), once per
/// processed turn request, and [`seed`](Self::seed), used at join time to
/// catch up. Live play never moves it backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandCursor {
    next: SequenceId,
}

impl CommandCursor {
    /// Create a cursor at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cursor at a specific sequence id.
    pub fn starting_at(next: SequenceId) -> Self {
        Self { next }
    }

    /// The id the next owned turn request will wait for.
    pub fn current(&self) -> SequenceId {
        self.next
    }

    /// Consume one slot of the global order.
    ///
    /// Returns the id that was consumed.
    pub fn advance(&mut self) -> SequenceId {
        let consumed = self.next;
        self.next = self.next.next();
        consumed
    }

    /// Reset the cursor for late-join catch-up.
    pub fn seed(&mut self, next: SequenceId) {
        self.next = next;
    }
}

/// Outcome of recording one delivered sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The id was the next one expected.
    InOrder,
    /// The id arrived ahead of earlier ids that have not been seen.
    OutOfOrder {
        /// The lowest id still missing.
        missing_from: SequenceId,
    },
    /// The id was already recorded.
    Duplicate,
}

/// Tracks delivered sequence ids and detects gaps and re-deliveries.
///
/// The tracker maintains:
/// - The next id expected (everything below it has been seen)
/// - A set of ids seen beyond that point (for gap detection)
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    /// Ids seen above `next_expected`.
    received: BTreeSet<u64>,
    /// Every id below this has been seen.
    next_expected: u64,
}

impl SequenceTracker {
    /// Maximum gap size before we stop enumerating missing ids.
    /// Prevents a bogus huge id from allocating a huge vector.
    const MAX_GAP: u64 = 10_000;

    /// Create a new tracker expecting sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record delivery of `seq`.
    pub fn record(&mut self, seq: SequenceId) -> Recorded {
        let value = seq.value();
        if value < self.next_expected || self.received.contains(&value) {
            return Recorded::Duplicate;
        }

        if value == self.next_expected {
            self.next_expected += 1;
            self.update_contiguous();
            Recorded::InOrder
        } else {
            self.received.insert(value);
            Recorded::OutOfOrder {
                missing_from: SequenceId::new(self.next_expected),
            }
        }
    }

    /// Check whether `seq` has already been recorded.
    pub fn contains(&self, seq: SequenceId) -> bool {
        seq.value() < self.next_expected || self.received.contains(&seq.value())
    }

    /// The lowest id not yet seen.
    pub fn next_expected(&self) -> SequenceId {
        SequenceId::new(self.next_expected)
    }

    /// The highest id seen, if any.
    pub fn last_seen(&self) -> Option<SequenceId> {
        self.received
            .last()
            .copied()
            .or_else(|| self.next_expected.checked_sub(1))
            .map(SequenceId::new)
    }

    /// Check if there are any gaps in the recorded ids.
    pub fn has_gaps(&self) -> bool {
        !self.received.is_empty()
    }

    /// The ids between the contiguous prefix and the highest id seen that
    /// have not been recorded. Empty if the gap exceeds `MAX_GAP`.
    pub fn missing(&self) -> Vec<SequenceId> {
        let Some(&max_received) = self.received.last() else {
            return Vec::new();
        };

        if max_received - self.next_expected > Self::MAX_GAP {
            return Vec::new();
        }

        (self.next_expected..max_received)
            .filter(|seq| !self.received.contains(seq))
            .map(SequenceId::new)
            .collect()
    }

    /// Forget everything and expect `next` as the next id.
    pub fn reset(&mut self, next: SequenceId) {
        self.received.clear();
        self.next_expected = next.value();
    }

    /// Pull ids out of `received` while they extend the contiguous prefix.
    fn update_contiguous(&mut self) {
        while self.received.remove(&self.next_expected) {
            self.next_expected += 1;
        }
    }
}
