//! Turn-request dispatch for a remote-controlled seat.
//!
//! This module provides a pure, side-effect-free state machine for the
//! network controller. It takes engine turn requests and wait outcomes as
//! input and produces a list of actions to execute.
//!
//! ```text
//!            TurnRequested(own seat)
//!   Idle ─────────────────────────────► Awaiting { ticket, seq } ◄─┐
//!    ▲                                        │          │          │
//!    └──── CommandArrived / WaitAbandoned ────┘          └─WaitExpired
//! ```
//!
//! Every turn request first cancels whatever dispatch is in flight. A
//! request for the other seat consumes one slot of the global order without
//! touching the buffer. Each dispatch carries a [`Ticket`]; outcomes that
//! carry an older ticket are ignored, so a stale wait can never submit.
//!
//! An expired bounded wait does not end the dispatch. The machine reports
//! the degraded connection and keeps waiting for the same id, so a command
//! that arrives late is still submitted.
//!
//! The actual waiting and submitting is performed by sync-client.

use crate::cursor::CommandCursor;
use sync_types::{Command, PlayerId, RequestKind, SequenceId, TurnRequest};

/// Identifies one dispatch; newer dispatches have larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Numeric value, for logging.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Dispatch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    /// No turn request is being served.
    Idle,
    /// Waiting for the command at `sequence_id`.
    Awaiting {
        /// The dispatch this wait belongs to.
        ticket: Ticket,
        /// Kind of decision the engine asked for.
        kind: RequestKind,
        /// The id being waited on.
        sequence_id: SequenceId,
    },
}

/// Inputs to the dispatch machine.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The engine asked a seat for its next decision.
    TurnRequested(TurnRequest),
    /// The buffer produced the command a dispatch was waiting for.
    CommandArrived {
        /// Dispatch the wait belonged to.
        ticket: Ticket,
        /// The buffered command.
        command: Command,
    },
    /// A bounded wait expired; the command may still arrive.
    WaitExpired {
        /// Dispatch the wait belongs to.
        ticket: Ticket,
    },
    /// The wait ended without a command (buffer reset).
    WaitAbandoned {
        /// Dispatch the wait belonged to.
        ticket: Ticket,
    },
}

/// Instructions for sync-client to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    /// Stop the in-flight wait for `ticket`.
    Cancel {
        /// The superseded dispatch.
        ticket: Ticket,
    },
    /// A request for the other seat consumed `sequence_id`.
    Skip {
        /// The id consumed without fetching.
        sequence_id: SequenceId,
    },
    /// Wait on the buffer for `sequence_id`.
    AwaitCommand {
        /// Dispatch the wait belongs to.
        ticket: Ticket,
        /// The id to wait for.
        sequence_id: SequenceId,
    },
    /// Hand the command to the engine (`submit_action` or `submit_input`
    /// depending on its kind).
    Submit(Command),
    /// The buffered command does not answer the request.
    Mismatch {
        /// Where the command sits in the order.
        sequence_id: SequenceId,
        /// What the engine asked for.
        expected: RequestKind,
        /// Wire type of the command found.
        actual: &'static str,
    },
    /// The wait for `sequence_id` expired. Keep waiting on the same ticket.
    Degraded {
        /// Dispatch still in flight.
        ticket: Ticket,
        /// The id that has not arrived yet.
        sequence_id: SequenceId,
    },
    /// The dispatch ended without a command.
    Abandoned {
        /// The id that never arrived.
        sequence_id: SequenceId,
    },
}

/// Dispatch state machine for one remote seat - NO I/O, just transitions.
#[derive(Debug, Clone)]
pub struct DispatchMachine {
    seat: PlayerId,
    cursor: CommandCursor,
    state: DispatchState,
    next_ticket: u64,
}

impl DispatchMachine {
    /// Create a machine for `seat`, starting at sequence 0.
    pub fn new(seat: PlayerId) -> Self {
        Self {
            seat,
            cursor: CommandCursor::new(),
            state: DispatchState::Idle,
            next_ticket: 0,
        }
    }

    /// The seat this machine serves.
    pub fn seat(&self) -> PlayerId {
        self.seat
    }

    /// The next global id this machine will consume.
    pub fn current_index(&self) -> SequenceId {
        self.cursor.current()
    }

    /// Current dispatch state.
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Check if a dispatch is in flight.
    pub fn is_dispatching(&self) -> bool {
        matches!(self.state, DispatchState::Awaiting { .. })
    }

    /// Seed the cursor at join time, before any turn request is served.
    pub fn seed(&mut self, next: SequenceId) {
        self.cursor.seed(next);
    }

    /// Process an event and return the actions to execute.
    pub fn on_event(&mut self, event: DispatchEvent) -> Vec<DispatchAction> {
        match event {
            DispatchEvent::TurnRequested(request) => self.on_turn_request(request),
            DispatchEvent::CommandArrived { ticket, command } => {
                let Some((kind, sequence_id)) = self.take_matching(ticket) else {
                    return vec![];
                };

                if command.action.satisfies(kind) {
                    self.cursor.advance();
                    vec![DispatchAction::Submit(command)]
                } else {
                    // The cursor stays put: the slot is still unconsumed.
                    vec![DispatchAction::Mismatch {
                        sequence_id,
                        expected: kind,
                        actual: command.action.type_name(),
                    }]
                }
            }
            DispatchEvent::WaitExpired { ticket } => match self.state {
                DispatchState::Awaiting {
                    ticket: current,
                    sequence_id,
                    ..
                } if current == ticket => vec![DispatchAction::Degraded {
                    ticket,
                    sequence_id,
                }],
                _ => vec![],
            },
            DispatchEvent::WaitAbandoned { ticket } => match self.take_matching(ticket) {
                Some((_, sequence_id)) => vec![DispatchAction::Abandoned { sequence_id }],
                None => vec![],
            },
        }
    }

    fn on_turn_request(&mut self, request: TurnRequest) -> Vec<DispatchAction> {
        let mut actions = Vec::new();

        if let DispatchState::Awaiting { ticket, .. } = self.state {
            actions.push(DispatchAction::Cancel { ticket });
            self.state = DispatchState::Idle;
        }

        if request.player_id != self.seat {
            let sequence_id = self.cursor.advance();
            actions.push(DispatchAction::Skip { sequence_id });
            return actions;
        }

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        let sequence_id = self.cursor.current();
        self.state = DispatchState::Awaiting {
            ticket,
            kind: request.kind,
            sequence_id,
        };
        actions.push(DispatchAction::AwaitCommand {
            ticket,
            sequence_id,
        });
        actions
    }

    /// Return to Idle if `ticket` is the in-flight dispatch.
    fn take_matching(&mut self, ticket: Ticket) -> Option<(RequestKind, SequenceId)> {
        match self.state {
            DispatchState::Awaiting {
                ticket: current,
                kind,
                sequence_id,
            } if current == ticket => {
                self.state = DispatchState::Idle;
                Some((kind, sequence_id))
            }
            _ => None,
        }
    }
}
