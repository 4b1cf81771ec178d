//! NetworkController - drives a remote seat from the command buffer.
//!
//! The engine pulls decisions: it announces whose turn it is and waits
//! for that seat to submit. For a remote seat, the controller answers by
//! waiting on the [`CommandBuffer`] for the next sequence id and submitting
//! what arrives.
//!
//! # Architecture
//!
//! Transitions come from the pure [`DispatchMachine`] (sync-core); this
//! module only executes the actions it returns.
//!
//! ```text
//! Engine ──TurnRequest──► NetworkController ──► DispatchMachine
//!   ▲                          │  wait task
//!   └──submit_action/input─────┴── CommandBuffer::wait_for_command(n)
//! ```
//!
//! One wait task is in flight at most. A new turn request aborts it; once
//! the machine has accepted a command the task detaches itself, so a turn
//! request triggered by the submit cannot abort the submit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sync_core::{DispatchAction, DispatchEvent, DispatchMachine, Ticket};
use sync_types::{Action, Command, PlayerId, SequenceId, TurnRequest};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferError, CommandBuffer};
use crate::engine::Engine;
use crate::events::SyncEvent;
use crate::session::SessionContext;
use crate::subscription::Subscription;

struct ControllerState {
    machine: DispatchMachine,
    in_flight: Option<JoinHandle<()>>,
}

/// Adapter between the engine's turn protocol and the command buffer for
/// one remote seat.
pub struct NetworkController<E: Engine> {
    engine: Arc<E>,
    buffer: CommandBuffer,
    wait_timeout: Option<Duration>,
    events: broadcast::Sender<SyncEvent>,
    state: Mutex<ControllerState>,
}

impl<E: Engine> NetworkController<E> {
    /// Create a controller for the seat opposite the session's local player.
    pub fn new(ctx: &SessionContext, engine: Arc<E>) -> Arc<Self> {
        Self::for_seat(ctx, ctx.remote_player(), engine)
    }

    /// Create a controller for an explicit seat.
    pub fn for_seat(ctx: &SessionContext, seat: PlayerId, engine: Arc<E>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            buffer: ctx.buffer.clone(),
            wait_timeout: ctx.config.wait_timeout,
            events: ctx.events.clone(),
            state: Mutex::new(ControllerState {
                machine: DispatchMachine::new(seat),
                in_flight: None,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The seat this controller plays.
    pub fn seat(&self) -> PlayerId {
        self.lock_state().machine.seat()
    }

    /// The next global sequence id this controller will consume.
    pub fn current_command_index(&self) -> SequenceId {
        self.lock_state().machine.current_index()
    }

    /// Seed the cursor for catch-up. Call before the first turn request.
    pub fn set_starting_command_index(&self, next: SequenceId) {
        self.lock_state().machine.seed(next);
    }

    /// Check if a wait is in flight.
    pub fn is_dispatching(&self) -> bool {
        self.lock_state().machine.is_dispatching()
    }

    /// Handle one turn request from the engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event(self: &Arc<Self>, request: TurnRequest) {
        let mut state = self.lock_state();
        let actions = state
            .machine
            .on_event(DispatchEvent::TurnRequested(request));

        for action in actions {
            match action {
                DispatchAction::Cancel { ticket } => {
                    if let Some(task) = state.in_flight.take() {
                        task.abort();
                    }
                    debug!("cancelled dispatch {}", ticket.value());
                }
                DispatchAction::Skip { sequence_id } => {
                    debug!(
                        "{:?} consumed {:?}, not ours",
                        request.player_id, sequence_id
                    );
                }
                DispatchAction::AwaitCommand {
                    ticket,
                    sequence_id,
                } => {
                    // Spawned under the lock so the task cannot report back
                    // before its handle is stored.
                    state.in_flight = Some(self.spawn_wait(ticket, sequence_id));
                }
                other => warn!("unexpected dispatch action on turn request: {:?}", other),
            }
        }
    }

    fn spawn_wait(self: &Arc<Self>, ticket: Ticket, sequence_id: SequenceId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!("waiting for {:?} (dispatch {})", sequence_id, ticket.value());

            // Each expiry reports a degraded connection and waits again.
            let (event, cause) = loop {
                let outcome = match this.wait_timeout {
                    Some(timeout) => {
                        this.buffer
                            .wait_for_command_timeout(sequence_id, timeout)
                            .await
                    }
                    None => this.buffer.wait_for_command(sequence_id).await,
                };

                match outcome {
                    Ok(command) => break (DispatchEvent::CommandArrived { ticket, command }, None),
                    Err(BufferError::TimedOut { .. }) => {
                        let actions = this
                            .lock_state()
                            .machine
                            .on_event(DispatchEvent::WaitExpired { ticket });
                        if actions.is_empty() {
                            // Superseded while the timer ran.
                            return;
                        }
                        for action in actions {
                            this.finish(action, None).await;
                        }
                    }
                    Err(e) => break (DispatchEvent::WaitAbandoned { ticket }, Some(e)),
                }
            };

            let actions = {
                let mut state = this.lock_state();
                let actions = state.machine.on_event(event);
                if !actions.is_empty() {
                    // This task is the current dispatch: detach it.
                    state.in_flight = None;
                }
                actions
            };

            for action in actions {
                this.finish(action, cause.as_ref()).await;
            }
        })
    }

    async fn finish(&self, action: DispatchAction, cause: Option<&BufferError>) {
        match action {
            DispatchAction::Submit(command) => self.submit(command).await,
            DispatchAction::Mismatch {
                sequence_id,
                expected,
                actual,
            } => {
                error!(
                    "protocol mismatch at {:?}: engine asked for {:?}, log has {}",
                    sequence_id, expected, actual
                );
            }
            DispatchAction::Degraded {
                ticket,
                sequence_id,
            } => {
                warn!(
                    "no command at {:?} in time, connection degraded (dispatch {} still waiting)",
                    sequence_id,
                    ticket.value()
                );
                let _ = self.events.send(SyncEvent::ConnectionDegraded { sequence_id });
            }
            DispatchAction::Abandoned { sequence_id } => match cause {
                Some(e) => info!("dispatch for {:?} abandoned: {}", sequence_id, e),
                None => info!("dispatch for {:?} abandoned", sequence_id),
            },
            other => warn!("unexpected dispatch action after wait: {:?}", other),
        }
    }

    async fn submit(&self, command: Command) {
        let player_id = command.player_id;
        let kind = command.action.type_name();
        let result = match command.action {
            Action::Input { input } => self.engine.submit_input(player_id, input).await,
            _ => self.engine.submit_action(command).await,
        };
        match result {
            Ok(()) => debug!("submitted {} for {:?}", kind, player_id),
            Err(e) => error!("engine refused {} for {:?}: {}", kind, player_id, e),
        }
    }

    /// Abort any in-flight wait.
    pub fn stop(&self) {
        if let Some(task) = self.lock_state().in_flight.take() {
            task.abort();
        }
    }

    /// Attach to the engine's turn-request stream.
    ///
    /// The stream is subscribed before this returns, so no request emitted
    /// afterwards is missed.
    pub fn spawn(self: &Arc<Self>) -> Subscription {
        let mut requests = self.engine.turn_requests();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(request) => this.on_event(request),
                    Err(RecvError::Lagged(missed)) => {
                        // The cursor no longer matches the engine.
                        let seat = this.seat();
                        error!("controller for {:?} missed {} turn requests", seat, missed);
                        let _ = this
                            .events
                            .send(SyncEvent::TurnRequestsMissed { seat, missed });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("turn request stream closed");
        });

        let this = Arc::clone(self);
        Subscription::new(task).with_cleanup(move || this.stop())
    }
}

impl<E: Engine> std::fmt::Debug for NetworkController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("NetworkController")
            .field("seat", &state.machine.seat())
            .field("next", &state.machine.current_index())
            .field("dispatching", &state.machine.is_dispatching())
            .finish()
    }
}
