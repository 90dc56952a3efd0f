//! Single-flight admission for recognition requests.
//!
//! At most one request is in flight per engine. Requests arriving meanwhile
//! park in a one-slot mailbox where a newer arrival replaces an older one; when
//! the in-flight call finishes, the parked request is dispatched on behalf of
//! the original caller, whose result is the one returned. Every request gets a
//! ticket on entry, and tickets are dispatched in strictly increasing order, so
//! a stale request never runs after a fresher one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::{metric_names, MetricsRegistry};
use crate::state_machine::{EngineStatus, StateMachine};

/// How long a request may wait for a starting or restarting engine.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub max_tries: u32,
}

#[derive(Debug, PartialEq)]
pub enum GateOutcome<T> {
    /// The caller's dispatch ran (possibly for a newer request) and produced this.
    Completed(T),
    /// Parked behind the in-flight request; its result goes to that caller.
    Held,
    /// A newer request was dispatched first.
    Superseded,
    /// The engine cannot take work in this status.
    Rejected(EngineStatus),
}

struct Mailbox<R> {
    pending: Option<(u64, R)>,
    in_flight: Option<u64>,
    last_dispatched: u64,
}

enum Admission<R> {
    Dispatch(R),
    Held,
    Superseded,
    NotReady(R),
    Rejected(EngineStatus),
}

enum Finish<R> {
    Done,
    FollowUp(u64, R),
    Readmit(u64, R),
}

/// Releases the in-flight slot if the dispatching future is dropped mid-call.
struct InFlight<'a, R> {
    gate: &'a RecognitionGate<R>,
    owner: u64,
    armed: bool,
}

impl<R> Drop for InFlight<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.abandon(self.owner);
        }
    }
}

pub struct RecognitionGate<R> {
    state: Arc<StateMachine>,
    mailbox: Mutex<Mailbox<R>>,
    next_ticket: AtomicU64,
    metrics: Arc<MetricsRegistry>,
}

impl<R> RecognitionGate<R> {
    pub fn new(state: Arc<StateMachine>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            state,
            mailbox: Mutex::new(Mailbox {
                pending: None,
                in_flight: None,
                last_dispatched: 0,
            }),
            next_ticket: AtomicU64::new(0),
            metrics,
        }
    }

    /// Run `dispatch` for `request` under the single-flight rule.
    pub async fn run<F, Fut, T>(&self, request: R, policy: ReadinessPolicy, mut dispatch: F) -> GateOutcome<T>
    where
        F: FnMut(R) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let mut request = request;

        loop {
            match self.admit(ticket, request) {
                Admission::Dispatch(admitted) => {
                    let mut slot = InFlight {
                        gate: self,
                        owner: ticket,
                        armed: true,
                    };
                    let mut current = admitted;
                    loop {
                        let output = dispatch(current).await;
                        match self.finish(slot.owner) {
                            Finish::Done => {
                                slot.armed = false;
                                return GateOutcome::Completed(output);
                            }
                            Finish::FollowUp(next_ticket, next) => {
                                debug!(ticket = next_ticket, "dispatching parked request");
                                slot.owner = next_ticket;
                                current = next;
                            }
                            Finish::Readmit(next_ticket, next) => {
                                slot.armed = false;
                                ticket = next_ticket;
                                request = next;
                                break;
                            }
                        }
                    }
                }
                Admission::Held => {
                    self.metrics.increment(metric_names::GATE_HELD);
                    return GateOutcome::Held;
                }
                Admission::Superseded => return GateOutcome::Superseded,
                Admission::Rejected(status) => return GateOutcome::Rejected(status),
                Admission::NotReady(waiting) => {
                    if !self
                        .state
                        .wait_until_ready(policy.poll_interval, policy.max_tries)
                        .await
                    {
                        return GateOutcome::Rejected(self.state.current());
                    }
                    request = waiting;
                }
            }
        }
    }

    fn admit(&self, ticket: u64, request: R) -> Admission<R> {
        let mut mailbox = self.mailbox.lock();
        if ticket <= mailbox.last_dispatched {
            return Admission::Superseded;
        }

        match self.state.current() {
            EngineStatus::Processing => {
                let newer = mailbox.pending.as_ref().map_or(true, |(t, _)| *t < ticket);
                if newer {
                    mailbox.pending = Some((ticket, request));
                    Admission::Held
                } else {
                    Admission::Superseded
                }
            }
            EngineStatus::Enabled => {
                if !self
                    .state
                    .transition_from(EngineStatus::Enabled, EngineStatus::Processing)
                {
                    return Admission::NotReady(request);
                }
                if mailbox.pending.as_ref().is_some_and(|(t, _)| *t < ticket) {
                    mailbox.pending = None;
                }
                mailbox.in_flight = Some(ticket);
                mailbox.last_dispatched = ticket;
                Admission::Dispatch(request)
            }
            EngineStatus::Disabled => Admission::Rejected(EngineStatus::Disabled),
            EngineStatus::Starting | EngineStatus::Restarting => Admission::NotReady(request),
        }
    }

    /// The in-flight call was dropped before it finished. Free the engine so
    /// later requests are dispatched; the parked request has no caller left.
    fn abandon(&self, owner: u64) {
        let mut mailbox = self.mailbox.lock();
        if mailbox.in_flight != Some(owner) {
            return;
        }
        mailbox.in_flight = None;
        if let Some((ticket, _)) = mailbox.pending.take() {
            debug!(ticket, "discarding parked request of an abandoned call");
        }
        self.state
            .transition_from(EngineStatus::Processing, EngineStatus::Enabled);
        debug!(ticket = owner, "in-flight recognition abandoned");
    }

    fn finish(&self, owner: u64) -> Finish<R> {
        let mut mailbox = self.mailbox.lock();
        if mailbox.in_flight != Some(owner) {
            // The engine restarted mid-call and someone else owns the slot now.
            return Finish::Done;
        }

        match mailbox.pending.take() {
            Some((ticket, next)) if self.state.current() == EngineStatus::Processing => {
                mailbox.in_flight = Some(ticket);
                mailbox.last_dispatched = ticket;
                Finish::FollowUp(ticket, next)
            }
            Some((ticket, next)) => {
                mailbox.in_flight = None;
                Finish::Readmit(ticket, next)
            }
            None => {
                mailbox.in_flight = None;
                self.state
                    .transition_from(EngineStatus::Processing, EngineStatus::Enabled);
                Finish::Done
            }
        }
    }
}
