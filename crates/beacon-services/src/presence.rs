//! Presence monitor: turns validated announces into lifecycle events.
//!
//! One entry per path identity, each with exactly one live expiration
//! timer. All timers run on a single worker task backed by a
//! `DelayQueue`, so expirations are serialized.
//!
//! Every (re)schedule bumps a generation counter stored in the entry and
//! carried by the timer. A timer that fires only removes the entry when
//! its generation is still the entry's current one, so a refresh racing a
//! firing timer has exactly one outcome: either the refresh lands first
//! (the stale timer is ignored) or the expiry lands first (Lost, then the
//! refresh starts a fresh New).
//!
//! Handlers run while the table lock is held, which keeps events for one
//! identity in transition order across the ingest and timer paths. They
//! must be fast and must not call back into the monitor.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Announce, PathIdentity};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};

/// DelayQueue cannot hold deadlines much beyond two years.
const MAX_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ── Events ────────────────────────────────────────────────────────────────────

/// A lifecycle event, handed to every subscriber exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    New {
        identity: PathIdentity,
        announce: Arc<Announce>,
    },
    Update {
        identity: PathIdentity,
        old: Arc<Announce>,
        new: Arc<Announce>,
    },
    Lost {
        identity: PathIdentity,
        last: Arc<Announce>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    New,
    Update,
    Lost,
}

impl PresenceEvent {
    pub fn identity(&self) -> PathIdentity {
        match self {
            Self::New { identity, .. } | Self::Update { identity, .. } | Self::Lost { identity, .. } => {
                *identity
            }
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::New { .. } => EventKind::New,
            Self::Update { .. } => EventKind::Update,
            Self::Lost { .. } => EventKind::Lost,
        }
    }

    /// The announce the event leaves in effect (or, for Lost, the last one seen).
    pub fn announce(&self) -> &Arc<Announce> {
        match self {
            Self::New { announce, .. } => announce,
            Self::Update { new, .. } => new,
            Self::Lost { last, .. } => last,
        }
    }
}

/// What `observe` did with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Absent → present. A `New` event was emitted.
    New,
    /// Present, same content. Timer rescheduled, no event.
    Refreshed,
    /// Present, different content. An `Update` event was emitted.
    Updated,
}

// ── Subscriptions ─────────────────────────────────────────────────────────────

/// Receives lifecycle events. Called synchronously from the monitor.
pub trait PresenceHandler: Send + Sync {
    fn on_event(&self, event: &PresenceEvent);

    /// A closed handler is dropped from the subscriber list.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> PresenceHandler for F
where
    F: Fn(&PresenceEvent) + Send + Sync,
{
    fn on_event(&self, event: &PresenceEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel, handing work off the lock.
struct ChannelHandler(mpsc::UnboundedSender<PresenceEvent>);

impl PresenceHandler for ChannelHandler {
    fn on_event(&self, event: &PresenceEvent) {
        let _ = self.0.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Monitor failures. Unlike validation errors these are never swallowed:
/// each one means the lifecycle guarantee no longer holds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("presence monitor requires a tokio runtime")]
    NoRuntime,
    #[error("expiration timer service stopped")]
    TimerServiceStopped,
    #[error("presence monitor is shut down")]
    ShutDown,
    #[error("timer for {identity} out of order: generation {got} does not supersede {current}")]
    TimerInvariant {
        identity: PathIdentity,
        current: u64,
        got: u64,
    },
}

// ── State ─────────────────────────────────────────────────────────────────────

struct Presence {
    announce: Arc<Announce>,
    generation: u64,
}

struct Table {
    entries: HashMap<PathIdentity, Presence>,
    next_generation: u64,
    accepting: bool,
}

/// Shared between monitor handles and the timer worker.
struct State {
    table: Mutex<Table>,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn PresenceHandler>)>>,
    next_subscription: AtomicU64,
}

enum TimerCommand {
    Schedule {
        identity: PathIdentity,
        generation: u64,
        deadline: Instant,
    },
}

/// Owned by monitor handles only. Dropping the last handle stops the worker.
struct Control {
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<Result<(), MonitorError>>>>,
}

impl Drop for Control {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl State {
    fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                next_generation: 0,
                accepting: true,
            }),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Called by the timer worker when a deadline passes.
    fn expire(&self, identity: PathIdentity, generation: u64) {
        let mut table = self.table.lock();
        if let Entry::Occupied(slot) = table.entries.entry(identity) {
            if slot.get().generation == generation {
                let gone = slot.remove();
                tracing::debug!(identity = %identity, generation, "presence expired");
                self.emit(&PresenceEvent::Lost {
                    identity,
                    last: gone.announce,
                });
                return;
            }
        }
        tracing::trace!(identity = %identity, generation, "stale timer ignored");
    }

    /// Must be called with the table lock held.
    fn emit(&self, event: &PresenceEvent) {
        let mut closed = false;
        for (_, handler) in self.subscribers.read().iter() {
            if handler.is_closed() {
                closed = true;
                continue;
            }
            handler.on_event(event);
        }
        if closed {
            self.subscribers.write().retain(|(_, h)| !h.is_closed());
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

/// Cheap to clone; all clones share one presence table and timer worker.
#[derive(Clone)]
pub struct PresenceMonitor {
    state: Arc<State>,
    control: Arc<Control>,
}

impl PresenceMonitor {
    /// Start the monitor and its timer worker on the current tokio runtime.
    pub fn start() -> Result<Self, MonitorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let state = Arc::new(State::new());
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = runtime.spawn({
            let state = state.clone();
            let cancel = cancel.clone();
            async move {
                let result = timer_worker(state, timer_rx, cancel).await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "expiration timer worker failed");
                }
                result
            }
        });

        Ok(Self {
            state,
            control: Arc::new(Control {
                timer_tx,
                cancel,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Feed one validated announce. Schedules (or reschedules) the path's
    /// expiration and emits New/Update as needed.
    pub fn observe(
        &self,
        announce: Arc<Announce>,
        identity: PathIdentity,
    ) -> Result<Transition, MonitorError> {
        let mut table = self.state.table.lock();
        if !table.accepting {
            return Err(MonitorError::ShutDown);
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let deadline = Instant::now() + announce.expiration().min(MAX_EXPIRATION);

        // Timer first: if the worker is gone the table stays untouched.
        self.control
            .timer_tx
            .send(TimerCommand::Schedule {
                identity,
                generation,
                deadline,
            })
            .map_err(|_| MonitorError::TimerServiceStopped)?;

        let (transition, event) = match table.entries.entry(identity) {
            Entry::Occupied(mut slot) => {
                let presence = slot.get_mut();
                presence.generation = generation;
                let old = std::mem::replace(&mut presence.announce, announce.clone());
                if old == announce {
                    (Transition::Refreshed, None)
                } else {
                    (
                        Transition::Updated,
                        Some(PresenceEvent::Update {
                            identity,
                            old,
                            new: announce,
                        }),
                    )
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Presence {
                    announce: announce.clone(),
                    generation,
                });
                (Transition::New, Some(PresenceEvent::New { identity, announce }))
            }
        };

        tracing::trace!(identity = %identity, generation, ?transition, "presence observed");
        if let Some(event) = event {
            self.state.emit(&event);
        }
        Ok(transition)
    }

    /// Register a handler. Events already emitted are not replayed.
    pub fn subscribe(&self, handler: impl PresenceHandler + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.state.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.state.subscribers.write().push((id, Arc::new(handler)));
        id
    }

    /// Subscribe through a channel. Dropping the receiver unsubscribes.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<PresenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(ChannelHandler(tx));
        rx
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.state.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn get(&self, identity: &PathIdentity) -> Option<Arc<Announce>> {
        self.state
            .table
            .lock()
            .entries
            .get(identity)
            .map(|p| p.announce.clone())
    }

    pub fn len(&self) -> usize {
        self.state.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live presences, in no particular order.
    pub fn snapshot(&self) -> Vec<(PathIdentity, Arc<Announce>)> {
        self.state
            .table
            .lock()
            .entries
            .iter()
            .map(|(id, p)| (*id, p.announce.clone()))
            .collect()
    }

    /// Stop accepting announces, cancel all timers, and wait up to `grace`
    /// for the worker to finish. Live entries are dropped without Lost events.
    /// Returns the worker's own failure, if it had one. Safe to call twice.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), MonitorError> {
        let dropped = {
            let mut table = self.state.table.lock();
            table.accepting = false;
            let n = table.entries.len();
            table.entries.clear();
            n
        };
        self.control.cancel.cancel();

        let Some(mut worker) = self.control.worker.lock().take() else {
            return Ok(());
        };
        tracing::debug!(dropped, "presence monitor shutting down");

        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "timer worker panicked");
                Err(MonitorError::TimerServiceStopped)
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "timer worker did not stop in time, aborting"
                );
                worker.abort();
                Ok(())
            }
        }
    }
}

// ── Timer worker ──────────────────────────────────────────────────────────────

async fn timer_worker(
    state: Arc<State>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    cancel: CancellationToken,
) -> Result<(), MonitorError> {
    let mut queue: DelayQueue<(PathIdentity, u64)> = DelayQueue::new();
    let mut keys: HashMap<PathIdentity, (delay_queue::Key, u64)> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(pending = queue.len(), "timer worker stopping");
                return Ok(());
            }

            command = commands.recv() => match command {
                Some(TimerCommand::Schedule { identity, generation, deadline }) => {
                    if let Some((key, current)) = keys.remove(&identity) {
                        if generation <= current {
                            return Err(MonitorError::TimerInvariant { identity, current, got: generation });
                        }
                        queue.remove(&key);
                    }
                    let key = queue.insert_at((identity, generation), deadline);
                    keys.insert(identity, (key, generation));
                }
                None => return Ok(()),
            },

            Some(expired) = queue.next(), if !queue.is_empty() => {
                let (identity, generation) = expired.into_inner();
                match keys.remove(&identity) {
                    Some((_, current)) if current == generation => {}
                    other => {
                        return Err(MonitorError::TimerInvariant {
                            identity,
                            current: other.map(|(_, g)| g).unwrap_or(0),
                            got: generation,
                        });
                    }
                }
                state.expire(identity, generation);
            }
        }
    }
}
