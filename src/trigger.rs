//! # One-Shot Triggers
//!
//! A [`Trigger`] bridges the gap between the push-style bus and code that
//! wants to suspend until a matching event arrives. It pairs a [`Filter`] with
//! a single resolution slot: the dispatch path offers events via
//! [`Trigger::catch`], and at most one consumer suspends on
//! [`Trigger::wait`] until the slot turns terminal or a deadline passes.
//!
//! ## Lifecycle
//!
//! The slot transitions out of [`Resolution::Pending`] exactly once. After a
//! wait has completed — by result or by timeout — the trigger refuses a second
//! wait; [`Trigger::reset`] cancels whatever the current slot holds and arms a
//! fresh one, giving the same trigger identity a new one-shot cycle.
//!
//! `reset` swaps in a new slot *cell*, so a waiter still suspended on the old
//! cell can only ever observe that cell's cancellation, never a result from a
//! later cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::trace;
use uuid::Uuid;

use crate::event_bus::{Event, EventKind, Value};
use crate::filter::{Filter, FilterError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriggerError {
    /// A previous `wait` on this trigger already completed; the primitive is
    /// single-consumer until `reset`.
    #[error("trigger has already been awaited")]
    AlreadyAwaited,

    /// The slot was cancelled out from under the waiter (a concurrent
    /// `reset`).
    #[error("trigger cancelled before completion")]
    Cancelled,

    /// The filter failed while capturing; the failure is delivered to the
    /// waiter rather than swallowed.
    #[error(transparent)]
    Filter(#[from] FilterError),
}

pub type TriggerResult = Result<Option<Value>, TriggerError>;

/// The state of a trigger's resolution slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Pending,
    Resolved(Value),
    Failed(FilterError),
    Cancelled,
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Resolution::Pending)
    }
}

/// Runs once when the slot it was registered against turns terminal,
/// receiving the terminal resolution.
pub type DoneCallback = Box<dyn FnOnce(&Resolution) + Send + 'static>;

/// One generation of the resolution slot. Waiters hold their own `Arc` to the
/// cell they suspended on, so `reset` installing a new cell cannot redirect
/// them.
struct SlotCell {
    state: Mutex<Resolution>,
    notify: Notify,
}

impl SlotCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(Resolution::Pending),
            notify: Notify::new(),
        }
    }

    fn resolution(&self) -> Resolution {
        self.state.lock().unwrap().clone()
    }

    fn is_pending(&self) -> bool {
        matches!(*self.state.lock().unwrap(), Resolution::Pending)
    }

    /// Transitions Pending → `resolution` and wakes the waiter. Returns false
    /// when the cell was already terminal, leaving it untouched.
    fn resolve(&self, resolution: Resolution) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return false;
            }
            *state = resolution;
        }
        self.notify.notify_waiters();
        true
    }

    async fn terminal(&self) -> Resolution {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeup before checking, so a resolve between the
            // check and the await cannot be missed.
            notified.as_mut().enable();
            let current = self.resolution();
            if current.is_terminal() {
                return current;
            }
            notified.await;
        }
    }
}

struct Inner {
    slot: Option<Arc<SlotCell>>,
    waited: bool,
    callbacks: Vec<DoneCallback>,
}

/// A one-shot, resettable synchronization primitive bound to a filter.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tripwire::event_bus::{Event, EventKind, Value};
/// use tripwire::filter::Filter;
/// use tripwire::trigger::Trigger;
///
/// # async fn example() {
/// let filter = Filter::new(EventKind::FriendMessage)
///     .extract(|event| event.int_param("sender_id").map(Value::Integer));
/// let trigger = Arc::new(Trigger::new(filter, 0));
///
/// let waiter = {
///     let trigger = trigger.clone();
///     tokio::spawn(async move { trigger.wait(Duration::from_secs(1)).await })
/// };
///
/// let event = Event::new(EventKind::FriendMessage)
///     .with_param("sender_id", Value::Integer(42));
/// trigger.catch(&event).await;
/// # }
/// ```
pub struct Trigger {
    id: Uuid,
    kind: EventKind,
    priority: i32,
    filter: Option<Filter>,
    inner: Mutex<Inner>,
}

impl Trigger {
    /// A trigger that resolves with the payload `filter` extracts.
    pub fn new(filter: Filter, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: filter.kind().clone(),
            priority,
            filter: Some(filter),
            inner: Mutex::new(Inner {
                slot: None,
                waited: false,
                callbacks: Vec::new(),
            }),
        }
    }

    /// A trigger without a filter: any event of `kind` resolves it with
    /// [`Value::Null`].
    pub fn any(kind: EventKind, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            filter: None,
            inner: Mutex::new(Inner {
                slot: None,
                waited: false,
                callbacks: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Cancels the current slot and arms a fresh one, clearing the awaited
    /// mark. Done callbacks registered against the cancelled slot fire with
    /// [`Resolution::Cancelled`] — or with the terminal resolution a
    /// concurrent capture installed first — and a waiter suspended on it
    /// observes the cancellation.
    pub fn reset(&self) {
        let cancelled = {
            let mut inner = self.inner.lock().unwrap();
            let old = inner.slot.replace(Arc::new(SlotCell::new()));
            inner.waited = false;
            old.map(|cell| (cell, std::mem::take(&mut inner.callbacks)))
        };
        if let Some((cell, callbacks)) = cancelled {
            // A capture racing this reset may turn the cell terminal first;
            // the drained callbacks then fire with that resolution instead of
            // being dropped.
            let resolution = if cell.resolve(Resolution::Cancelled) {
                Resolution::Cancelled
            } else {
                cell.resolution()
            };
            for callback in callbacks {
                callback(&resolution);
            }
        }
    }

    /// Tries to capture an event.
    ///
    /// Returns `false` without evaluating anything when no slot is armed or
    /// the slot is already terminal. Otherwise the filter decides: a payload
    /// resolves the slot (`true`), a filter failure resolves it as failed —
    /// the event was still consumed — (`true`), and "no match" leaves the
    /// slot untouched (`false`).
    pub async fn catch(&self, event: &Event) -> bool {
        let cell = {
            let inner = self.inner.lock().unwrap();
            match &inner.slot {
                Some(cell) if cell.is_pending() => cell.clone(),
                _ => return false,
            }
        };

        let resolution = match &self.filter {
            Some(filter) => match filter.catch(event).await {
                Ok(Some(payload)) => Resolution::Resolved(payload),
                Ok(None) => return false,
                Err(error) => Resolution::Failed(error),
            },
            None => Resolution::Resolved(Value::Null),
        };

        let captured = self.complete(&cell, resolution);
        if captured {
            trace!(trigger = %self.id, kind = %self.kind, "trigger captured event");
        }
        captured
    }

    /// Suspends until the slot turns terminal or `timeout` elapses.
    ///
    /// A zero `timeout` waits indefinitely. Timing out is not an error: the
    /// slot is cancelled (running its done callbacks, so registrations tear
    /// down) and `Ok(None)` is returned. Either way the trigger is marked
    /// awaited and a second `wait` without an intervening `reset` fails with
    /// [`TriggerError::AlreadyAwaited`].
    pub async fn wait(&self, timeout: Duration) -> TriggerResult {
        let cell = {
            let mut inner = self.inner.lock().unwrap();
            if inner.waited {
                return Err(TriggerError::AlreadyAwaited);
            }
            inner
                .slot
                .get_or_insert_with(|| Arc::new(SlotCell::new()))
                .clone()
        };

        let resolution = if timeout.is_zero() {
            cell.terminal().await
        } else {
            match tokio::time::timeout(timeout, cell.terminal()).await {
                Ok(resolution) => resolution,
                Err(_elapsed) => {
                    self.complete(&cell, Resolution::Cancelled);
                    self.mark_waited(&cell);
                    // A capture may have won the race right at the deadline.
                    return match cell.resolution() {
                        Resolution::Resolved(value) => Ok(Some(value)),
                        Resolution::Failed(error) => Err(TriggerError::Filter(error)),
                        _ => Ok(None),
                    };
                }
            }
        };

        self.mark_waited(&cell);
        match resolution {
            Resolution::Resolved(value) => Ok(Some(value)),
            Resolution::Failed(error) => Err(TriggerError::Filter(error)),
            Resolution::Cancelled => Err(TriggerError::Cancelled),
            // `terminal` only returns terminal states.
            Resolution::Pending => Ok(None),
        }
    }

    /// True once a wait has completed or the current slot is terminal.
    pub fn done(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.waited
            || inner
                .slot
                .as_ref()
                .is_some_and(|cell| cell.resolution().is_terminal())
    }

    /// Registers `callback` to run exactly once when the current slot turns
    /// terminal. On an already-terminal slot it runs immediately; callbacks
    /// registered before any slot is armed are carried into the first armed
    /// generation.
    pub fn add_done_callback(&self, callback: DoneCallback) {
        let mut inner = self.inner.lock().unwrap();
        let terminal = inner
            .slot
            .as_ref()
            .map(|cell| cell.resolution())
            .filter(Resolution::is_terminal);
        match terminal {
            Some(resolution) => {
                drop(inner);
                callback(&resolution);
            }
            None => inner.callbacks.push(callback),
        }
    }

    /// Resolves `cell` and, when it is still the trigger's current slot,
    /// drains and runs the done callbacks. Returns false when the cell had
    /// already turned terminal.
    fn complete(&self, cell: &Arc<SlotCell>, resolution: Resolution) -> bool {
        if !cell.resolve(resolution.clone()) {
            return false;
        }
        let callbacks = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.slot {
                Some(current) if Arc::ptr_eq(current, cell) => {
                    std::mem::take(&mut inner.callbacks)
                }
                _ => Vec::new(),
            }
        };
        for callback in callbacks {
            callback(&resolution);
        }
        true
    }

    fn mark_waited(&self, cell: &Arc<SlotCell>) {
        let mut inner = self.inner.lock().unwrap();
        // A reset that already started a new cycle must not be poisoned by a
        // stale waiter returning late.
        if let Some(current) = &inner.slot {
            if Arc::ptr_eq(current, cell) {
                inner.waited = true;
            }
        }
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish()
    }
}
