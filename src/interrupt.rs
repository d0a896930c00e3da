//! # Interrupt Waits
//!
//! [`InterruptControl`] gives already-running code one-shot access to "the
//! next event matching this predicate" without a permanent subscription: it
//! parks a trigger in a per-kind registry, suspends the caller on it, and
//! tears the registration down the instant the trigger completes — by
//! capture, failure, or timeout.
//!
//! Dispatch is strict first-match-wins: for each incoming event the kind's
//! registry is walked in ascending priority order (insertion order within a
//! bucket) and the first trigger that captures the event stops the walk
//! across *all* buckets. At most one parked trigger consumes any given event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::event_bus::{BusCallback, Event, EventBus, EventKind};
use crate::filter::Filter;
use crate::registry::PriorityRegistry;
use crate::trigger::{Trigger, TriggerResult};
use uuid::Uuid;

/// Bus-level priority interrupt adapters register at when none is given.
/// Later than ordinary handlers, which register at their trigger's priority.
pub const DEFAULT_ADAPTER_PRIORITY: i32 = 15;

type WaitTable = Arc<Mutex<PriorityRegistry<Uuid, Arc<Trigger>>>>;

/// Ad hoc, first-match-wins one-shot waiter registry.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tripwire::event_bus::{EventKind, LocalBus, Value};
/// use tripwire::filter::Filter;
/// use tripwire::interrupt::InterruptControl;
///
/// # async fn example() {
/// let bus = Arc::new(LocalBus::new());
/// let interrupts = InterruptControl::new(bus);
///
/// let filter = Filter::new(EventKind::FriendMessage)
///     .extract(|event| match event.int_param("sender_id") {
///         Some(42) => event.str_param("text").map(Value::from),
///         _ => None,
///     });
///
/// // Suspends until sender 42 speaks, or for at most 30 seconds.
/// let reply = interrupts
///     .wait_filter(filter, Duration::from_secs(30), 0)
///     .await;
/// # }
/// ```
pub struct InterruptControl {
    bus: Arc<dyn EventBus>,
    adapter_priority: i32,
    waits: Arc<DashMap<EventKind, WaitTable>>,
}

impl InterruptControl {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_priority(bus, DEFAULT_ADAPTER_PRIORITY)
    }

    /// Like [`InterruptControl::new`], but adapters register on the bus at
    /// `adapter_priority` instead of the default.
    pub fn with_priority(bus: Arc<dyn EventBus>, adapter_priority: i32) -> Self {
        Self {
            bus,
            adapter_priority,
            waits: Arc::new(DashMap::new()),
        }
    }

    /// Parks `trigger` in its kind's registry and suspends until it resolves
    /// or `timeout` elapses (zero waits indefinitely).
    ///
    /// The registration is torn down by a done callback the moment the
    /// trigger completes, so the registry never retains an exhausted trigger:
    /// after this returns, a further matching event no longer reaches it.
    pub async fn wait(&self, trigger: Arc<Trigger>, timeout: Duration) -> TriggerResult {
        let table = self.table_for(trigger.kind());

        let registered = {
            let mut registry = table.lock().unwrap();
            match registry.add(trigger.priority(), trigger.id(), trigger.clone()) {
                Ok(()) => true,
                Err(error) => {
                    warn!(trigger = %trigger.id(), %error, "trigger already waiting; keeping the existing registration");
                    false
                }
            }
        };

        // Only the wait that registered the trigger attaches the teardown;
        // a duplicate wait sharing the registration must not remove it twice.
        if registered {
            let cleanup_table = table.clone();
            let trigger_id = trigger.id();
            trigger.add_done_callback(Box::new(move |_resolution| {
                if cleanup_table.lock().unwrap().remove(&trigger_id).is_err() {
                    warn!(trigger = %trigger_id, "completed trigger was not in the wait registry");
                }
            }));
        }

        debug!(trigger = %trigger.id(), kind = %trigger.kind(), "waiting on trigger");
        trigger.wait(timeout).await
    }

    /// Wraps `filter` in a fresh trigger at `priority` and waits on it.
    pub async fn wait_filter(
        &self,
        filter: Filter,
        timeout: Duration,
        priority: i32,
    ) -> TriggerResult {
        self.wait(Arc::new(Trigger::new(filter, priority)), timeout)
            .await
    }

    /// Number of triggers currently parked for `kind`.
    pub fn waiting(&self, kind: &EventKind) -> usize {
        self.waits
            .get(kind)
            .map_or(0, |table| table.lock().unwrap().len())
    }

    /// Returns the wait table for `kind`, installing the bus adapter the
    /// first time the kind is seen.
    fn table_for(&self, kind: &EventKind) -> WaitTable {
        let (table, fresh) = match self.waits.entry(kind.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let table: WaitTable = Arc::new(Mutex::new(PriorityRegistry::new()));
                entry.insert(table.clone());
                (table, true)
            }
        };
        if fresh {
            self.install_adapter(kind.clone(), table.clone());
        }
        table
    }

    fn install_adapter(&self, kind: EventKind, table: WaitTable) {
        let callback: BusCallback = Arc::new(move |event: Event| {
            let table = table.clone();
            async move {
                // Snapshot so removals fired by a capture (or a concurrent
                // timeout) cannot invalidate the walk.
                let snapshot = table.lock().unwrap().snapshot();
                'walk: for (_, group) in snapshot {
                    for (_, trigger) in group {
                        if trigger.catch(&event).await {
                            // First capture consumes the event for every
                            // remaining bucket.
                            break 'walk;
                        }
                    }
                }
                Vec::new()
            }
            .boxed()
        });
        self.bus.on(kind, self.adapter_priority, callback);
    }
}
