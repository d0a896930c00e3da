//! # Handler Fan-Out
//!
//! [`HandlerControl`] lets application code hang many handlers off one
//! trigger while the bus sees a single subscription. The first registration
//! for a trigger installs one adapter on the bus for the trigger's kind; every
//! further handler joins the trigger's priority registry and shares that
//! adapter.
//!
//! Per incoming event the adapter re-arms the trigger, offers it the event,
//! and on capture dispatches every registered handler — ascending priority,
//! insertion order within a bucket — with the event and the one extracted
//! payload. Handlers are spawned fire-and-forget; their join handles flow back
//! through the bus so emitters can track completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event_bus::{BusCallback, Event, EventBus, EventResult, Value};
use crate::registry::PriorityRegistry;
use crate::trigger::Trigger;

/// An application handler: receives the raw event and the payload the
/// trigger's filter extracted from it.
pub type Handler = Arc<dyn Fn(Event, Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle identifying one (trigger, handler) registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerId {
    trigger: Uuid,
    registration: Uuid,
}

type HandlerTable = Arc<Mutex<PriorityRegistry<Uuid, Handler>>>;

/// Priority-ordered multi-handler dispatcher sharing one bus subscription per
/// trigger.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tripwire::event_bus::{EventKind, LocalBus};
/// use tripwire::handler::HandlerControl;
/// use tripwire::trigger::Trigger;
///
/// # async fn example() {
/// let bus = Arc::new(LocalBus::new());
/// let control = HandlerControl::new(bus);
/// let trigger = Arc::new(Trigger::any(EventKind::FriendMessage, 0));
///
/// control.on(&trigger, 0, |event, payload| async move {
///     println!("handled {:?} with {:?}", event, payload);
/// });
/// # }
/// ```
pub struct HandlerControl {
    bus: Arc<dyn EventBus>,
    handlers: Arc<DashMap<Uuid, HandlerTable>>,
}

impl HandlerControl {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            handlers: Arc::new(DashMap::new()),
        }
    }

    /// Registers `handler` under `trigger` at `priority`.
    ///
    /// The first registration for a trigger installs the bus adapter for the
    /// trigger's kind; the adapter is never removed, even if every handler
    /// later unsubscribes.
    pub fn subscribe(
        &self,
        trigger: &Arc<Trigger>,
        handler: Handler,
        priority: i32,
    ) -> HandlerId {
        let (table, fresh) = match self.handlers.entry(trigger.id()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let table: HandlerTable = Arc::new(Mutex::new(PriorityRegistry::new()));
                entry.insert(table.clone());
                (table, true)
            }
        };
        if fresh {
            self.install_adapter(trigger, table.clone());
        }

        let registration = Uuid::new_v4();
        // Registration ids are fresh, so add cannot report a duplicate.
        let _ = table.lock().unwrap().add(priority, registration, handler);
        debug!(trigger = %trigger.id(), %registration, priority, "handler subscribed");
        HandlerId {
            trigger: trigger.id(),
            registration,
        }
    }

    /// Convenience over [`HandlerControl::subscribe`] taking a plain async
    /// closure.
    pub fn on<F, Fut>(&self, trigger: &Arc<Trigger>, priority: i32, handler: F) -> HandlerId
    where
        F: Fn(Event, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.subscribe(
            trigger,
            Arc::new(move |event, payload| handler(event, payload).boxed()),
            priority,
        )
    }

    /// Removes one registration. Removing a registration that was never made
    /// (or was already removed) is logged and otherwise ignored.
    pub fn unsubscribe(&self, handle: &HandlerId) {
        match self.handlers.get(&handle.trigger) {
            Some(table) => {
                if table.lock().unwrap().remove(&handle.registration).is_err() {
                    warn!(
                        trigger = %handle.trigger,
                        registration = %handle.registration,
                        "tried to remove a handler that is not registered"
                    );
                }
            }
            None => warn!(
                trigger = %handle.trigger,
                "tried to remove a handler from an unknown trigger"
            ),
        }
    }

    /// Pass-through to the underlying bus.
    pub async fn emit(&self, event: Event) -> EventResult<Vec<JoinHandle<()>>> {
        self.bus.emit(event).await
    }

    fn install_adapter(&self, trigger: &Arc<Trigger>, table: HandlerTable) {
        let adapter_trigger = trigger.clone();
        let callback: BusCallback = Arc::new(move |event: Event| {
            let trigger = adapter_trigger.clone();
            let table = table.clone();
            async move {
                trigger.reset();
                if !trigger.catch(&event).await {
                    return Vec::new();
                }
                // The slot just resolved, so this returns without suspending.
                let payload = match trigger.wait(Duration::ZERO).await {
                    Ok(Some(payload)) => payload,
                    Ok(None) => return Vec::new(),
                    Err(error) => {
                        warn!(
                            trigger = %trigger.id(),
                            %error,
                            "capture failed; handlers not dispatched"
                        );
                        return Vec::new();
                    }
                };

                let snapshot = table.lock().unwrap().snapshot();
                let mut handles = Vec::new();
                for (_, group) in snapshot {
                    for (_, handler) in group {
                        handles.push(tokio::spawn(handler(event.clone(), payload.clone())));
                    }
                }
                handles
            }
            .boxed()
        });
        self.bus
            .on(trigger.kind().clone(), trigger.priority(), callback);
    }
}
