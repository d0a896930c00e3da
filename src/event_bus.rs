//! # Event Model and Bus Contract
//!
//! This module defines the event value consumed by the dispatch engine and the
//! minimal contract it expects from the underlying publish/subscribe bus.
//!
//! The engine itself never talks to a transport. It registers callbacks on an
//! [`EventBus`] implementation, one callback per event kind, and fans incoming
//! events out to filters and triggers from there. Any bus that can invoke
//! registered callbacks in ascending priority order satisfies the contract.
//!
//! ## Design Decisions
//!
//! Events are deliberately schema-free: a kind tag plus a parameter map. The
//! filtering layer extracts whatever structure it needs from the parameters,
//! so the engine stays independent of any concrete message model.
//!
//! [`LocalBus`] is the in-process reference implementation used by tests and
//! embedding applications that do not need a transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::registry::PriorityRegistry;

/// The kind tag an event is routed by.
///
/// The three message kinds mirror the chat-protocol events this engine grew up
/// around; `Custom` keeps the space open for application-defined kinds without
/// this crate prescribing their schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, Default)]
pub enum EventKind {
    #[default]
    FriendMessage,
    GroupMessage,
    TempMessage,
    Custom(String),
}

/// Parameter and payload values carried by events.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Duration(Duration),
    Null,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

/// A discrete message on the bus: a kind tag and a payload of key-value
/// parameters.
///
/// # Example
///
/// ```rust
/// use tripwire::event_bus::{Event, EventKind, Value};
///
/// let event = Event::new(EventKind::Custom("Ping".to_string()))
///     .with_param("from", Value::Integer(42));
/// assert_eq!(event.int_param("from"), Some(42));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    /// The kind tag, which determines how the event is routed.
    pub kind: EventKind,
    /// Event payload data as key-value pairs.
    pub parameters: HashMap<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            parameters: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn int_param(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A callback registered on the bus for one event kind.
///
/// The callback receives each emitted event of its kind and returns handles to
/// any asynchronous work it spawned, so emitters can track completion.
pub type BusCallback =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Vec<JoinHandle<()>>> + Send + Sync>;

/// # EventBus
///
/// The contract the dispatch engine consumes from the underlying bus.
///
/// Implementations must invoke the callbacks registered for a kind in
/// ascending priority order (insertion order within one priority) for every
/// emitted event of that kind. There is no unsubscribe path: adapters are
/// installed once per kind and live as long as the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Registers `callback` for events of `kind` at the given bus-level
    /// priority (smaller runs earlier).
    fn on(&self, kind: EventKind, priority: i32, callback: BusCallback);

    /// Publishes an event, returning handles to the asynchronous work spawned
    /// by subscribers.
    async fn emit(&self, event: Event) -> EventResult<Vec<JoinHandle<()>>>;
}

/// In-process [`EventBus`] implementation.
///
/// Callbacks are held in a [`PriorityRegistry`] per kind and invoked inline,
/// one after another, when an event is emitted. Suitable for tests and for
/// applications whose bus lives in the same process as the engine.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<EventKind, PriorityRegistry<Uuid, BusCallback>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(kind)
            .map_or(0, |registry| registry.len())
    }
}

#[async_trait]
impl EventBus for LocalBus {
    fn on(&self, kind: EventKind, priority: i32, callback: BusCallback) {
        trace!(kind = %kind, priority, "registering bus callback");
        let mut subscribers = self.subscribers.lock().unwrap();
        let registry = subscribers.entry(kind).or_default();
        // Registration ids are fresh, so add cannot report a duplicate.
        let _ = registry.add(priority, Uuid::new_v4(), callback);
    }

    async fn emit(&self, event: Event) -> EventResult<Vec<JoinHandle<()>>> {
        debug_event("Emitting", &event);
        let snapshot = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .get(&event.kind)
                .map(|registry| registry.snapshot())
                .unwrap_or_default()
        };

        let mut handles = Vec::new();
        for (_, group) in snapshot {
            for (_, callback) in group {
                handles.extend(callback(event.clone()).await);
            }
        }
        Ok(handles)
    }
}

/// Logs an event at a level appropriate to its volume.
pub fn debug_event(prefix: &str, event: &Event) {
    match &event.kind {
        EventKind::Custom(name) => debug!(kind = %name, "{} event: {:?}", prefix, event),
        _ => trace!(kind = %event.kind, "{} event: {:?}", prefix, event),
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event send failed: {message}")]
    SendFailed { message: String },

    #[error("Event receive failed: {message}")]
    ReceiveFailed { message: String },
}

pub type EventResult<T> = Result<T, EventError>;
