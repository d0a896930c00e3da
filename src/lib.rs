//! # Tripwire: Predicate-Based Event Routing and One-Shot Synchronization
//!
//! Tripwire sits on top of a publish/subscribe event bus and answers two
//! questions that raw pub/sub leaves open: *which* events does a piece of code
//! care about, and how does in-flight code *suspend* until one arrives?
//!
//! ## Components
//!
//! - [`filter::Filter`]: a composable predicate + payload extractor over
//!   events. Pure, no concurrency.
//! - [`trigger::Trigger`]: a one-shot, resettable suspension primitive bound
//!   to a filter — the bridge between event delivery and a waiting task.
//! - [`handler::HandlerControl`]: priority-ordered fan-out of many handlers
//!   over a single bus subscription per trigger.
//! - [`interrupt::InterruptControl`]: ad hoc "wait for the next matching
//!   event" with first-match-wins dispatch and automatic teardown.
//! - [`registry::PriorityRegistry`]: the ascending-priority, insertion-ordered
//!   multimap both dispatch components are built on.
//! - [`event_bus`]: the event model, the bus contract this engine consumes,
//!   and an in-process reference bus.
//!
//! ## Event Flow
//!
//! ```text
//! ┌───────┐  emit   ┌─────┐  callback  ┌─────────┐  catch   ┌─────────┐
//! │ code  │────────▶│ bus │───────────▶│ adapter │─────────▶│ filter/ │
//! └───────┘         └─────┘  per kind  └─────────┘ priority │ trigger │
//!                                                   order   └────┬────┘
//!                                                                │ payload
//!                                                ┌───────────────┴───┐
//!                                                │ handlers / waiter │
//!                                                └───────────────────┘
//! ```

pub mod event_bus;
pub mod filter;
pub mod handler;
pub mod interrupt;
pub mod message;
pub mod registry;
pub mod trigger;

// Re-exports
pub use event_bus::{Event, EventBus, EventKind, LocalBus, Value};
pub use filter::{Filter, FilterError};
pub use handler::{HandlerControl, HandlerId};
pub use interrupt::InterruptControl;
pub use registry::PriorityRegistry;
pub use trigger::{Resolution, Trigger, TriggerError};
