//! # Event Filters
//!
//! A [`Filter`] decides whether an event is of interest and, when it is,
//! extracts a payload from it. Filters compose by *mixins*: a composite filter
//! captures an event only if every mixed-in child captures it first, and
//! evaluation short-circuits on the first child that declines.
//!
//! Capture is decided by presence, not truthiness: an extractor returning
//! `Some(Value::Boolean(false))` has captured the event. Extractor failures
//! are real errors and propagate out of [`Filter::catch`]; they are never
//! folded into "no match".

use std::fmt;
use std::sync::Arc;

use async_recursion::async_recursion;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::event_bus::{Event, EventKind, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("extractor failed: {0}")]
    Extractor(String),
}

impl FilterError {
    pub fn extractor<S: Into<String>>(message: S) -> Self {
        FilterError::Extractor(message.into())
    }
}

pub type FilterResult = Result<Option<Value>, FilterError>;

/// The extractor half of a filter: inspects an event and yields `Some(payload)`
/// to capture it, `None` to decline, or an error.
///
/// Extractors are async so they may themselves suspend (a lookup, a prompt to
/// another component) before deciding.
pub type Extractor = Arc<dyn Fn(Event) -> BoxFuture<'static, FilterResult> + Send + Sync>;

/// A composable predicate and payload extractor over events.
///
/// # Example
///
/// ```rust
/// use tripwire::event_bus::{Event, EventKind, Value};
/// use tripwire::filter::Filter;
///
/// # async fn example() {
/// let filter = Filter::new(EventKind::Custom("Ping".to_string()))
///     .extract(|event| match event.int_param("from") {
///         Some(42) => Some(Value::Integer(42)),
///         _ => None,
///     });
///
/// let event = Event::new(EventKind::Custom("Ping".to_string()))
///     .with_param("from", Value::Integer(42));
/// assert_eq!(filter.catch(&event).await, Ok(Some(Value::Integer(42))));
/// # }
/// ```
#[derive(Clone)]
pub struct Filter {
    kind: EventKind,
    mixins: Vec<Filter>,
    extractor: Option<Extractor>,
}

impl Filter {
    /// A filter that captures every event of `kind`, with the event's
    /// parameter map as payload.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            mixins: Vec::new(),
            extractor: None,
        }
    }

    pub fn with_mixins(kind: EventKind, mixins: Vec<Filter>) -> Self {
        Self {
            kind,
            mixins,
            extractor: None,
        }
    }

    /// Appends a mixed-in child filter. Children are checked before this
    /// filter's own extractor, in the order they were added.
    pub fn mixin(mut self, filter: Filter) -> Self {
        self.mixins.push(filter);
        self
    }

    /// Sets a synchronous, infallible extractor.
    pub fn extract<F>(self, f: F) -> Self
    where
        F: Fn(&Event) -> Option<Value> + Send + Sync + 'static,
    {
        self.try_extract(move |event| Ok(f(event)))
    }

    /// Sets a synchronous extractor whose failures surface from `catch`.
    pub fn try_extract<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) -> FilterResult + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(move |event: Event| {
            let result = f(&event);
            async move { result }.boxed()
        }));
        self
    }

    /// Sets an asynchronous extractor.
    pub fn extract_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FilterResult> + Send + 'static,
    {
        self.extractor = Some(Arc::new(move |event: Event| f(event).boxed()));
        self
    }

    /// The event kind this filter targets. Used for bus routing only; `catch`
    /// itself does not compare kinds, matching the bus's per-kind delivery.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Tries to capture and parse an event.
    ///
    /// Mixed-in children are evaluated first, in order; the first child that
    /// declines ends the evaluation without invoking this filter's extractor.
    /// With no extractor configured, a capture carries the event's parameter
    /// map as payload.
    #[async_recursion]
    pub async fn catch(&self, event: &Event) -> FilterResult {
        for mixin in &self.mixins {
            if mixin.catch(event).await?.is_none() {
                return Ok(None);
            }
        }
        match &self.extractor {
            Some(extract) => extract(event.clone()).await,
            None => Ok(Some(Value::Map(event.parameters.clone()))),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("kind", &self.kind)
            .field("mixins", &self.mixins.len())
            .field("extractor", &self.extractor.is_some())
            .finish()
    }
}
