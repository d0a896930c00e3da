//! Message-flavored filter builders.
//!
//! Chat-protocol events carry a small conventional parameter set:
//! `sender_id`, `group_id` and `quote_id` as integers, `text` as a string.
//! [`MessageFilter`] assembles the usual constraints over those parameters —
//! only this friend, only this group member, only replies quoting a given
//! message — as mixins of a composite [`Filter`], so they compose with any
//! custom extractor.

use crate::event_bus::{Event, EventKind, Value};
use crate::filter::{Filter, FilterResult};
use crate::trigger::Trigger;

pub const SENDER_ID: &str = "sender_id";
pub const GROUP_ID: &str = "group_id";
pub const QUOTE_ID: &str = "quote_id";
pub const TEXT: &str = "text";

/// Builder for filters over the conventional message parameters.
///
/// # Example
///
/// ```rust
/// use tripwire::event_bus::Value;
/// use tripwire::message::MessageFilter;
///
/// // Only group 1000's member 42, and only if the message quotes #7.
/// let filter = MessageFilter::group()
///     .group_id(1000)
///     .sender(42)
///     .quote(7)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    kind: EventKind,
    sender: Option<i64>,
    group: Option<i64>,
    quote: Option<i64>,
}

impl MessageFilter {
    pub fn friend() -> Self {
        Self {
            kind: EventKind::FriendMessage,
            ..Default::default()
        }
    }

    pub fn group() -> Self {
        Self {
            kind: EventKind::GroupMessage,
            ..Default::default()
        }
    }

    pub fn temp() -> Self {
        Self {
            kind: EventKind::TempMessage,
            ..Default::default()
        }
    }

    /// Only messages from this sender.
    pub fn sender(mut self, id: i64) -> Self {
        self.sender = Some(id);
        self
    }

    /// Only messages from this group (group and temp messages).
    pub fn group_id(mut self, id: i64) -> Self {
        self.group = Some(id);
        self
    }

    /// Only messages quoting the message with this id. A message without a
    /// quote never matches.
    pub fn quote(mut self, message_id: i64) -> Self {
        self.quote = Some(message_id);
        self
    }

    /// Builds the composite filter; captures carry the event's parameter map
    /// as payload.
    pub fn build(self) -> Filter {
        let kind = self.kind.clone();
        Filter::with_mixins(kind, self.mixins())
    }

    /// Builds the composite filter with a custom extractor deciding the
    /// payload once every constraint has matched.
    pub fn build_with<F>(self, extract: F) -> Filter
    where
        F: Fn(&Event) -> FilterResult + Send + Sync + 'static,
    {
        let kind = self.kind.clone();
        Filter::with_mixins(kind, self.mixins()).try_extract(extract)
    }

    /// Builds the filter and wraps it in a trigger at `priority`.
    pub fn trigger(self, priority: i32) -> Trigger {
        Trigger::new(self.build(), priority)
    }

    fn mixins(&self) -> Vec<Filter> {
        let mut mixins = Vec::new();
        if let Some(sender) = self.sender {
            mixins.push(param_equals(self.kind.clone(), SENDER_ID, sender));
        }
        if let Some(group) = self.group {
            mixins.push(param_equals(self.kind.clone(), GROUP_ID, group));
        }
        if let Some(quote) = self.quote {
            mixins.push(param_equals(self.kind.clone(), QUOTE_ID, quote));
        }
        mixins
    }
}

/// A mixin matching when the event carries `key` with exactly `expected`.
fn param_equals(kind: EventKind, key: &'static str, expected: i64) -> Filter {
    Filter::new(kind).extract(move |event| match event.int_param(key) {
        Some(actual) if actual == expected => Some(Value::Boolean(true)),
        _ => None,
    })
}
