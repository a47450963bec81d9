//! # Watchers and event batching
//!
//! Every parameter write produces an [`Event`] which is delivered to the
//! [`Watcher`]s registered for that parameter and attribute. Delivery either
//! happens right away or, while an owner is batching, is queued and flushed
//! later so that each watcher fires once with the last event per parameter.
//!
//! ## Core Components
//!
//! - [`Event`] and [`EventType`]: the record handed to callbacks
//! - [`Watcher`]: a registered callback and its delivery options
//! - [`WatcherRegistry`]: per-owner index of watchers by parameter and attribute
//! - [`dispatch`]: the engine delivering and flushing events
//!
//! Callbacks return an [`Effect`](crate::function::Effect); deferred effects
//! are handed to the owner's executor instead of being run inline.

pub(crate) mod dispatch;
pub mod registry;
pub mod watcher;

use std::fmt;

use serde::Serialize;

use crate::parameterized::{Class, Parameterized};
use crate::value::Value;

pub use registry::{BatchState, WatcherRegistry};
pub use watcher::{WatchCallback, Watcher, WatcherMode};

/// How an event came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Produced by an explicit `trigger`.
    Triggered,
    /// Delivered to an `onlychanged` watcher, so the value differs from the old one.
    Changed,
    /// Delivered to a watcher that fires on every assignment.
    Set,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventType::Triggered => "triggered",
            EventType::Changed => "changed",
            EventType::Set => "set",
        };
        write!(f, "{}", label)
    }
}

/// A change to one attribute of one parameter.
#[derive(Debug, Clone)]
pub struct Event {
    /// The attribute that changed, `"value"` or a facet name.
    pub what: String,
    pub name: String,
    /// The instance that changed, `None` for class-level parameters.
    pub obj: Option<Parameterized>,
    /// The class declaring the parameter.
    pub cls: Class,
    pub old: Value,
    pub new: Value,
    pub event_type: Option<EventType>,
}

impl Event {
    /// Copy of the event typed for delivery to `watcher`.
    pub(crate) fn typed(mut self, watcher: &Watcher, triggered: bool) -> Event {
        self.event_type = Some(if triggered {
            EventType::Triggered
        } else if watcher.onlychanged() {
            EventType::Changed
        } else {
            EventType::Set
        });
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(what={}, name={}, old={}, new={}",
            self.what,
            self.name,
            self.old.repr(),
            self.new.repr()
        )?;
        match self.event_type {
            Some(kind) => write!(f, ", type={})", kind),
            None => write!(f, ")"),
        }
    }
}
