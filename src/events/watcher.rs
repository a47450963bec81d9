//! Registered callbacks.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::function::Effect;
use crate::parameterized::owner::WeakOwner;
use crate::parameterized::{Class, Owner, Parameterized};

use super::Event;

/// Callback invoked with the events of one delivery.
pub type WatchCallback = Rc<dyn Fn(&[Event]) -> Result<Effect>>;

/// How a callback wants its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherMode {
    /// The list of events.
    Args,
    /// A mapping from parameter name to new value.
    Kwargs,
}

struct WatcherInner {
    owner: WeakOwner,
    name: String,
    callback: WatchCallback,
    mode: WatcherMode,
    onlychanged: bool,
    parameter_names: Vec<String>,
    what: String,
    queued: bool,
    precedence: i32,
}

/// A callback registered on the parameters of one owner.
///
/// Watchers compare by identity; two registrations of the same closure are
/// different watchers.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

#[allow(clippy::too_many_arguments)]
impl Watcher {
    pub(crate) fn new(
        owner: &Owner,
        name: impl Into<String>,
        callback: WatchCallback,
        mode: WatcherMode,
        parameter_names: Vec<String>,
        what: impl Into<String>,
        onlychanged: bool,
        queued: bool,
        precedence: i32,
    ) -> Self {
        Watcher(Rc::new(WatcherInner {
            owner: owner.downgrade(),
            name: name.into(),
            callback,
            mode,
            onlychanged,
            parameter_names,
            what: what.into(),
            queued,
            precedence,
        }))
    }

    /// The class or instance the watcher is registered on, if still alive.
    pub fn owner(&self) -> Option<Owner> {
        self.0.owner.upgrade()
    }

    pub fn inst(&self) -> Option<Parameterized> {
        self.owner().and_then(|owner| owner.instance())
    }

    pub fn cls(&self) -> Option<Class> {
        self.owner().map(|owner| owner.class())
    }

    /// Label used in logs and in executor errors.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn callback(&self) -> WatchCallback {
        self.0.callback.clone()
    }

    pub fn mode(&self) -> WatcherMode {
        self.0.mode
    }

    pub fn onlychanged(&self) -> bool {
        self.0.onlychanged
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.0.parameter_names
    }

    pub fn what(&self) -> &str {
        &self.0.what
    }

    pub fn queued(&self) -> bool {
        self.0.queued
    }

    pub fn precedence(&self) -> i32 {
        self.0.precedence
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.0.name)
            .field("parameter_names", &self.0.parameter_names)
            .field("what", &self.0.what)
            .field("mode", &self.0.mode)
            .field("onlychanged", &self.0.onlychanged)
            .field("queued", &self.0.queued)
            .field("precedence", &self.0.precedence)
            .finish()
    }
}
