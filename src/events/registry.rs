//! Per-owner watcher index and batching state.

use std::collections::BTreeMap;

use super::{Event, Watcher};

/// Watchers of one owner, keyed by parameter name and then by attribute.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    entries: BTreeMap<String, BTreeMap<String, Vec<Watcher>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `watcher` under each of its parameter names.
    pub fn add(&mut self, watcher: &Watcher) {
        for name in watcher.parameter_names() {
            self.entries
                .entry(name.clone())
                .or_default()
                .entry(watcher.what().to_string())
                .or_default()
                .push(watcher.clone());
        }
    }

    /// Remove `watcher` from every list it was added to.
    ///
    /// Returns `false` when it was missing from at least one of them.
    pub fn remove(&mut self, watcher: &Watcher) -> bool {
        let mut complete = true;
        for name in watcher.parameter_names() {
            let list = self
                .entries
                .get_mut(name)
                .and_then(|by_what| by_what.get_mut(watcher.what()));
            match list.and_then(|list| {
                list.iter()
                    .position(|w| w == watcher)
                    .map(|index| list.remove(index))
            }) {
                Some(_) => {}
                None => complete = false,
            }
        }
        complete
    }

    /// Watchers registered for `name` and `what`, in registration order.
    pub fn get(&self, name: &str, what: &str) -> Vec<Watcher> {
        self.entries
            .get(name)
            .and_then(|by_what| by_what.get(what))
            .cloned()
            .unwrap_or_default()
    }

    /// Every distinct registered watcher.
    pub fn all(&self) -> Vec<Watcher> {
        let mut out: Vec<Watcher> = Vec::new();
        for watcher in self.entries.values().flat_map(|by_what| by_what.values().flatten()) {
            if !out.contains(watcher) {
                out.push(watcher.clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .values()
            .all(|by_what| by_what.values().all(Vec::is_empty))
    }
}

/// Batching flags and the queues filled while batching.
#[derive(Debug, Default)]
pub struct BatchState {
    pub batch_watch: bool,
    pub trigger: bool,
    pub events: Vec<Event>,
    pub watchers: Vec<Watcher>,
}
