//! The `param` namespace of classes and instances.
//!
//! [`Parameters`] is the entry point for everything beyond plain reads and
//! writes: batched updates, watchers, triggering, facet access and
//! introspection of method dependencies.

use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;

use tracing::debug;

use crate::depends::resolver::{params_depended_on, resolve_mcs_deps, Intermediate, MInfo, PInfo};
use crate::error::{ParamError, Result};
use crate::events::dispatch::{batch_call_watchers, with_batch};
use crate::events::{Event, WatchCallback, Watcher, WatcherMode};
use crate::function::{Effect, Kwargs, Task};
use crate::value::Value;

use super::owner::{Owner, ParamRef};
use super::parameter::Parameter;

/// Options for [`Parameters::watch_with`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Attribute to watch: `"value"` or a facet name.
    pub what: String,
    /// Only fire when the new value differs from the old one.
    pub onlychanged: bool,
    /// Queue events raised by the callback instead of dispatching them inline.
    pub queued: bool,
    /// Lower precedences run first. Must not be negative.
    pub precedence: i32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            what: "value".to_string(),
            onlychanged: true,
            queued: false,
            precedence: 0,
        }
    }
}

/// The `param` namespace of an [`Owner`].
#[derive(Clone, Debug)]
pub struct Parameters {
    owner: Owner,
}

impl Parameters {
    pub(crate) fn new(owner: Owner) -> Self {
        Parameters { owner }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Parameter names, ancestors' declarations first.
    pub fn names(&self) -> Vec<String> {
        self.owner.class().param_names()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.owner.class().has_param(name)
    }

    /// Reference to a parameter of this owner.
    pub fn get(&self, name: &str) -> Result<ParamRef> {
        self.check_name(name)?;
        Ok(ParamRef::new(self.owner.clone(), name))
    }

    /// Declarations of every parameter, keyed by name.
    pub fn objects(&self) -> BTreeMap<String, Parameter> {
        let cls = self.owner.class();
        cls.param_names()
            .into_iter()
            .filter_map(|name| cls.parameter(&name).map(|p| (name, p)))
            .collect()
    }

    /// Current values of every parameter.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.names()
            .into_iter()
            .filter_map(|name| self.owner.get(&name).ok().map(|value| (name, value)))
            .collect()
    }

    /// Current values as a JSON object.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.values())?)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(ParamError::ParameterNotFound {
                name: name.to_string(),
                class: self.owner.class().name().to_string(),
            })
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.owner.set_value(name, value.into())
    }

    /// Set several parameters at once, delivering the resulting events as one batch.
    ///
    /// # Returns
    ///
    /// The previous values of the updated parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    /// use param_rs::{Class, Parameter, Value};
    ///
    /// let cls = Class::builder("P")
    ///     .param(Parameter::new("a", 0))
    ///     .param(Parameter::new("b", 0))
    ///     .build()
    ///     .unwrap();
    /// let p = cls.new_instance().unwrap();
    /// let calls = Rc::new(Cell::new(0));
    /// let counter = calls.clone();
    /// p.param()
    ///     .watch(move |_| { counter.set(counter.get() + 1); Ok(()) }, &["a", "b"])
    ///     .unwrap();
    ///
    /// let old = p.param().update([("a", 1), ("b", 2)]).unwrap();
    /// assert_eq!(old["a"], Value::Int(0));
    /// assert_eq!(calls.get(), 1);
    /// ```
    pub fn update<I, K, V>(&self, pairs: I) -> Result<BTreeMap<String, Value>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let state = self.owner.state();
        let previous = {
            let mut batch = state.batch.borrow_mut();
            mem::replace(&mut batch.batch_watch, true)
        };

        let mut restore = BTreeMap::new();
        let mut events = Vec::new();
        for (name, value) in pairs {
            let outcome = self.check_name(&name).and_then(|_| {
                let old = self.owner.get(&name)?;
                self.owner.set_value_with(&name, value, false)?;
                Ok(old)
            });
            match outcome {
                Ok(old) => {
                    restore.entry(name.clone()).or_insert(old);
                    if self.owner.parameter(&name).is_ok_and(|p| p.is_event()) {
                        events.push(name);
                    }
                }
                Err(err) => {
                    state.batch.borrow_mut().batch_watch = previous;
                    return Err(err);
                }
            }
        }

        state.batch.borrow_mut().batch_watch = previous;
        if !previous {
            batch_call_watchers(&self.owner)?;
        }
        for name in events {
            self.owner.state().store(&name, Value::Bool(false));
        }
        Ok(restore)
    }

    /// Current value of a facet of a parameter.
    pub fn facet(&self, name: &str, what: &str) -> Result<Value> {
        self.owner.facet(name, what)
    }

    /// Change a facet of a parameter, notifying watchers of that facet.
    pub fn set_facet(&self, name: &str, what: &str, value: impl Into<Value>) -> Result<()> {
        self.owner.set_facet(name, what, value.into())
    }

    /// Watch parameter values with the default options.
    pub fn watch<F>(&self, f: F, names: &[&str]) -> Result<Watcher>
    where
        F: Fn(&[Event]) -> Result<()> + 'static,
    {
        self.watch_with(f, names, WatchOptions::default())
    }

    /// Watch parameters, receiving the events of each delivery.
    pub fn watch_with<F>(&self, f: F, names: &[&str], options: WatchOptions) -> Result<Watcher>
    where
        F: Fn(&[Event]) -> Result<()> + 'static,
    {
        if options.precedence < 0 {
            return Err(ParamError::NegativePrecedence);
        }
        let callback: WatchCallback = Rc::new(move |events: &[Event]| -> Result<Effect> {
            f(events).map(|_| Effect::Immediate(Value::None))
        });
        self.register(
            "watcher",
            callback,
            WatcherMode::Args,
            names,
            options,
        )
    }

    /// Watch parameter values, receiving a mapping of name to new value.
    pub fn watch_values<F>(&self, f: F, names: &[&str]) -> Result<Watcher>
    where
        F: Fn(&Kwargs) -> Result<()> + 'static,
    {
        let callback: WatchCallback = Rc::new(move |events: &[Event]| -> Result<Effect> {
            let values: Kwargs = events
                .iter()
                .map(|event| (event.name.clone(), event.new.clone()))
                .collect();
            f(&values).map(|_| Effect::Immediate(Value::None))
        });
        self.register(
            "watcher",
            callback,
            WatcherMode::Kwargs,
            names,
            WatchOptions::default(),
        )
    }

    /// Watch with an asynchronous callback; the returned task runs on the executor.
    pub fn watch_deferred<F>(&self, f: F, names: &[&str], options: WatchOptions) -> Result<Watcher>
    where
        F: Fn(&[Event]) -> Result<Task> + 'static,
    {
        if options.precedence < 0 {
            return Err(ParamError::NegativePrecedence);
        }
        let callback: WatchCallback =
            Rc::new(move |events: &[Event]| -> Result<Effect> { f(events).map(Effect::Deferred) });
        self.register("async watcher", callback, WatcherMode::Args, names, options)
    }

    fn register(
        &self,
        label: &str,
        callback: WatchCallback,
        mode: WatcherMode,
        names: &[&str],
        options: WatchOptions,
    ) -> Result<Watcher> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.watch_internal(
            label,
            callback,
            mode,
            names,
            &options.what,
            options.onlychanged,
            options.queued,
            options.precedence,
        )
    }

    /// Register a watcher without the precedence check reserved for user callbacks.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn watch_internal(
        &self,
        label: &str,
        callback: WatchCallback,
        mode: WatcherMode,
        names: Vec<String>,
        what: &str,
        onlychanged: bool,
        queued: bool,
        precedence: i32,
    ) -> Result<Watcher> {
        for name in &names {
            self.check_name(name)?;
        }
        let watcher = Watcher::new(
            &self.owner,
            label,
            callback,
            mode,
            names,
            what,
            onlychanged,
            queued,
            precedence,
        );
        self.owner.state().watchers.borrow_mut().add(&watcher);
        debug!(
            owner = %self.owner.name(),
            parameters = ?watcher.parameter_names(),
            what,
            precedence,
            "watcher registered"
        );
        Ok(watcher)
    }

    /// Remove a watcher. Removing an unknown watcher is reported as a warning.
    pub fn unwatch(&self, watcher: &Watcher) -> Result<()> {
        let removed = self.owner.state().watchers.borrow_mut().remove(watcher);
        if removed {
            Ok(())
        } else {
            self.owner
                .context()
                .diagnostics()
                .warn(format!("No such watcher {:?} to remove.", watcher))
        }
    }

    /// Watchers registered for a parameter and attribute.
    pub fn watchers(&self, name: &str, what: &str) -> Vec<Watcher> {
        self.owner.state().watchers.borrow().get(name, what)
    }

    /// Fire watchers of the named parameters as if they had changed.
    ///
    /// Event parameters are set to `true` for the duration of the dispatch.
    /// Events queued before the call are preserved.
    pub fn trigger(&self, names: &[&str]) -> Result<()> {
        if let Owner::Instance(obj) = &self.owner {
            if !obj.is_initialized() {
                return Err(ParamError::Other(format!(
                    "cannot trigger parameters of {} before it is initialized",
                    obj.name()
                )));
            }
        }
        let state = self.owner.state();
        let (saved_events, saved_watchers) = {
            let mut batch = state.batch.borrow_mut();
            (mem::take(&mut batch.events), mem::take(&mut batch.watchers))
        };

        let mut values = Vec::new();
        for name in names {
            let parameter = self.owner.parameter(name)?;
            let value = if parameter.is_event() {
                Value::Bool(true)
            } else {
                self.owner.get(name)?
            };
            values.push((name.to_string(), value));
        }

        state.batch.borrow_mut().trigger = true;
        let result = self.update(values);
        let mut batch = state.batch.borrow_mut();
        batch.trigger = false;
        let mut events = saved_events;
        events.append(&mut batch.events);
        batch.events = events;
        let mut watchers = saved_watchers;
        for watcher in batch.watchers.drain(..) {
            if !watchers.contains(&watcher) {
                watchers.push(watcher);
            }
        }
        batch.watchers = watchers;
        result.map(|_| ())
    }

    /// Run `f` with events batched, flushing them when the outermost batch ends.
    pub fn batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.batch_with(true, true, f)
    }

    /// Run `f` with batching optionally enabled.
    ///
    /// With `run`, leaving the outermost batch flushes the queued events.
    pub fn batch_with<T, F>(&self, enable: bool, run: bool, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        with_batch(&self.owner, enable, run, f)
    }

    /// Run `f` and drop the events it produces.
    pub fn discard_events<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let state = self.owner.state();
        let saved = {
            let mut batch = state.batch.borrow_mut();
            let saved = (
                batch.batch_watch,
                mem::take(&mut batch.events),
                mem::take(&mut batch.watchers),
            );
            batch.batch_watch = true;
            saved
        };
        let result = f();
        let mut batch = state.batch.borrow_mut();
        batch.batch_watch = saved.0;
        batch.events = saved.1;
        batch.watchers = saved.2;
        result
    }

    /// Run `f` with constant parameters temporarily writable.
    pub fn edit_constant<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let flag = &self.owner.state().constant_override;
        let previous = flag.replace(true);
        let result = f();
        flag.set(previous);
        result
    }

    /// Parameters a method depends on.
    ///
    /// On an instance, sub-object paths are resolved against the current
    /// sub-objects. With `intermediate`, dependencies on the path to a
    /// sub-object are included.
    pub fn method_dependencies(&self, name: &str, intermediate: bool) -> Result<Vec<PInfo>> {
        let cls = self.owner.class();
        if !cls.has_method(name) {
            return Err(ParamError::MethodNotFound {
                name: name.to_string(),
                class: cls.name().to_string(),
            });
        }
        let intermediate = if intermediate {
            Intermediate::Yes
        } else {
            Intermediate::No
        };
        let minfo = MInfo {
            inst: self.owner.instance(),
            cls,
            name: name.to_string(),
        };
        let (deps, dynamic) = params_depended_on(&minfo, false, intermediate)?;
        match &self.owner {
            Owner::Class(_) => Ok(deps),
            Owner::Instance(obj) => resolve_mcs_deps(obj, &deps, &dynamic, intermediate),
        }
    }
}
