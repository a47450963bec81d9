//! Parameters following references.
//!
//! A parameter declared with `allow_refs` may be given a reference instead of
//! a value: another parameter, a dependent function, a reactive expression
//! or (with `nested_refs`) a container holding any of these. The parameter
//! then takes the current value of the reference and is kept in sync by
//! internal watchers on every parameter the reference depends on.
//! Asynchronous references (deferred functions) deliver their values through
//! the executor; only the most recently scheduled task may write.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::depends::resolver::{resolve_ref, resolve_value};
use crate::error::{ParamError, Result};
use crate::events::{Event, WatchCallback, WatcherMode};
use crate::function::{Effect, Task};
use crate::value::Value;

use super::owner::{Owner, ParamRef};
use super::parameter::Parameter;
use super::Parameterized;

/// Outcome of inspecting a value assigned to an `allow_refs` parameter.
pub(crate) struct ResolvedRef {
    /// The reference itself, when the value is one.
    pub(crate) reference: Option<Value>,
    pub(crate) deps: Vec<ParamRef>,
    /// Value to store now; `Undefined` when nothing should be stored.
    pub(crate) value: Value,
    pub(crate) is_async: bool,
    /// Task producing the values of an asynchronous reference.
    pub(crate) pending: Option<Task>,
}

fn is_async_ref(value: &Value) -> bool {
    matches!(value, Value::Function(f) if f.is_deferred())
}

pub(crate) fn resolve_param_ref(
    _obj: &Parameterized,
    parameter: &Parameter,
    value: Value,
) -> Result<ResolvedRef> {
    let recursive = parameter.resolves_nested_refs();
    let is_async = is_async_ref(&value);
    let deps = resolve_ref(&value, recursive)?;
    if deps.is_empty() && !is_async {
        return Ok(ResolvedRef {
            reference: None,
            deps,
            value,
            is_async: false,
            pending: None,
        });
    }

    let mut resolved = match resolve_value(&value, recursive) {
        Ok(resolved) => resolved,
        Err(ParamError::Skip) => Value::Undefined,
        Err(err) => return Err(err),
    };
    let mut pending = None;
    if is_async {
        if let Value::Task(handle) = &resolved {
            pending = handle.take();
        }
        resolved = Value::Undefined;
    }
    Ok(ResolvedRef {
        reference: Some(value),
        deps,
        value: resolved,
        is_async,
        pending,
    })
}

/// Run `f` while `names` are marked as syncing from their references.
pub(crate) fn with_syncing<T, F>(obj: &Parameterized, names: &[String], f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let added: Vec<String> = {
        let mut private = obj.private_mut();
        names
            .iter()
            .filter(|name| private.syncing.insert((*name).clone()))
            .cloned()
            .collect()
    };
    let result = f();
    let mut private = obj.private_mut();
    for name in &added {
        private.syncing.remove(name);
    }
    result
}

/// Install one internal watcher per owner the references depend on.
pub(crate) fn setup_refs(obj: &Parameterized, deps: &BTreeMap<String, Vec<ParamRef>>) -> Result<()> {
    let mut groups: Vec<(Owner, Vec<String>)> = Vec::new();
    for dep in deps.values().flatten() {
        let index = match groups.iter().position(|(owner, _)| owner.ptr_eq(dep.owner())) {
            Some(index) => index,
            None => {
                groups.push((dep.owner().clone(), Vec::new()));
                groups.len() - 1
            }
        };
        let names = &mut groups[index].1;
        if !names.iter().any(|n| n == dep.name()) {
            names.push(dep.name().to_string());
        }
    }

    for (owner, names) in groups {
        let weak = obj.downgrade();
        let callback: WatchCallback = Rc::new(move |events: &[Event]| -> Result<Effect> {
            if let Some(obj) = weak.upgrade() {
                sync_refs(&obj, events)?;
            }
            Ok(Effect::Immediate(Value::None))
        });
        let watcher = owner.param().watch_internal(
            "sync_refs",
            callback,
            WatcherMode::Args,
            names,
            "value",
            true,
            false,
            -1,
        )?;
        obj.private_mut().ref_watchers.push(watcher);
    }
    Ok(())
}

fn clear_ref_watchers(obj: &Parameterized) -> Result<()> {
    let watchers: Vec<_> = obj.private_mut().ref_watchers.drain(..).collect();
    for watcher in watchers {
        if let Some(owner) = watcher.owner() {
            owner.param().unwatch(&watcher)?;
        }
    }
    Ok(())
}

fn rebuild_ref_watchers(obj: &Parameterized) -> Result<()> {
    clear_ref_watchers(obj)?;
    let refs = obj.private().refs.clone();
    let mut deps = BTreeMap::new();
    for (name, reference) in &refs {
        let recursive = obj
            .class()
            .parameter(name)
            .is_some_and(|p| p.resolves_nested_refs());
        deps.insert(name.clone(), resolve_ref(reference, recursive)?);
    }
    setup_refs(obj, &deps)
}

/// Make `name` follow `reference`.
pub(crate) fn update_ref(obj: &Parameterized, name: &str, reference: Value) -> Result<()> {
    {
        let mut private = obj.private_mut();
        private.async_refs.remove(name);
        private.refs.insert(name.to_string(), reference);
    }
    rebuild_ref_watchers(obj)
}

/// Stop `name` from following its reference after a plain value was assigned.
pub(crate) fn drop_ref(obj: &Parameterized, name: &str) -> Result<()> {
    let removed = {
        let mut private = obj.private_mut();
        if private.syncing.contains(name) {
            return Ok(());
        }
        private.async_refs.remove(name);
        private.refs.remove(name).is_some()
    };
    if removed {
        trace!(object = obj.name(), parameter = name, "reference dropped");
        rebuild_ref_watchers(obj)?;
    }
    Ok(())
}

/// Hand the task of an asynchronous reference to the executor.
///
/// Values produced by the task are written only while it is still the most
/// recent task scheduled for `name`.
pub(crate) fn schedule_async_ref(obj: &Parameterized, name: &str, task: Task) -> Result<()> {
    let id = task.id();
    obj.private_mut().async_refs.insert(name.to_string(), id);
    let weak = obj.downgrade();
    let pname = name.to_string();
    let label = format!("{}.{}", obj.name(), name);
    let context = obj.class().context().clone();
    context.schedule(
        &label,
        Box::new(move || {
            task.run(&mut |value| {
                let Some(obj) = weak.upgrade() else {
                    return Ok(false);
                };
                if obj.private().async_refs.get(&pname) != Some(&id) {
                    return Ok(false);
                }
                with_syncing(&obj, std::slice::from_ref(&pname), || {
                    obj.param().update([(pname.clone(), value)]).map(|_| ())
                })?;
                Ok(true)
            })?;
            if let Some(obj) = weak.upgrade() {
                let mut private = obj.private_mut();
                if private.async_refs.get(&pname) == Some(&id) {
                    private.async_refs.remove(&pname);
                }
            }
            Ok(())
        }),
    )
}

fn event_matches(dep: &ParamRef, event: &Event) -> bool {
    if dep.name() != event.name {
        return false;
    }
    match (&event.obj, dep.owner()) {
        (Some(obj), Owner::Instance(owner)) => obj.ptr_eq(owner),
        (None, Owner::Class(owner)) => owner.is_subclass_of(&event.cls),
        _ => false,
    }
}

/// Re-resolve the references whose dependencies changed.
pub(crate) fn sync_refs(obj: &Parameterized, events: &[Event]) -> Result<()> {
    let refs = obj.private().refs.clone();
    let mut updates: Vec<(String, Value)> = Vec::new();
    for (pname, reference) in refs {
        let recursive = obj
            .class()
            .parameter(&pname)
            .is_some_and(|p| p.resolves_nested_refs());
        let deps = resolve_ref(&reference, recursive)?;
        if !deps
            .iter()
            .any(|dep| events.iter().any(|event| event_matches(dep, event)))
        {
            continue;
        }

        let value = match resolve_value(&reference, recursive) {
            Ok(value) => value,
            Err(ParamError::Skip) => continue,
            Err(err) => return Err(err),
        };
        if value.is_undefined() {
            continue;
        }
        if is_async_ref(&reference) {
            if let Value::Task(handle) = &value {
                if let Some(task) = handle.take() {
                    schedule_async_ref(obj, &pname, task)?;
                }
            }
            continue;
        }
        updates.push((pname, value));
    }

    if updates.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = updates.iter().map(|(name, _)| name.clone()).collect();
    let param = obj.param();
    param.edit_constant(|| with_syncing(obj, &names, || param.update(updates).map(|_| ())))
}
