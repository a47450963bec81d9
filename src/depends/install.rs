//! Installation of method watchers on instances.
//!
//! When an instance is constructed, the watched methods of its class get
//! their watchers: constant dependencies are bound to the instance once, and
//! dependencies through sub-objects are resolved against the current
//! sub-objects. Whenever the attribute at the root of such a path is
//! assigned, or an intermediate sub-object along it is replaced, the watchers
//! of that path are dropped and resolved again from scratch.

use std::rc::Rc;

use tracing::debug;

use crate::error::{ParamError, Result};
use crate::events::{Event, WatchCallback, Watcher, WatcherMode};
use crate::function::{Effect, Function};
use crate::parameterized::object::WeakParameterized;
use crate::parameterized::{Owner, Parameterized};
use crate::value::Value;

use super::resolver::{resolve_mcs_deps, DInfo, Intermediate, PInfo};

/// One group of dependencies sharing an owner and attribute.
struct Group {
    owner: Owner,
    what: String,
    dynamic: Option<DInfo>,
    names: Vec<String>,
}

fn push_grouped(groups: &mut Vec<Group>, dynamic: Option<&DInfo>, dep: PInfo) {
    let owner = dep.owner();
    let found = groups
        .iter_mut()
        .find(|g| g.owner.ptr_eq(&owner) && g.what == dep.what);
    match found {
        Some(group) => {
            if !group.names.contains(&dep.name) {
                group.names.push(dep.name);
            }
        }
        None => groups.push(Group {
            owner,
            what: dep.what,
            dynamic: dynamic.cloned(),
            names: vec![dep.name],
        }),
    }
}

/// Install or refresh method watchers of `obj`.
///
/// With `init`, watchers for constant dependencies are installed and
/// `on_init` methods are called afterwards. Otherwise only the dynamic
/// dependencies rooted at `attribute` (all of them when `None`) are resolved
/// again.
pub(crate) fn update_deps(obj: &Parameterized, attribute: Option<&str>, init: bool) -> Result<()> {
    let mut init_methods: Vec<String> = Vec::new();
    for spec in obj.class().watch_specs() {
        let dynamic: Vec<DInfo> = spec
            .dynamic
            .iter()
            .filter(|d| attribute.map_or(true, |attr| d.root() == attr))
            .cloned()
            .collect();

        if init {
            let mut constant = Vec::new();
            for dep in resolve_mcs_deps(obj, &spec.constant, &[], Intermediate::Yes)? {
                push_grouped(&mut constant, None, dep);
            }
            for group in constant {
                let watcher = watch_group(obj, &spec.method, spec.queued, group)?;
                obj.private_mut().owned_watchers.push(watcher);
            }
            if spec.on_init && !init_methods.contains(&spec.method) {
                init_methods.push(spec.method.clone());
            }
        } else if dynamic.is_empty() {
            continue;
        } else {
            for ddep in &dynamic {
                let key = (spec.method.clone(), ddep.root().to_string());
                let stale = obj.private_mut().dynamic_watchers.remove(&key);
                for watcher in stale.into_iter().flatten() {
                    if let Some(owner) = watcher.owner() {
                        owner.param().unwatch(&watcher)?;
                    }
                }
            }
        }

        for ddep in &dynamic {
            let mut groups = Vec::new();
            for dep in resolve_mcs_deps(obj, &[], std::slice::from_ref(ddep), Intermediate::Yes)? {
                push_grouped(&mut groups, Some(ddep), dep);
            }
            let key = (spec.method.clone(), ddep.root().to_string());
            for group in groups {
                let watcher = watch_group(obj, &spec.method, spec.queued, group)?;
                obj.private_mut()
                    .dynamic_watchers
                    .entry(key.clone())
                    .or_default()
                    .push(watcher);
            }
            debug!(
                object = obj.name(),
                method = %spec.method,
                spec = %ddep.spec,
                "resolved sub-object dependency"
            );
        }
    }

    for name in init_methods {
        let method = obj.method(&name)?;
        let effect = Effect::from_value(method.call0()?);
        effect.settle(obj.class().context(), method.name())?;
    }
    Ok(())
}

/// How a dynamic dependency reacts to events on one of its owners.
struct DynamicHook {
    /// Sub-parameters compared between old and new sub-object.
    subparams: Option<Vec<String>>,
    /// Root attribute to re-resolve when an intermediate sub-object changes.
    refresh: Option<String>,
    what: String,
}

fn dynamic_hook(obj: &Parameterized, ddep: &DInfo, group: &Group) -> DynamicHook {
    let spec = &ddep.spec;
    let root = Value::Object(obj.clone());
    let mut subobjs = vec![Some(root.clone())];
    let mut current = Some(root);
    for segment in spec.path() {
        current = current
            .and_then(|v| v.get_attr(segment).ok())
            .filter(|v| !v.is_none());
        subobjs.push(current.clone());
    }

    let fallback = DynamicHook {
        subparams: None,
        refresh: None,
        what: group.what.clone(),
    };
    let target = group.owner.to_value();
    let depth = subobjs[..subobjs.len() - 1]
        .iter()
        .position(|sub| sub.as_ref().is_some_and(|v| v.is_same(&target)));
    let Some(depth) = depth else {
        return fallback;
    };

    let mut rest: Vec<&str> = spec.path()[depth..].iter().skip(1).map(String::as_str).collect();
    rest.push(spec.name());
    let path = rest.join(".");
    let subparams = if path == "param" {
        match subobjs.last().cloned().flatten() {
            Some(Value::Object(last)) => last.param().names(),
            Some(Value::Class(last)) => last.param_names(),
            _ => Vec::new(),
        }
    } else {
        vec![path]
    };
    let what = if spec.has_explicit_what() {
        spec.what().to_string()
    } else {
        group.what.clone()
    };
    DynamicHook {
        subparams: Some(subparams),
        refresh: (depth > 0).then(|| ddep.root().to_string()),
        what,
    }
}

fn watch_group(obj: &Parameterized, method: &str, queued: bool, group: Group) -> Result<Watcher> {
    let hook = match &group.dynamic {
        Some(ddep) => dynamic_hook(obj, ddep, &group),
        None => DynamicHook {
            subparams: None,
            refresh: None,
            what: group.what.clone(),
        },
    };
    let callback = method_caller(obj.downgrade(), method.to_string(), hook);
    group.owner.param().watch_internal(
        method,
        callback,
        WatcherMode::Args,
        group.names,
        &group.what,
        true,
        queued,
        -1,
    )
}

/// Callback invoking `method` on the (weakly held) instance.
fn method_caller(weak: WeakParameterized, method: String, hook: DynamicHook) -> WatchCallback {
    Rc::new(move |events: &[Event]| -> Result<Effect> {
        let Some(obj) = weak.upgrade() else {
            return Ok(Effect::Immediate(Value::None));
        };
        if let Some(root) = &hook.refresh {
            update_deps(&obj, Some(root), false)?;
        }
        if skip_event(events, &hook.what, hook.subparams.as_deref()) {
            return Ok(Effect::Immediate(Value::None));
        }
        let function: Function = obj.method(&method)?;
        match function.call0() {
            Ok(value) => Ok(Effect::from_value(value)),
            Err(ParamError::Skip) => Ok(Effect::Immediate(Value::None)),
            Err(err) => Err(err),
        }
    })
}

fn lookup(value: &Value, path: &str, what: &str) -> Value {
    if value.is_none() {
        return Value::Undefined;
    }
    let found = if what == "value" {
        value.get_path(path)
    } else {
        match value {
            Value::Object(obj) => obj.param().facet(path, what).ok(),
            Value::Class(cls) => cls.param().facet(path, what).ok(),
            _ => None,
        }
    };
    found.unwrap_or(Value::Undefined)
}

/// Whether a sub-object replacement left every compared sub-parameter unchanged.
fn skip_event(events: &[Event], what: &str, subparams: Option<&[String]>) -> bool {
    let Some(subparams) = subparams else {
        return false;
    };
    let Some(first) = events.first() else {
        return false;
    };
    let ctx = first.cls.context().clone();
    let comparator = ctx.comparator();
    events.iter().all(|event| {
        subparams.iter().all(|p| {
            let old = lookup(&event.old, p, what);
            let new = lookup(&event.new, p, what);
            comparator.is_equal(&old, &new)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depends::depends;
    use crate::parameterized::{Class, Parameter};
    use std::cell::Cell;

    fn inner() -> Class {
        Class::builder("Inner")
            .param(Parameter::new("value", 0))
            .build()
            .unwrap()
    }

    fn outer(calls: Rc<Cell<usize>>) -> Class {
        Class::builder("Outer")
            .param(Parameter::new("sub", Value::None))
            .dependent(
                "on_value",
                depends(["sub.value"]).watch(true),
                move |_, _, _| {
                    calls.set(calls.get() + 1);
                    Ok(Value::None)
                },
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_nested_watcher_follows_replacement() {
        let calls = Rc::new(Cell::new(0));
        let first = inner().new_instance().unwrap();
        let obj = outer(calls.clone())
            .instance([("sub", Value::Object(first.clone()))])
            .unwrap();

        first.set("value", 1).unwrap();
        assert_eq!(calls.get(), 1);

        let second = inner().instance([("value", 5)]).unwrap();
        obj.set("sub", Value::Object(second.clone())).unwrap();
        assert_eq!(calls.get(), 2);

        first.set("value", 2).unwrap();
        assert_eq!(calls.get(), 2);
        second.set("value", 6).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_equal_replacement_is_skipped() {
        let calls = Rc::new(Cell::new(0));
        let first = inner().instance([("value", 3)]).unwrap();
        let obj = outer(calls.clone())
            .instance([("sub", Value::Object(first))])
            .unwrap();

        let twin = inner().instance([("value", 3)]).unwrap();
        obj.set("sub", Value::Object(twin)).unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_missing_subobject_is_completed_later() {
        let calls = Rc::new(Cell::new(0));
        let obj = outer(calls.clone()).new_instance().unwrap();
        let sub = inner().new_instance().unwrap();
        obj.set("sub", Value::Object(sub.clone())).unwrap();
        sub.set("value", 4).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_skip_event_compares_subparameters() {
        let a = inner().instance([("value", 1)]).unwrap();
        let b = inner().instance([("value", 1)]).unwrap();
        let event = Event {
            what: "value".to_string(),
            name: "sub".to_string(),
            obj: None,
            cls: a.class().clone(),
            old: Value::Object(a),
            new: Value::Object(b.clone()),
            event_type: None,
        };
        let subparams = vec!["value".to_string()];
        assert!(!skip_event(std::slice::from_ref(&event), "value", None));
        assert!(skip_event(std::slice::from_ref(&event), "value", Some(&subparams)));

        b.set("value", 2).unwrap();
        assert!(!skip_event(&[event], "value", Some(&subparams)));
    }
}
