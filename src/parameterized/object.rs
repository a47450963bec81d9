//! Parameterized objects.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::depends::install::update_deps;
use crate::error::{ParamError, Result};
use crate::events::Watcher;
use crate::function::{deferred_body, Body, Function, FunctionKind, Kwargs, TaskId};
use crate::value::Value;

use super::owner::{Owner, ParamRef};
use super::parameters::Parameters;
use super::{refs, Class, OwnerId, ParamState};

static INSTANCE_COUNT: AtomicU64 = AtomicU64::new(0);

/// Bookkeeping private to one instance.
#[derive(Default)]
pub(crate) struct InstancePrivate {
    pub(crate) initialized: bool,
    /// Watchers on sub-objects, keyed by method name and root attribute of the path.
    pub(crate) dynamic_watchers: HashMap<(String, String), Vec<Watcher>>,
    /// References followed by `allow_refs` parameters.
    pub(crate) refs: BTreeMap<String, Value>,
    pub(crate) ref_watchers: Vec<Watcher>,
    /// Parameters currently being updated from their reference.
    pub(crate) syncing: HashSet<String>,
    /// Task currently feeding each asynchronous reference.
    pub(crate) async_refs: HashMap<String, TaskId>,
    pub(crate) attrs: BTreeMap<String, Value>,
    /// Watchers for constant method dependencies registered on other owners.
    pub(crate) owned_watchers: Vec<Watcher>,
}

impl InstancePrivate {
    fn all_watchers(&mut self) -> Vec<Watcher> {
        let mut watchers: Vec<Watcher> = self
            .dynamic_watchers
            .drain()
            .flat_map(|(_, watchers)| watchers)
            .collect();
        watchers.append(&mut self.ref_watchers);
        watchers.append(&mut self.owned_watchers);
        watchers
    }
}

struct ObjectInner {
    id: OwnerId,
    name: String,
    class: Class,
    state: ParamState,
    private: RefCell<InstancePrivate>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        // Watchers registered on other owners would otherwise outlive us and
        // keep calling into a dead instance.
        for watcher in self.private.get_mut().all_watchers() {
            let Some(owner) = watcher.owner() else {
                continue;
            };
            if let Ok(mut registry) = owner.state().watchers.try_borrow_mut() {
                registry.remove(&watcher);
            };
        }
    }
}

/// An instance of a [`Class`].
#[derive(Clone)]
pub struct Parameterized(Rc<ObjectInner>);

#[derive(Clone)]
pub(crate) struct WeakParameterized(Weak<ObjectInner>);

impl WeakParameterized {
    pub(crate) fn upgrade(&self) -> Option<Parameterized> {
        self.0.upgrade().map(Parameterized)
    }
}

impl Parameterized {
    pub(crate) fn create(cls: &Class, overrides: Vec<(String, Value)>) -> Result<Parameterized> {
        let count = INSTANCE_COUNT.fetch_add(1, Ordering::Relaxed);
        let obj = Parameterized(Rc::new(ObjectInner {
            id: OwnerId::next(),
            name: format!("{}{:05}", cls.name(), count),
            class: cls.clone(),
            state: ParamState::default(),
            private: RefCell::new(InstancePrivate::default()),
        }));

        // Constant values are captured so later class-level changes do not leak in.
        for name in cls.param_names() {
            if cls.parameter(&name).is_some_and(|p| p.is_constant()) {
                obj.state().store(&name, cls.get(&name)?);
            }
        }

        let mut found_refs = BTreeMap::new();
        let mut deps: BTreeMap<String, Vec<ParamRef>> = BTreeMap::new();
        let mut pending = Vec::new();
        for (name, value) in overrides {
            let parameter = cls.parameter(&name).ok_or_else(|| ParamError::ParameterNotFound {
                name: name.clone(),
                class: cls.name().to_string(),
            })?;
            if !parameter.allows_refs() {
                obj.set(&name, value)?;
                continue;
            }
            let resolved = refs::resolve_param_ref(&obj, &parameter, value)?;
            if let Some(reference) = resolved.reference {
                found_refs.insert(name.clone(), reference);
                deps.insert(name.clone(), resolved.deps);
            }
            if let Some(task) = resolved.pending {
                pending.push((name.clone(), task));
            }
            if !resolved.is_async && !resolved.value.is_undefined() {
                obj.set(&name, resolved.value)?;
            }
        }

        obj.private_mut().initialized = true;
        refs::setup_refs(&obj, &deps)?;
        obj.private_mut().refs = found_refs;
        for (name, task) in pending {
            refs::schedule_async_ref(&obj, &name, task)?;
        }
        update_deps(&obj, None, true)?;
        Ok(obj)
    }

    pub fn id(&self) -> OwnerId {
        self.0.id
    }

    /// Generated instance name, the class name followed by a counter.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn class(&self) -> &Class {
        &self.0.class
    }

    pub(crate) fn state(&self) -> &ParamState {
        &self.0.state
    }

    pub(crate) fn private(&self) -> Ref<'_, InstancePrivate> {
        self.0.private.borrow()
    }

    pub(crate) fn private_mut(&self) -> RefMut<'_, InstancePrivate> {
        self.0.private.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> WeakParameterized {
        WeakParameterized(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Parameterized) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_initialized(&self) -> bool {
        self.private().initialized
    }

    /// The `param` namespace of this instance.
    pub fn param(&self) -> Parameters {
        Parameters::new(Owner::Instance(self.clone()))
    }

    /// Current value of a parameter, falling back to the class value.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.0.state.value(name) {
            return Ok(value);
        }
        if !self.0.class.has_param(name) {
            return Err(ParamError::ParameterNotFound {
                name: name.to_string(),
                class: self.0.class.name().to_string(),
            });
        }
        self.0.class.get(name)
    }

    /// Set a parameter value.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        Owner::Instance(self.clone()).set_value(name, value.into())
    }

    /// Attribute lookup: parameters, then methods, then plain attributes.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        if self.0.class.has_param(name) {
            return self.get(name);
        }
        if self.0.class.has_method(name) {
            return self.method(name).map(Value::Function);
        }
        if let Some(value) = self.attr(name) {
            return Ok(value);
        }
        if name == "name" {
            return Ok(Value::Str(self.0.name.clone()));
        }
        Err(ParamError::AttributeNotResolved {
            attr: name.to_string(),
            owner: self.0.name.clone(),
        })
    }

    /// A plain (non-parameter) attribute.
    pub fn attr(&self, name: &str) -> Option<Value> {
        self.private().attrs.get(name).cloned()
    }

    /// Store a plain attribute. No events are produced.
    pub fn set_attr(&self, name: &str, value: impl Into<Value>) {
        self.private_mut().attrs.insert(name.to_string(), value.into());
    }

    /// A method bound to this instance.
    pub fn method(&self, name: &str) -> Result<Function> {
        let def = self
            .0
            .class
            .method_def(name)
            .ok_or_else(|| ParamError::MethodNotFound {
                name: name.to_string(),
                class: self.0.class.name().to_string(),
            })?;
        let weak = self.downgrade();
        let method_body = def.body.clone();
        let label = name.to_string();
        let call: Rc<Body> = Rc::new(move |args: &[Value], kwargs: &Kwargs| -> Result<Value> {
            let obj = weak.upgrade().ok_or_else(|| {
                ParamError::Other(format!("method '{}' called on a dropped object", label))
            })?;
            method_body(&obj, args, kwargs)
        });
        let body = match def.kind {
            FunctionKind::Sync => call,
            _ => deferred_body(name.to_string(), call),
        };
        Ok(Function::bound_method(
            name.to_string(),
            def.kind,
            self.clone(),
            def.dinfo.clone(),
            body,
        ))
    }

    /// Call a method by name.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.method(name)?.call(args, &Kwargs::new())
    }
}

impl fmt::Debug for Parameterized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameterized")
            .field("name", &self.0.name)
            .field("class", &self.0.class.name())
            .field("values", &self.param().values())
            .finish()
    }
}
