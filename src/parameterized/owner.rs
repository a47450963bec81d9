//! Owners of parameter values and references to individual parameters.
//!
//! Parameters live either on a class or on an instance. [`Owner`] unifies the
//! two so that the setter, the watcher registry and the dependency resolver
//! can treat them alike, and [`ParamRef`] names one parameter of one owner.

use std::fmt;

use tracing::trace;

use crate::context::Context;
use crate::error::{ParamError, Result};
use crate::events::dispatch::dispatch;
use crate::events::Event;
use crate::reactive::Rx;
use crate::value::Value;

use super::class::WeakClass;
use super::object::WeakParameterized;
use super::parameter::Parameter;
use super::{refs, Class, OwnerId, ParamState, Parameterized, Parameters};

/// A class or an instance owning parameter values.
#[derive(Clone)]
pub enum Owner {
    Instance(Parameterized),
    Class(Class),
}

/// Non-owning counterpart of [`Owner`], held by watchers.
#[derive(Clone)]
pub(crate) enum WeakOwner {
    Instance(WeakParameterized),
    Class(WeakClass),
}

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        match self {
            WeakOwner::Instance(weak) => weak.upgrade().map(Owner::Instance),
            WeakOwner::Class(weak) => weak.upgrade().map(Owner::Class),
        }
    }
}

impl Owner {
    pub fn id(&self) -> OwnerId {
        match self {
            Owner::Instance(obj) => obj.id(),
            Owner::Class(cls) => cls.id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Owner::Instance(obj) => obj.name().to_string(),
            Owner::Class(cls) => cls.name().to_string(),
        }
    }

    /// The class itself, or the class of the instance.
    pub fn class(&self) -> Class {
        match self {
            Owner::Instance(obj) => obj.class().clone(),
            Owner::Class(cls) => cls.clone(),
        }
    }

    pub fn instance(&self) -> Option<Parameterized> {
        match self {
            Owner::Instance(obj) => Some(obj.clone()),
            Owner::Class(_) => None,
        }
    }

    pub fn param(&self) -> Parameters {
        Parameters::new(self.clone())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Owner::Instance(obj) => Value::Object(obj.clone()),
            Owner::Class(cls) => Value::Class(cls.clone()),
        }
    }

    pub fn context(&self) -> Context {
        match self {
            Owner::Instance(obj) => obj.class().context().clone(),
            Owner::Class(cls) => cls.context().clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Owner) -> bool {
        self.id() == other.id()
    }

    pub(crate) fn state(&self) -> &ParamState {
        match self {
            Owner::Instance(obj) => obj.state(),
            Owner::Class(cls) => cls.state(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakOwner {
        match self {
            Owner::Instance(obj) => WeakOwner::Instance(obj.downgrade()),
            Owner::Class(cls) => WeakOwner::Class(cls.downgrade()),
        }
    }

    pub(crate) fn parameter(&self, name: &str) -> Result<Parameter> {
        let cls = self.class();
        cls.parameter(name).ok_or_else(|| ParamError::ParameterNotFound {
            name: name.to_string(),
            class: cls.name().to_string(),
        })
    }

    /// Current value of a parameter.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self {
            Owner::Instance(obj) => obj.get(name),
            Owner::Class(cls) => cls.get(name),
        }
    }

    /// Current value of a facet of a parameter.
    ///
    /// Instance overrides win over class overrides, which win over the
    /// declaration. `"value"` reads the parameter value itself.
    pub fn facet(&self, name: &str, what: &str) -> Result<Value> {
        if what == "value" {
            return self.get(name);
        }
        self.parameter(name)?;
        if let Owner::Instance(obj) = self {
            if let Some(value) = obj.state().facet(name, what) {
                return Ok(value);
            }
        }
        self.class().facet(name, what)
    }

    /// The single write path for parameter values.
    pub(crate) fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.set_value_with(name, value, true)
    }

    /// Write a parameter value.
    ///
    /// With `reset_events`, event parameters fall back to `false` right after
    /// their watchers were called. Batched updates reset them after the flush
    /// instead.
    pub(crate) fn set_value_with(&self, name: &str, value: Value, reset_events: bool) -> Result<()> {
        let parameter = self.parameter(name)?;
        let mut value = value;

        if let Owner::Instance(obj) = self {
            if parameter.allows_refs() && obj.is_initialized() {
                let resolved = refs::resolve_param_ref(obj, &parameter, value)?;
                match resolved.reference {
                    Some(reference) => refs::update_ref(obj, name, reference)?,
                    None => refs::drop_ref(obj, name)?,
                }
                if let Some(task) = resolved.pending {
                    refs::schedule_async_ref(obj, name, task)?;
                }
                if resolved.is_async || resolved.value.is_undefined() {
                    return Ok(());
                }
                value = resolved.value;
            }
        }

        parameter.validate(&value)?;
        if parameter.is_readonly() {
            return Err(ParamError::ReadOnlyParameter {
                name: name.to_string(),
            });
        }

        let old = self.get(name)?;
        if parameter.is_constant() && !self.state().constant_override.get() {
            let constructing = matches!(self, Owner::Instance(obj) if !obj.is_initialized());
            let is_class = matches!(self, Owner::Class(_));
            if !constructing && !is_class && !old.is_same(&value) {
                return Err(ParamError::ConstantParameter {
                    name: name.to_string(),
                });
            }
        }

        trace!(owner = %self.name(), parameter = name, "setting parameter value");
        self.state().store(name, value.clone());

        if let Owner::Instance(obj) = self {
            if !obj.is_initialized() {
                return Ok(());
            }
            crate::depends::install::update_deps(obj, Some(name), false)?;
        }

        let watchers = self.state().watchers.borrow().get(name, "value");
        if !watchers.is_empty() {
            let cls = self.class();
            let event = Event {
                what: "value".to_string(),
                name: name.to_string(),
                obj: self.instance(),
                cls: cls.declaring_class(name).unwrap_or(cls),
                old,
                new: value,
                event_type: None,
            };
            dispatch(self, watchers, event)?;
        }

        if reset_events && parameter.is_event() {
            self.state().store(name, Value::Bool(false));
        }
        Ok(())
    }

    /// Change a facet of a parameter on this owner, notifying facet watchers.
    pub(crate) fn set_facet(&self, name: &str, what: &str, value: Value) -> Result<()> {
        if what == "value" {
            return self.set_value(name, value);
        }
        self.parameter(name)?;
        let old = self.facet(name, what).unwrap_or(Value::Undefined);
        self.state().store_facet(name, what, value.clone());

        let watchers = self.state().watchers.borrow().get(name, what);
        if watchers.is_empty() {
            return Ok(());
        }
        let cls = self.class();
        let event = Event {
            what: what.to_string(),
            name: name.to_string(),
            obj: self.instance(),
            cls: cls.declaring_class(name).unwrap_or(cls),
            old,
            new: value,
            event_type: None,
        };
        dispatch(self, watchers, event)
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Instance(obj) => write!(f, "Owner::Instance({})", obj.name()),
            Owner::Class(cls) => write!(f, "Owner::Class({})", cls.name()),
        }
    }
}

impl From<Parameterized> for Owner {
    fn from(obj: Parameterized) -> Self {
        Owner::Instance(obj)
    }
}

impl From<Class> for Owner {
    fn from(cls: Class) -> Self {
        Owner::Class(cls)
    }
}

/// One parameter of one owner.
///
/// This is what dependency declarations, `bind` arguments and references
/// hold on to; comparing two references compares owner identity and name.
#[derive(Clone)]
pub struct ParamRef {
    owner: Owner,
    name: String,
}

impl ParamRef {
    pub(crate) fn new(owner: Owner, name: impl Into<String>) -> Self {
        ParamRef {
            owner,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Current value of the referenced parameter.
    pub fn value(&self) -> Result<Value> {
        self.owner.get(&self.name)
    }

    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.owner.set_value(&self.name, value.into())
    }

    pub fn facet(&self, what: &str) -> Result<Value> {
        self.owner.facet(&self.name, what)
    }

    pub fn set_facet(&self, what: &str, value: impl Into<Value>) -> Result<()> {
        self.owner.set_facet(&self.name, what, value.into())
    }

    /// The declaration of the referenced parameter.
    pub fn definition(&self) -> Result<Parameter> {
        self.owner.parameter(&self.name)
    }

    pub fn is_event(&self) -> bool {
        self.definition().map(|p| p.is_event()).unwrap_or(false)
    }

    /// A reactive expression following this parameter.
    pub fn rx(&self) -> Rx {
        Rx::new(Value::Param(self.clone()))
    }

    pub(crate) fn downgrade(&self) -> WeakParamRef {
        WeakParamRef {
            owner: self.owner.downgrade(),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for ParamRef {
    fn eq(&self, other: &Self) -> bool {
        self.owner.id() == other.owner.id() && self.name == other.name
    }
}

impl fmt::Debug for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamRef({}.{})", self.owner.name(), self.name)
    }
}

/// A [`ParamRef`] that does not keep its owner alive.
#[derive(Clone)]
pub(crate) struct WeakParamRef {
    owner: WeakOwner,
    name: String,
}

impl WeakParamRef {
    pub(crate) fn upgrade(&self) -> Option<ParamRef> {
        self.owner
            .upgrade()
            .map(|owner| ParamRef::new(owner, self.name.clone()))
    }
}
