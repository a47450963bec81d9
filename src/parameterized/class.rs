//! Parameterized classes.
//!
//! A [`Class`] is built once with a [`ClassBuilder`]: parameter declarations,
//! methods (optionally dependent on parameters) and an optional parent class.
//! At build time the dependency declarations of watched methods are resolved
//! against the class so that every new instance can wire its watchers
//! without parsing specs again.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::context::Context;
use crate::depends::resolver::{params_depended_on, DInfo, Intermediate, MInfo, PInfo};
use crate::depends::{DependencyInfo, Depends};
use crate::error::{ParamError, Result};
use crate::function::{FunctionKind, Kwargs};
use crate::value::Value;

use super::object::Parameterized;
use super::owner::Owner;
use super::parameter::Parameter;
use super::parameters::Parameters;
use super::{OwnerId, ParamState};

/// Body of a method; receives the instance it is called on.
pub type MethodBody = Rc<dyn Fn(&Parameterized, &[Value], &Kwargs) -> Result<Value>>;

/// A method declared on a class.
#[derive(Clone)]
pub(crate) struct MethodDef {
    pub(crate) name: String,
    pub(crate) kind: FunctionKind,
    pub(crate) dinfo: Option<DependencyInfo>,
    pub(crate) body: MethodBody,
}

/// Watched method with its dependencies resolved against the class.
#[derive(Debug, Clone)]
pub(crate) struct WatchSpec {
    pub(crate) method: String,
    pub(crate) queued: bool,
    pub(crate) on_init: bool,
    /// Dependencies resolvable on the class itself.
    pub(crate) constant: Vec<PInfo>,
    /// Dependencies through sub-objects, resolved per instance.
    pub(crate) dynamic: Vec<DInfo>,
}

struct ClassInner {
    id: OwnerId,
    name: String,
    parent: Option<Class>,
    params: Vec<Parameter>,
    methods: Vec<MethodDef>,
    watch_specs: RefCell<Vec<WatchSpec>>,
    context: Context,
    state: ParamState,
}

/// A parameterized class.
#[derive(Clone)]
pub struct Class(Rc<ClassInner>);

#[derive(Clone)]
pub(crate) struct WeakClass(Weak<ClassInner>);

impl WeakClass {
    pub(crate) fn upgrade(&self) -> Option<Class> {
        self.0.upgrade().map(Class)
    }
}

impl Class {
    /// Start declaring a class.
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            parent: None,
            params: Vec::new(),
            methods: Vec::new(),
            context: None,
            error: None,
        }
    }

    pub fn id(&self) -> OwnerId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Class> {
        self.0.parent.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub(crate) fn state(&self) -> &ParamState {
        &self.0.state
    }

    pub(crate) fn downgrade(&self) -> WeakClass {
        WeakClass(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// This class followed by its ancestors.
    fn lineage(&self) -> Vec<Class> {
        let mut chain = vec![self.clone()];
        let mut current = self.0.parent.clone();
        while let Some(cls) = current {
            current = cls.0.parent.clone();
            chain.push(cls);
        }
        chain
    }

    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.lineage().iter().any(|cls| cls.ptr_eq(other))
    }

    /// Names of all parameters, ancestors' declarations first.
    pub fn param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cls in self.lineage().iter().rev() {
            for p in &cls.0.params {
                if !names.iter().any(|n| n == p.name()) {
                    names.push(p.name().to_string());
                }
            }
        }
        names
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.declaring_class(name).is_some()
    }

    /// The most derived declaration of a parameter.
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        self.lineage()
            .into_iter()
            .find_map(|cls| cls.0.params.iter().find(|p| p.name() == name).cloned())
    }

    /// The nearest class in the lineage declaring `name`.
    pub fn declaring_class(&self, name: &str) -> Option<Class> {
        self.lineage()
            .into_iter()
            .find(|cls| cls.0.params.iter().any(|p| p.name() == name))
    }

    pub(crate) fn method_def(&self, name: &str) -> Option<MethodDef> {
        self.lineage()
            .into_iter()
            .find_map(|cls| cls.0.methods.iter().find(|m| m.name == name).cloned())
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.method_def(name).is_some()
    }

    /// Names of all methods, with overrides replacing inherited definitions.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cls in self.lineage().iter().rev() {
            for m in &cls.0.methods {
                if !names.contains(&m.name) {
                    names.push(m.name.clone());
                }
            }
        }
        names
    }

    pub(crate) fn watch_specs(&self) -> Vec<WatchSpec> {
        self.0.watch_specs.borrow().clone()
    }

    /// Class-level value of a parameter.
    ///
    /// Assigning on a class changes the default seen by its instances and by
    /// subclasses that do not redeclare the parameter.
    pub fn get(&self, name: &str) -> Result<Value> {
        for cls in self.lineage() {
            if let Some(value) = cls.0.state.value(name) {
                return Ok(value);
            }
            if let Some(p) = cls.0.params.iter().find(|p| p.name() == name) {
                return Ok(p.default().clone());
            }
        }
        if name == "name" {
            return Ok(Value::Str(self.0.name.clone()));
        }
        Err(ParamError::AttributeNotResolved {
            attr: name.to_string(),
            owner: self.0.name.clone(),
        })
    }

    /// Set a class-level parameter value.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        Owner::Class(self.clone()).set_value(name, value.into())
    }

    /// Class-level value of a facet, following the lineage.
    pub(crate) fn facet(&self, name: &str, what: &str) -> Result<Value> {
        if what == "default" {
            return self.get(name);
        }
        for cls in self.lineage() {
            if let Some(value) = cls.0.state.facet(name, what) {
                return Ok(value);
            }
            if let Some(p) = cls.0.params.iter().find(|p| p.name() == name) {
                return p.facet(what).ok_or_else(|| ParamError::AttributeNotResolved {
                    attr: what.to_string(),
                    owner: format!("parameter '{}'", name),
                });
            }
        }
        Err(ParamError::ParameterNotFound {
            name: name.to_string(),
            class: self.0.name.clone(),
        })
    }

    /// The `param` namespace of the class.
    pub fn param(&self) -> Parameters {
        Parameters::new(Owner::Class(self.clone()))
    }

    /// Create an instance, overriding parameter values.
    pub fn instance<I, K, V>(&self, overrides: I) -> Result<Parameterized>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let overrides: Vec<(String, Value)> = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Parameterized::create(self, overrides)
    }

    /// Create an instance with default values.
    pub fn new_instance(&self) -> Result<Parameterized> {
        Parameterized::create(self, Vec::new())
    }

    fn resolve_watch_specs(&self) -> Result<Vec<WatchSpec>> {
        let mut specs = Vec::new();
        for name in self.method_names() {
            let Some(method) = self.method_def(&name) else {
                continue;
            };
            let Some(dinfo) = method.dinfo.as_ref() else {
                continue;
            };
            let minfo = MInfo {
                inst: None,
                cls: self.clone(),
                name: name.clone(),
            };
            // Resolved for every dependent method so that misspelled specs fail here.
            let (constant, dynamic) = params_depended_on(&minfo, false, Intermediate::Yes)?;
            if !dinfo.watch {
                continue;
            }
            specs.push(WatchSpec {
                method: name,
                queued: dinfo.queued,
                on_init: dinfo.on_init,
                constant,
                dynamic,
            });
        }
        Ok(specs)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.0.name)
            .field("params", &self.param_names())
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builder for [`Class`].
pub struct ClassBuilder {
    name: String,
    parent: Option<Class>,
    params: Vec<Parameter>,
    methods: Vec<MethodDef>,
    context: Option<Context>,
    error: Option<ParamError>,
}

impl ClassBuilder {
    /// Declare a parameter. Redeclaring an inherited name overrides it.
    pub fn param(mut self, parameter: Parameter) -> Self {
        self.params.retain(|p| p.name() != parameter.name());
        self.params.push(parameter);
        self
    }

    /// Inherit parameters and methods from `parent`.
    pub fn extends(mut self, parent: &Class) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Use `context` instead of the parent's or the global one.
    pub fn context(mut self, context: &Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    fn push_method(
        mut self,
        name: impl Into<String>,
        kind: FunctionKind,
        dinfo: Option<DependencyInfo>,
        body: MethodBody,
    ) -> Self {
        let name = name.into();
        self.methods.retain(|m| m.name != name);
        self.methods.push(MethodDef {
            name,
            kind,
            dinfo,
            body,
        });
        self
    }

    /// Declare a plain method. Used as a dependency it depends on every parameter.
    pub fn method<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Parameterized, &[Value], &Kwargs) -> Result<Value> + 'static,
    {
        self.push_method(name, FunctionKind::Sync, None, Rc::new(f))
    }

    /// Declare a method depending on the given parameters, methods or sub-object paths.
    pub fn dependent<F>(self, name: impl Into<String>, deps: Depends, f: F) -> Self
    where
        F: Fn(&Parameterized, &[Value], &Kwargs) -> Result<Value> + 'static,
    {
        self.dependent_kind(name, FunctionKind::Sync, deps, Rc::new(f))
    }

    /// Declare a coroutine method; calling it yields a task for the executor.
    pub fn async_dependent<F>(self, name: impl Into<String>, deps: Depends, f: F) -> Self
    where
        F: Fn(&Parameterized, &[Value], &Kwargs) -> Result<Value> + 'static,
    {
        self.dependent_kind(name, FunctionKind::Coroutine, deps, Rc::new(f))
    }

    fn dependent_kind(
        mut self,
        name: impl Into<String>,
        kind: FunctionKind,
        deps: Depends,
        body: MethodBody,
    ) -> Self {
        match deps.info() {
            Ok(dinfo) => self.push_method(name, kind, Some(dinfo), body),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    /// Finish the declaration, resolving the dependencies of watched methods.
    pub fn build(self) -> Result<Class> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let context = self
            .context
            .or_else(|| self.parent.as_ref().map(|p| p.context().clone()))
            .unwrap_or_else(Context::global);
        let cls = Class(Rc::new(ClassInner {
            id: OwnerId::next(),
            name: self.name,
            parent: self.parent,
            params: self.params,
            methods: self.methods,
            watch_specs: RefCell::new(Vec::new()),
            context,
            state: ParamState::default(),
        }));
        let specs = cls.resolve_watch_specs()?;
        debug!(class = cls.name(), watched_methods = specs.len(), "class built");
        *cls.0.watch_specs.borrow_mut() = specs;
        Ok(cls)
    }
}
