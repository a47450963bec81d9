//! Dependency declarations
//!
//! [`depends`] attaches dependency metadata to a method or a free function.
//! Dependencies come in three forms:
//!
//! - string specs such as `"a"`, `"sub.a"` or `"a:constant"`, resolved
//!   against the instance a method belongs to,
//! - direct references to parameters ([`ParamRef`]),
//! - other dependent functions, whose own dependencies are followed.
//!
//! ## Core Components
//!
//! - [`Depends`]: builder collecting the declaration and its options
//! - [`DependencyInfo`]: the validated metadata stored on functions and methods
//! - [`spec`]: the string spec grammar
//! - [`resolver`]: turns declarations into concrete parameters
//!
//! # Examples
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use param_rs::{depends, Class, Function, Parameter, Value};
//!
//! let cls = Class::builder("Source").param(Parameter::new("x", 1)).build().unwrap();
//! let source = cls.new_instance().unwrap();
//! let x = source.param().get("x").unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = seen.clone();
//! let record = Function::new("record", move |args, _| {
//!     log.borrow_mut().push(args[0].clone());
//!     Ok(Value::None)
//! });
//! let watched = depends([&x]).watch(true).function(&record).unwrap();
//!
//! source.set("x", 2).unwrap();
//! assert_eq!(*seen.borrow(), vec![Value::Int(2)]);
//! watched.dispose().unwrap();
//! ```

pub(crate) mod install;
pub mod resolver;
pub mod spec;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ParamError, Result};
use crate::events::{Event, WatchCallback, WatcherMode};
use crate::function::{Effect, Function, Kwargs};
use crate::parameterized::owner::WeakParamRef;
use crate::parameterized::{Owner, ParamRef};
use crate::reactive::Rx;
use crate::value::Value;

use resolver::{eval_function_with_deps, resolve_ref};

pub use resolver::{DInfo, Intermediate, MInfo, PInfo};
pub use spec::DependencySpec;

/// One declared dependency.
#[derive(Clone)]
pub enum Dependency {
    /// A string spec resolved against the declaring instance.
    Spec(String),
    /// A parameter of a specific owner.
    Param(ParamRef),
    /// A function carrying dependency metadata.
    Function(Function),
}

impl Dependency {
    pub fn is_spec(&self) -> bool {
        matches!(self, Dependency::Spec(_))
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Spec(spec) => write!(f, "Spec({:?})", spec),
            Dependency::Param(p) => write!(f, "{:?}", p),
            Dependency::Function(func) => write!(f, "Function({})", func.name()),
        }
    }
}

impl From<&str> for Dependency {
    fn from(spec: &str) -> Self {
        Dependency::Spec(spec.to_string())
    }
}

impl From<String> for Dependency {
    fn from(spec: String) -> Self {
        Dependency::Spec(spec)
    }
}

impl From<ParamRef> for Dependency {
    fn from(p: ParamRef) -> Self {
        Dependency::Param(p)
    }
}

impl From<&ParamRef> for Dependency {
    fn from(p: &ParamRef) -> Self {
        Dependency::Param(p.clone())
    }
}

impl From<Function> for Dependency {
    fn from(f: Function) -> Self {
        Dependency::Function(f)
    }
}

impl From<&Function> for Dependency {
    fn from(f: &Function) -> Self {
        Dependency::Function(f.clone())
    }
}

impl From<&Rx> for Dependency {
    fn from(rx: &Rx) -> Self {
        Dependency::Function(rx.as_function())
    }
}

impl TryFrom<Value> for Dependency {
    type Error = ParamError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Str(spec) => Ok(Dependency::Spec(spec)),
            Value::Param(p) => Ok(Dependency::Param(p)),
            Value::Rx(rx) => Ok(Dependency::from(&rx)),
            Value::Function(f) if f.dependencies().is_some() => Ok(Dependency::Function(f)),
            other => Err(ParamError::InvalidDependency {
                found: other.type_name(),
            }),
        }
    }
}

/// Validated dependency metadata.
#[derive(Clone, Debug)]
pub struct DependencyInfo {
    pub dependencies: Vec<Dependency>,
    pub kw: BTreeMap<String, Dependency>,
    /// Call the function whenever a dependency changes.
    pub watch: bool,
    /// Call the method once the instance is constructed.
    pub on_init: bool,
    /// Queue events raised while the callback runs.
    pub queued: bool,
    /// Pass current dependency values as arguments when evaluated as a reference.
    pub(crate) inject: bool,
}

impl DependencyInfo {
    /// Whether the dependencies are string specs.
    pub fn uses_specs(&self) -> bool {
        self.dependencies.iter().chain(self.kw.values()).any(Dependency::is_spec)
    }
}

/// Builder for a dependency declaration, see [`depends`].
#[derive(Clone, Debug)]
pub struct Depends {
    dependencies: Vec<Dependency>,
    kw: BTreeMap<String, Dependency>,
    watch: bool,
    on_init: bool,
    queued: bool,
}

/// Declare dependencies.
///
/// Use the result with [`ClassBuilder::dependent`](crate::ClassBuilder::dependent)
/// for methods or [`Depends::function`] for free functions.
pub fn depends<I, T>(dependencies: I) -> Depends
where
    I: IntoIterator<Item = T>,
    T: Into<Dependency>,
{
    Depends {
        dependencies: dependencies.into_iter().map(Into::into).collect(),
        kw: BTreeMap::new(),
        watch: false,
        on_init: false,
        queued: false,
    }
}

impl Depends {
    /// Add a dependency passed to the function as keyword `name`.
    pub fn kw(mut self, name: impl Into<String>, dependency: impl Into<Dependency>) -> Self {
        self.kw.insert(name.into(), dependency.into());
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn on_init(mut self, on_init: bool) -> Self {
        self.on_init = on_init;
        self
    }

    pub fn queued(mut self, queued: bool) -> Self {
        self.queued = queued;
        self
    }

    /// Validate the declaration.
    ///
    /// # Errors
    ///
    /// - [`ParamError::MixedDependencies`] when string specs and parameter
    ///   references are combined
    /// - [`ParamError::KeywordsWithStringSpecs`] when string specs are given
    ///   together with keyword dependencies
    /// - [`ParamError::InvalidDependency`] for functions without dependency metadata
    pub fn info(&self) -> Result<DependencyInfo> {
        let all: Vec<&Dependency> = self.dependencies.iter().chain(self.kw.values()).collect();
        for dep in &all {
            if let Dependency::Function(f) = dep {
                if f.dependencies().is_none() {
                    return Err(ParamError::InvalidDependency {
                        found: format!("function '{}' without dependencies", f.name()),
                    });
                }
            }
        }
        let specs = all.iter().any(|d| d.is_spec());
        let params = all.iter().any(|d| matches!(d, Dependency::Param(_)));
        if specs && params {
            return Err(ParamError::MixedDependencies);
        }
        if specs && !self.kw.is_empty() {
            return Err(ParamError::KeywordsWithStringSpecs);
        }
        Ok(DependencyInfo {
            dependencies: self.dependencies.clone(),
            kw: self.kw.clone(),
            watch: self.watch,
            on_init: self.on_init,
            queued: self.queued,
            inject: false,
        })
    }

    /// Attach the declaration to a free function.
    ///
    /// Evaluating the returned function as a reference passes the current
    /// values of its dependencies as arguments. With [`watch`](Self::watch)
    /// and parameter dependencies, one watcher per owner is installed that
    /// calls the function with the current values on every change.
    pub fn function(&self, f: &Function) -> Result<Function> {
        let mut dinfo = self.info()?;
        dinfo.inject = true;
        let watch = dinfo.watch && !dinfo.uses_specs();
        let wrapped = f.with_dependencies(dinfo.clone());
        if !watch {
            return Ok(wrapped);
        }

        let mut groups: Vec<(Owner, Vec<String>)> = Vec::new();
        for dep in dinfo.dependencies.iter().chain(dinfo.kw.values()) {
            let refs = match dep {
                Dependency::Param(p) => vec![p.clone()],
                Dependency::Function(g) => resolve_ref(&Value::Function(g.clone()), false)?,
                Dependency::Spec(_) => Vec::new(),
            };
            for p in refs {
                match groups.iter_mut().find(|(owner, _)| owner.ptr_eq(p.owner())) {
                    Some((_, names)) => {
                        if !names.iter().any(|n| n == p.name()) {
                            names.push(p.name().to_string());
                        }
                    }
                    None => groups.push((p.owner().clone(), vec![p.name().to_string()])),
                }
            }
        }

        let args = Arguments::capture(&dinfo);
        let body = f.clone();
        let callback: WatchCallback = Rc::new(move |_: &[Event]| -> Result<Effect> {
            let (values, kwargs) = args.values()?;
            body.call(&values, &kwargs).map(Effect::from_value)
        });

        let mut watchers = Vec::new();
        for (owner, names) in groups {
            watchers.push(owner.param().watch_internal(
                f.name(),
                callback.clone(),
                WatcherMode::Args,
                names,
                "value",
                true,
                dinfo.queued,
                0,
            )?);
        }
        debug!(function = f.name(), watchers = watchers.len(), "dependent function watching");
        wrapped.add_watchers(watchers);
        Ok(wrapped)
    }
}

/// Argument sources of a watched function.
///
/// Parameters are held weakly so that the watcher stored on a parameter's
/// owner does not keep that owner alive.
struct Arguments {
    args: Vec<Source>,
    kw: Vec<(String, Source)>,
}

enum Source {
    Param(WeakParamRef),
    Function(Function),
}

impl Source {
    fn new(dep: &Dependency) -> Option<Source> {
        match dep {
            Dependency::Param(p) => Some(Source::Param(p.downgrade())),
            Dependency::Function(f) => Some(Source::Function(f.clone())),
            Dependency::Spec(_) => None,
        }
    }

    fn value(&self) -> Result<Value> {
        match self {
            Source::Param(weak) => weak.upgrade().ok_or(ParamError::Skip)?.value(),
            Source::Function(f) => eval_function_with_deps(f),
        }
    }
}

impl Arguments {
    fn capture(dinfo: &DependencyInfo) -> Arguments {
        Arguments {
            args: dinfo.dependencies.iter().filter_map(Source::new).collect(),
            kw: dinfo
                .kw
                .iter()
                .filter_map(|(name, dep)| Source::new(dep).map(|s| (name.clone(), s)))
                .collect(),
        }
    }

    fn values(&self) -> Result<(Vec<Value>, Kwargs)> {
        let args = self.args.iter().map(Source::value).collect::<Result<Vec<_>>>()?;
        let kwargs = self
            .kw
            .iter()
            .map(|(name, source)| Ok((name.clone(), source.value()?)))
            .collect::<Result<Kwargs>>()?;
        Ok((args, kwargs))
    }
}
