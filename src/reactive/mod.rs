//! # Reactive expressions
//!
//! An [`Rx`] wraps a value, a parameter or a dependent function and records
//! every operation applied to it as a new node of a lazy pipeline. Nothing is
//! computed while the pipeline is built; a node evaluates its operation the
//! first time its value is read and caches the result until one of the
//! parameters it depends on changes.
//!
//! ## Key Features
//!
//! - **Laziness**: invalidation only marks nodes dirty, recomputation happens
//!   on the next read
//! - **Shared root**: all nodes derived from one root share the root's value,
//!   so the root function runs once per change no matter how many branches read it
//! - **Error caching**: a failing step re-raises the same error on every read
//!   until a dependency changes
//! - **Asynchronous steps**: coroutine and generator steps are handed to the
//!   context's executor; only the most recently scheduled task may write
//!
//! ## Core Components
//!
//! - [`Rx`]: a node of a reactive pipeline
//! - [`ReactiveOps`]: the `rx()` namespace of pipeline helpers
//! - [`Ufunc`]: elementwise numeric functions applicable to nodes
//!
//! ## Example Usage
//!
//! ```rust
//! use param_rs::{Context, Rx, Value};
//!
//! let ctx = Context::new();
//! let root = Rx::with_context(5, &ctx);
//! let doubled = (&root + 1) * 2;
//! assert_eq!(doubled.value().unwrap(), Value::Int(12));
//!
//! root.set_value(10).unwrap();
//! assert_eq!(doubled.value().unwrap(), Value::Int(22));
//! ```

mod ops;
pub mod ufunc;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::bind::bind;
use crate::context::Context;
use crate::depends::resolver::{eval_function_with_deps, resolve_ref, resolve_value, PInfo};
use crate::depends::{Dependency, DependencyInfo};
use crate::error::{ParamError, Result};
use crate::events::{Event, WatchCallback, Watcher, WatcherMode};
use crate::function::{Effect, Function, Kwargs, Task, TaskId};
use crate::parameterized::{Class, Owner, ParamRef, Parameter, Parameterized};
use crate::value::ops::{length, BinaryOp, UnaryOp};
use crate::value::Value;

pub use ops::ReactiveOps;
pub use ufunc::Ufunc;

/// Internal classes backing reactive expressions, built once per [`Context`].
pub(crate) struct Internals {
    /// Holds concrete root values so that they can be replaced.
    wrapper: Class,
    /// Follows coroutine and generator roots through the executor.
    gen_wrapper: Class,
    /// Event raised when an asynchronous step produced a value.
    trigger: Class,
}

impl Internals {
    pub(crate) fn build(context: &Context) -> Result<Internals> {
        Ok(Internals {
            wrapper: Class::builder("Wrapper")
                .context(context)
                .param(Parameter::new("object", Value::None))
                .build()?,
            gen_wrapper: Class::builder("GenWrapper")
                .context(context)
                .param(Parameter::new("object", Value::None).allow_refs())
                .build()?,
            trigger: Class::builder("Trigger")
                .context(context)
                .param(Parameter::new("value", false).event())
                .build()?,
        })
    }

    /// A new trigger. `parameters` are the parameters whose changes the
    /// trigger stands in for; external watchers skip a trigger whose
    /// parameters they already observe.
    pub(crate) fn trigger(&self, internal: bool, parameters: &[ParamRef]) -> Result<Parameterized> {
        let trigger = self.trigger.new_instance()?;
        trigger.set_attr("internal", internal);
        trigger.set_attr(
            "parameters",
            Value::List(parameters.iter().map(Value::from).collect()),
        );
        Ok(trigger)
    }
}

/// Custom step applied by an [`Operation::Builtin`].
pub(crate) type StepFn = Rc<dyn Fn(&Value, &[Value], &Kwargs) -> Result<Value>>;

#[derive(Clone)]
pub(crate) enum OpFn {
    Binary(BinaryOp),
    Unary(UnaryOp),
    /// Attribute lookup.
    Attr(String),
    /// Call of a named method of the value.
    Method(String),
    /// Call of the value itself.
    Call,
    /// Call of a function (or reference to one) with the value as first argument.
    Apply(Value),
    Builtin(&'static str, StepFn),
    Ufunc(Ufunc),
}

impl OpFn {
    fn name(&self) -> String {
        match self {
            OpFn::Binary(op) => op.symbol().to_string(),
            OpFn::Unary(op) => op.name().to_string(),
            OpFn::Attr(name) => format!("getattr({})", name),
            OpFn::Method(name) => format!("{}()", name),
            OpFn::Call => "__call__".to_string(),
            OpFn::Apply(f) => match f {
                Value::Function(f) => f.name().to_string(),
                other => other.type_name(),
            },
            OpFn::Builtin(name, _) => name.to_string(),
            OpFn::Ufunc(u) => u.name().to_string(),
        }
    }
}

/// One recorded step of a pipeline.
#[derive(Clone)]
pub(crate) struct Operation {
    func: OpFn,
    args: Vec<Value>,
    kwargs: Kwargs,
    /// Apply as `func(args[0], value, args[1..])`.
    reverse: bool,
}

impl Operation {
    pub(crate) fn new(func: OpFn, args: Vec<Value>, kwargs: Kwargs, reverse: bool) -> Self {
        Operation {
            func,
            args,
            kwargs,
            reverse,
        }
    }

    /// Whether evaluating the step may produce a task instead of a value.
    fn may_defer(&self) -> bool {
        match &self.func {
            OpFn::Apply(Value::Function(f)) => f.is_deferred(),
            OpFn::Method(_) | OpFn::Call => true,
            _ => false,
        }
    }

    /// Parameters the arguments of the step depend on.
    fn references(&self) -> Result<Vec<ParamRef>> {
        let mut refs = Vec::new();
        if let OpFn::Apply(f) = &self.func {
            refs.extend(resolve_ref(f, false)?);
        }
        for arg in self.args.iter().chain(self.kwargs.values()) {
            refs.extend(resolve_ref(arg, true)?);
        }
        Ok(refs)
    }

    fn eval(&self, obj: &Value) -> Result<Value> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let value = resolve_value(arg, true)?;
            if value.is_undefined() {
                return Err(ParamError::Skip);
            }
            args.push(value);
        }
        let mut kwargs = Kwargs::new();
        for (name, arg) in &self.kwargs {
            let value = resolve_value(arg, true)?;
            if value.is_undefined() {
                return Err(ParamError::Skip);
            }
            kwargs.insert(name.clone(), value);
        }

        match &self.func {
            OpFn::Binary(op) => {
                let other = args.first().ok_or_else(|| {
                    ParamError::TypeError(format!("'{}' expects an operand", op.symbol()))
                })?;
                if self.reverse {
                    op.apply(other, obj)
                } else {
                    op.apply(obj, other)
                }
            }
            OpFn::Unary(op) => op.apply(obj),
            OpFn::Attr(name) => obj.get_attr(name),
            OpFn::Method(name) => obj.get_attr(name)?.call(&args, &kwargs),
            OpFn::Call => obj.call(&args, &kwargs),
            OpFn::Apply(f) => {
                let f = match f {
                    Value::Param(p) => p.value()?,
                    Value::Rx(rx) => rx.value()?,
                    other => other.clone(),
                };
                let mut combined = Vec::with_capacity(args.len() + 1);
                if self.reverse && !args.is_empty() {
                    combined.push(args.remove(0));
                }
                combined.push(obj.clone());
                combined.extend(args);
                f.call(&combined, &kwargs)
            }
            OpFn::Builtin(_, step) => step(obj, &args, &kwargs),
            OpFn::Ufunc(u) => {
                let mut inputs = Vec::with_capacity(args.len() + 1);
                inputs.push(obj.clone());
                inputs.extend(args);
                u.apply(&inputs)
            }
        }
    }
}

/// The root value shared by every node of a pipeline.
struct SharedRoot {
    value: RefCell<Option<Value>>,
    /// The root function has to be evaluated again.
    dirty: Cell<bool>,
}

struct NodeState {
    dirty: bool,
    current: Value,
    error: Option<ParamError>,
    current_task: Option<TaskId>,
}

struct Node {
    context: Context,
    root_fn: Option<Function>,
    fn_params: Rc<Vec<ParamRef>>,
    shared: Rc<SharedRoot>,
    /// Wrapper instance of a root holding a concrete value.
    wrapper: Option<Parameterized>,
    prev: Option<Rx>,
    operation: Option<Operation>,
    /// Pending attribute access, see [`Rx::attr`].
    method: Option<String>,
    depth: usize,
    trigger: Option<Parameterized>,
    internal_params: Vec<ParamRef>,
    params: Vec<ParamRef>,
    /// Error raised while the node was built. It is never cleared.
    failure: Option<ParamError>,
    state: RefCell<NodeState>,
    watchers: RefCell<Vec<Watcher>>,
    /// Watching functions that live exactly as long as this node.
    owned: RefCell<Vec<Function>>,
}

impl Drop for Node {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().drain(..) {
            let Some(owner) = watcher.owner() else {
                continue;
            };
            if let Ok(mut registry) = owner.state().watchers.try_borrow_mut() {
                registry.remove(&watcher);
            };
        }
        for function in self.owned.get_mut().drain(..) {
            function.release();
        }
    }
}

/// Everything needed to build a node.
struct Parts {
    context: Context,
    root_fn: Option<Function>,
    fn_params: Rc<Vec<ParamRef>>,
    shared: Rc<SharedRoot>,
    wrapper: Option<Parameterized>,
    prev: Option<Rx>,
    operation: Option<Operation>,
    method: Option<String>,
    depth: usize,
    failure: Option<ParamError>,
}

/// How a root obtains its value.
struct Root {
    function: Option<Function>,
    value: Option<Value>,
    wrapper: Option<Parameterized>,
}

fn identity() -> Function {
    Function::unary("identity", |value| Ok(value.clone()))
}

fn root_of(value: Value, context: &Context) -> Result<Root> {
    match value {
        Value::Function(f) if f.is_deferred() => {
            let gen = context
                .internals()?
                .gen_wrapper
                .instance([("object", Value::Function(f))])?;
            let object = gen.param().get("object")?;
            Ok(Root {
                function: Some(bind(identity(), [object]).build()?),
                value: Some(Value::Undefined),
                wrapper: Some(gen),
            })
        }
        Value::Function(f) if f.dependencies().is_some() => Ok(Root {
            function: Some(f),
            value: None,
            wrapper: None,
        }),
        Value::Param(p) => {
            let current = p.value()?;
            Ok(Root {
                function: Some(bind(identity(), [p]).build()?),
                value: Some(current),
                wrapper: None,
            })
        }
        other => {
            let wrapper = context.internals()?.wrapper.instance([("object", other.clone())])?;
            let object = wrapper.param().get("object")?;
            Ok(Root {
                function: Some(bind(identity(), [object]).build()?),
                value: Some(other),
                wrapper: Some(wrapper),
            })
        }
    }
}

fn function_params(f: &Function) -> Result<Vec<ParamRef>> {
    if let Some(owner) = f.owner() {
        let deps = owner.param().method_dependencies(f.name(), false)?;
        return Ok(deps.iter().map(PInfo::param_ref).collect());
    }
    resolve_ref(&Value::Function(f.clone()), false)
}

fn push_unique(params: &mut Vec<ParamRef>, param: ParamRef) {
    if !params.contains(&param) {
        params.push(param);
    }
}

fn group_by_owner(params: &[ParamRef]) -> Vec<(Owner, Vec<String>)> {
    let mut groups: Vec<(Owner, Vec<String>)> = Vec::new();
    for p in params {
        match groups.iter_mut().find(|(owner, _)| owner.ptr_eq(p.owner())) {
            Some((_, names)) => {
                if !names.iter().any(|n| n == p.name()) {
                    names.push(p.name().to_string());
                }
            }
            None => groups.push((p.owner().clone(), vec![p.name().to_string()])),
        }
    }
    groups
}

/// The trigger instance owning `param`, if it belongs to one.
fn trigger_owner(param: &ParamRef) -> Option<Parameterized> {
    let obj = param.owner().instance()?;
    obj.attr("internal").map(|_| obj)
}

/// Parameters external watchers of a node observe.
///
/// A trigger standing in for parameters the node already depends on would
/// only make those watchers fire twice.
fn external_params(internal: &[ParamRef]) -> Vec<ParamRef> {
    internal
        .iter()
        .filter(|p| {
            let Some(trigger) = trigger_owner(p) else {
                return true;
            };
            if trigger
                .attr("internal")
                .is_some_and(|v| v.as_bool() == Some(true))
            {
                return true;
            }
            match trigger.attr("parameters") {
                Some(Value::List(parameters)) => parameters.iter().any(|q| match q {
                    Value::Param(q) => !internal.contains(q),
                    _ => false,
                }),
                _ => true,
            }
        })
        .cloned()
        .collect()
}

/// A node of a reactive pipeline.
///
/// Cloning an `Rx` clones the handle; both refer to the same node.
#[derive(Clone)]
pub struct Rx(Rc<Node>);

/// Create a reactive expression on the per-thread default context.
///
/// Shorthand for [`Rx::new`].
pub fn rx(value: impl Into<Value>) -> Rx {
    Rx::new(value)
}

impl Rx {
    /// Wrap `value` as the root of a new pipeline.
    ///
    /// - plain values are held by an internal wrapper and can be replaced
    ///   with [`set_value`](Rx::set_value)
    /// - a [`ParamRef`] makes the root follow the parameter
    /// - a dependent function is evaluated whenever its dependencies change
    /// - coroutine and generator functions are resolved through the executor
    /// - another `Rx` is continued by a new node
    pub fn new(value: impl Into<Value>) -> Rx {
        Self::with_context(value, &Context::global())
    }

    /// Like [`new`](Rx::new) but using an explicit context.
    pub fn with_context(value: impl Into<Value>, context: &Context) -> Rx {
        let value = value.into();
        if let Value::Rx(rx) = value {
            return rx.accessor_base().derive(None, None);
        }
        let (root, failure) = match root_of(value, context) {
            Ok(root) => (root, None),
            Err(err) => (
                Root {
                    function: None,
                    value: Some(Value::Undefined),
                    wrapper: None,
                },
                Some(err),
            ),
        };
        let (fn_params, failure) = match (&root.function, failure) {
            (Some(f), None) => match function_params(f) {
                Ok(params) => (params, None),
                Err(err) => (Vec::new(), Some(err)),
            },
            (_, failure) => (Vec::new(), failure),
        };
        Rx::assemble(Parts {
            context: context.clone(),
            root_fn: root.function,
            fn_params: Rc::new(fn_params),
            shared: Rc::new(SharedRoot {
                value: RefCell::new(root.value),
                dirty: Cell::new(false),
            }),
            wrapper: root.wrapper,
            prev: None,
            operation: None,
            method: None,
            depth: 0,
            failure,
        })
    }

    fn assemble(parts: Parts) -> Rx {
        let mut failure = parts.failure;
        let trigger = match &parts.operation {
            Some(op) if op.may_defer() && failure.is_none() => {
                match parts.context.internals().and_then(|i| i.trigger(true, &[])) {
                    Ok(trigger) => Some(trigger),
                    Err(err) => {
                        failure = Some(err);
                        None
                    }
                }
            }
            _ => None,
        };

        let mut internal: Vec<ParamRef> = Vec::new();
        for p in parts.fn_params.iter() {
            push_unique(&mut internal, p.clone());
        }
        if let Some(trigger) = &trigger {
            match trigger.param().get("value") {
                Ok(p) => push_unique(&mut internal, p),
                Err(err) => failure = Some(err),
            }
        }
        let mut prev = parts.prev.clone();
        while let Some(node) = prev {
            for p in &node.0.params {
                push_unique(&mut internal, p.clone());
            }
            prev = node.0.prev.clone();
        }
        if let Some(op) = &parts.operation {
            match op.references() {
                Ok(refs) => refs.into_iter().for_each(|p| push_unique(&mut internal, p)),
                Err(err) => failure = Some(err),
            }
        }
        let params = external_params(&internal);

        let rx = Rx(Rc::new(Node {
            context: parts.context,
            root_fn: parts.root_fn,
            fn_params: parts.fn_params,
            shared: parts.shared,
            wrapper: parts.wrapper,
            prev: parts.prev,
            operation: parts.operation,
            method: parts.method,
            depth: parts.depth,
            trigger,
            internal_params: internal,
            params,
            failure,
            state: RefCell::new(NodeState {
                dirty: true,
                current: Value::Undefined,
                error: None,
                current_task: None,
            }),
            watchers: RefCell::new(Vec::new()),
            owned: RefCell::new(Vec::new()),
        }));
        if rx.0.failure.is_none() {
            if let Err(err) = rx.setup_invalidations() {
                rx.0.state.borrow_mut().error = Some(err);
            }
        }
        rx
    }

    /// A new node continuing this one.
    fn derive(&self, operation: Option<Operation>, method: Option<String>) -> Rx {
        Rx::assemble(Parts {
            context: self.0.context.clone(),
            root_fn: self.0.root_fn.clone(),
            fn_params: self.0.fn_params.clone(),
            shared: self.0.shared.clone(),
            wrapper: None,
            prev: Some(self.clone()),
            operation,
            method,
            depth: self.0.depth + 1,
            failure: None,
        })
    }

    /// The node further operations are applied to: a pending attribute access
    /// is turned into a lookup step first.
    fn accessor_base(&self) -> Rx {
        match (&self.0.method, &self.0.prev) {
            (Some(method), Some(prev)) => prev.derive(
                Some(Operation::new(
                    OpFn::Attr(method.clone()),
                    Vec::new(),
                    Kwargs::new(),
                    false,
                )),
                None,
            ),
            _ => self.clone(),
        }
    }

    pub(crate) fn apply_operator(
        &self,
        func: OpFn,
        args: Vec<Value>,
        kwargs: Kwargs,
        reverse: bool,
    ) -> Rx {
        self.accessor_base()
            .derive(Some(Operation::new(func, args, kwargs, reverse)), None)
    }

    /// Tie a watching function to this node; its watchers go away with it.
    pub(crate) fn own(&self, function: Function) {
        self.0.owned.borrow_mut().push(function);
    }

    /// Subscribe the node to its dependencies.
    ///
    /// The root additionally watches the parameters of its root function so
    /// that the shared value is recomputed once per change.
    fn setup_invalidations(&self) -> Result<()> {
        if self.0.prev.is_none() && self.0.root_fn.is_some() {
            for (owner, names) in group_by_owner(&self.0.fn_params) {
                let weak = Rc::downgrade(&self.0);
                let callback: WatchCallback = Rc::new(move |_: &[Event]| -> Result<Effect> {
                    if let Some(node) = weak.upgrade() {
                        node.shared.dirty.set(true);
                        node.state.borrow_mut().error = None;
                    }
                    Ok(Effect::Immediate(Value::None))
                });
                let watcher = owner.param().watch_internal(
                    "invalidate_obj",
                    callback,
                    WatcherMode::Args,
                    names,
                    "value",
                    true,
                    false,
                    -1,
                )?;
                self.0.watchers.borrow_mut().push(watcher);
            }
        }

        for (owner, names) in group_by_owner(&self.0.internal_params) {
            let weak = Rc::downgrade(&self.0);
            let callback: WatchCallback = Rc::new(move |events: &[Event]| -> Result<Effect> {
                let Some(node) = weak.upgrade() else {
                    return Ok(Effect::Immediate(Value::None));
                };
                let own_trigger = node.trigger.as_ref().is_some_and(|trigger| {
                    events
                        .iter()
                        .all(|e| e.obj.as_ref().is_some_and(|obj| obj.ptr_eq(trigger)))
                });
                if !own_trigger {
                    let mut state = node.state.borrow_mut();
                    state.dirty = true;
                    state.error = None;
                }
                Ok(Effect::Immediate(Value::None))
            });
            let watcher = owner.param().watch_internal(
                "invalidate_current",
                callback,
                WatcherMode::Args,
                names,
                "value",
                true,
                false,
                -1,
            )?;
            self.0.watchers.borrow_mut().push(watcher);
        }
        trace!(
            depth = self.0.depth,
            watchers = self.0.watchers.borrow().len(),
            "rx node subscribed"
        );
        Ok(())
    }

    /// Value of the root, evaluating the root function when it is stale.
    fn root_value(&self) -> Result<Value> {
        let shared = &self.0.shared;
        let stale = shared.dirty.get() || shared.value.borrow().is_none();
        if stale {
            if let Some(f) = &self.0.root_fn {
                let value = eval_function_with_deps(f)?;
                *shared.value.borrow_mut() = Some(value);
                shared.dirty.set(false);
            }
        }
        let value = shared.value.borrow().clone();
        Ok(value.unwrap_or(Value::Undefined))
    }

    fn evaluate(&self) -> Result<Value> {
        let obj = match &self.0.prev {
            Some(prev) => prev.resolve()?,
            None => self.root_value()?,
        };
        if obj.is_undefined() {
            self.0.state.borrow_mut().current = Value::Undefined;
            return Err(ParamError::Skip);
        }
        let Some(operation) = &self.0.operation else {
            return Ok(obj);
        };
        let result = operation.eval(&obj)?;
        if let Value::Task(handle) = &result {
            if let Some(task) = handle.take() {
                self.lazy_resolve(task)?;
                return Err(ParamError::Skip);
            }
        }
        Ok(result)
    }

    fn resolve(&self) -> Result<Value> {
        if let Some(err) = &self.0.failure {
            return Err(err.clone());
        }
        let (error, dirty) = {
            let state = self.0.state.borrow();
            (state.error.clone(), state.dirty)
        };
        if let Some(err) = error {
            return Err(err);
        }

        let current = if dirty || self.0.shared.dirty.get() {
            match self.evaluate() {
                Ok(value) => {
                    let mut state = self.0.state.borrow_mut();
                    state.current = value.clone();
                    state.dirty = false;
                    value
                }
                Err(ParamError::Skip) => {
                    let mut state = self.0.state.borrow_mut();
                    state.dirty = false;
                    return Ok(state.current.clone());
                }
                Err(err) => {
                    debug!(depth = self.0.depth, error = %err, "rx evaluation failed");
                    self.0.state.borrow_mut().error = Some(err.clone());
                    return Err(err);
                }
            }
        } else {
            self.0.state.borrow().current.clone()
        };

        match &self.0.method {
            Some(method) => Ok(current.get_attr(method).unwrap_or(current)),
            None => Ok(current),
        }
    }

    /// Hand a task produced by this node's step to the executor.
    ///
    /// Each produced value replaces the node's value and raises the node's
    /// trigger, as long as no newer task was scheduled in the meantime.
    fn lazy_resolve(&self, task: Task) -> Result<()> {
        let Some(trigger) = self.0.trigger.clone() else {
            return Err(ParamError::TypeError(format!(
                "'{}' produced a task outside an asynchronous step",
                task.name()
            )));
        };
        let id = task.id();
        self.0.state.borrow_mut().current_task = Some(id);
        let weak = Rc::downgrade(&self.0);
        let label = format!("rx {}", task.name());
        trace!(task = ?id, depth = self.0.depth, "scheduling asynchronous rx step");
        self.0.context.schedule(
            &label,
            Box::new(move || {
                task.run(&mut |value| {
                    let Some(node) = weak.upgrade() else {
                        return Ok(false);
                    };
                    if node.state.borrow().current_task != Some(id) {
                        trace!(task = ?id, "discarding result of stale rx task");
                        return Ok(false);
                    }
                    node.state.borrow_mut().current = value;
                    trigger.param().trigger(&["value"])?;
                    Ok(true)
                })
            }),
        )
    }

    /// Current value of the expression, computing it if needed.
    pub fn value(&self) -> Result<Value> {
        self.resolve()
    }

    /// Replace the value of a root wrapping a concrete value.
    ///
    /// # Errors
    ///
    /// [`ParamError::ReadOnlyExpression`] on derived nodes and on roots
    /// following a parameter or function.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        if self.0.prev.is_some() {
            return Err(ParamError::ReadOnlyExpression(
                "The value of a derived expression cannot be set. Ensure you set the value \
                 on the root node wrapping a concrete value."
                    .to_string(),
            ));
        }
        let Some(wrapper) = &self.0.wrapper else {
            return Err(ParamError::ReadOnlyExpression(
                "Setting the value of a reactive expression is only supported if it wraps a \
                 concrete value. An expression wrapping a parameter or another dynamic \
                 reference cannot be updated."
                    .to_string(),
            ));
        };
        let value = resolve_value(&value.into(), true)?;
        wrapper.set("object", value)
    }

    /// Parameters external watchers of this expression have to observe.
    pub fn params(&self) -> Vec<ParamRef> {
        self.0.params.clone()
    }

    /// Number of steps between this node and its root.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn is_root(&self) -> bool {
        self.0.prev.is_none()
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn ptr_eq(&self, other: &Rx) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A dependent function returning the current value, usable wherever a
    /// reference is accepted.
    pub fn as_function(&self) -> Function {
        let rx = self.clone();
        let current = Function::new("rx", move |_, _| rx.value());
        current.with_dependencies(DependencyInfo {
            dependencies: self.params().into_iter().map(Dependency::Param).collect(),
            kw: BTreeMap::new(),
            watch: false,
            on_init: false,
            queued: false,
            inject: false,
        })
    }

    /// The namespace of pipeline helpers.
    pub fn rx(&self) -> ReactiveOps<'_> {
        ReactiveOps::new(self)
    }

    /// Access an attribute of the current value.
    ///
    /// The access stays pending: reading the node yields the attribute, while
    /// [`call`](Rx::call) calls it as a method of the value.
    pub fn attr(&self, name: impl Into<String>) -> Rx {
        self.accessor_base().derive(None, Some(name.into()))
    }

    /// Call the current value, or the pending method of an [`attr`](Rx::attr) node.
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Rx {
        let operation = |func| Some(Operation::new(func, args.to_vec(), kwargs.clone(), false));
        match (&self.0.method, &self.0.prev) {
            (Some(method), Some(prev)) => prev.derive(operation(OpFn::Method(method.clone())), None),
            _ => self.derive(operation(OpFn::Call), None),
        }
    }

    /// Call method `name` of the current value.
    pub fn call_method(&self, name: impl Into<String>, args: &[Value]) -> Rx {
        self.attr(name).call(args, &Kwargs::new())
    }

    /// Index into the current value.
    pub fn get_item(&self, key: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::GetItem, key)
    }

    /// Apply `value <op> other`.
    pub fn binary(&self, op: BinaryOp, other: impl Into<Value>) -> Rx {
        self.apply_operator(OpFn::Binary(op), vec![other.into()], Kwargs::new(), false)
    }

    /// Apply `other <op> value`.
    pub fn binary_reflected(&self, op: BinaryOp, other: impl Into<Value>) -> Rx {
        self.apply_operator(OpFn::Binary(op), vec![other.into()], Kwargs::new(), true)
    }

    pub fn unary(&self, op: UnaryOp) -> Rx {
        self.apply_operator(OpFn::Unary(op), Vec::new(), Kwargs::new(), false)
    }

    /// Apply a universal function with the current value as first input.
    pub fn apply_ufunc(&self, ufunc: Ufunc, args: &[Value]) -> Rx {
        self.apply_operator(OpFn::Ufunc(ufunc), args.to_vec(), Kwargs::new(), false)
    }

    pub fn lt(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Ge, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn eq(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Eq, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn ne(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn floordiv(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::FloorDiv, other)
    }

    pub fn pow(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::Pow, other)
    }

    pub fn divmod(&self, other: impl Into<Value>) -> Rx {
        self.binary(BinaryOp::DivMod, other)
    }

    pub fn abs(&self) -> Rx {
        self.unary(UnaryOp::Abs)
    }

    pub fn round(&self) -> Rx {
        self.unary(UnaryOp::Round)
    }

    pub fn floor(&self) -> Rx {
        self.unary(UnaryOp::Floor)
    }

    pub fn ceil(&self) -> Rx {
        self.unary(UnaryOp::Ceil)
    }

    pub fn trunc(&self) -> Rx {
        self.unary(UnaryOp::Trunc)
    }

    pub fn to_str(&self) -> Rx {
        self.unary(UnaryOp::Str)
    }

    /// Split the expression into one node per item.
    ///
    /// Iterators are advanced lazily, one `next` step per node, until they
    /// are exhausted. Other sequences produce one indexing node per item of
    /// the current value.
    pub fn unpack(&self) -> Result<Vec<Rx>> {
        let current = self.value()?;
        if let Value::Iter(_) = current {
            let mut items = Vec::new();
            loop {
                let item = self.unary(UnaryOp::Next);
                match item.value() {
                    Ok(_) => items.push(item),
                    Err(ParamError::StopIteration) => return Ok(items),
                    Err(err) => return Err(err),
                }
            }
        }
        let len = length(&current).map_err(|_| {
            ParamError::TypeError(format!(
                "cannot unpack non-iterable {} object.",
                current.type_name()
            ))
        })?;
        let list = self.unary(UnaryOp::List);
        Ok((0..len).map(|i| list.get_item(i)).collect())
    }
}

impl fmt::Debug for Rx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rx")
            .field("depth", &self.0.depth)
            .field("operation", &self.0.operation.as_ref().map(|op| op.func.name()))
            .field("method", &self.0.method)
            .field("dirty", &self.0.state.borrow().dirty)
            .finish()
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Value>> std::ops::$trait<T> for Rx {
            type Output = Rx;
            fn $method(self, rhs: T) -> Rx {
                self.binary($op, rhs)
            }
        }

        impl<T: Into<Value>> std::ops::$trait<T> for &Rx {
            type Output = Rx;
            fn $method(self, rhs: T) -> Rx {
                self.binary($op, rhs)
            }
        }

        binary_operator!(@reflected $trait, $method, $op, i64);
        binary_operator!(@reflected $trait, $method, $op, f64);
        binary_operator!(@reflected $trait, $method, $op, Value);
    };
    (@reflected $trait:ident, $method:ident, $op:expr, $lhs:ty) => {
        impl std::ops::$trait<Rx> for $lhs {
            type Output = Rx;
            fn $method(self, rhs: Rx) -> Rx {
                rhs.binary_reflected($op, self)
            }
        }

        impl std::ops::$trait<&Rx> for $lhs {
            type Output = Rx;
            fn $method(self, rhs: &Rx) -> Rx {
                rhs.binary_reflected($op, self)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::TrueDiv);
binary_operator!(Rem, rem, BinaryOp::Mod);
binary_operator!(BitAnd, bitand, BinaryOp::BitAnd);
binary_operator!(BitOr, bitor, BinaryOp::BitOr);
binary_operator!(BitXor, bitxor, BinaryOp::BitXor);
binary_operator!(Shl, shl, BinaryOp::LShift);
binary_operator!(Shr, shr, BinaryOp::RShift);

impl std::ops::Neg for Rx {
    type Output = Rx;
    fn neg(self) -> Rx {
        self.unary(UnaryOp::Neg)
    }
}

impl std::ops::Neg for &Rx {
    type Output = Rx;
    fn neg(self) -> Rx {
        self.unary(UnaryOp::Neg)
    }
}

/// `!` inverts bits of integers and negates booleans.
impl std::ops::Not for Rx {
    type Output = Rx;
    fn not(self) -> Rx {
        self.unary(UnaryOp::Invert)
    }
}

impl std::ops::Not for &Rx {
    type Output = Rx;
    fn not(self) -> Rx {
        self.unary(UnaryOp::Invert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueueExecutor;
    use std::cell::Cell;

    fn counting(calls: &Rc<Cell<usize>>, name: &str, factor: i64) -> Function {
        let calls = calls.clone();
        Function::unary(name, move |v| {
            calls.set(calls.get() + 1);
            Ok(Value::Int(v.as_int().unwrap_or(0) * factor))
        })
    }

    #[test]
    fn test_chained_arithmetic_follows_root() {
        let ctx = Context::new();
        let root = Rx::with_context(5, &ctx);
        let doubled = (&root + 1) * 2;
        let branch = &root + 100;
        assert_eq!(doubled.value().unwrap(), Value::Int(12));

        root.set_value(10).unwrap();
        assert_eq!(doubled.value().unwrap(), Value::Int(22));
        assert_eq!(branch.value().unwrap(), Value::Int(110));
        assert_eq!(doubled.depth(), 2);
        assert!(root.is_root());
    }

    #[test]
    fn test_branches_recompute_independently() {
        let ctx = Context::new();
        let root = Rx::with_context(1, &ctx);
        let left_calls = Rc::new(Cell::new(0));
        let right_calls = Rc::new(Cell::new(0));
        let left = root.rx().pipe(counting(&left_calls, "left", 2), &[]);
        let right = root.rx().pipe(counting(&right_calls, "right", 3), &[]);

        assert_eq!(left_calls.get(), 0);
        assert_eq!(left.value().unwrap(), Value::Int(2));
        assert_eq!(left.value().unwrap(), Value::Int(2));
        assert_eq!(left_calls.get(), 1);

        root.set_value(4).unwrap();
        assert_eq!(right.value().unwrap(), Value::Int(12));
        assert_eq!(left_calls.get(), 1);
        assert_eq!(right_calls.get(), 1);
    }

    #[test]
    fn test_errors_are_cached_until_invalidated() {
        let ctx = Context::new();
        let root = Rx::with_context(0, &ctx);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let invert = Function::unary("invert", move |v| {
            counter.set(counter.get() + 1);
            BinaryOp::TrueDiv.apply(&Value::Int(1), v)
        });
        let node = root.rx().pipe(invert, &[]);

        assert_eq!(node.value().unwrap_err(), ParamError::DivisionByZero);
        assert_eq!(node.value().unwrap_err(), ParamError::DivisionByZero);
        assert_eq!(calls.get(), 1);

        root.set_value(4).unwrap();
        assert_eq!(node.value().unwrap(), Value::Float(0.25));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_root_function_runs_once_per_change() {
        let ctx = Context::new();
        let cls = Class::builder("Source")
            .context(&ctx)
            .param(Parameter::new("a", 1))
            .build()
            .unwrap();
        let source = cls.new_instance().unwrap();
        let a = source.param().get("a").unwrap();
        let calls = Rc::new(Cell::new(0));
        let squared = bind(counting(&calls, "square_input", 1), [&a]).build().unwrap();

        let root = Rx::with_context(squared, &ctx);
        let left = &root + 1;
        let right = &root * 10;
        assert_eq!(left.value().unwrap(), Value::Int(2));
        assert_eq!(right.value().unwrap(), Value::Int(10));
        assert_eq!(calls.get(), 1);

        source.set("a", 3).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(right.value().unwrap(), Value::Int(30));
        assert_eq!(left.value().unwrap(), Value::Int(4));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_parameter_root() {
        let ctx = Context::new();
        let cls = Class::builder("Source")
            .context(&ctx)
            .param(Parameter::new("a", 2))
            .build()
            .unwrap();
        let source = cls.new_instance().unwrap();
        let a = source.param().get("a").unwrap();
        let node = Rx::with_context(&a, &ctx).pow(2);
        assert_eq!(node.value().unwrap(), Value::Int(4));
        source.set("a", 3).unwrap();
        assert_eq!(node.value().unwrap(), Value::Int(9));
        assert_eq!(node.params(), vec![a]);
    }

    #[test]
    fn test_set_value_only_on_wrapping_roots() {
        let ctx = Context::new();
        let root = Rx::with_context(1, &ctx);
        let derived = &root + 1;
        assert!(matches!(
            derived.set_value(3),
            Err(ParamError::ReadOnlyExpression(_))
        ));

        let cls = Class::builder("Source")
            .context(&ctx)
            .param(Parameter::new("a", 2))
            .build()
            .unwrap();
        let a = cls.new_instance().unwrap().param().get("a").unwrap();
        assert!(matches!(
            Rx::with_context(&a, &ctx).set_value(3),
            Err(ParamError::ReadOnlyExpression(_))
        ));
    }

    #[test]
    fn test_integer_division_of_minimum_value() {
        let ctx = Context::new();
        let root = Rx::with_context(i64::MIN, &ctx);
        let quotient = root.floordiv(-1);
        let remainder = &root % -1;
        assert!(matches!(quotient.value().unwrap(), Value::Float(_)));
        assert_eq!(remainder.value().unwrap(), Value::Int(0));
        root.set_value(-7).unwrap();
        assert_eq!(quotient.value().unwrap(), Value::Int(7));
    }

    #[test]
    fn test_reflected_operators() {
        let ctx = Context::new();
        let root = Rx::with_context(3, &ctx);
        assert_eq!((10 - &root).value().unwrap(), Value::Int(7));
        assert_eq!((2.0 / &root).value().unwrap(), Value::Float(2.0 / 3.0));
        assert_eq!((-&root).value().unwrap(), Value::Int(-3));
        assert_eq!(root.gt(2).value().unwrap(), Value::Bool(true));
        assert_eq!(root.eq(&root).value().unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_pending_attribute_and_method_call() {
        let ctx = Context::new();
        let root = Rx::with_context(" hello ", &ctx);
        let upper = root.call_method("strip", &[]).call_method("upper", &[]);
        assert_eq!(upper.value().unwrap(), Value::from("HELLO"));

        let method = root.attr("upper");
        assert!(method.value().unwrap().is_callable());
        let length = method.call(&[], &Kwargs::new()).rx().len();
        assert_eq!(length.value().unwrap(), Value::Int(7));

        root.set_value("abc").unwrap();
        assert_eq!(upper.value().unwrap(), Value::from("ABC"));
    }

    #[test]
    fn test_operand_expressions_are_tracked() {
        let ctx = Context::new();
        let a = Rx::with_context(1, &ctx);
        let b = Rx::with_context(2, &ctx);
        let sum = &a + &b;
        assert_eq!(sum.value().unwrap(), Value::Int(3));
        b.set_value(5).unwrap();
        assert_eq!(sum.value().unwrap(), Value::Int(6));
        assert_eq!(sum.params().len(), 2);
    }

    #[test]
    fn test_unpack_sequence_and_iterator() {
        let ctx = Context::new();
        let root = Rx::with_context(vec![Value::Int(1), Value::Int(2)], &ctx);
        let items = root.unpack().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].value().unwrap(), Value::Int(2));
        root.set_value(vec![Value::Int(7), Value::Int(8)]).unwrap();
        assert_eq!(items[0].value().unwrap(), Value::Int(7));

        let iter = Rx::with_context(
            Value::Iter(crate::value::ValueIter::new(vec![Value::Int(4), Value::Int(5)])),
            &ctx,
        );
        let values: Vec<Value> = iter
            .unpack()
            .unwrap()
            .iter()
            .map(|item| item.value().unwrap())
            .collect();
        assert_eq!(values, vec![Value::Int(4), Value::Int(5)]);

        assert!(matches!(
            Rx::with_context(3, &ctx).unpack(),
            Err(ParamError::TypeError(_))
        ));
    }

    #[test]
    fn test_asynchronous_step_keeps_latest_task() {
        let ctx = Context::new();
        let executor = QueueExecutor::new();
        ctx.set_executor(executor.clone());
        let root = Rx::with_context(1, &ctx);
        let fetch = Function::coroutine("fetch", |args, _| {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) * 10))
        });
        let node = root.rx().pipe(fetch, &[]);

        assert_eq!(node.value().unwrap(), Value::Undefined);
        root.set_value(2).unwrap();
        assert_eq!(node.value().unwrap(), Value::Undefined);
        assert_eq!(executor.pending(), 2);

        executor.run_pending().unwrap();
        assert_eq!(node.value().unwrap(), Value::Int(20));
        let next = &node + 1;
        assert_eq!(next.value().unwrap(), Value::Int(21));
    }

    #[test]
    fn test_asynchronous_step_without_executor_is_an_error() {
        let ctx = Context::new();
        let root = Rx::with_context(1, &ctx);
        let fetch = Function::coroutine("fetch", |args, _| Ok(args[0].clone()));
        let node = root.rx().pipe(fetch, &[]);
        assert!(matches!(
            node.value(),
            Err(ParamError::NoAsyncExecutor { .. })
        ));
    }

    #[test]
    fn test_generator_root_streams_through_executor() {
        let ctx = Context::new();
        let executor = QueueExecutor::new();
        ctx.set_executor(executor.clone());
        let counter = Function::generator("counter", |_, _| Ok((1..=3).map(Value::Int)));
        let root = Rx::with_context(counter, &ctx);
        let node = &root * 2;
        assert_eq!(node.value().unwrap(), Value::Undefined);
        executor.run_pending().unwrap();
        assert_eq!(node.value().unwrap(), Value::Int(6));
    }

    #[test]
    fn test_dropped_nodes_release_their_watchers() {
        let ctx = Context::new();
        let root = Rx::with_context(1, &ctx);
        let wrapper = root.params()[0].clone();
        let before = wrapper.owner().param().watchers("object", "value").len();
        {
            let _derived = (&root + 1) * 2;
            assert!(wrapper.owner().param().watchers("object", "value").len() > before);
        }
        assert_eq!(wrapper.owner().param().watchers("object", "value").len(), before);
    }
}
