//! Callables flowing through the dependency system
//!
//! A [`Function`] is a reference-counted callable taking positional values
//! and keyword values. Besides plain synchronous functions it models the
//! deferred kinds the reactive core has to treat specially:
//!
//! - coroutines, whose body only runs once an executor drives the returned [`Task`],
//! - generators and async generators, whose [`Task`] emits a stream of values.
//!
//! Calling a deferred function never runs its body; it returns a
//! [`Value::Task`] which the dispatch engine turns into an [`Effect::Deferred`]
//! and hands to the [`AsyncExecutor`](crate::context::AsyncExecutor).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::Context;
use crate::depends::DependencyInfo;
use crate::error::{ParamError, Result};
use crate::events::Watcher;
use crate::parameterized::Parameterized;
use crate::value::Value;

/// Keyword arguments.
pub type Kwargs = BTreeMap<String, Value>;

pub(crate) type Body = dyn Fn(&[Value], &Kwargs) -> Result<Value>;

/// How a function produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Sync,
    Coroutine,
    Generator,
    AsyncGenerator,
}

impl FunctionKind {
    /// Whether calling a function of this kind yields a [`Task`] instead of a value.
    pub fn is_deferred(self) -> bool {
        !matches!(self, FunctionKind::Sync)
    }
}

struct FunctionInner {
    name: String,
    kind: FunctionKind,
    body: Rc<Body>,
    dinfo: Option<DependencyInfo>,
    owner: Option<Parameterized>,
    watchers: RefCell<Vec<Watcher>>,
}

/// A callable value, optionally carrying dependency metadata.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    /// Create a synchronous function.
    ///
    /// # Examples
    ///
    /// ```
    /// use param_rs::{Function, Kwargs, Value};
    ///
    /// let add_one = Function::new("add_one", |args, _| {
    ///     Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1))
    /// });
    /// assert_eq!(add_one.call(&[Value::Int(1)], &Kwargs::new()).unwrap(), Value::Int(2));
    /// ```
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value> + 'static,
    {
        Self::from_parts(name.into(), FunctionKind::Sync, Rc::new(f))
    }

    /// Create a synchronous function of a single positional argument.
    pub fn unary<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        Self::new(name, move |args, _| match args.first() {
            Some(value) => f(value),
            None => Err(ParamError::TypeError(
                "function missing 1 required positional argument".to_string(),
            )),
        })
    }

    /// Create a coroutine function. The body runs when the returned task is driven.
    pub fn coroutine<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value> + 'static,
    {
        let name = name.into();
        let body = deferred_body(name.clone(), Rc::new(f));
        Self::from_parts(name, FunctionKind::Coroutine, body)
    }

    /// Create a generator function. The returned task emits every produced item.
    pub fn generator<F, I>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<I> + 'static,
        I: IntoIterator<Item = Value> + 'static,
    {
        Self::streaming(name.into(), FunctionKind::Generator, f)
    }

    /// Create an asynchronous generator function.
    pub fn async_generator<F, I>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<I> + 'static,
        I: IntoIterator<Item = Value> + 'static,
    {
        Self::streaming(name.into(), FunctionKind::AsyncGenerator, f)
    }

    fn streaming<F, I>(name: String, kind: FunctionKind, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<I> + 'static,
        I: IntoIterator<Item = Value> + 'static,
    {
        let f = Rc::new(f);
        let task_name = name.clone();
        let body = move |args: &[Value], kwargs: &Kwargs| -> Result<Value> {
            let f = f.clone();
            let args = args.to_vec();
            let kwargs = kwargs.clone();
            Ok(Value::Task(TaskHandle::new(Task::stream(
                task_name.clone(),
                move || f(&args, &kwargs),
            ))))
        };
        Self::from_parts(name, kind, Rc::new(body))
    }

    pub(crate) fn from_parts(name: String, kind: FunctionKind, body: Rc<Body>) -> Self {
        Function(Rc::new(FunctionInner {
            name,
            kind,
            body,
            dinfo: None,
            owner: None,
            watchers: RefCell::new(Vec::new()),
        }))
    }

    /// Copy of this function carrying the given dependency metadata.
    pub fn with_dependencies(&self, dinfo: DependencyInfo) -> Function {
        Function(Rc::new(FunctionInner {
            name: self.0.name.clone(),
            kind: self.0.kind,
            body: self.0.body.clone(),
            dinfo: Some(dinfo),
            owner: self.0.owner.clone(),
            watchers: RefCell::new(Vec::new()),
        }))
    }

    pub(crate) fn bound_method(
        name: String,
        kind: FunctionKind,
        owner: Parameterized,
        dinfo: Option<DependencyInfo>,
        body: Rc<Body>,
    ) -> Function {
        Function(Rc::new(FunctionInner {
            name,
            kind,
            body,
            dinfo,
            owner: Some(owner),
            watchers: RefCell::new(Vec::new()),
        }))
    }

    pub(crate) fn body(&self) -> Rc<Body> {
        self.0.body.clone()
    }

    /// Call the function.
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        (self.0.body)(args, kwargs)
    }

    /// Call the function without arguments.
    pub fn call0(&self) -> Result<Value> {
        self.call(&[], &Kwargs::new())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.0.kind
    }

    pub fn is_deferred(&self) -> bool {
        self.0.kind.is_deferred()
    }

    /// Dependency metadata attached by `depends` or `bind`.
    pub fn dependencies(&self) -> Option<&DependencyInfo> {
        self.0.dinfo.as_ref()
    }

    /// The instance a bound method belongs to.
    pub fn owner(&self) -> Option<&Parameterized> {
        self.0.owner.as_ref()
    }

    pub(crate) fn add_watchers(&self, watchers: Vec<Watcher>) {
        self.0.watchers.borrow_mut().extend(watchers);
    }

    /// Watchers installed on behalf of this function by `depends(watch=true)` or `bind(watch=true)`.
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.watchers.borrow().clone()
    }

    /// Unregister every watcher installed on behalf of this function.
    pub fn dispose(&self) -> Result<()> {
        let watchers: Vec<Watcher> = self.0.watchers.borrow_mut().drain(..).collect();
        for watcher in watchers {
            if let Some(owner) = watcher.owner() {
                owner.param().unwatch(&watcher)?;
            }
        }
        Ok(())
    }

    /// Unregister the watchers of this function without reporting failures.
    ///
    /// Used while tearing down, where a registry may still be borrowed by an
    /// ongoing dispatch; such registries are skipped.
    pub(crate) fn release(&self) {
        let watchers: Vec<Watcher> = match self.0.watchers.try_borrow_mut() {
            Ok(mut watchers) => watchers.drain(..).collect(),
            Err(_) => return,
        };
        for watcher in watchers {
            let Some(owner) = watcher.owner() else {
                continue;
            };
            if let Ok(mut registry) = owner.state().watchers.try_borrow_mut() {
                registry.remove(&watcher);
            };
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Wrap a synchronous body so that calling it returns a task running the body.
pub(crate) fn deferred_body(name: String, f: Rc<Body>) -> Rc<Body> {
    Rc::new(move |args: &[Value], kwargs: &Kwargs| -> Result<Value> {
        let f = f.clone();
        let args = args.to_vec();
        let kwargs = kwargs.clone();
        Ok(Value::Task(TaskHandle::new(Task::new(
            name.clone(),
            move || f(&args, &kwargs),
        ))))
    })
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("has_dependencies", &self.0.dinfo.is_some())
            .finish()
    }
}

/// Identity of a scheduled task, used to discard results of stale tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receiver of the values a task produces. Returning `Ok(false)` stops the task.
pub type Sink<'a> = dyn FnMut(Value) -> Result<bool> + 'a;

type TaskBody = Box<dyn FnOnce(&mut Sink<'_>) -> Result<()>>;

/// Deferred computation producing zero or more values.
pub struct Task {
    id: TaskId,
    name: String,
    body: TaskBody,
}

impl Task {
    /// A task producing the single value returned by `f`.
    ///
    /// Returning [`ParamError::Skip`] produces no value.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<Value> + 'static,
    {
        Self::from_fn(name, move |sink| match f() {
            Ok(value) => sink(value).map(|_| ()),
            Err(ParamError::Skip) => Ok(()),
            Err(err) => Err(err),
        })
    }

    /// A task emitting every item of the iterator returned by `f`.
    pub fn stream<F, I>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<I> + 'static,
        I: IntoIterator<Item = Value>,
    {
        Self::from_fn(name, move |sink| {
            for item in f()? {
                if !sink(item)? {
                    break;
                }
            }
            Ok(())
        })
    }

    /// A task driving `sink` directly.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(&mut Sink<'_>) -> Result<()> + 'static,
    {
        Task {
            id: TaskId::next(),
            name: name.into(),
            body: Box::new(f),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the task to completion, handing each produced value to `sink`.
    pub fn run(self, sink: &mut Sink<'_>) -> Result<()> {
        (self.body)(sink)
    }

    /// Run the task and collect every produced value.
    pub fn collect(self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        self.run(&mut |value| {
            values.push(value);
            Ok(true)
        })?;
        Ok(values)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// A task stored inside a [`Value`]. The task can be taken out exactly once.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    task: Rc<RefCell<Option<Task>>>,
}

impl TaskHandle {
    pub fn new(task: Task) -> Self {
        TaskHandle {
            id: task.id(),
            task: Rc::new(RefCell::new(Some(task))),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Take the task out, leaving the handle empty.
    pub fn take(&self) -> Option<Task> {
        self.task.borrow_mut().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.task.borrow().is_none()
    }

    pub fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Rc::ptr_eq(&self.task, &other.task)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({:?})", self.id)
    }
}

/// Outcome of invoking a callback: either a value available now or a task to
/// hand to the executor.
#[derive(Debug)]
pub enum Effect {
    Immediate(Value),
    Deferred(Task),
}

impl Effect {
    /// Classify a callback result.
    pub fn from_value(value: Value) -> Effect {
        if let Value::Task(handle) = &value {
            if let Some(task) = handle.take() {
                return Effect::Deferred(task);
            }
        }
        Effect::Immediate(value)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Effect::Deferred(_))
    }

    /// Complete the effect: immediate values are dropped, deferred tasks are
    /// scheduled on the context's executor with their output discarded.
    pub(crate) fn settle(self, ctx: &Context, what: &str) -> Result<()> {
        match self {
            Effect::Immediate(_) => Ok(()),
            Effect::Deferred(task) => {
                ctx.schedule(what, Box::new(move || task.run(&mut |_| Ok(true))))
            }
        }
    }
}
