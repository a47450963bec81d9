//! The `rx()` namespace of a reactive expression.
//!
//! Operators that cannot be overloaded in Rust (`and`, `or`,
//! `not`, `in`, `is`) and the pipeline helpers live here, so that they do not
//! collide with the attribute access of the wrapped value.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::bind::bind;
use crate::depends::resolver::{resolve_ref, resolve_value};
use crate::error::{ParamError, Result};
use crate::function::{Function, FunctionKind, Kwargs};
use crate::value::ops::{to_list, BinaryOp, UnaryOp};
use crate::value::Value;

use super::{OpFn, Rx};

/// Helpers operating on an [`Rx`], obtained through [`Rx::rx`].
#[derive(Clone, Copy)]
pub struct ReactiveOps<'a> {
    rx: &'a Rx,
}

impl<'a> ReactiveOps<'a> {
    pub(crate) fn new(rx: &'a Rx) -> Self {
        ReactiveOps { rx }
    }

    fn builtin<F>(&self, name: &'static str, args: Vec<Value>, step: F) -> Rx
    where
        F: Fn(&Value, &[Value], &Kwargs) -> Result<Value> + 'static,
    {
        self.rx
            .apply_operator(OpFn::Builtin(name, Rc::new(step)), args, Kwargs::new(), false)
    }

    /// `value and other`
    pub fn and_(&self, other: impl Into<Value>) -> Rx {
        self.rx.binary(BinaryOp::And, other)
    }

    /// `value or other`
    pub fn or_(&self, other: impl Into<Value>) -> Rx {
        self.rx.binary(BinaryOp::Or, other)
    }

    /// `not value`
    pub fn not_(&self) -> Rx {
        self.rx.unary(UnaryOp::Not)
    }

    pub fn bool(&self) -> Rx {
        self.rx.unary(UnaryOp::Bool)
    }

    pub fn len(&self) -> Rx {
        self.rx.unary(UnaryOp::Len)
    }

    /// `value in other`
    pub fn in_(&self, other: impl Into<Value>) -> Rx {
        self.rx.binary_reflected(BinaryOp::Contains, other)
    }

    /// Identity comparison, `value is other`.
    pub fn is_(&self, other: impl Into<Value>) -> Rx {
        self.builtin("is_", vec![other.into()], |obj, args, _| {
            Ok(Value::Bool(args.first().is_some_and(|o| obj.is_same(o))))
        })
    }

    pub fn is_not(&self, other: impl Into<Value>) -> Rx {
        self.builtin("is_not", vec![other.into()], |obj, args, _| {
            Ok(Value::Bool(!args.first().is_some_and(|o| obj.is_same(o))))
        })
    }

    /// Call `func` with the current value followed by `args`.
    pub fn pipe(&self, func: impl Into<Value>, args: &[Value]) -> Rx {
        self.pipe_with(func, args, &Kwargs::new())
    }

    pub fn pipe_with(&self, func: impl Into<Value>, args: &[Value], kwargs: &Kwargs) -> Rx {
        self.rx
            .apply_operator(OpFn::Apply(func.into()), args.to_vec(), kwargs.clone(), false)
    }

    /// Apply `func` to every item of the current value.
    ///
    /// Coroutine functions are awaited item by item and the whole step is
    /// resolved through the executor.
    ///
    /// # Errors
    ///
    /// [`ParamError::TypeError`] for generator functions.
    pub fn map(&self, func: &Function, args: &[Value]) -> Result<Rx> {
        let func = func.clone();
        let mapper = match func.kind() {
            FunctionKind::Generator | FunctionKind::AsyncGenerator => {
                return Err(ParamError::TypeError(
                    "Cannot map a generator function. Only regular function or coroutine \
                     functions are permitted."
                        .to_string(),
                ))
            }
            FunctionKind::Coroutine => Function::coroutine("map", move |args, kwargs| {
                let (items, extra) = split_items(args)?;
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let output = func.call(&with_item(item, extra), kwargs)?;
                    let value = match &output {
                        Value::Task(handle) => match handle.take() {
                            Some(task) => task.collect()?.pop().unwrap_or(Value::None),
                            None => Value::None,
                        },
                        _ => output,
                    };
                    results.push(value);
                }
                Ok(Value::List(results))
            }),
            FunctionKind::Sync => Function::new("map", move |args, kwargs| {
                let (items, extra) = split_items(args)?;
                items
                    .into_iter()
                    .map(|item| func.call(&with_item(item, extra), kwargs))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }),
        };
        Ok(self.pipe(mapper, args))
    }

    /// Keep the last `n` values of the expression.
    pub fn buffer(&self, n: usize) -> Rx {
        let items = Rc::new(RefCell::new(VecDeque::with_capacity(n)));
        self.builtin("buffer", Vec::new(), move |obj, _, _| {
            let mut items = items.borrow_mut();
            items.push_back(obj.clone());
            while items.len() > n {
                items.pop_front();
            }
            Ok(Value::List(items.iter().cloned().collect()))
        })
    }

    /// An expression emitting the current value only when one of
    /// `dependencies` changes.
    ///
    /// When every dependency is an event parameter, `initial` is returned
    /// until the first event fires.
    pub fn when(&self, dependencies: &[Value], initial: Option<Value>) -> Result<Rx> {
        let mut deps = Vec::new();
        for dep in dependencies {
            deps.extend(resolve_ref(dep, false)?);
        }
        let is_event = deps.iter().all(|p| p.is_event());
        let evaluated = Cell::new(false);
        let source = self.rx.clone();
        let gate = Function::new("when", move |_, _| {
            match &initial {
                Some(initial) if is_event && !evaluated.get() => {
                    evaluated.set(true);
                    Ok(initial.clone())
                }
                _ => source.value(),
            }
        });
        let bound = bind(gate, deps).build()?;
        Ok(Rx::with_context(bound, self.rx.context()))
    }

    /// Reactive ternary: `x` while the value is truthy, `y` otherwise.
    ///
    /// Changes of references inside `x` only matter while the condition
    /// selects `x`, and likewise for `y`.
    pub fn where_(&self, x: impl Into<Value>, y: impl Into<Value>) -> Result<Rx> {
        let (x, y) = (x.into(), y.into());
        let trigger = self
            .rx
            .context()
            .internals()?
            .trigger(false, &self.rx.params())?;

        let mut watching = Vec::new();
        for (branch, refs) in [(true, resolve_ref(&x, true)?), (false, resolve_ref(&y, true)?)] {
            if refs.is_empty() {
                continue;
            }
            let condition = Rc::downgrade(&self.rx.0);
            let trigger = trigger.clone();
            let fire = Function::new("where_trigger", move |_, _| {
                let Some(node) = condition.upgrade() else {
                    return Ok(Value::None);
                };
                if Rx(node).value()?.truthy()? == branch {
                    trigger.param().trigger(&["value"])?;
                }
                Ok(Value::None)
            });
            watching.push(bind(fire, refs).watch(true).build()?);
        }

        let ternary = Function::new("where", move |args, _| {
            let condition = args.first().map_or(Ok(false), Value::truthy)?;
            resolve_value(if condition { &x } else { &y }, true)
        });
        let value = trigger.param().get("value")?;
        let bound = bind(ternary, [Value::Rx(self.rx.clone()), Value::Param(value)]).build()?;
        let result = Rx::with_context(bound, self.rx.context());
        for function in watching {
            result.own(function);
        }
        Ok(result)
    }

    pub fn value(&self) -> Result<Value> {
        self.rx.value()
    }

    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        self.rx.set_value(value)
    }

    /// Call `callback` with the new value whenever the expression changes.
    ///
    /// Coroutine callbacks are scheduled on the executor. Call
    /// [`Function::dispose`] on the result to stop watching.
    pub fn watch(&self, callback: &Function) -> Result<Function> {
        bind(callback, [Value::Rx(self.rx.clone())]).watch(true).build()
    }
}

/// Items of the mapped value and the extra arguments passed along.
fn split_items(args: &[Value]) -> Result<(Vec<Value>, &[Value])> {
    match args.split_first() {
        Some((first, rest)) => Ok((to_list(first)?, rest)),
        None => Err(ParamError::TypeError("map expects a value".to_string())),
    }
}

fn with_item(item: Value, extra: &[Value]) -> Vec<Value> {
    let mut args = Vec::with_capacity(extra.len() + 1);
    args.push(item);
    args.extend_from_slice(extra);
    args
}
