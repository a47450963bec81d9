//! Binding arguments to functions.
//!
//! [`bind`] is partial application over references: positional and keyword
//! arguments may be plain values, parameters, dependent functions or rx
//! expressions. Every call of the bound function substitutes references with
//! their current values, and the bound function carries the union of their
//! dependencies so that it can itself be depended on, watched or used as the
//! root of an rx expression.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::depends::resolver::eval_function_with_deps;
use crate::depends::{depends, Dependency};
use crate::error::{ParamError, Result};
use crate::function::{Function, FunctionKind, Kwargs};
use crate::value::Value;

/// Builder for a bound function, see [`bind`].
#[derive(Clone, Debug)]
pub struct Bind {
    function: Value,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    watch: bool,
}

/// Bind positional arguments to `function`.
///
/// `function` is usually a [`Function`], but a parameter or rx expression
/// holding a function works too; the current function is then called.
///
/// # Examples
///
/// ```
/// use param_rs::{bind, Class, Function, Parameter, Value};
///
/// let cls = Class::builder("Example").param(Parameter::new("a", 1)).build().unwrap();
/// let example = cls.new_instance().unwrap();
/// let a = example.param().get("a").unwrap();
///
/// let add_one = Function::unary("add_one", |x| Ok(Value::Int(x.as_int().unwrap_or(0) + 1)));
/// let bound = bind(&add_one, [&a]).build().unwrap();
/// assert_eq!(bound.call0().unwrap(), Value::Int(2));
///
/// example.set("a", 5).unwrap();
/// assert_eq!(bound.call0().unwrap(), Value::Int(6));
/// ```
pub fn bind<F, I, T>(function: F, args: I) -> Bind
where
    F: Into<Value>,
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    Bind {
        function: function.into(),
        args: args.into_iter().map(Into::into).collect(),
        kwargs: BTreeMap::new(),
        watch: false,
    }
}

/// The dependency a bound argument contributes, if any.
fn dependency_of(value: &Value) -> Option<Dependency> {
    match value {
        Value::Param(p) => Some(Dependency::Param(p.clone())),
        Value::Rx(rx) => Some(Dependency::from(rx)),
        Value::Function(f) if f.dependencies().is_some() => Some(Dependency::Function(f.clone())),
        _ => None,
    }
}

/// Current value of a bound argument.
fn current(value: &Value) -> Result<Value> {
    match value {
        Value::Param(p) => p.value(),
        Value::Rx(rx) => rx.value(),
        Value::Function(f) if f.dependencies().is_some() => eval_function_with_deps(f),
        other => Ok(other.clone()),
    }
}

impl Bind {
    /// Bind a keyword argument.
    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Call the bound function whenever one of its dependencies changes.
    ///
    /// The watchers keep the bound arguments alive until
    /// [`Function::dispose`] is called on the result.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Build the bound function.
    ///
    /// Arguments passed when calling the result are appended after the bound
    /// positional arguments and merged into the bound keyword arguments.
    pub fn build(self) -> Result<Function> {
        let (name, kind) = match &self.function {
            Value::Function(f) => (f.name().to_string(), f.kind()),
            Value::Param(p) => (p.name().to_string(), FunctionKind::Sync),
            Value::Rx(_) => ("rx".to_string(), FunctionKind::Sync),
            other => {
                return Err(ParamError::TypeError(format!(
                    "'{}' object is not callable",
                    other.type_name()
                )))
            }
        };

        let mut declaration = depends(Vec::<Dependency>::new()).watch(self.watch);
        if let Some(dep) = dependency_of(&self.function) {
            declaration = declaration.kw("__fn", dep);
        }
        for (i, arg) in self.args.iter().enumerate() {
            if let Some(dep) = dependency_of(arg) {
                declaration = declaration.kw(format!("__arg{}", i), dep);
            }
        }
        for (name, arg) in &self.kwargs {
            match dependency_of(arg) {
                Some(dep @ Dependency::Param(_)) => declaration = declaration.kw(name.clone(), dep),
                Some(dep) => declaration = declaration.kw(format!("__kwarg_{}", name), dep),
                None => {}
            }
        }

        let Bind {
            function,
            args,
            kwargs,
            ..
        } = self;
        let body = move |extra: &[Value], extra_kw: &Kwargs| -> Result<Value> {
            let mut combined = args.iter().map(current).collect::<Result<Vec<_>>>()?;
            combined.extend(extra.iter().cloned());
            let mut combined_kw = Kwargs::new();
            for (name, arg) in &kwargs {
                combined_kw.insert(name.clone(), current(arg)?);
            }
            for (name, value) in extra_kw {
                if !name.starts_with("__") {
                    combined_kw.insert(name.clone(), value.clone());
                }
            }
            let target = match &function {
                Value::Param(p) => p.value()?,
                Value::Rx(rx) => rx.value()?,
                other => other.clone(),
            };
            target.call(&combined, &combined_kw)
        };
        let inner = Function::from_parts(name, kind, Rc::new(body));
        declaration.function(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, QueueExecutor};
    use crate::parameterized::{Class, Parameter};
    use std::cell::RefCell;

    fn example() -> Class {
        Class::builder("Example")
            .param(Parameter::new("a", 1))
            .param(Parameter::new("b", 2))
            .param(Parameter::new("f", Value::None))
            .build()
            .unwrap()
    }

    fn add() -> Function {
        Function::new("add", |args, kwargs| {
            let b = kwargs.get("b").or(args.get(1)).and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(args[0].as_int().unwrap_or(0) + b))
        })
    }

    #[test]
    fn test_bind_substitutes_current_values() {
        let obj = example().new_instance().unwrap();
        let a = obj.param().get("a").unwrap();
        let b = obj.param().get("b").unwrap();

        let bound = bind(add(), [&a]).kw("b", &b).build().unwrap();
        assert_eq!(bound.call0().unwrap(), Value::Int(3));
        obj.param().update([("a", 10), ("b", 20)]).unwrap();
        assert_eq!(bound.call0().unwrap(), Value::Int(30));

        let deps = bound.dependencies().unwrap();
        assert!(deps.kw.contains_key("__arg0"));
        assert!(deps.kw.contains_key("b"));
    }

    #[test]
    fn test_bind_plain_values_and_extra_arguments() {
        let bound = bind(add(), [Value::Int(4)]).build().unwrap();
        assert!(bound.dependencies().unwrap().kw.is_empty());
        assert_eq!(
            bound.call(&[Value::Int(5)], &Kwargs::new()).unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn test_nested_bind() {
        let obj = example().new_instance().unwrap();
        let a = obj.param().get("a").unwrap();
        let double = Function::unary("double", |x| Ok(Value::Int(x.as_int().unwrap_or(0) * 2)));
        let inner = bind(&double, [&a]).build().unwrap();
        let outer = bind(&double, [&inner]).build().unwrap();
        assert_eq!(outer.call0().unwrap(), Value::Int(4));
        obj.set("a", 3).unwrap();
        assert_eq!(outer.call0().unwrap(), Value::Int(12));
    }

    #[test]
    fn test_bind_watch_fires_on_change() {
        let obj = example().new_instance().unwrap();
        let a = obj.param().get("a").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let record = Function::unary("record", move |x| {
            log.borrow_mut().push(x.clone());
            Ok(Value::None)
        });
        let bound = bind(&record, [&a]).watch(true).build().unwrap();
        obj.set("a", 7).unwrap();
        obj.set("a", 7).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(7)]);
        bound.dispose().unwrap();
        obj.set("a", 8).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_bind_to_parameter_holding_function() {
        let obj = example().new_instance().unwrap();
        obj.set("f", add()).unwrap();
        let f = obj.param().get("f").unwrap();
        let bound = bind(&f, [Value::Int(1), Value::Int(1)]).build().unwrap();
        assert_eq!(bound.call0().unwrap(), Value::Int(2));
        assert!(bound.dependencies().unwrap().kw.contains_key("__fn"));

        let triple = Function::unary("triple", |x| Ok(Value::Int(x.as_int().unwrap_or(0) * 3)));
        obj.set("f", triple).unwrap();
        assert_eq!(bound.call0().unwrap(), Value::Int(3));
    }

    #[test]
    fn test_bind_coroutine_needs_executor() {
        let ctx = Context::new();
        let cls = Class::builder("Async")
            .context(&ctx)
            .param(Parameter::new("a", 1))
            .build()
            .unwrap();
        let obj = cls.new_instance().unwrap();
        let a = obj.param().get("a").unwrap();
        let fetch = Function::coroutine("fetch", |args, _| Ok(args[0].clone()));
        let _bound = bind(&fetch, [&a]).watch(true).build().unwrap();

        let err = obj.set("a", 2).unwrap_err();
        assert!(matches!(err, ParamError::NoAsyncExecutor { .. }));

        let executor = QueueExecutor::new();
        ctx.set_executor(executor.clone());
        obj.set("a", 3).unwrap();
        assert_eq!(executor.pending(), 1);
        assert_eq!(executor.run_pending().unwrap(), 1);
    }
}
