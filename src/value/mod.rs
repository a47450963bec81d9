//! # Dynamic values
//!
//! Parameters, dependency callbacks and reactive expressions all exchange
//! [`Value`]s. The enum covers the plain data kinds (numbers, strings,
//! sequences, mappings, `ndarray` arrays) and the handles of the reactive
//! core itself (objects, classes, parameter references, functions, reactive
//! expressions, tasks), so that a dependency can be stored inside a parameter
//! and discovered again when resolving references.
//!
//! ## Core Components
//!
//! - [`Value`]: the value enum with conversions, attribute access and calls
//! - [`ops`]: evaluation of binary and unary operators
//! - [`comparator`]: the deep-equality comparator behind `onlychanged`
//! - [`json`]: conversions to and from `serde_json`

pub mod comparator;
pub mod json;
pub mod ops;

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use ndarray::{Array1, ArrayD};

use crate::error::{ParamError, Result};
use crate::function::{Function, Kwargs, TaskHandle};
use crate::parameterized::{Class, ParamRef, Parameterized};
use crate::reactive::Rx;

pub use comparator::Comparator;
pub use ops::{BinaryOp, UnaryOp};

/// A `start:stop:step` slice whose bounds may themselves be dynamic values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl Slice {
    pub fn new(start: impl Into<Value>, stop: impl Into<Value>, step: impl Into<Value>) -> Self {
        Slice {
            start: start.into(),
            stop: stop.into(),
            step: step.into(),
        }
    }

    /// Indices selected by this slice on a sequence of length `len`.
    pub fn indices(&self, len: usize) -> Result<Vec<usize>> {
        let bound = |value: &Value, what: &str| -> Result<Option<i64>> {
            match value {
                Value::None | Value::Undefined => Ok(None),
                other => other.as_int().map(Some).ok_or_else(|| {
                    ParamError::TypeError(format!(
                        "slice {} must be an integer or None, not {}",
                        what,
                        other.type_name()
                    ))
                }),
            }
        };
        let step = bound(&self.step, "step")?.unwrap_or(1);
        if step == 0 {
            return Err(ParamError::ValueError("slice step cannot be zero".to_string()));
        }
        let len = len as i64;
        let adjust = |index: i64| -> i64 {
            if index < 0 {
                let index = index + len;
                if index < 0 {
                    if step < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    index
                }
            } else if index >= len {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            } else {
                index
            }
        };
        let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
        let start = bound(&self.start, "start")?.map(adjust).unwrap_or(default_start);
        let stop = bound(&self.stop, "stop")?.map(adjust).unwrap_or(default_stop);

        let mut indices = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            indices.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
        Ok(indices)
    }
}

/// A shared, stateful iterator.
#[derive(Clone)]
pub struct ValueIter(Rc<RefCell<Box<dyn Iterator<Item = Value>>>>);

impl ValueIter {
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        ValueIter(Rc::new(RefCell::new(Box::new(iter.into_iter()))))
    }

    /// Advance the iterator.
    pub fn next_value(&self) -> Option<Value> {
        self.0.borrow_mut().next()
    }

    pub fn ptr_eq(&self, other: &ValueIter) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Arbitrary host data carried through the value system by reference.
#[derive(Clone)]
pub struct Opaque {
    type_name: String,
    value: Rc<dyn Any>,
}

impl Opaque {
    pub fn new<T: Any>(type_name: impl Into<String>, value: T) -> Self {
        Opaque {
            type_name: type_name.into(),
            value: Rc::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    /// Marker for "no value available yet".
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Slice(Box<Slice>),
    Array(ArrayD<f64>),
    Object(Parameterized),
    Class(Class),
    Param(ParamRef),
    Function(Function),
    Rx(Rx),
    Iter(ValueIter),
    Task(TaskHandle),
    Opaque(Opaque),
}

impl Value {
    /// Type name used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Undefined => "Undefined".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::Map(_) => "dict".to_string(),
            Value::Slice(_) => "slice".to_string(),
            Value::Array(_) => "ndarray".to_string(),
            Value::Object(obj) => obj.class().name().to_string(),
            Value::Class(_) => "type".to_string(),
            Value::Param(_) => "Parameter".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::Rx(_) => "rx".to_string(),
            Value::Iter(_) => "iterator".to_string(),
            Value::Task(_) => "task".to_string(),
            Value::Opaque(opaque) => opaque.type_name().to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of booleans and integers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view of any number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Parameterized> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<&ParamRef> {
        match self {
            Value::Param(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_rx(&self) -> Option<&Rx> {
        match self {
            Value::Rx(rx) => Some(rx),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Whether calling this value is possible.
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Class(_))
    }

    /// Truthiness: zero, empty containers, `None` and `false` are falsy.
    ///
    /// Arrays with more than one element have no truth value.
    pub fn truthy(&self) -> Result<bool> {
        match self {
            Value::None | Value::Undefined => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::Bytes(b) => Ok(!b.is_empty()),
            Value::List(items) | Value::Tuple(items) => Ok(!items.is_empty()),
            Value::Map(map) => Ok(!map.is_empty()),
            Value::Array(array) => match array.len() {
                0 => Ok(false),
                1 => Ok(array.iter().next().map(|x| *x != 0.0).unwrap_or(false)),
                _ => Err(ParamError::ValueError(
                    "The truth value of an array with more than one element is ambiguous. \
                     Use a.any() or a.all()"
                        .to_string(),
                )),
            },
            Value::Rx(rx) => rx.value()?.truthy(),
            _ => Ok(true),
        }
    }

    /// Identity comparison.
    ///
    /// Handles (objects, functions, expressions, ...) compare by reference,
    /// plain data compares by value.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => a.ptr_eq(b),
            (Value::Param(a), Value::Param(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Rx(a), Value::Rx(b)) => a.ptr_eq(b),
            (Value::Iter(a), Value::Iter(b)) => a.ptr_eq(b),
            (Value::Task(a), Value::Task(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Bool(_))
            | (Value::Bool(_), Value::Int(_) | Value::Float(_)) => false,
            _ => self == other,
        }
    }

    /// Look up an attribute.
    ///
    /// Objects expose their parameters, methods and plain attributes;
    /// builtin values expose a small set of string and container methods.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        match self {
            Value::Object(obj) => obj.get_attr(name),
            Value::Class(cls) => cls.get(name),
            Value::Param(p) => match name {
                "name" => Ok(Value::Str(p.name().to_string())),
                "owner" => Ok(p.owner().to_value()),
                "value" => p.value(),
                facet => p.facet(facet),
            },
            Value::Str(s) => str_attr(s, name),
            Value::List(items) | Value::Tuple(items) => seq_attr(self, items, name),
            Value::Map(map) => map_attr(map, name),
            Value::Array(array) => array_attr(array, name),
            Value::Int(i) => match name {
                "real" | "numerator" => Ok(Value::Int(*i)),
                "imag" => Ok(Value::Int(0)),
                "denominator" => Ok(Value::Int(1)),
                _ => Err(self.missing_attr(name)),
            },
            Value::Float(f) => {
                let f = *f;
                match name {
                    "real" => Ok(Value::Float(f)),
                    "imag" => Ok(Value::Float(0.0)),
                    "is_integer" => Ok(method(name, move |_, _| {
                        Ok(Value::Bool(f.fract() == 0.0 && f.is_finite()))
                    })),
                    _ => Err(self.missing_attr(name)),
                }
            }
            Value::Function(f) => match name {
                "__name__" => Ok(Value::Str(f.name().to_string())),
                _ => Err(self.missing_attr(name)),
            },
            _ => Err(self.missing_attr(name)),
        }
    }

    /// Look up a dotted attribute path, returning `None` when any hop is missing.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let mut current = self.clone();
        for part in path.split('.') {
            current = current.get_attr(part).ok()?;
        }
        Some(current)
    }

    fn missing_attr(&self, name: &str) -> ParamError {
        ParamError::AttributeNotResolved {
            attr: name.to_string(),
            owner: format!("'{}' object", self.type_name()),
        }
    }

    /// Call this value.
    ///
    /// Functions are invoked directly; calling a class creates an instance
    /// with the keyword arguments as parameter overrides.
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args, kwargs),
            Value::Class(cls) => {
                if !args.is_empty() {
                    return Err(ParamError::TypeError(format!(
                        "{} takes parameter values as keywords only",
                        cls.name()
                    )));
                }
                let overrides: Vec<(String, Value)> =
                    kwargs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Ok(Value::Object(cls.instance(overrides)?))
            }
            _ => Err(ParamError::TypeError(format!(
                "'{}' object is not callable",
                self.type_name()
            ))),
        }
    }

    /// Quoted rendering used inside containers.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            Value::Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
            _ => self.to_string(),
        }
    }
}

fn method<F>(name: &str, f: F) -> Value
where
    F: Fn(&[Value], &Kwargs) -> Result<Value> + 'static,
{
    Value::Function(Function::new(name, f))
}

fn str_arg(args: &[Value], index: usize, method: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(ParamError::TypeError(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
        None => Err(ParamError::TypeError(format!(
            "{}() missing required argument",
            method
        ))),
    }
}

fn str_attr(s: &str, name: &str) -> Result<Value> {
    let s = s.to_string();
    let value = match name {
        "upper" => method(name, move |_, _| Ok(Value::Str(s.to_uppercase()))),
        "lower" => method(name, move |_, _| Ok(Value::Str(s.to_lowercase()))),
        "strip" => method(name, move |_, _| Ok(Value::Str(s.trim().to_string()))),
        "title" => method(name, move |_, _| {
            let mut out = String::with_capacity(s.len());
            let mut start = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    start = false;
                } else {
                    out.push(c);
                    start = true;
                }
            }
            Ok(Value::Str(out))
        }),
        "split" => method(name, move |args, _| {
            let parts: Vec<Value> = match args.first() {
                Some(Value::Str(sep)) => s.split(sep.as_str()).map(Value::from).collect(),
                _ => s.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::List(parts))
        }),
        "startswith" => method(name, move |args, _| {
            Ok(Value::Bool(s.starts_with(&str_arg(args, 0, "startswith")?)))
        }),
        "endswith" => method(name, move |args, _| {
            Ok(Value::Bool(s.ends_with(&str_arg(args, 0, "endswith")?)))
        }),
        "replace" => method(name, move |args, _| {
            let from = str_arg(args, 0, "replace")?;
            let to = str_arg(args, 1, "replace")?;
            Ok(Value::Str(s.replace(&from, &to)))
        }),
        "join" => method(name, move |args, _| {
            let items = args.first().and_then(Value::as_list).ok_or_else(|| {
                ParamError::TypeError("join() argument must be a list or tuple".to_string())
            })?;
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Str(part) => Ok(part.clone()),
                    other => Err(ParamError::TypeError(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Str(parts.join(&s)))
        }),
        _ => {
            return Err(ParamError::AttributeNotResolved {
                attr: name.to_string(),
                owner: "'str' object".to_string(),
            })
        }
    };
    Ok(value)
}

fn seq_attr(seq: &Value, items: &[Value], name: &str) -> Result<Value> {
    let items = items.to_vec();
    let value = match name {
        "count" => method(name, move |args, _| {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Int(items.iter().filter(|v| **v == needle).count() as i64))
        }),
        "index" => method(name, move |args, _| {
            let needle = args.first().cloned().unwrap_or_default();
            items
                .iter()
                .position(|v| *v == needle)
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| {
                    ParamError::ValueError(format!("{} is not in list", needle.repr()))
                })
        }),
        _ => return Err(seq.missing_attr(name)),
    };
    Ok(value)
}

fn map_attr(map: &BTreeMap<String, Value>, name: &str) -> Result<Value> {
    let map = map.clone();
    let value = match name {
        "keys" => method(name, move |_, _| {
            Ok(Value::List(map.keys().cloned().map(Value::Str).collect()))
        }),
        "values" => method(name, move |_, _| Ok(Value::List(map.values().cloned().collect()))),
        "items" => method(name, move |_, _| {
            Ok(Value::List(
                map.iter()
                    .map(|(k, v)| Value::Tuple(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
            ))
        }),
        "get" => method(name, move |args, _| {
            let key = str_arg(args, 0, "get")?;
            Ok(map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or_default()))
        }),
        _ => {
            return Err(ParamError::AttributeNotResolved {
                attr: name.to_string(),
                owner: "'dict' object".to_string(),
            })
        }
    };
    Ok(value)
}

fn array_attr(array: &ArrayD<f64>, name: &str) -> Result<Value> {
    let value = match name {
        "shape" => Value::Tuple(array.shape().iter().map(|d| Value::Int(*d as i64)).collect()),
        "ndim" => Value::Int(array.ndim() as i64),
        "size" => Value::Int(array.len() as i64),
        "T" => Value::Array(array.t().to_owned()),
        "sum" | "mean" | "min" | "max" | "any" | "all" | "tolist" => {
            let array = array.clone();
            let reduction = name.to_string();
            method(name, move |_, _| array_reduce(&array, &reduction))
        }
        _ => {
            return Err(ParamError::AttributeNotResolved {
                attr: name.to_string(),
                owner: "'ndarray' object".to_string(),
            })
        }
    };
    Ok(value)
}

fn array_reduce(array: &ArrayD<f64>, reduction: &str) -> Result<Value> {
    let value = match reduction {
        "sum" => Value::Float(array.sum()),
        "mean" => Value::Float(array.mean().unwrap_or(f64::NAN)),
        "min" | "max" => {
            if array.is_empty() {
                return Err(ParamError::ValueError(format!(
                    "zero-size array to reduction operation {} which has no identity",
                    reduction
                )));
            }
            let fold = if reduction == "min" { f64::min } else { f64::max };
            let init = if reduction == "min" {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            };
            Value::Float(array.iter().copied().fold(init, fold))
        }
        "any" => Value::Bool(array.iter().any(|x| *x != 0.0)),
        "all" => Value::Bool(array.iter().all(|x| *x != 0.0)),
        _ => Value::List(array.iter().copied().map(Value::Float).collect()),
    };
    Ok(value)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Undefined, Value::Undefined) => true,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => a.ptr_eq(b),
            (Value::Param(a), Value::Param(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Rx(a), Value::Rx(b)) => a.ptr_eq(b),
            (Value::Iter(a), Value::Iter(b)) => a.ptr_eq(b),
            (Value::Task(a), Value::Task(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item.repr())?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Undefined => write!(f, "<Undefined>"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "b'{}'", String::from_utf8_lossy(b)),
            Value::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, v.repr())?;
                }
                write!(f, "}}")
            }
            Value::Slice(s) => write!(f, "slice({}, {}, {})", s.start, s.stop, s.step),
            Value::Array(array) => write!(f, "{}", array),
            Value::Object(obj) => write!(f, "{}", obj.name()),
            Value::Class(cls) => write!(f, "<class '{}'>", cls.name()),
            Value::Param(p) => write!(f, "<Parameter {}.{}>", p.owner().name(), p.name()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Rx(_) => write!(f, "<rx>"),
            Value::Iter(_) => write!(f, "<iterator>"),
            Value::Task(task) => write!(f, "<task {:?}>", task.id()),
            Value::Opaque(opaque) => write!(f, "<{}>", opaque.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({:?})", x),
            Value::Bool(b) => write!(f, "Bool({})", b),
            _ => write!(f, "{}", self.repr()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<Slice> for Value {
    fn from(slice: Slice) -> Self {
        Value::Slice(Box::new(slice))
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(array: ArrayD<f64>) -> Self {
        Value::Array(array)
    }
}

impl From<Array1<f64>> for Value {
    fn from(array: Array1<f64>) -> Self {
        Value::Array(array.into_dyn())
    }
}

impl From<Parameterized> for Value {
    fn from(obj: Parameterized) -> Self {
        Value::Object(obj)
    }
}

impl From<&Parameterized> for Value {
    fn from(obj: &Parameterized) -> Self {
        Value::Object(obj.clone())
    }
}

impl From<Class> for Value {
    fn from(cls: Class) -> Self {
        Value::Class(cls)
    }
}

impl From<ParamRef> for Value {
    fn from(p: ParamRef) -> Self {
        Value::Param(p)
    }
}

impl From<&ParamRef> for Value {
    fn from(p: &ParamRef) -> Self {
        Value::Param(p.clone())
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<&Function> for Value {
    fn from(f: &Function) -> Self {
        Value::Function(f.clone())
    }
}

impl From<Rx> for Value {
    fn from(rx: Rx) -> Self {
        Value::Rx(rx)
    }
}

impl From<&Rx> for Value {
    fn from(rx: &Rx) -> Self {
        Value::Rx(rx.clone())
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Str("1".to_string()));
        assert_eq!(Value::None, Value::default());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy().unwrap());
        assert!(!Value::Int(0).truthy().unwrap());
        assert!(Value::Str("x".to_string()).truthy().unwrap());
        assert!(!Value::List(vec![]).truthy().unwrap());
        assert!(Value::from(array![1.0]).truthy().unwrap());
        assert!(Value::from(array![1.0, 2.0]).truthy().is_err());
    }

    #[test]
    fn test_slice_indices() {
        let slice = Slice::new(1, Value::None, Value::None);
        assert_eq!(slice.indices(4).unwrap(), vec![1, 2, 3]);

        let reversed = Slice::new(Value::None, Value::None, -1);
        assert_eq!(reversed.indices(3).unwrap(), vec![2, 1, 0]);

        let negative = Slice::new(-2, Value::None, Value::None);
        assert_eq!(negative.indices(5).unwrap(), vec![3, 4]);

        let zero_step = Slice::new(Value::None, Value::None, 0);
        assert!(zero_step.indices(3).is_err());

        let huge_step = Slice::new(1, Value::None, i64::MAX);
        assert_eq!(huge_step.indices(4).unwrap(), vec![1]);
        let huge_reverse = Slice::new(Value::None, Value::None, i64::MIN);
        assert_eq!(huge_reverse.indices(4).unwrap(), vec![3]);
    }

    #[test]
    fn test_builtin_attributes() {
        let s = Value::from("Hello World");
        let upper = s.get_attr("upper").unwrap();
        assert_eq!(upper.call(&[], &Kwargs::new()).unwrap(), Value::from("HELLO WORLD"));

        let split = s.get_attr("split").unwrap().call(&[], &Kwargs::new()).unwrap();
        assert_eq!(split, Value::from(vec!["Hello", "World"]));

        let array = Value::from(array![1.0, 2.0, 3.0]);
        assert_eq!(array.get_attr("ndim").unwrap(), Value::Int(1));
        let total = array.get_attr("sum").unwrap().call(&[], &Kwargs::new()).unwrap();
        assert_eq!(total, Value::Float(6.0));

        let err = Value::Int(3).get_attr("missing").unwrap_err();
        assert!(matches!(err, ParamError::AttributeNotResolved { .. }));
    }

    #[test]
    fn test_get_path() {
        let mut inner = BTreeMap::new();
        inner.insert("a".to_string(), Value::Int(1));
        let value = Value::Map(inner);
        assert!(value.get_path("keys").is_some());
        assert!(value.get_path("nope.deeper").is_none());
    }

    #[test]
    fn test_display() {
        let value = Value::from(vec![Value::Int(1), Value::from("a"), Value::Float(0.5)]);
        assert_eq!(value.to_string(), "[1, 'a', 0.5]");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn test_call_non_callable() {
        let err = Value::Int(1).call(&[], &Kwargs::new()).unwrap_err();
        assert_eq!(err, ParamError::TypeError("'int' object is not callable".to_string()));
    }
}
