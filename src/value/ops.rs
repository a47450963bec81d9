//! Operator evaluation on [`Value`]s
//!
//! Integer arithmetic stays integral, falling back to floats on overflow.
//! True division always produces a float while floor division and modulo
//! round towards negative infinity. Arrays combine elementwise with
//! broadcasting.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use super::{Value, ValueIter};
use crate::error::{ParamError, Result};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
    DivMod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `rhs in lhs`
    Contains,
    GetItem,
    /// Short-circuit `and`: `lhs` if falsy, else `rhs`.
    And,
    /// Short-circuit `or`: `lhs` if truthy, else `rhs`.
    Or,
}

/// Unary operators and builtin single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Abs,
    Invert,
    Not,
    Bool,
    Len,
    Str,
    Round,
    Floor,
    Ceil,
    Trunc,
    List,
    Iter,
    Next,
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> ParamError {
    ParamError::TypeError(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

/// `None` when the quotient does not fit, which only happens for
/// `i64::MIN // -1`.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Remainder with the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

impl BinaryOp {
    /// Operator symbol (or function name) used in messages.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::TrueDiv => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::DivMod => "divmod()",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Contains => "in",
            BinaryOp::GetItem => "[]",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Evaluate `lhs <op> rhs`.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value> {
        match self {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::TrueDiv
            | BinaryOp::FloorDiv
            | BinaryOp::Mod
            | BinaryOp::Pow => arithmetic(self, lhs, rhs),
            BinaryOp::LShift
            | BinaryOp::RShift
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor => bitwise(self, lhs, rhs),
            BinaryOp::DivMod => Ok(Value::Tuple(vec![
                arithmetic(BinaryOp::FloorDiv, lhs, rhs)?,
                arithmetic(BinaryOp::Mod, lhs, rhs)?,
            ])),
            BinaryOp::Eq | BinaryOp::Ne => equality(self, lhs, rhs),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(self, lhs, rhs),
            BinaryOp::Contains => contains(lhs, rhs).map(Value::Bool),
            BinaryOp::GetItem => get_item(lhs, rhs),
            BinaryOp::And => Ok(if lhs.truthy()? { rhs.clone() } else { lhs.clone() }),
            BinaryOp::Or => Ok(if lhs.truthy()? { lhs.clone() } else { rhs.clone() }),
        }
    }
}

fn array_operand(value: &Value) -> Option<std::result::Result<&ArrayD<f64>, f64>> {
    match value {
        Value::Array(array) => Some(Ok(array)),
        other => other.as_float().map(Err),
    }
}

/// Elementwise combination with broadcasting. `None` when neither side is an array.
pub(crate) fn array_binary<F>(lhs: &Value, rhs: &Value, f: F) -> Option<Result<Value>>
where
    F: Fn(f64, f64) -> f64,
{
    if !matches!(lhs, Value::Array(_)) && !matches!(rhs, Value::Array(_)) {
        return None;
    }
    let (a, b) = match (array_operand(lhs), array_operand(rhs)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Some(Err(ParamError::TypeError(format!(
                "unsupported operand types for array operation: '{}' and '{}'",
                lhs.type_name(),
                rhs.type_name()
            ))))
        }
    };
    let result = match (a, b) {
        (Ok(a), Ok(b)) => {
            if a.shape() == b.shape() {
                Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)))
            } else if let Some(b) = b.broadcast(a.raw_dim()) {
                Ok(Zip::from(a).and(&b).map_collect(|&x, &y| f(x, y)))
            } else if let Some(a) = a.broadcast(b.raw_dim()) {
                Ok(Zip::from(&a).and(b).map_collect(|&x, &y| f(x, y)))
            } else {
                Err(ParamError::ValueError(format!(
                    "operands could not be broadcast together with shapes {:?} {:?}",
                    a.shape(),
                    b.shape()
                )))
            }
        }
        (Ok(a), Err(s)) => Ok(a.mapv(|x| f(x, s))),
        (Err(s), Ok(b)) => Ok(b.mapv(|y| f(s, y))),
        (Err(_), Err(_)) => unreachable!("one operand is an array"),
    };
    Some(result.map(Value::Array))
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let elementwise = match op {
        BinaryOp::Add => array_binary(lhs, rhs, |x, y| x + y),
        BinaryOp::Sub => array_binary(lhs, rhs, |x, y| x - y),
        BinaryOp::Mul => array_binary(lhs, rhs, |x, y| x * y),
        BinaryOp::TrueDiv => array_binary(lhs, rhs, |x, y| x / y),
        BinaryOp::FloorDiv => array_binary(lhs, rhs, |x, y| (x / y).floor()),
        BinaryOp::Mod => array_binary(lhs, rhs, float_mod),
        BinaryOp::Pow => array_binary(lhs, rhs, f64::powf),
        _ => None,
    };
    if let Some(result) = elementwise {
        return result;
    }

    match (num(lhs), num(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_arithmetic(op, a, b),
        (Some(a), Some(b)) => {
            let to_f = |n: Num| match n {
                Num::Int(i) => i as f64,
                Num::Float(f) => f,
            };
            float_arithmetic(op, to_f(a), to_f(b))
        }
        _ => sequence_arithmetic(op, lhs, rhs),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let overflow = |checked: Option<i64>, fallback: f64| -> Result<Value> {
        Ok(checked.map(Value::Int).unwrap_or(Value::Float(fallback)))
    };
    match op {
        BinaryOp::Add => overflow(a.checked_add(b), a as f64 + b as f64),
        BinaryOp::Sub => overflow(a.checked_sub(b), a as f64 - b as f64),
        BinaryOp::Mul => overflow(a.checked_mul(b), a as f64 * b as f64),
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(ParamError::DivisionByZero);
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(ParamError::DivisionByZero);
            }
            overflow(floor_div(a, b), (a as f64 / b as f64).floor())
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(ParamError::DivisionByZero);
            }
            Ok(Value::Int(floor_mod(a, b)))
        }
        BinaryOp::Pow => {
            if b >= 0 {
                let checked = u32::try_from(b).ok().and_then(|e| a.checked_pow(e));
                overflow(checked, (a as f64).powf(b as f64))
            } else {
                Ok(Value::Float((a as f64).powf(b as f64)))
            }
        }
        _ => Err(ParamError::TypeError(format!(
            "unsupported integer operation {}",
            op.symbol()
        ))),
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(ParamError::DivisionByZero)
        }
        BinaryOp::TrueDiv => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => float_mod(a, b),
        BinaryOp::Pow => a.powf(b),
        _ => {
            return Err(ParamError::TypeError(format!(
                "unsupported float operation {}",
                op.symbol()
            )))
        }
    };
    Ok(Value::Float(value))
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Vec<T> {
    let times = times.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn sequence_arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::Bytes(a), Value::Bytes(b)) => {
            Ok(Value::Bytes([a.as_slice(), b.as_slice()].concat()))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => Ok(Value::List([a.as_slice(), b.as_slice()].concat())),
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple([a.as_slice(), b.as_slice()].concat()))
        }
        (BinaryOp::Mul, Value::Str(s), n) | (BinaryOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            Ok(Value::Str(s.repeat(n.as_int().unwrap_or(0).max(0) as usize)))
        }
        (BinaryOp::Mul, Value::List(items), n) | (BinaryOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::List(repeat(items, n.as_int().unwrap_or(0))))
        }
        (BinaryOp::Mul, Value::Tuple(items), n) | (BinaryOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::Tuple(repeat(items, n.as_int().unwrap_or(0))))
        }
        (BinaryOp::Mod, Value::Str(template), arg) => {
            let args: Vec<Value> = match arg {
                Value::Tuple(items) => items.clone(),
                other => vec![other.clone()],
            };
            format_percent(template, &args)
        }
        _ => Err(unsupported(op, lhs, rhs)),
    }
}

/// Minimal `%`-formatting supporting `%s`, `%d`, `%r` and `%%`.
fn format_percent(template: &str, args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec @ ('s' | 'd' | 'r')) => {
                let arg = args.next().ok_or_else(|| {
                    ParamError::TypeError("not enough arguments for format string".to_string())
                })?;
                match spec {
                    'r' => out.push_str(&arg.repr()),
                    'd' => out.push_str(&arg.as_float().map(|f| (f.trunc() as i64).to_string()).ok_or_else(
                        || ParamError::TypeError(format!("%d format: a number is required, not {}", arg.type_name())),
                    )?),
                    _ => out.push_str(&arg.to_string()),
                }
            }
            other => {
                return Err(ParamError::ValueError(format!(
                    "unsupported format character {:?}",
                    other
                )))
            }
        }
    }
    if args.next().is_some() {
        return Err(ParamError::TypeError(
            "not all arguments converted during string formatting".to_string(),
        ));
    }
    Ok(Value::Str(out))
}

fn bitwise(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (op, lhs, rhs) {
        (BinaryOp::BitAnd, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a & *b)),
        (BinaryOp::BitOr, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a | *b)),
        (BinaryOp::BitXor, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a ^ *b)),
        (BinaryOp::BitOr, Value::Map(a), Value::Map(b)) => {
            let mut merged: BTreeMap<String, Value> = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok(Value::Map(merged));
        }
        _ => {}
    }
    let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
        return Err(unsupported(op, lhs, rhs));
    };
    let value = match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::LShift | BinaryOp::RShift if b < 0 => {
            return Err(ParamError::ValueError("negative shift count".to_string()))
        }
        BinaryOp::LShift => u32::try_from(b)
            .ok()
            .and_then(|shift| a.checked_shl(shift))
            .unwrap_or(0),
        BinaryOp::RShift => u32::try_from(b)
            .ok()
            .and_then(|shift| a.checked_shr(shift))
            .unwrap_or(if a < 0 { -1 } else { 0 }),
        _ => return Err(unsupported(op, lhs, rhs)),
    };
    Ok(Value::Int(value))
}

fn equality(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let ne = op == BinaryOp::Ne;
    if let Some(result) = array_binary(lhs, rhs, |x, y| ((x == y) != ne) as u8 as f64) {
        return result;
    }
    Ok(Value::Bool((lhs == rhs) != ne))
}

fn ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_float()?.partial_cmp(&b.as_float()?),
        },
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                if x != y {
                    return ordering(x, y);
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let test = move |order: Ordering| match op {
        BinaryOp::Lt => order == Ordering::Less,
        BinaryOp::Le => order != Ordering::Greater,
        BinaryOp::Gt => order == Ordering::Greater,
        _ => order != Ordering::Less,
    };
    if let Some(result) = array_binary(lhs, rhs, |x, y| {
        x.partial_cmp(&y).map(test).unwrap_or(false) as u8 as f64
    }) {
        return result;
    }
    let incomparable = || {
        ParamError::TypeError(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    };
    if lhs.is_number() && rhs.is_number() {
        // NaN compares false in every direction
        return Ok(Value::Bool(ordering(lhs, rhs).map(test).unwrap_or(false)));
    }
    ordering(lhs, rhs)
        .map(|order| Value::Bool(test(order)))
        .ok_or_else(incomparable)
}

/// Whether `item` is contained in `container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v == item)),
        Value::Map(map) => match item {
            Value::Str(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ParamError::TypeError(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(bytes) => match item {
            Value::Int(i) => Ok(bytes.iter().any(|b| *b as i64 == *i)),
            Value::Bytes(needle) => Ok(needle.is_empty()
                || bytes.windows(needle.len()).any(|w| w == needle.as_slice())),
            other => Err(ParamError::TypeError(format!(
                "a bytes-like object is required, not '{}'",
                other.type_name()
            ))),
        },
        Value::Array(array) => match item.as_float() {
            Some(x) => Ok(array.iter().any(|v| *v == x)),
            None => Ok(false),
        },
        Value::Iter(iter) => {
            while let Some(value) = iter.next_value() {
                if value == *item {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ParamError::TypeError(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Result<usize> {
    let len_i = len as i64;
    let adjusted = if index < 0 { index + len_i } else { index };
    if adjusted < 0 || adjusted >= len_i {
        return Err(ParamError::IndexError("index out of range".to_string()));
    }
    Ok(adjusted as usize)
}

/// `obj[key]`.
pub fn get_item(obj: &Value, key: &Value) -> Result<Value> {
    match (obj, key) {
        (Value::List(items), Value::Slice(slice)) => Ok(Value::List(
            slice.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect(),
        )),
        (Value::Tuple(items), Value::Slice(slice)) => Ok(Value::Tuple(
            slice.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect(),
        )),
        (Value::List(items) | Value::Tuple(items), index) if index.as_int().is_some() => {
            let i = normalize_index(index.as_int().unwrap_or(0), items.len())?;
            Ok(items[i].clone())
        }
        (Value::Str(s), Value::Slice(slice)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice.indices(chars.len())?.into_iter().map(|i| chars[i]).collect(),
            ))
        }
        (Value::Str(s), index) if index.as_int().is_some() => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index.as_int().unwrap_or(0), chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        (Value::Bytes(bytes), index) if index.as_int().is_some() => {
            let i = normalize_index(index.as_int().unwrap_or(0), bytes.len())?;
            Ok(Value::Int(bytes[i] as i64))
        }
        (Value::Map(map), Value::Str(k)) => map
            .get(k)
            .cloned()
            .ok_or_else(|| ParamError::KeyError(format!("'{}'", k))),
        (Value::Map(_), other) => Err(ParamError::KeyError(other.repr())),
        (Value::Array(array), Value::Slice(slice)) => {
            if array.ndim() == 0 {
                return Err(ParamError::IndexError(
                    "too many indices for array: array is 0-dimensional".to_string(),
                ));
            }
            let indices = slice.indices(array.len_of(Axis(0)))?;
            Ok(Value::Array(array.select(Axis(0), &indices)))
        }
        (Value::Array(array), index) if index.as_int().is_some() => {
            if array.ndim() == 0 {
                return Err(ParamError::IndexError(
                    "too many indices for array: array is 0-dimensional".to_string(),
                ));
            }
            let i = normalize_index(index.as_int().unwrap_or(0), array.len_of(Axis(0)))?;
            let sub = array.index_axis(Axis(0), i);
            if sub.ndim() == 0 {
                Ok(Value::Float(sub.iter().next().copied().unwrap_or(f64::NAN)))
            } else {
                Ok(Value::Array(sub.to_owned()))
            }
        }
        (Value::Array(array), Value::Tuple(indices)) => {
            if indices.len() != array.ndim() {
                return Err(ParamError::IndexError(format!(
                    "expected {} indices for array, got {}",
                    array.ndim(),
                    indices.len()
                )));
            }
            let mut position = Vec::with_capacity(indices.len());
            for (axis, index) in indices.iter().enumerate() {
                let index = index.as_int().ok_or_else(|| {
                    ParamError::IndexError("only integers are valid indices".to_string())
                })?;
                position.push(normalize_index(index, array.len_of(Axis(axis)))?);
            }
            array
                .get(IxDyn(&position))
                .copied()
                .map(Value::Float)
                .ok_or_else(|| ParamError::IndexError("index out of range".to_string()))
        }
        _ => Err(ParamError::TypeError(format!(
            "'{}' object is not subscriptable",
            obj.type_name()
        ))),
    }
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Pos => "pos",
            UnaryOp::Abs => "abs",
            UnaryOp::Invert => "invert",
            UnaryOp::Not => "not",
            UnaryOp::Bool => "bool",
            UnaryOp::Len => "len",
            UnaryOp::Str => "str",
            UnaryOp::Round => "round",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Trunc => "trunc",
            UnaryOp::List => "list",
            UnaryOp::Iter => "iter",
            UnaryOp::Next => "next",
        }
    }

    /// Evaluate the operator on `value`.
    pub fn apply(self, value: &Value) -> Result<Value> {
        let bad_operand = || {
            ParamError::TypeError(format!(
                "bad operand type for {}(): '{}'",
                self.name(),
                value.type_name()
            ))
        };
        match self {
            UnaryOp::Neg => match value {
                Value::Array(a) => Ok(Value::Array(a.mapv(|x| -x))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => {
                    let i = other.as_int().ok_or_else(bad_operand)?;
                    Ok(i.checked_neg().map(Value::Int).unwrap_or(Value::Float(-(i as f64))))
                }
            },
            UnaryOp::Pos => match value {
                Value::Array(_) | Value::Float(_) | Value::Int(_) => Ok(value.clone()),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                _ => Err(bad_operand()),
            },
            UnaryOp::Abs => match value {
                Value::Array(a) => Ok(Value::Array(a.mapv(f64::abs))),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => {
                    let i = other.as_int().ok_or_else(bad_operand)?;
                    Ok(i.checked_abs().map(Value::Int).unwrap_or(Value::Float((i as f64).abs())))
                }
            },
            UnaryOp::Invert => match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Int(i) => Ok(Value::Int(!i)),
                _ => Err(bad_operand()),
            },
            UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
            UnaryOp::Bool => Ok(Value::Bool(value.truthy()?)),
            UnaryOp::Len => length(value).map(|n| Value::Int(n as i64)),
            UnaryOp::Str => Ok(Value::Str(value.to_string())),
            UnaryOp::Round | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Trunc => match value {
                Value::Float(f) => {
                    let rounded = match self {
                        UnaryOp::Round => round_half_even(*f),
                        UnaryOp::Floor => f.floor(),
                        UnaryOp::Ceil => f.ceil(),
                        _ => f.trunc(),
                    };
                    if !rounded.is_finite() {
                        return Err(ParamError::ValueError(format!(
                            "cannot convert float {} to integer",
                            f
                        )));
                    }
                    Ok(Value::Int(rounded as i64))
                }
                Value::Array(a) => Ok(Value::Array(match self {
                    UnaryOp::Round => a.mapv(round_half_even),
                    UnaryOp::Floor => a.mapv(f64::floor),
                    UnaryOp::Ceil => a.mapv(f64::ceil),
                    _ => a.mapv(f64::trunc),
                })),
                other => other.as_int().map(Value::Int).ok_or_else(bad_operand),
            },
            UnaryOp::List => to_list(value).map(Value::List),
            UnaryOp::Iter => match value {
                Value::Iter(_) => Ok(value.clone()),
                other => Ok(Value::Iter(ValueIter::new(to_list(other)?))),
            },
            UnaryOp::Next => match value {
                Value::Iter(iter) => iter.next_value().ok_or(ParamError::StopIteration),
                other => Err(ParamError::TypeError(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                ))),
            },
        }
    }
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

/// Length of a container or string.
pub fn length(value: &Value) -> Result<usize> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items.len()),
        Value::Str(s) => Ok(s.chars().count()),
        Value::Bytes(b) => Ok(b.len()),
        Value::Map(map) => Ok(map.len()),
        Value::Array(a) if a.ndim() > 0 => Ok(a.len_of(Axis(0))),
        Value::Array(_) => Err(ParamError::TypeError("len() of unsized object".to_string())),
        other => Err(ParamError::TypeError(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

/// Materialize an iterable value as a list.
pub fn to_list(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|x| Value::Int(*x as i64)).collect()),
        Value::Map(map) => Ok(map.keys().cloned().map(Value::Str).collect()),
        Value::Array(a) if a.ndim() == 1 => Ok(a.iter().copied().map(Value::Float).collect()),
        Value::Array(a) if a.ndim() > 1 => Ok(a
            .axis_iter(Axis(0))
            .map(|sub| Value::Array(sub.to_owned()))
            .collect()),
        Value::Iter(iter) => {
            let mut items = Vec::new();
            while let Some(item) = iter.next_value() {
                items.push(item);
            }
            Ok(items)
        }
        other => Err(ParamError::TypeError(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Slice;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(BinaryOp::Add.apply(&int(2), &int(3)).unwrap(), int(5));
        assert_eq!(BinaryOp::TrueDiv.apply(&int(7), &int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(BinaryOp::FloorDiv.apply(&int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(BinaryOp::FloorDiv.apply(&int(7), &int(-2)).unwrap(), int(-4));
        assert_eq!(BinaryOp::Mod.apply(&int(-7), &int(2)).unwrap(), int(1));
        assert_eq!(BinaryOp::Pow.apply(&int(2), &int(10)).unwrap(), int(1024));
        assert_eq!(BinaryOp::Pow.apply(&int(2), &int(-1)).unwrap(), Value::Float(0.5));
        assert_eq!(
            BinaryOp::DivMod.apply(&int(7), &int(3)).unwrap(),
            Value::Tuple(vec![int(2), int(1)])
        );
        assert_eq!(BinaryOp::Mod.apply(&int(1), &int(0)).unwrap_err(), ParamError::DivisionByZero);
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let result = BinaryOp::Mul.apply(&int(i64::MAX), &int(2)).unwrap();
        assert!(matches!(result, Value::Float(_)));
    }

    #[test]
    fn test_integer_division_at_the_edges() {
        let quotient = BinaryOp::FloorDiv.apply(&int(i64::MIN), &int(-1)).unwrap();
        assert_relative_eq!(quotient.as_float().unwrap(), 9.223372036854775808e18);
        assert_eq!(BinaryOp::Mod.apply(&int(i64::MIN), &int(-1)).unwrap(), int(0));
        assert_eq!(BinaryOp::Mod.apply(&int(7), &int(-2)).unwrap(), int(-1));
        assert_eq!(BinaryOp::Mod.apply(&int(i64::MIN), &int(i64::MAX)).unwrap(), int(i64::MAX - 1));
        match BinaryOp::DivMod.apply(&int(i64::MIN), &int(-1)).unwrap() {
            Value::Tuple(parts) => assert_eq!(parts[1], int(0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_huge_shift_counts() {
        assert_eq!(BinaryOp::LShift.apply(&int(1), &int(1 << 32)).unwrap(), int(0));
        assert_eq!(BinaryOp::RShift.apply(&int(-8), &int(1 << 32)).unwrap(), int(-1));
        assert_eq!(BinaryOp::RShift.apply(&int(8), &int(1 << 32)).unwrap(), int(0));
        assert_eq!(BinaryOp::LShift.apply(&int(1), &int(4)).unwrap(), int(16));
    }

    #[test]
    fn test_float_arithmetic() {
        let result = BinaryOp::Mod.apply(&Value::Float(-1.5), &int(1)).unwrap();
        assert_relative_eq!(result.as_float().unwrap(), 0.5);
        let result = BinaryOp::Mul.apply(&Value::Float(1.5), &Value::Bool(true)).unwrap();
        assert_relative_eq!(result.as_float().unwrap(), 1.5);
    }

    #[test]
    fn test_sequence_arithmetic() {
        let a = Value::from("ab");
        assert_eq!(BinaryOp::Add.apply(&a, &Value::from("c")).unwrap(), Value::from("abc"));
        assert_eq!(BinaryOp::Mul.apply(&a, &int(2)).unwrap(), Value::from("abab"));
        assert_eq!(
            BinaryOp::Add.apply(&Value::from(vec![1]), &Value::from(vec![2])).unwrap(),
            Value::from(vec![1, 2])
        );
        assert_eq!(
            BinaryOp::Mod.apply(&Value::from("x=%d"), &Value::Float(3.7)).unwrap(),
            Value::from("x=3")
        );
        let err = BinaryOp::Sub.apply(&a, &int(1)).unwrap_err();
        assert_eq!(
            err,
            ParamError::TypeError("unsupported operand type(s) for -: 'str' and 'int'".to_string())
        );
    }

    #[test]
    fn test_array_broadcasting() {
        let a = Value::from(array![1.0, 2.0, 3.0]);
        let doubled = BinaryOp::Mul.apply(&a, &int(2)).unwrap();
        assert_eq!(doubled, Value::from(array![2.0, 4.0, 6.0]));

        let reversed = BinaryOp::Sub.apply(&int(10), &a).unwrap();
        assert_eq!(reversed, Value::from(array![9.0, 8.0, 7.0]));

        let matrix = Value::Array(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn());
        let summed = BinaryOp::Add.apply(&matrix, &a).unwrap();
        assert_eq!(
            summed,
            Value::Array(array![[2.0, 4.0, 6.0], [5.0, 7.0, 9.0]].into_dyn())
        );

        let bad = BinaryOp::Add.apply(&a, &Value::from(array![1.0, 2.0]));
        assert!(matches!(bad, Err(ParamError::ValueError(_))));

        let mask = BinaryOp::Gt.apply(&a, &int(1)).unwrap();
        assert_eq!(mask, Value::from(array![0.0, 1.0, 1.0]));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(BinaryOp::Lt.apply(&int(1), &Value::Float(1.5)).unwrap(), Value::Bool(true));
        assert_eq!(
            BinaryOp::Ge.apply(&Value::from("b"), &Value::from("a")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            BinaryOp::Lt.apply(&Value::from(vec![1, 2]), &Value::from(vec![1, 3])).unwrap(),
            Value::Bool(true)
        );
        assert!(BinaryOp::Lt.apply(&int(1), &Value::from("a")).is_err());
        assert_eq!(BinaryOp::Eq.apply(&int(1), &Value::Float(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(BinaryOp::Ne.apply(&int(1), &int(2)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_contains_and_get_item() {
        let list = Value::from(vec![1, 2, 3]);
        assert!(contains(&list, &int(2)).unwrap());
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&int(1), &int(1)).is_err());

        assert_eq!(get_item(&list, &int(-1)).unwrap(), int(3));
        assert_eq!(
            get_item(&list, &Value::from(Slice::new(Value::None, 2, Value::None))).unwrap(),
            Value::from(vec![1, 2])
        );
        assert!(matches!(get_item(&list, &int(5)), Err(ParamError::IndexError(_))));

        let matrix = Value::Array(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        assert_eq!(get_item(&matrix, &int(1)).unwrap(), Value::from(array![3.0, 4.0]));
        assert_eq!(
            get_item(&matrix, &Value::Tuple(vec![int(0), int(1)])).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(BinaryOp::And.apply(&int(0), &int(5)).unwrap(), int(0));
        assert_eq!(BinaryOp::And.apply(&int(1), &int(5)).unwrap(), int(5));
        assert_eq!(BinaryOp::Or.apply(&Value::None, &int(5)).unwrap(), int(5));
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(UnaryOp::Neg.apply(&int(3)).unwrap(), int(-3));
        assert_eq!(UnaryOp::Abs.apply(&Value::Float(-2.5)).unwrap(), Value::Float(2.5));
        assert_eq!(UnaryOp::Invert.apply(&int(0)).unwrap(), int(-1));
        assert_eq!(UnaryOp::Not.apply(&Value::from("")).unwrap(), Value::Bool(true));
        assert_eq!(UnaryOp::Len.apply(&Value::from("héllo")).unwrap(), int(5));
        assert_eq!(UnaryOp::Round.apply(&Value::Float(2.5)).unwrap(), int(2));
        assert_eq!(UnaryOp::Round.apply(&Value::Float(3.5)).unwrap(), int(4));
        assert_eq!(UnaryOp::Floor.apply(&Value::Float(-0.5)).unwrap(), int(-1));
        assert_eq!(UnaryOp::Str.apply(&Value::Float(1.0)).unwrap(), Value::from("1.0"));

        let iter = UnaryOp::Iter.apply(&Value::from(vec![1, 2])).unwrap();
        assert_eq!(UnaryOp::Next.apply(&iter).unwrap(), int(1));
        assert_eq!(UnaryOp::Next.apply(&iter).unwrap(), int(2));
        assert_eq!(UnaryOp::Next.apply(&iter).unwrap_err(), ParamError::StopIteration);
    }
}
