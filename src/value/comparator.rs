//! Deep equality used to decide whether `onlychanged` watchers fire.
//!
//! Numbers, strings, bytes and `None` compare with `==`, sequences compare
//! element-wise after a kind and length check, mappings compare by keys and
//! recursively equal values and arrays compare by shape and elements.
//! Everything else is reported as *not equal*: an unknown value kind
//! produces an extra firing rather than a silently dropped change.
//!
//! Embedders can extend the comparator with [`Comparator::register`]; a
//! registered equality is consulted before the builtin rules.

use std::fmt;
use std::rc::Rc;

use super::Value;

/// Custom equality. Returns `None` when it does not apply to the given pair.
pub type Equality = Rc<dyn Fn(&Value, &Value, &Comparator) -> Option<bool>>;

#[derive(Clone, Default)]
pub struct Comparator {
    equalities: Vec<Equality>,
}

impl Comparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional equality.
    ///
    /// # Examples
    ///
    /// ```
    /// use param_rs::value::{Comparator, Opaque, Value};
    ///
    /// let mut comparator = Comparator::new();
    /// let a = Value::Opaque(Opaque::new("Point", (1, 2)));
    /// let b = Value::Opaque(Opaque::new("Point", (1, 2)));
    /// assert!(!comparator.is_equal(&a, &b));
    ///
    /// comparator.register(|a, b, _| match (a, b) {
    ///     (Value::Opaque(x), Value::Opaque(y)) => Some(
    ///         x.downcast_ref::<(i32, i32)>().is_some()
    ///             && x.downcast_ref::<(i32, i32)>() == y.downcast_ref::<(i32, i32)>(),
    ///     ),
    ///     _ => None,
    /// });
    /// assert!(comparator.is_equal(&a, &b));
    /// ```
    pub fn register<F>(&mut self, equality: F)
    where
        F: Fn(&Value, &Value, &Comparator) -> Option<bool> + 'static,
    {
        self.equalities.push(Rc::new(equality));
    }

    /// Number of registered custom equalities.
    pub fn registered(&self) -> usize {
        self.equalities.len()
    }

    /// Whether `a` and `b` are considered equal.
    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        for equality in &self.equalities {
            if let Some(result) = equality(a, b, self) {
                return result;
            }
        }
        match (a, b) {
            (x, y) if x.is_number() && y.is_number() => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::None, Value::None) => true,
            (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
                self.compare_sequence(x, y)
            }
            (Value::Map(x), Value::Map(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        y.get(key)
                            .map(|other| self.is_equal(value, other))
                            .unwrap_or(false)
                    })
            }
            (Value::Array(x), Value::Array(y)) => x.shape() == y.shape() && x == y,
            _ => false,
        }
    }

    fn compare_sequence(&self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.is_equal(x, y))
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparator")
            .field("registered", &self.equalities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use ndarray::array;
    use std::collections::BTreeMap;

    #[test]
    fn test_scalars() {
        let cmp = Comparator::new();
        assert!(cmp.is_equal(&Value::Int(1), &Value::Int(1)));
        assert!(cmp.is_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!cmp.is_equal(&Value::Int(1), &Value::Int(2)));
        assert!(cmp.is_equal(&Value::None, &Value::None));
        assert!(!cmp.is_equal(&Value::Int(1), &Value::from("1")));
        assert!(!cmp.is_equal(&Value::Undefined, &Value::Undefined));
    }

    #[test]
    fn test_sequences_need_same_kind_and_length() {
        let cmp = Comparator::new();
        let list = Value::from(vec![1, 2]);
        let tuple = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        assert!(cmp.is_equal(&list, &Value::from(vec![1, 2])));
        assert!(!cmp.is_equal(&list, &tuple));
        assert!(!cmp.is_equal(&list, &Value::from(vec![1, 2, 3])));
    }

    #[test]
    fn test_mappings() {
        let cmp = Comparator::new();
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), Value::from(vec![1.0, 2.0]));
        let mut b = a.clone();
        assert!(cmp.is_equal(&Value::Map(a.clone()), &Value::Map(b.clone())));
        b.insert("y".to_string(), Value::None);
        assert!(!cmp.is_equal(&Value::Map(a), &Value::Map(b)));
    }

    #[test]
    fn test_arrays() {
        let cmp = Comparator::new();
        let a = Value::from(array![1.0, 2.0]);
        assert!(cmp.is_equal(&a, &Value::from(array![1.0, 2.0])));
        assert!(!cmp.is_equal(&a, &Value::from(array![1.0, 3.0])));
    }

    #[test]
    fn test_unknown_kinds_are_not_equal() {
        let cmp = Comparator::new();
        let f = Value::Function(Function::new("f", |_, _| Ok(Value::None)));
        assert!(!cmp.is_equal(&f, &f.clone()));
    }

    #[test]
    fn test_registered_equality_takes_precedence() {
        let mut cmp = Comparator::new();
        cmp.register(|a, b, _| match (a, b) {
            (Value::Float(x), Value::Float(y)) => Some((x - y).abs() < 1e-9),
            _ => None,
        });
        assert_eq!(cmp.registered(), 1);
        assert!(cmp.is_equal(&Value::Float(0.1 + 0.2), &Value::Float(0.3)));
        assert!(cmp.is_equal(&Value::Int(2), &Value::Int(2)));
    }
}
