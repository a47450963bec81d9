//! Universal functions.
//!
//! A [`Ufunc`] applies elementwise to `ndarray` arrays and directly to
//! numbers, mirroring the NumPy functions of the same name. Applied to an
//! [`Rx`](super::Rx) through [`Rx::apply_ufunc`](super::Rx::apply_ufunc) the
//! result is a new node, so arrays flow through reactive pipelines like any
//! other value.

use std::fmt;

use crate::error::{ParamError, Result};
use crate::value::ops::{array_binary, BinaryOp};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ufunc {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Log10,
    Sqrt,
    Absolute,
    Negative,
    Square,
    Floor,
    Ceil,
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Maximum,
    Minimum,
}

impl Ufunc {
    pub fn name(self) -> &'static str {
        match self {
            Ufunc::Sin => "sin",
            Ufunc::Cos => "cos",
            Ufunc::Tan => "tan",
            Ufunc::Exp => "exp",
            Ufunc::Log => "log",
            Ufunc::Log10 => "log10",
            Ufunc::Sqrt => "sqrt",
            Ufunc::Absolute => "absolute",
            Ufunc::Negative => "negative",
            Ufunc::Square => "square",
            Ufunc::Floor => "floor",
            Ufunc::Ceil => "ceil",
            Ufunc::Add => "add",
            Ufunc::Subtract => "subtract",
            Ufunc::Multiply => "multiply",
            Ufunc::Divide => "divide",
            Ufunc::Power => "power",
            Ufunc::Maximum => "maximum",
            Ufunc::Minimum => "minimum",
        }
    }

    /// Number of inputs.
    pub fn nin(self) -> usize {
        match self {
            Ufunc::Add
            | Ufunc::Subtract
            | Ufunc::Multiply
            | Ufunc::Divide
            | Ufunc::Power
            | Ufunc::Maximum
            | Ufunc::Minimum => 2,
            _ => 1,
        }
    }

    fn unary_fn(self) -> Option<fn(f64) -> f64> {
        let f: fn(f64) -> f64 = match self {
            Ufunc::Sin => f64::sin,
            Ufunc::Cos => f64::cos,
            Ufunc::Tan => f64::tan,
            Ufunc::Exp => f64::exp,
            Ufunc::Log => f64::ln,
            Ufunc::Log10 => f64::log10,
            Ufunc::Sqrt => f64::sqrt,
            Ufunc::Absolute => f64::abs,
            Ufunc::Negative => |x| -x,
            Ufunc::Square => |x| x * x,
            Ufunc::Floor => f64::floor,
            Ufunc::Ceil => f64::ceil,
            _ => return None,
        };
        Some(f)
    }

    /// Apply to `inputs`, which must hold exactly [`nin`](Ufunc::nin) values.
    pub fn apply(self, inputs: &[Value]) -> Result<Value> {
        if inputs.len() != self.nin() {
            return Err(ParamError::TypeError(format!(
                "{} expects {} input(s), got {}",
                self.name(),
                self.nin(),
                inputs.len()
            )));
        }
        if let Some(f) = self.unary_fn() {
            return self.apply_unary(f, &inputs[0]);
        }
        let (lhs, rhs) = (&inputs[0], &inputs[1]);
        match self {
            Ufunc::Add => BinaryOp::Add.apply(lhs, rhs),
            Ufunc::Subtract => BinaryOp::Sub.apply(lhs, rhs),
            Ufunc::Multiply => BinaryOp::Mul.apply(lhs, rhs),
            Ufunc::Divide => BinaryOp::TrueDiv.apply(lhs, rhs),
            Ufunc::Power => BinaryOp::Pow.apply(lhs, rhs),
            Ufunc::Maximum | Ufunc::Minimum => self.extremum(lhs, rhs),
            _ => Err(ParamError::TypeError(format!("{} is not binary", self.name()))),
        }
    }

    fn apply_unary(self, f: fn(f64) -> f64, value: &Value) -> Result<Value> {
        match value {
            Value::Array(array) => Ok(Value::Array(array.mapv(f))),
            Value::Int(i) if matches!(self, Ufunc::Absolute | Ufunc::Negative | Ufunc::Square) => {
                let result = match self {
                    Ufunc::Absolute => i.checked_abs(),
                    Ufunc::Negative => i.checked_neg(),
                    _ => i.checked_mul(*i),
                };
                Ok(result.map(Value::Int).unwrap_or(Value::Float(f(*i as f64))))
            }
            other => match other.as_float() {
                Some(x) => Ok(Value::Float(f(x))),
                None => Err(ParamError::TypeError(format!(
                    "ufunc '{}' not supported for the input type '{}'",
                    self.name(),
                    other.type_name()
                ))),
            },
        }
    }

    fn extremum(self, lhs: &Value, rhs: &Value) -> Result<Value> {
        let pick: fn(f64, f64) -> f64 = if self == Ufunc::Maximum {
            f64::max
        } else {
            f64::min
        };
        if let Some(result) = array_binary(lhs, rhs, pick) {
            return result;
        }
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if self == Ufunc::Maximum {
                *a.max(b)
            } else {
                *a.min(b)
            })),
            _ => match (lhs.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => Ok(Value::Float(pick(a, b))),
                _ => Err(ParamError::TypeError(format!(
                    "ufunc '{}' not supported for the input types '{}' and '{}'",
                    self.name(),
                    lhs.type_name(),
                    rhs.type_name()
                ))),
            },
        }
    }
}

impl fmt::Display for Ufunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ufunc '{}'>", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::reactive::Rx;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    fn as_vec(value: Value) -> Vec<f64> {
        value.as_array().unwrap().iter().copied().collect()
    }

    #[test]
    fn test_unary_ufuncs_on_arrays() {
        let values = Value::from(array![0.0, 1.0, 4.0]);
        let roots = as_vec(Ufunc::Sqrt.apply(&[values.clone()]).unwrap());
        assert_relative_eq!(roots.as_slice(), [0.0, 1.0, 2.0].as_slice());

        let exp = as_vec(Ufunc::Exp.apply(&[values]).unwrap());
        assert_relative_eq!(exp[1], std::f64::consts::E, epsilon = 1e-12);
    }

    #[test]
    fn test_unary_ufuncs_on_scalars() {
        match Ufunc::Sin.apply(&[Value::Float(std::f64::consts::FRAC_PI_2)]).unwrap() {
            Value::Float(x) => assert_relative_eq!(x, 1.0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Ufunc::Absolute.apply(&[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert!(Ufunc::Log.apply(&[Value::from("x")]).is_err());
        assert!(Ufunc::Log.apply(&[]).is_err());
    }

    #[test]
    fn test_binary_ufuncs_broadcast() {
        let values = Value::from(array![1.0, 5.0, 3.0]);
        let clipped = Ufunc::Minimum.apply(&[values.clone(), Value::Int(2)]).unwrap();
        assert_relative_eq!(as_vec(clipped).as_slice(), [1.0, 2.0, 2.0].as_slice());

        let summed = Ufunc::Add.apply(&[values.clone(), values]).unwrap();
        assert_relative_eq!(as_vec(summed).as_slice(), [2.0, 10.0, 6.0].as_slice());
        assert_eq!(
            Ufunc::Maximum.apply(&[Value::Int(2), Value::Int(7)]).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_ufunc_in_pipeline() {
        let ctx = Context::new();
        let root = Rx::with_context(Value::from(Array1::from(vec![1.0, 2.0])), &ctx);
        let scaled = root.apply_ufunc(Ufunc::Multiply, &[Value::Float(3.0)]);
        assert_relative_eq!(
            as_vec(scaled.value().unwrap()).as_slice(),
            [3.0, 6.0].as_slice()
        );
        root.set_value(Value::from(Array1::from(vec![0.5]))).unwrap();
        assert_relative_eq!(as_vec(scaled.value().unwrap()).as_slice(), [1.5].as_slice());
        assert_eq!(Ufunc::Multiply.to_string(), "<ufunc 'multiply'>");
    }
}
