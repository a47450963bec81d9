//! Conversions between [`Value`] and JSON.
//!
//! Objects serialize as the mapping of their current parameter values,
//! handles without a data representation (functions, expressions, tasks)
//! serialize as their display string.

use ndarray::{ArrayD, Axis};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::Value;
use crate::error::Result;

fn serialize_array<S: Serializer>(array: &ArrayD<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match array.ndim() {
        0 => serializer.serialize_f64(array.iter().next().copied().unwrap_or(f64::NAN)),
        1 => {
            let mut seq = serializer.serialize_seq(Some(array.len()))?;
            for x in array.iter() {
                seq.serialize_element(x)?;
            }
            seq.end()
        }
        _ => {
            let rows: Vec<Value> = array
                .axis_iter(Axis(0))
                .map(|row| Value::Array(row.to_owned()))
                .collect();
            let mut seq = serializer.serialize_seq(Some(rows.len()))?;
            for row in &rows {
                seq.serialize_element(row)?;
            }
            seq.end()
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::None | Value::Undefined => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
            Value::List(items) | Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Slice(slice) => {
                let mut out = serializer.serialize_map(Some(3))?;
                out.serialize_entry("start", &slice.start)?;
                out.serialize_entry("stop", &slice.stop)?;
                out.serialize_entry("step", &slice.step)?;
                out.end()
            }
            Value::Array(array) => serialize_array(array, serializer),
            Value::Object(obj) => {
                let values = obj.param().values();
                let mut out = serializer.serialize_map(Some(values.len()))?;
                for (k, v) in &values {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Class(cls) => serializer.serialize_str(cls.name()),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Value {
    /// Convert to a `serde_json` value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"a": 1, "b": [true, 2.5, null], "c": "x"}));
        let map = value.as_map().unwrap();
        assert_eq!(map["a"], Value::Int(1));
        assert_eq!(
            map["b"],
            Value::List(vec![Value::Bool(true), Value::Float(2.5), Value::None])
        );
        assert_eq!(map["c"], Value::from("x"));
    }

    #[test]
    fn test_to_json() {
        let value = Value::Tuple(vec![Value::Int(1), Value::from("a"), Value::Undefined]);
        assert_eq!(value.to_json().unwrap(), json!([1, "a", null]));

        let matrix = Value::Array(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        assert_eq!(matrix.to_json().unwrap(), json!([[1.0, 2.0], [3.0, 4.0]]));
    }
}
