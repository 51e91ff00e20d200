//! Conversion between live namespace values and their durable JSON form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::{Dict, RangeValue, Value, MAX_CONTAINER_DEPTH};

/// The saveable subset of snippet values.
///
/// Stored adjacently tagged, e.g. `{"type": "int", "value": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<StoredValue>),
    Tuple(Vec<StoredValue>),
    /// Key/value pairs; JSON objects only allow string keys.
    Dict(Vec<(StoredValue, StoredValue)>),
    Range { start: i64, stop: i64, step: i64 },
}

/// Why one namespace entry could not be saved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("values of type '{0}' cannot be saved")]
    Unsupported(String),
    #[error("non-finite float {0} cannot be saved")]
    NonFinite(String),
    #[error("containers nested deeper than {} levels (or cyclic) cannot be saved", MAX_CONTAINER_DEPTH)]
    TooDeep,
    #[error("dict key of type '{0}' cannot be saved")]
    DictKey(String),
}

impl StoredValue {
    pub fn capture(value: &Value) -> Result<Self, SerializationError> {
        capture_at(value, 0)
    }

    /// Rebuilds a live value. Fails on shapes a snippet could never have
    /// produced, such as a zero range step or an unhashable dict key.
    pub fn into_value(self) -> Result<Value, String> {
        Ok(match self {
            StoredValue::None => Value::None,
            StoredValue::Bool(b) => Value::Bool(b),
            StoredValue::Int(i) => Value::Int(i),
            StoredValue::Float(f) => Value::Float(f),
            StoredValue::Str(s) => Value::from(s),
            StoredValue::List(items) => Value::list(into_values(items)?),
            StoredValue::Tuple(items) => Value::tuple(into_values(items)?),
            StoredValue::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = k.into_value()?;
                    if !key.is_hashable() {
                        return Err(format!("unhashable dict key of type '{}'", key.type_name()));
                    }
                    dict.insert(key, v.into_value()?);
                }
                Value::dict(dict)
            }
            StoredValue::Range { start, stop, step } => {
                Value::Range(RangeValue::new(start, stop, step).map_err(|e| e.summary())?)
            }
        })
    }
}

fn into_values(items: Vec<StoredValue>) -> Result<Vec<Value>, String> {
    items.into_iter().map(StoredValue::into_value).collect()
}

fn capture_at(value: &Value, depth: usize) -> Result<StoredValue, SerializationError> {
    if depth > MAX_CONTAINER_DEPTH {
        return Err(SerializationError::TooDeep);
    }
    let captured = match value {
        Value::None => StoredValue::None,
        Value::Bool(b) => StoredValue::Bool(*b),
        Value::Int(i) => StoredValue::Int(*i),
        Value::Float(f) if f.is_finite() => StoredValue::Float(*f),
        Value::Float(_) => return Err(SerializationError::NonFinite(value.repr())),
        Value::Str(s) => StoredValue::Str(s.to_string()),
        Value::List(items) => StoredValue::List(capture_items(&items.borrow(), depth)?),
        Value::Tuple(items) => StoredValue::Tuple(capture_items(items, depth)?),
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut pairs = Vec::with_capacity(dict.len());
            for (k, v) in dict.iter() {
                let key = capture_at(k, depth + 1).map_err(|e| match e {
                    SerializationError::TooDeep => e,
                    _ => SerializationError::DictKey(k.type_name()),
                })?;
                pairs.push((key, capture_at(v, depth + 1)?));
            }
            StoredValue::Dict(pairs)
        }
        Value::Range(r) => StoredValue::Range {
            start: r.start,
            stop: r.stop,
            step: r.step,
        },
        other => return Err(SerializationError::Unsupported(other.type_name())),
    };
    Ok(captured)
}

fn capture_items(items: &[Value], depth: usize) -> Result<Vec<StoredValue>, SerializationError> {
    items.iter().map(|v| capture_at(v, depth + 1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn adjacent_tagging_on_the_wire() {
        let stored = StoredValue::capture(&Value::Int(5)).unwrap();
        assert_eq!(
            serde_json::to_value(&stored).unwrap(),
            serde_json::json!({"type": "int", "value": 5})
        );
        let none = serde_json::to_value(StoredValue::None).unwrap();
        assert_eq!(none, serde_json::json!({"type": "none"}));
    }

    #[test]
    fn nested_containers_survive() {
        let mut dict = Dict::new();
        dict.insert(Value::from("k"), Value::tuple(vec![Value::Int(1), Value::Float(2.5)]));
        dict.insert(Value::Int(3), Value::list(vec![]));
        let value = Value::dict(dict);

        let stored = StoredValue::capture(&value).unwrap();
        let back = stored.into_value().unwrap();
        assert_eq!(back.repr(), value.repr());
    }

    #[test]
    fn self_referencing_list_is_rejected() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(StoredValue::capture(&list), Err(SerializationError::TooDeep));
        // break the cycle so the test does not leak
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn nan_and_functions_are_unsupported() {
        assert!(matches!(
            StoredValue::capture(&Value::Float(f64::NAN)),
            Err(SerializationError::NonFinite(_))
        ));
        assert_eq!(
            StoredValue::capture(&Value::Stream(crate::lang::StreamKind::Stdout)),
            Err(SerializationError::Unsupported("TextIOWrapper".to_string()))
        );
    }

    #[test]
    fn zero_step_range_does_not_decode() {
        let bad = StoredValue::Range { start: 0, stop: 3, step: 0 };
        assert!(bad.into_value().is_err());
    }
}
