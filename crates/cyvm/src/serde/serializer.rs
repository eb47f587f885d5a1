//! Serializer for converting VM values to serde_json::Value
//!
//! - none -> null
//! - boolean -> boolean
//! - number -> number (integral values as integers)
//! - string -> string
//! - list -> array
//! - function -> error
use crate::heap::{HeapObject, ObjectId};
use crate::value::{Value, ValueKind};
use crate::vm::Vm;
use ahash::AHashSet;
use serde_json::{Number, Value as JsonValue};

/// Same bound serde_json applies when parsing.
pub const MAX_DEPTH: usize = 128;

pub fn to_value(vm: &Vm, value: Value) -> Result<JsonValue, String> {
    let mut visited = AHashSet::new();
    to_value_internal(vm, value, &mut visited, 0)
}

pub fn to_string(vm: &Vm, value: Value, pretty: bool) -> Result<String, String> {
    let json_value = to_value(vm, value)?;

    if pretty {
        serde_json::to_string_pretty(&json_value)
            .map_err(|e| format!("Failed to serialize to JSON: {}", e))
    } else {
        serde_json::to_string(&json_value).map_err(|e| format!("Failed to serialize to JSON: {}", e))
    }
}

fn to_value_internal(
    vm: &Vm,
    value: Value,
    visited: &mut AHashSet<ObjectId>,
    depth: usize,
) -> Result<JsonValue, String> {
    match value.kind() {
        ValueKind::None => Ok(JsonValue::Null),
        ValueKind::Bool(b) => Ok(JsonValue::Bool(b)),
        ValueKind::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.007_199_254_740_992e15 {
                Ok(JsonValue::Number(Number::from(n as i64)))
            } else {
                Number::from_f64(n)
                    .map(JsonValue::Number)
                    .ok_or_else(|| format!("Invalid number: {}", n))
            }
        }
        ValueKind::Interrupt => Err("Can't serialize an interrupt value".to_string()),
        ValueKind::Object(id) => match vm.heap.get(id) {
            None => Err("Can't serialize a released value".to_string()),
            Some(HeapObject::String(s)) => Ok(JsonValue::String(s.to_string())),
            Some(HeapObject::List(items)) => {
                if !visited.insert(id) {
                    return Err("Circular reference detected in list".to_string());
                }
                if depth >= MAX_DEPTH {
                    return Err("nesting too deep".to_string());
                }
                let array = items
                    .iter()
                    .map(|item| to_value_internal(vm, *item, visited, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                visited.remove(&id);
                Ok(JsonValue::Array(array))
            }
            Some(HeapObject::Function(_)) | Some(HeapObject::Native(_)) => {
                Err("Can't serialize a function".to_string())
            }
        },
    }
}
