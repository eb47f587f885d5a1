//! Deserializer for converting serde_json::Value to VM values
//!
//! - null -> none
//! - boolean -> boolean
//! - number -> number
//! - string -> string
//! - array -> list
//! - object -> error (the language has no map type)
use crate::heap::HeapObject;
use crate::value::Value;
use crate::vm::Vm;
use serde_json::Value as JsonValue;
use smol_str::SmolStr;
use super::serializer::MAX_DEPTH;

pub fn from_value(vm: &mut Vm, json_value: &JsonValue) -> Result<Value, String> {
    let value = build(vm, json_value, 0)?;
    // only the outermost value carries the host's release obligation
    if let Some(id) = value.as_object_id() {
        if vm.native_depth == 0 {
            vm.heap.pin(id);
        }
    }
    Ok(value)
}

fn build(vm: &mut Vm, json_value: &JsonValue, depth: usize) -> Result<Value, String> {
    match json_value {
        JsonValue::Null => Ok(Value::NONE),
        JsonValue::Bool(b) => Ok(Value::boolean(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(Value::number)
            .ok_or_else(|| "Invalid JSON number".to_string()),
        JsonValue::String(s) => {
            let id = vm.heap.alloc(HeapObject::String(SmolStr::new(s)));
            Ok(Value::object(id))
        }
        JsonValue::Array(arr) => {
            if depth >= MAX_DEPTH {
                return Err("nesting too deep".to_string());
            }
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                items.push(build(vm, item, depth + 1)?);
            }
            let id = vm.heap.alloc(HeapObject::List(items));
            Ok(Value::object(id))
        }
        JsonValue::Object(_) => Err("JSON objects have no VM counterpart".to_string()),
    }
}
