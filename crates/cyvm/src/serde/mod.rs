//! Serde support for VM values
//!
//! Values are converted through VM methods rather than implementing
//! Serialize/Deserialize on `Value` itself, since heap values only make
//! sense together with the VM that owns them.
mod deserializer;
mod serializer;

use crate::value::Value;
use crate::vm::Vm;
use serde_json::Value as JsonValue;

impl Vm {
    /// Converts a value to JSON. Functions and cyclic lists are rejected.
    pub fn value_to_json(&self, value: Value) -> Result<JsonValue, String> {
        serializer::to_value(self, value)
    }

    pub fn value_to_json_string(&self, value: Value, pretty: bool) -> Result<String, String> {
        serializer::to_string(self, value, pretty)
    }

    /// Builds a VM value from JSON. The result carries a release obligation
    /// when it is a heap value; nested values are owned through it.
    pub fn json_to_value(&mut self, json: &JsonValue) -> Result<Value, String> {
        deserializer::from_value(self, json)
    }
}
