// Cyber VM
// Embeddable scripting runtime: compiler, bytecode interpreter, object heap
// and the C ABI hosts link against.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod ffi;
pub mod heap;
pub mod lib_registry;
pub mod stdlib;
pub mod value;
pub mod vm;

#[cfg(feature = "serde")]
pub mod serde;

pub use heap::ObjectId;
pub use lib_registry::LibraryModule;
pub use value::{Value, ValueKind};
pub use vm::{
    CyError, CyResult, HeapStats, ModuleHandle, ModuleStatus, ResultCode, ValueRef, Vm, VmOption,
};
