// Virtual machine
// Owns every heap object, the global environment, registered modules and
// raw allocations of one independent runtime instance.
mod alloc;
mod error;
mod execute;
mod globals;
mod module;
mod option;
mod value_ref;

use crate::compiler::compile_code;
use crate::heap::{Heap, HeapObject, NativeFunction};
use crate::stdlib;
use crate::value::{Value, ValueKind};
pub use alloc::RAW_ALIGN;
use alloc::RawAllocator;
pub use error::{CyError, CyResult, ResultCode};
use error::{ErrorReport, format_static_report};
use execute::CallFrame;
use globals::Globals;
pub use module::{ModuleHandle, ModuleLoader, ModuleStatus};
use module::ModuleRegistry;
pub use option::VmOption;
pub use value_ref::ValueRef;

use ahash::AHashMap;
use smol_str::SmolStr;
use std::rc::Rc;
use tracing::{debug, error, trace};

/// Snapshot of VM resource usage, for leak checking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub pinned_objects: usize,
    pub raw_alloc_bytes: usize,
    pub raw_allocations: usize,
    pub invalid_releases: usize,
    pub collections: usize,
}

pub struct Vm {
    pub(crate) option: VmOption,
    pub(crate) heap: Heap,
    pub(crate) globals: Globals,
    /// Module names bound by `import`, persistent across evals.
    pub(crate) imports: AHashMap<SmolStr, u32>,
    pub(crate) modules: ModuleRegistry,
    pub(crate) raw: RawAllocator,

    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,

    /// Report of the last failed eval; empty after a success.
    pub(crate) error_report: ErrorReport,
    /// Panic/internal message of the runtime failure being raised.
    pub(crate) error_message: String,

    pub(crate) in_eval: bool,
    pub(crate) native_depth: usize,
    pub(crate) invalid_releases: usize,
}

impl Vm {
    pub fn new(option: VmOption) -> Self {
        let raw = RawAllocator::new(option.max_raw_alloc_bytes);
        let mut vm = Vm {
            option,
            heap: Heap::new(),
            globals: Globals::new(),
            imports: AHashMap::new(),
            modules: ModuleRegistry::new(),
            raw,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            error_report: ErrorReport::new(),
            error_message: String::new(),
            in_eval: false,
            native_depth: 0,
            invalid_releases: 0,
        };
        stdlib::open_core(&mut vm);
        debug!(builtins = vm.globals.len(), "vm created");
        vm
    }

    pub fn option(&self) -> &VmOption {
        &self.option
    }

    // ============ Evaluation ============

    /// Compiles and runs `source` as a top-level program in this VM's global
    /// environment. On success the returned value carries a release
    /// obligation if it is a heap object.
    pub fn eval(&mut self, source: &str) -> CyResult<Value> {
        if self.in_eval {
            error!("eval called while another eval is running on the same VM");
            self.error_message = String::from("eval is not reentrant on the same VM");
            self.error_report
                .set(String::from("error: eval is not reentrant on the same VM\n"));
            return Err(CyError::Unknown);
        }

        self.error_report.clear();
        self.in_eval = true;
        trace!(bytes = source.len(), "eval start");
        let result = self.eval_source(source);
        self.in_eval = false;

        if let Ok(value) = result {
            if let Some(id) = value.as_object_id() {
                self.heap.pin(id);
            }
            // a rejected nested eval may have written a report
            self.error_report.clear();
        }
        self.collect_garbage();
        trace!(ok = result.is_ok(), "eval finish");
        result
    }

    fn eval_source(&mut self, source: &str) -> CyResult<Value> {
        let source_name = self.option.chunk_name.clone();
        let chunk = match compile_code(self, source, &source_name) {
            Ok(chunk) => chunk,
            Err(e) => {
                let err = CyError::from(e.stage);
                let report = format_static_report(err, &e.message, &source_name, source, e.pos);
                self.error_report.set(report);
                return Err(err);
            }
        };
        self.execute(Rc::new(chunk))
    }

    /// Like [`Vm::eval`], but wraps the result in a guard that releases it
    /// on drop.
    pub fn eval_ref(&mut self, source: &str) -> CyResult<ValueRef<'_>> {
        let value = self.eval(source)?;
        Ok(ValueRef::new(self, value))
    }

    /// Diagnostic for the last failed eval. Valid until the next eval.
    pub fn last_error_report(&self) -> &str {
        self.error_report.as_str()
    }

    pub(crate) fn error_report_raw(&self) -> (*const u8, usize) {
        (self.error_report.as_ptr(), self.error_report.len())
    }

    /// Restores a usable state after a Rust panic unwound out of an eval
    /// (for example from a host closure).
    pub(crate) fn recover_from_unwind(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.in_eval = false;
        self.native_depth = 0;
        self.error_report
            .set(String::from("error: a host callback panicked during eval\n"));
        error!("eval unwound by a Rust panic, VM stack reset");
    }

    // ============ Ownership ============

    /// Discharges one unit of the host's release obligation for `value`.
    /// Primitives are accepted as a no-op.
    pub fn release(&mut self, value: Value) -> CyResult<()> {
        let Some(id) = value.as_object_id() else {
            return Ok(());
        };

        match self.heap.unpin(id) {
            Ok(0) => {
                if self.option.collect_on_release {
                    self.collect_garbage();
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(fault) => {
                self.invalid_releases += 1;
                error!(?value, ?fault, "invalid release of heap value");
                Err(CyError::InvalidRelease)
            }
        }
    }

    /// Adds one unit of release obligation to a live heap value.
    pub fn retain(&mut self, value: Value) -> CyResult<()> {
        match value.as_object_id() {
            None => Ok(()),
            Some(id) if self.heap.pin(id) => Ok(()),
            Some(_) => Err(CyError::InvalidRelease),
        }
    }

    /// Host-constructed values are pinned; values constructed while a native
    /// function runs are VM temporaries handed back through its return.
    fn adopt(&mut self, object: HeapObject) -> Value {
        let id = self.heap.alloc(object);
        if self.native_depth == 0 {
            self.heap.pin(id);
        }
        Value::object(id)
    }

    pub fn create_string(&mut self, s: &str) -> Value {
        self.adopt(HeapObject::String(SmolStr::new(s)))
    }

    pub fn create_list(&mut self, items: &[Value]) -> Value {
        self.adopt(HeapObject::List(items.to_vec()))
    }

    /// Allocates an unpinned native function object. The caller must root it
    /// (globals or a module table) before the next collection.
    pub(crate) fn native_function<F>(&mut self, name: &str, arity: u32, func: F) -> Value
    where
        F: Fn(&mut Vm, &[Value]) -> Value + 'static,
    {
        let id = self.heap.alloc(HeapObject::Native(NativeFunction {
            name: SmolStr::new(name),
            arity,
            func: Rc::new(func),
        }));
        Value::object(id)
    }

    /// Records a script-level panic from inside a native function. The
    /// native must return the value this produces.
    pub fn native_panic(&mut self, message: impl Into<String>) -> Value {
        self.error_message = message.into();
        Value::INTERRUPT
    }

    // ============ Inspection ============

    pub fn as_str(&self, value: Value) -> Option<&str> {
        self.heap.get_str(value.as_object_id()?)
    }

    pub fn list_items(&self, value: Value) -> Option<&[Value]> {
        match self.heap.get(value.as_object_id()?)? {
            HeapObject::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value.kind() {
            ValueKind::None => "none",
            ValueKind::Bool(_) => "boolean",
            ValueKind::Number(_) => "number",
            ValueKind::Object(id) => self
                .heap
                .get(id)
                .map(|object| object.type_name())
                .unwrap_or("invalid"),
            ValueKind::Interrupt => "interrupt",
        }
    }

    pub fn value_to_string(&self, value: Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value, 0);
        out
    }

    fn write_value(&self, out: &mut String, value: Value, depth: usize) {
        match value.kind() {
            ValueKind::None => out.push_str("none"),
            ValueKind::Bool(b) => out.push_str(if b { "true" } else { "false" }),
            ValueKind::Number(n) => write_number(out, n),
            ValueKind::Interrupt => out.push_str("interrupt"),
            ValueKind::Object(id) => match self.heap.get(id) {
                None => out.push_str("<invalid>"),
                Some(HeapObject::String(s)) => {
                    if depth > 0 {
                        out.push('\'');
                        out.push_str(s);
                        out.push('\'');
                    } else {
                        out.push_str(s);
                    }
                }
                Some(HeapObject::List(items)) => {
                    if depth >= 8 {
                        out.push_str("[...]");
                        return;
                    }
                    out.push('[');
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.write_value(out, *item, depth + 1);
                    }
                    out.push(']');
                }
                Some(HeapObject::Function(func)) => {
                    out.push_str("<function ");
                    out.push_str(&func.name);
                    out.push('>');
                }
                Some(HeapObject::Native(func)) => {
                    out.push_str("<native function ");
                    out.push_str(&func.name);
                    out.push('>');
                }
            },
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.heap.live_objects(),
            pinned_objects: self.heap.pinned_objects(),
            raw_alloc_bytes: self.raw.bytes(),
            raw_allocations: self.raw.allocations(),
            invalid_releases: self.invalid_releases,
            collections: self.heap.collections,
        }
    }

    // ============ Collection ============

    /// Runs a full collection unless an eval is in progress. Returns the
    /// number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        if self.in_eval {
            return 0;
        }
        self.collect_roots()
    }

    /// Collects with the current stack and frames as additional roots.
    pub(crate) fn collect_roots(&mut self) -> usize {
        let mut roots: Vec<Value> = Vec::with_capacity(self.globals.len() + self.stack.len());
        roots.extend(self.globals.values());
        roots.extend(self.modules.values());
        roots.extend(self.stack.iter().copied());
        for frame in &self.frames {
            roots.extend(frame.chunk.constants.iter().copied());
        }

        let freed = self.heap.collect(&roots);
        debug!(
            freed,
            live = self.heap.live_objects(),
            "garbage collection"
        );
        freed
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmOption::default())
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        debug!(
            live_objects = self.heap.live_objects(),
            pinned_objects = self.heap.pinned_objects(),
            "vm destroyed"
        );
    }
}

pub(crate) fn write_number(out: &mut String, n: f64) {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        out.push_str(itoa::Buffer::new().format(n as i64));
    } else {
        out.push_str(&n.to_string());
    }
}
