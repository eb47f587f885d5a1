// Tests for the module registrar
use crate::lib_registry::LibraryModule;
use crate::value::Value;
use crate::vm::{CyError, ModuleHandle, ModuleStatus, Vm, VmOption};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn square(_vm: &mut Vm, args: &[Value]) -> Value {
    let n = args[0].as_f64_unchecked();
    Value::number(n * n)
}

fn add_math(vm: &mut Vm, loads: Rc<Cell<u32>>) {
    vm.add_module_loader("math", move |vm, module| {
        loads.set(loads.get() + 1);
        vm.set_module_func(module, "sq", 1, square).unwrap();
    });
}

#[test]
fn test_module_registration_and_call() {
    let mut vm = Vm::new(VmOption::default());
    let loads = Rc::new(Cell::new(0));
    add_math(&mut vm, loads.clone());

    let value = vm.eval("import math\nmath.sq(7)").unwrap();
    assert_eq!(value.as_number(), Some(49.0));
    vm.release(value).unwrap();
    assert_eq!(loads.get(), 1);
}

#[test]
fn test_loader_is_lazy_and_runs_once() {
    let mut vm = Vm::new(VmOption::default());
    let loads = Rc::new(Cell::new(0));
    add_math(&mut vm, loads.clone());

    assert_eq!(vm.module_status("math"), Some(ModuleStatus::Registered));
    vm.eval("1 + 1").unwrap();
    assert_eq!(loads.get(), 0);

    vm.eval("import math").unwrap();
    assert_eq!(loads.get(), 1);
    assert_eq!(vm.module_status("math"), Some(ModuleStatus::Loaded));

    // import binding persists, a second import is a no-op
    assert_eq!(vm.eval("math.sq(3)").unwrap().as_number(), Some(9.0));
    assert_eq!(vm.eval("import math\nmath.sq(4)").unwrap().as_number(), Some(16.0));
    assert_eq!(loads.get(), 1);
}

#[test]
fn test_loader_runs_before_first_access() {
    let mut vm = Vm::new(VmOption::default());
    let log = Rc::new(RefCell::new(Vec::new()));

    let loader_log = log.clone();
    vm.add_module_loader("probe", move |vm, module| {
        loader_log.borrow_mut().push("load");
        let call_log = loader_log.clone();
        vm.set_module_func(module, "touch", 0, move |_, _| {
            call_log.borrow_mut().push("call");
            Value::NONE
        })
        .unwrap();
    });

    vm.eval("import probe\nprobe.touch()\nprobe.touch()").unwrap();
    assert_eq!(*log.borrow(), vec!["load", "call", "call"]);
}

#[test]
fn test_unregistered_module_is_compile_error() {
    let mut vm = Vm::new(VmOption::default());
    assert_eq!(vm.eval("import nothing"), Err(CyError::Compile));
    assert!(vm.last_error_report().contains("Unknown module `nothing`"));
    assert_eq!(vm.module_status("nothing"), None);
}

#[test]
fn test_module_misuse_is_compile_error() {
    let mut vm = Vm::new(VmOption::default());
    add_math(&mut vm, Rc::new(Cell::new(0)));

    assert_eq!(vm.eval("import math\nmath"), Err(CyError::Compile));
    assert_eq!(vm.eval("import math\nmath.cube(2)"), Err(CyError::Compile));
    assert!(vm.last_error_report().contains("has no member `cube`"));
    assert_eq!(vm.eval("import math\nmath = 3"), Err(CyError::Compile));
    assert_eq!(vm.eval("x = 1\nx.sq(2)"), Err(CyError::Compile));
}

#[test]
fn test_failed_compile_does_not_bind_import() {
    let mut vm = Vm::new(VmOption::default());
    let loads = Rc::new(Cell::new(0));
    add_math(&mut vm, loads.clone());

    assert_eq!(vm.eval("import math\nundefined_name"), Err(CyError::Compile));
    // the loader ran, but the binding was rolled back with the program
    assert_eq!(loads.get(), 1);
    assert_eq!(vm.eval("math.sq(2)"), Err(CyError::Compile));
    assert_eq!(vm.eval("import math\nmath.sq(2)").unwrap().as_number(), Some(4.0));
    assert_eq!(loads.get(), 1);
}

#[test]
fn test_native_arity_mismatch_panics() {
    let mut vm = Vm::new(VmOption::default());
    add_math(&mut vm, Rc::new(Cell::new(0)));
    assert_eq!(vm.eval("import math\nmath.sq(1, 2)"), Err(CyError::Panic));
    assert!(vm.last_error_report().contains("`sq` expects 1 argument, got 2"));
}

#[test]
fn test_native_panic_surfaces_as_script_panic() {
    let mut vm = Vm::new(VmOption::default());
    vm.add_module_loader("checked", |vm, module| {
        vm.set_module_func(module, "positive", 1, |vm, args| match args[0].as_number() {
            Some(n) if n > 0.0 => Value::number(n),
            _ => vm.native_panic("expected a positive number"),
        })
        .unwrap();
    });

    assert_eq!(vm.eval("import checked\nchecked.positive(2)").unwrap().as_number(), Some(2.0));
    assert_eq!(vm.eval("checked.positive(-1)"), Err(CyError::Panic));
    assert!(vm.last_error_report().starts_with("panic: expected a positive number"));
    assert_eq!(vm.eval("1 + 1").unwrap().as_number(), Some(2.0));
}

#[test]
fn test_native_returns_heap_value() {
    let mut vm = Vm::new(VmOption::default());
    vm.add_module_loader("text", |vm, module| {
        vm.set_module_func(module, "greet", 1, |vm, args| {
            let name = vm.as_str(args[0]).unwrap_or("?").to_string();
            vm.create_string(&format!("hello {}", name))
        })
        .unwrap();
        vm.set_module_func(module, "pair", 2, |vm, args| vm.create_list(args))
            .unwrap();
    });
    let baseline = vm.stats().live_objects;

    let value = vm.eval("import text\ntext.greet('cy')").unwrap();
    assert_eq!(vm.as_str(value), Some("hello cy"));
    vm.release(value).unwrap();

    let value = vm.eval("text.pair(1, 'b')").unwrap();
    assert_eq!(vm.value_to_string(value), "[1, 'b']");
    vm.release(value).unwrap();

    // two module functions stay rooted by the module table
    assert_eq!(vm.stats().live_objects, baseline + 2);
    assert_eq!(vm.stats().pinned_objects, 0);
}

#[test]
fn test_handle_is_invalid_after_loader_returns() {
    let mut vm = Vm::new(VmOption::default());
    let kept: Rc<Cell<Option<ModuleHandle>>> = Rc::new(Cell::new(None));

    let slot = kept.clone();
    vm.add_module_loader("leaky", move |vm, module| {
        slot.set(Some(module));
        vm.set_module_func(module, "one", 0, |_, _| Value::number(1.0)).unwrap();
    });
    vm.eval("import leaky").unwrap();

    let handle = kept.get().unwrap();
    let result = vm.set_module_func(handle, "two", 0, |_, _| Value::number(2.0));
    assert_eq!(result, Err(CyError::InvalidModuleHandle));
    assert_eq!(vm.eval("leaky.two()"), Err(CyError::Compile));
}

#[test]
fn test_handle_raw_round_trip() {
    let mut vm = Vm::new(VmOption::default());
    let raw = Rc::new(Cell::new(0u64));
    let seen = raw.clone();
    vm.add_module_loader("m", move |vm, module| {
        seen.set(module.to_raw());
        let decoded = ModuleHandle::from_raw(module.to_raw()).unwrap();
        assert_eq!(decoded, module);
        vm.set_module_func(decoded, "f", 0, |_, _| Value::TRUE).unwrap();
    });
    assert_eq!(vm.eval("import m\nm.f()").unwrap(), Value::TRUE);
    assert_ne!(raw.get(), 0);
    assert_eq!(ModuleHandle::from_raw(0), None);
}

#[test]
fn test_duplicate_function_keeps_last() {
    let mut vm = Vm::new(VmOption::default());
    vm.add_module_loader("dup", |vm, module| {
        vm.set_module_func(module, "f", 0, |_, _| Value::number(1.0)).unwrap();
        vm.set_module_func(module, "f", 0, |_, _| Value::number(2.0)).unwrap();
    });
    assert_eq!(vm.eval("import dup\ndup.f()").unwrap().as_number(), Some(2.0));
}

#[test]
fn test_loader_replacement() {
    let mut vm = Vm::new(VmOption::default());
    vm.add_module_loader("m", |vm, module| {
        vm.set_module_func(module, "v", 0, |_, _| Value::number(1.0)).unwrap();
    });
    // replaces the pending loader
    vm.add_module_loader("m", |vm, module| {
        vm.set_module_func(module, "v", 0, |_, _| Value::number(2.0)).unwrap();
    });
    assert_eq!(vm.eval("import m\nm.v()").unwrap().as_number(), Some(2.0));

    // ignored once loaded
    vm.add_module_loader("m", |vm, module| {
        vm.set_module_func(module, "v", 0, |_, _| Value::number(3.0)).unwrap();
    });
    assert_eq!(vm.eval("m.v()").unwrap().as_number(), Some(2.0));
}

#[test]
fn test_import_name_already_bound() {
    let mut vm = Vm::new(VmOption::default());
    add_math(&mut vm, Rc::new(Cell::new(0)));
    vm.eval("math = 1").unwrap();
    assert_eq!(vm.eval("import math"), Err(CyError::Compile));
}

#[test]
fn test_vms_are_isolated() {
    let mut h1 = Vm::new(VmOption::default());
    let mut h2 = Vm::new(VmOption::default());

    h1.eval("x = 10").unwrap();
    assert_eq!(h2.eval("x"), Err(CyError::Compile));
    assert!(h2.last_error_report().contains("Undefined symbol `x`"));

    add_math(&mut h1, Rc::new(Cell::new(0)));
    assert_eq!(h2.module_status("math"), None);
    assert_eq!(h2.eval("import math"), Err(CyError::Compile));
    assert_eq!(h1.eval("import math\nmath.sq(x)").unwrap().as_number(), Some(100.0));

    drop(h1);
    assert_eq!(h2.eval("2 + 2").unwrap().as_number(), Some(4.0));
}

fn lib_double(_vm: &mut Vm, args: &[Value]) -> Value {
    Value::number(args[0].as_number().unwrap_or(0.0) * 2.0)
}

fn lib_answer(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(42.0)
}

#[test]
fn test_library_module() {
    let mut vm = Vm::new(VmOption::default());
    let lib = crate::lib_module!("util", {
        "double" => (1, lib_double),
        "answer" => (0, lib_answer),
    });
    assert_eq!(lib.get("double").map(|entry| entry.arity), Some(1));
    vm.add_library(lib);
    assert_eq!(vm.module_status("util"), Some(ModuleStatus::Registered));
    assert_eq!(vm.eval("import util\nutil.double(util.answer())").unwrap().as_number(), Some(84.0));

    let lib = LibraryModule::new("extra").with_function("answer", 0, lib_answer);
    vm.add_library(lib);
    assert_eq!(vm.eval("import extra\nextra.answer()").unwrap().as_number(), Some(42.0));
}
