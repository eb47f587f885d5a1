// Built-in globals
// Implements: print, panic, len, typeof, string

use crate::lib_registry::LibraryModule;
use crate::value::Value;
use crate::vm::Vm;

pub fn create_core_lib() -> LibraryModule {
    crate::lib_module!("core", {
        "print" => (1, core_print),
        "panic" => (1, core_panic),
        "len" => (1, core_len),
        "typeof" => (1, core_typeof),
        "string" => (1, core_string),
    })
}

pub(crate) fn open_core(vm: &mut Vm) {
    vm.open_builtins(&create_core_lib());
}

fn core_print(vm: &mut Vm, args: &[Value]) -> Value {
    println!("{}", vm.value_to_string(args[0]));
    Value::NONE
}

fn core_panic(vm: &mut Vm, args: &[Value]) -> Value {
    let message = vm.value_to_string(args[0]);
    vm.native_panic(message)
}

fn core_len(vm: &mut Vm, args: &[Value]) -> Value {
    let arg = args[0];
    if let Some(s) = vm.as_str(arg) {
        return Value::number(s.len() as f64);
    }
    if let Some(items) = vm.list_items(arg) {
        return Value::number(items.len() as f64);
    }
    let message = format!("bad argument to 'len' (string or list expected, got {})", vm.type_name(arg));
    vm.native_panic(message)
}

fn core_typeof(vm: &mut Vm, args: &[Value]) -> Value {
    let name = vm.type_name(args[0]);
    vm.create_string(name)
}

fn core_string(vm: &mut Vm, args: &[Value]) -> Value {
    if vm.as_str(args[0]).is_some() {
        return args[0];
    }
    let text = vm.value_to_string(args[0]);
    vm.create_string(&text)
}
