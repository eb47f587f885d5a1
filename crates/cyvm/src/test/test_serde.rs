// Tests for JSON conversion
use crate::vm::{Vm, VmOption};
use serde_json::json;

#[test]
fn test_value_to_json() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm.eval("[1, 2.5, 'x', none, true, [false]]").unwrap();
    let json = vm.value_to_json(value).unwrap();
    assert_eq!(json, json!([1, 2.5, "x", null, true, [false]]));
    assert_eq!(
        vm.value_to_json_string(value, false).unwrap(),
        "[1,2.5,\"x\",null,true,[false]]"
    );
    vm.release(value).unwrap();
}

#[test]
fn test_functions_are_rejected() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm.eval("[len]").unwrap();
    assert!(vm.value_to_json(value).is_err());
    vm.release(value).unwrap();
}

#[test]
fn test_cyclic_list_is_rejected() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm.eval("xs = [1]\nxs[0] = xs\nxs").unwrap();
    assert!(vm.value_to_json(value).is_err());
    vm.release(value).unwrap();
}

#[test]
fn test_deeply_nested_list_is_rejected() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm
        .eval("l = []\ni = 0\nwhile i < 10000:\n    l = [l]\n    i = i + 1\nl")
        .unwrap();
    assert_eq!(vm.value_to_json(value), Err("nesting too deep".to_string()));
    vm.release(value).unwrap();

    let shallow = vm.eval("[[[1]]]").unwrap();
    assert_eq!(vm.value_to_json(shallow).unwrap(), json!([[[1]]]));
    vm.release(shallow).unwrap();

    let mut deep = json!(1);
    for _ in 0..1000 {
        deep = json!([deep]);
    }
    assert!(vm.json_to_value(&deep).is_err());
}

#[test]
fn test_json_to_value() {
    let mut vm = Vm::new(VmOption::default());
    let baseline = vm.stats().live_objects;

    let value = vm.json_to_value(&json!([1, "two", [null, true]])).unwrap();
    assert_eq!(vm.value_to_string(value), "[1, 'two', [none, true]]");
    assert_eq!(vm.stats().pinned_objects, 1);
    vm.release(value).unwrap();
    assert_eq!(vm.stats().live_objects, baseline);

    assert!(vm.json_to_value(&json!({"a": 1})).is_err());
}

#[test]
fn test_option_deserializes_with_defaults() {
    let option: VmOption = serde_json::from_str(r#"{"max_call_depth": 32}"#).unwrap();
    assert_eq!(option.max_call_depth, 32);
    assert_eq!(option.chunk_name, "<eval>");
    assert!(option.collect_on_release);
}
