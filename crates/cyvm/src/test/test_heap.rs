// Tests for heap ownership and collection
use crate::value::Value;
use crate::vm::{CyError, Vm, VmOption};

#[test]
fn test_single_release_frees_result() {
    let mut vm = Vm::new(VmOption::default());
    let baseline = vm.stats().live_objects;

    let value = vm.eval("[1, 2, 3]").unwrap();
    assert!(value.is_object());
    assert_eq!(vm.stats().live_objects, baseline + 1);
    assert_eq!(vm.stats().pinned_objects, 1);

    assert_eq!(vm.release(value), Ok(()));
    assert_eq!(vm.stats().live_objects, baseline);
    assert_eq!(vm.stats().pinned_objects, 0);
    assert_eq!(vm.list_items(value), None);
}

#[test]
fn test_double_release_is_detected() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm.eval("'text'").unwrap();

    assert_eq!(vm.release(value), Ok(()));
    assert_eq!(vm.release(value), Err(CyError::InvalidRelease));
    assert_eq!(vm.stats().invalid_releases, 1);
}

#[test]
fn test_release_of_unpinned_live_value_is_detected() {
    let option = VmOption {
        collect_on_release: false,
        ..VmOption::default()
    };
    let mut vm = Vm::new(option);
    let value = vm.eval("s = 'kept by a global'\ns").unwrap();

    assert_eq!(vm.release(value), Ok(()));
    // still alive through the global, but no pin is outstanding
    assert_eq!(vm.as_str(value), Some("kept by a global"));
    assert_eq!(vm.release(value), Err(CyError::InvalidRelease));
    assert_eq!(vm.stats().invalid_releases, 1);
}

#[test]
fn test_primitive_release_is_noop() {
    let mut vm = Vm::new(VmOption::default());
    let value = vm.eval("1 + 2").unwrap();
    assert_eq!(vm.release(value), Ok(()));
    assert_eq!(vm.release(value), Ok(()));
    assert_eq!(vm.release(Value::NONE), Ok(()));
    assert_eq!(vm.release(Value::TRUE), Ok(()));
    assert_eq!(vm.stats().invalid_releases, 0);
}

#[test]
fn test_each_eval_result_carries_its_own_pin() {
    let mut vm = Vm::new(VmOption::default());
    vm.eval("g = [1]").unwrap();
    let a = vm.eval("g").unwrap();
    let b = vm.eval("g").unwrap();
    assert_eq!(a, b);
    let id = a.as_object_id().unwrap();
    assert_eq!(vm.heap.pins(id), 2);

    assert_eq!(vm.release(a), Ok(()));
    assert_eq!(vm.heap.pins(id), 1);
    assert_eq!(vm.release(b), Ok(()));
    assert_eq!(vm.heap.pins(id), 0);
    assert_eq!(vm.release(a), Err(CyError::InvalidRelease));
    // the global still holds it
    assert_eq!(vm.list_items(a).map(|items| items.len()), Some(1));
}

#[test]
fn test_host_created_values() {
    let mut vm = Vm::new(VmOption::default());
    let baseline = vm.stats().live_objects;

    let s = vm.create_string("host");
    let list = vm.create_list(&[Value::number(1.0), Value::TRUE]);
    assert_eq!(vm.stats().pinned_objects, 2);
    assert_eq!(vm.as_str(s), Some("host"));
    assert_eq!(vm.value_to_string(list), "[1, true]");

    vm.retain(s).unwrap();
    vm.release(s).unwrap();
    assert_eq!(vm.as_str(s), Some("host"));
    vm.release(s).unwrap();
    vm.release(list).unwrap();
    assert_eq!(vm.stats().live_objects, baseline);
}

#[test]
fn test_garbage_is_collected_after_eval() {
    let mut vm = Vm::new(VmOption::default());
    let baseline = vm.stats().live_objects;
    vm.eval("i = 0\nwhile i < 100:\n    tmp = [i, 'x' + 'y']\n    i = i + 1").unwrap();
    // only the last list and its string survive, through `tmp`
    assert_eq!(vm.stats().live_objects, baseline + 2);

    vm.eval("tmp = none").unwrap();
    assert_eq!(vm.stats().live_objects, baseline);
}

#[test]
fn test_collection_during_execution_keeps_live_values() {
    let option = VmOption {
        gc_step_objects: 4,
        ..VmOption::default()
    };
    let mut vm = Vm::new(option);
    let source = "func build(n):\n    out = []\n    acc = ''\n    i = 0\n    while i < n:\n        acc = acc + 'a'\n        out = [out, acc]\n        i = i + 1\n    return [len(acc), out[1]]\nbuild(50)";
    let value = vm.eval(source).unwrap();
    let items = vm.list_items(value).unwrap().to_vec();
    assert_eq!(items[0].as_number(), Some(50.0));
    assert_eq!(vm.as_str(items[1]).map(|s| s.len()), Some(50));
    assert!(vm.stats().collections > 1);
    vm.release(value).unwrap();
}

#[test]
fn test_value_ref_releases_on_drop() {
    let mut vm = Vm::new(VmOption::default());
    let baseline = vm.stats().live_objects;
    {
        let guard = vm.eval_ref("'scoped'").unwrap();
        assert_eq!(guard.as_str(), Some("scoped"));
        assert_eq!(guard.vm().stats().pinned_objects, 1);
    }
    assert_eq!(vm.stats().live_objects, baseline);
    assert_eq!(vm.stats().pinned_objects, 0);

    let guard = vm.eval_ref("[1]").unwrap();
    let raw = guard.into_inner();
    assert_eq!(vm.stats().pinned_objects, 1);
    vm.release(raw).unwrap();
}

#[test]
fn test_stale_value_does_not_alias_new_object() {
    let mut vm = Vm::new(VmOption::default());
    let old = vm.eval("'first'").unwrap();
    vm.release(old).unwrap();
    // likely reuses the freed slot
    let new = vm.eval("'second'").unwrap();
    assert_eq!(vm.as_str(old), None);
    assert_eq!(vm.as_str(new), Some("second"));
    assert_eq!(vm.release(old), Err(CyError::InvalidRelease));
    vm.release(new).unwrap();
}

#[test]
fn test_collect_garbage_on_demand() {
    let option = VmOption {
        collect_on_release: false,
        ..VmOption::default()
    };
    let mut vm = Vm::new(option);
    let baseline = vm.stats().live_objects;
    let value = vm.eval("[[1], [2]]").unwrap();
    assert_eq!(vm.stats().live_objects, baseline + 3);
    vm.release(value).unwrap();
    assert_eq!(vm.stats().live_objects, baseline + 3);
    assert_eq!(vm.collect_garbage(), 3);
    assert_eq!(vm.stats().live_objects, baseline);
}
