// End-to-end scenarios through the C ABI
use crate::ffi::*;
use crate::vm::ResultCode;
use std::cell::Cell;
use std::ffi::c_char;

fn cstr(s: &str) -> CStr {
    CStr {
        charz: s.as_ptr() as *mut c_char,
        len: s.len(),
    }
}

fn report(vm: *mut CyUserVM) -> String {
    let report = unsafe { cyVmGetLastErrorReport(vm) };
    let bytes = unsafe { std::slice::from_raw_parts(report.charz as *const u8, report.len + 1) };
    // NUL-terminated, the terminator is not counted
    assert_eq!(bytes[report.len], 0);
    String::from_utf8(bytes[..report.len].to_vec()).unwrap()
}

thread_local! {
    static LOADS: Cell<u32> = const { Cell::new(0) };
}

unsafe extern "C" fn sq(_vm: *mut CyUserVM, args: *mut CyValue, nargs: u8) -> CyValue {
    assert_eq!(nargs, 1);
    let n = cyValueAsDouble(unsafe { *args });
    cyValueNumber(n * n)
}

unsafe extern "C" fn load_math(vm: *mut CyUserVM, module: *mut CyModule) {
    LOADS.with(|loads| loads.set(loads.get() + 1));
    unsafe { cyVmSetModuleFunc(vm, module, cstr("sq"), 1, sq) };
}

#[test]
fn test_result_codes() {
    assert_eq!(ResultCode::Success as i32, 0);
    assert_eq!(ResultCode::ErrorToken as i32, 1);
    assert_eq!(ResultCode::ErrorParse as i32, 2);
    assert_eq!(ResultCode::ErrorCompile as i32, 3);
    assert_eq!(ResultCode::ErrorPanic as i32, 4);
    assert_eq!(ResultCode::ErrorUnknown as i32, 5);
    assert_eq!(CY_NullId, u32::MAX);
}

#[test]
fn test_value_constructors() {
    assert_ne!(cyValueNone(), cyValueTrue());
    assert_ne!(cyValueNone(), cyValueFalse());
    assert_ne!(cyValueTrue(), cyValueFalse());
    assert_eq!(cyValueAsDouble(cyValueNumber(-2.25)), -2.25);
    assert_eq!(cyValueAsDouble(cyValueNumber(f64::INFINITY)), f64::INFINITY);
    assert_eq!(
        cyValueAsDouble(cyValueNumber(f64::NAN)).to_bits(),
        f64::NAN.to_bits()
    );
}

#[test]
fn test_arithmetic_round_trip() {
    unsafe {
        let vm = cyVmCreate();
        assert!(!vm.is_null());
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, cstr("1 + 2"), &mut out), ResultCode::Success);
        assert_eq!(cyValueAsDouble(out), 3.0);
        cyVmRelease(vm, out);
        cyVmDestroy(vm);
    }
}

#[test]
fn test_parse_error_surfaces() {
    unsafe {
        let vm = cyVmCreate();
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, cstr("1 +"), &mut out), ResultCode::ErrorParse);
        let text = report(vm);
        assert!(!text.is_empty());
        assert!(text.contains("<eval>:1:4:"));
        assert!(text.contains('^'));
        cyVmDestroy(vm);
    }
}

#[test]
fn test_module_registration_and_call() {
    LOADS.with(|loads| loads.set(0));
    unsafe {
        let vm = cyVmCreate();
        cyVmAddModuleLoader(vm, cstr("math"), load_math);
        let mut out: CyValue = 0;
        assert_eq!(
            cyVmEval(vm, cstr("import math\nmath.sq(7)"), &mut out),
            ResultCode::Success
        );
        assert_eq!(cyValueAsDouble(out), 49.0);
        cyVmRelease(vm, out);

        assert_eq!(
            cyVmEval(vm, cstr("import math\nmath.sq(3)"), &mut out),
            ResultCode::Success
        );
        assert_eq!(cyValueAsDouble(out), 9.0);
        cyVmDestroy(vm);
    }
    assert_eq!(LOADS.with(|loads| loads.get()), 1);
}

#[test]
fn test_runtime_panic_keeps_vm_usable() {
    unsafe {
        let vm = cyVmCreate();
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, cstr("panic('x')"), &mut out), ResultCode::ErrorPanic);
        assert!(report(vm).starts_with("panic: x"));
        assert_eq!(cyVmEval(vm, cstr("1+1"), &mut out), ResultCode::Success);
        assert_eq!(cyValueAsDouble(out), 2.0);
        assert_eq!(report(vm), "");
        cyVmDestroy(vm);
    }
}

#[test]
fn test_allocator_gateway() {
    unsafe {
        let vm = cyVmCreate();
        let p = cyVmAlloc(vm, 16);
        assert!(!p.is_null());
        std::ptr::write_bytes(p, 0xAB, 16);
        assert_eq!(*p.add(15), 0xAB);
        assert_eq!((*vm).vm.stats().raw_alloc_bytes, 16);
        cyVmFree(vm, p, 16);
        assert_eq!((*vm).vm.stats().raw_alloc_bytes, 0);
        cyVmDestroy(vm);
    }
}

#[test]
fn test_isolation() {
    unsafe {
        let h1 = cyVmCreate();
        let h2 = cyVmCreate();
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(h1, cstr("x = 10"), &mut out), ResultCode::Success);
        assert_eq!(cyVmEval(h2, cstr("x"), &mut out), ResultCode::ErrorCompile);
        assert!(report(h2).contains("Undefined symbol `x`"));

        cyVmAddModuleLoader(h1, cstr("math"), load_math);
        assert_eq!(cyVmEval(h2, cstr("import math"), &mut out), ResultCode::ErrorCompile);

        cyVmDestroy(h1);
        assert_eq!(cyVmEval(h2, cstr("3"), &mut out), ResultCode::Success);
        assert_eq!(cyValueAsDouble(out), 3.0);
        cyVmDestroy(h2);
    }
}

#[test]
fn test_heap_result_release() {
    unsafe {
        let vm = cyVmCreate();
        let baseline = (*vm).vm.stats().live_objects;
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, cstr("'abc' + 'def'"), &mut out), ResultCode::Success);
        assert_eq!((*vm).vm.stats().pinned_objects, 1);
        cyVmRelease(vm, out);
        assert_eq!((*vm).vm.stats().live_objects, baseline);

        // second release is detected and ignored
        cyVmRelease(vm, out);
        assert_eq!((*vm).vm.stats().invalid_releases, 1);
        cyVmDestroy(vm);
    }
}

#[test]
fn test_invalid_utf8_source() {
    unsafe {
        let vm = cyVmCreate();
        let bytes = [0x31u8, 0xFF, 0x00];
        let src = CStr {
            charz: bytes.as_ptr() as *mut c_char,
            len: 2,
        };
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, src, &mut out), ResultCode::ErrorToken);
        assert!(!report(vm).is_empty());
        cyVmDestroy(vm);
    }
}

#[test]
fn test_length_is_authoritative() {
    unsafe {
        let vm = cyVmCreate();
        let source = "1 + 2 garbage";
        let src = CStr {
            charz: source.as_ptr() as *mut c_char,
            len: 5,
        };
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, src, &mut out), ResultCode::Success);
        assert_eq!(cyValueAsDouble(out), 3.0);
        cyVmDestroy(vm);
    }
}

#[test]
fn test_host_panic_in_eval_is_unknown() {
    unsafe {
        let vm = cyVmCreate();
        (*vm).vm.add_module_loader("bad", |_, _| panic!("host bug"));
        let mut out: CyValue = 0;
        assert_eq!(cyVmEval(vm, cstr("import bad"), &mut out), ResultCode::ErrorUnknown);
        assert!(!report(vm).is_empty());
        assert_eq!(cyVmEval(vm, cstr("4"), &mut out), ResultCode::Success);
        assert_eq!(cyValueAsDouble(out), 4.0);
        cyVmDestroy(vm);
    }
}

unsafe extern "C" fn load_wide(vm: *mut CyUserVM, module: *mut CyModule) {
    unsafe {
        cyVmSetModuleFunc(vm, module, cstr("wide"), 300, sq);
        cyVmSetModuleFunc(vm, module, cstr("sq"), 1, sq);
    }
}

#[test]
fn test_uncallable_arity_is_registered() {
    unsafe {
        let vm = cyVmCreate();
        cyVmAddModuleLoader(vm, cstr("wide"), load_wide);
        let mut out: CyValue = 0;
        assert_eq!(
            cyVmEval(vm, cstr("import wide\nwide.sq(5)"), &mut out),
            ResultCode::Success
        );
        assert_eq!(cyValueAsDouble(out), 25.0);

        assert_eq!(
            cyVmEval(vm, cstr("import wide\nwide.wide(1)"), &mut out),
            ResultCode::ErrorPanic
        );
        assert!(report(vm).contains("`wide` expects 300 arguments, got 1."));
        cyVmDestroy(vm);
    }
}
