//! C ABI exports.
//!
//! Mirrors `include/cyber.h`. Every export catches Rust panics at the
//! boundary; a panic during eval surfaces as `ErrorUnknown`. Host
//! programming errors (null or destroyed handles, stale module handles,
//! mismatched free sizes, double release) are undefined at this boundary;
//! where they can be detected cheaply they are logged and ignored.
#![allow(non_snake_case)]

use crate::compiler::MAX_CALL_ARGS;
use crate::value::Value;
use crate::vm::{ModuleHandle, ResultCode, Vm, VmOption};
use std::ffi::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

/// Opaque VM handle handed to C. Layout-identical to [`Vm`], so a `&mut Vm`
/// reborrow can be passed back into native callbacks.
#[repr(transparent)]
pub struct CyUserVM {
    pub(crate) vm: Vm,
}

/// Opaque module handle. The pointer value encodes a [`ModuleHandle`]; it is
/// never dereferenced.
pub struct CyModule {
    _private: [u8; 0],
}

pub type CyValue = u64;

/// Sized string. NUL-terminated by convention; `len` is authoritative.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CStr {
    pub charz: *mut c_char,
    pub len: usize,
}

impl CStr {
    /// Borrows the bytes as UTF-8 for the duration of the call.
    ///
    /// # Safety
    /// `charz` must point to `len` readable bytes (or be null with `len == 0`).
    unsafe fn as_str<'a>(self) -> Option<&'a str> {
        if self.len == 0 {
            return Some("");
        }
        if self.charz.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.charz as *const u8, self.len) };
        std::str::from_utf8(bytes).ok()
    }
}

pub type CyFunc = unsafe extern "C" fn(vm: *mut CyUserVM, args: *mut CyValue, nargs: u8) -> CyValue;
pub type CyLoadModuleFunc = unsafe extern "C" fn(vm: *mut CyUserVM, module: *mut CyModule);

#[allow(non_upper_case_globals)]
#[unsafe(no_mangle)]
pub static CY_NullId: u32 = u32::MAX;

#[inline]
fn user_vm(vm: &mut Vm) -> *mut CyUserVM {
    vm as *mut Vm as *mut CyUserVM
}

/// # Safety
/// `vm` must be a live handle from [`cyVmCreate`].
#[inline]
unsafe fn vm_mut<'a>(vm: *mut CyUserVM) -> Option<&'a mut Vm> {
    unsafe { vm.as_mut() }.map(|user| &mut user.vm)
}

fn module_handle(module: *mut CyModule) -> Option<ModuleHandle> {
    ModuleHandle::from_raw(module as usize as u64)
}

fn module_ptr(handle: ModuleHandle) -> *mut CyModule {
    handle.to_raw() as usize as *mut CyModule
}

// =============================================================================
// VM
// =============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn cyVmCreate() -> *mut CyUserVM {
    match catch_unwind(|| Box::new(CyUserVM { vm: Vm::new(VmOption::default()) })) {
        Ok(user) => Box::into_raw(user),
        Err(_) => {
            error!("cyVmCreate failed");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `vm` must come from [`cyVmCreate`] and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmDestroy(vm: *mut CyUserVM) {
    if vm.is_null() {
        return;
    }
    let user = unsafe { Box::from_raw(vm) };
    if catch_unwind(AssertUnwindSafe(move || drop(user))).is_err() {
        error!("panic while destroying VM");
    }
}

/// # Safety
/// `vm` must be live, `src` readable, `out_val` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmEval(vm: *mut CyUserVM, src: CStr, out_val: *mut CyValue) -> ResultCode {
    let Some(vm) = (unsafe { vm_mut(vm) }) else {
        return ResultCode::ErrorUnknown;
    };
    let Some(source) = (unsafe { src.as_str() }) else {
        vm.error_report
            .set(String::from("TokenError: source is not valid UTF-8\n"));
        return ResultCode::ErrorToken;
    };

    match catch_unwind(AssertUnwindSafe(|| vm.eval(source))) {
        Ok(Ok(value)) => {
            if !out_val.is_null() {
                unsafe { *out_val = value.to_bits() };
            }
            ResultCode::Success
        }
        Ok(Err(err)) => err.into(),
        Err(_) => {
            vm.recover_from_unwind();
            ResultCode::ErrorUnknown
        }
    }
}

/// The returned buffer is owned by the VM and valid until the next eval.
///
/// # Safety
/// `vm` must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmGetLastErrorReport(vm: *mut CyUserVM) -> CStr {
    match unsafe { vm_mut(vm) } {
        Some(vm) => {
            let (ptr, len) = vm.error_report_raw();
            CStr {
                charz: ptr as *mut c_char,
                len,
            }
        }
        None => CStr {
            charz: std::ptr::null_mut(),
            len: 0,
        },
    }
}

/// # Safety
/// `vm` must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmRelease(vm: *mut CyUserVM, val: CyValue) {
    let Some(vm) = (unsafe { vm_mut(vm) }) else {
        return;
    };
    // misuse is logged by release itself
    let _ = catch_unwind(AssertUnwindSafe(|| vm.release(Value::from_bits(val))));
}

// =============================================================================
// Modules
// =============================================================================

/// # Safety
/// `vm` must be live, `name` readable; `func` must stay callable for the
/// VM's lifetime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmAddModuleLoader(vm: *mut CyUserVM, name: CStr, func: CyLoadModuleFunc) {
    let Some(vm) = (unsafe { vm_mut(vm) }) else {
        return;
    };
    let Some(name) = (unsafe { name.as_str() }) else {
        error!("module name is not valid UTF-8, loader ignored");
        return;
    };
    vm.add_module_loader(name, move |vm, handle| {
        let user = user_vm(vm);
        unsafe { func(user, module_ptr(handle)) };
    });
}

/// # Safety
/// `vm` must be live and `module` the handle passed to the running loader.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmSetModuleFunc(
    vm: *mut CyUserVM,
    module: *mut CyModule,
    name: CStr,
    num_params: u32,
    func: CyFunc,
) {
    let Some(vm) = (unsafe { vm_mut(vm) }) else {
        return;
    };
    let Some(handle) = module_handle(module) else {
        error!("null module handle");
        return;
    };
    let Some(name) = (unsafe { name.as_str() }) else {
        error!("module function name is not valid UTF-8, ignored");
        return;
    };

    let native = move |vm: &mut Vm, args: &[Value]| -> Value {
        // calls never carry more than MAX_CALL_ARGS arguments
        debug_assert!(args.len() <= MAX_CALL_ARGS);
        let mut argv: Vec<CyValue> = args.iter().map(|v| v.to_bits()).collect();
        let user = user_vm(vm);
        let result = unsafe { func(user, argv.as_mut_ptr(), argv.len() as u8) };
        Value::from_bits(result)
    };
    // a stale handle is logged by set_module_func
    let _ = vm.set_module_func(handle, name, num_params, native);
}

// =============================================================================
// Allocator gateway
// =============================================================================

/// # Safety
/// `vm` must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmAlloc(vm: *mut CyUserVM, size: usize) -> *mut u8 {
    match unsafe { vm_mut(vm) } {
        Some(vm) => vm.alloc(size),
        None => std::ptr::null_mut(),
    }
}

/// # Safety
/// `vm` must be live; `ptr`/`len` must match an earlier [`cyVmAlloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cyVmFree(vm: *mut CyUserVM, ptr: *mut u8, len: usize) {
    if let Some(vm) = unsafe { vm_mut(vm) } {
        vm.free(ptr, len);
    }
}

// =============================================================================
// Values
// =============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn cyValueNone() -> CyValue {
    Value::NONE.to_bits()
}

#[unsafe(no_mangle)]
pub extern "C" fn cyValueTrue() -> CyValue {
    Value::TRUE.to_bits()
}

#[unsafe(no_mangle)]
pub extern "C" fn cyValueFalse() -> CyValue {
    Value::FALSE.to_bits()
}

#[unsafe(no_mangle)]
pub extern "C" fn cyValueNumber(n: f64) -> CyValue {
    Value::number(n).to_bits()
}

#[unsafe(no_mangle)]
pub extern "C" fn cyValueAsDouble(val: CyValue) -> f64 {
    Value::from_bits(val).as_f64_unchecked()
}
