use crate::value::Value;
use crate::vm::Vm;

/// Scoped acquisition of a VM value.
///
/// Holds a value that carries a release obligation and discharges it when
/// dropped, on every exit path. The guard borrows the VM mutably, so the VM
/// can't be destroyed or re-entered while the value is held.
///
/// # Examples
/// ```ignore
/// let mut vm = Vm::default();
/// let list = vm.eval_ref("[1, 2, 3]")?;
/// assert_eq!(list.vm().list_items(list.value()).map(|i| i.len()), Some(3));
/// // released here
/// ```
pub struct ValueRef<'a> {
    vm: &'a mut Vm,
    value: Value,
}

impl<'a> ValueRef<'a> {
    pub(crate) fn new(vm: &'a mut Vm, value: Value) -> Self {
        ValueRef { vm, value }
    }

    #[inline]
    pub fn value(&self) -> Value {
        self.value
    }

    #[inline]
    pub fn vm(&self) -> &Vm {
        self.vm
    }

    pub fn as_number(&self) -> Option<f64> {
        self.value.as_number()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.vm.as_str(self.value)
    }

    pub fn to_string_lossy(&self) -> String {
        self.vm.value_to_string(self.value)
    }

    /// Gives up the guard without releasing. The caller takes over the
    /// release obligation.
    pub fn into_inner(self) -> Value {
        let value = self.value;
        std::mem::forget(self);
        value
    }
}

impl Drop for ValueRef<'_> {
    fn drop(&mut self) {
        // failures are already logged by release
        let _ = self.vm.release(self.value);
    }
}

impl std::fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueRef({:?})", self.value)
    }
}
