// Library registration system
// Bundles plain Rust functions into named modules that can be installed as
// built-in globals or registered as importable modules.

use crate::value::Value;
use crate::vm::Vm;
use tracing::warn;

/// Signature of a library function.
pub type NativeFunc = fn(&mut Vm, &[Value]) -> Value;

pub struct LibraryEntry {
    pub name: &'static str,
    pub arity: u32,
    pub func: NativeFunc,
}

/// A library module containing native functions
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<LibraryEntry>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// Add a function to this library
    pub fn with_function(mut self, name: &'static str, arity: u32, func: NativeFunc) -> Self {
        self.entries.push(LibraryEntry { name, arity, func });
        self
    }

    pub fn get(&self, name: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// Builder for library modules: `"name" => (arity, function)` entries.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => ($arity:expr, $item:expr)),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push($crate::lib_registry::LibraryEntry {
                name: $item_name,
                arity: $arity,
                func: $item,
            });
        )*
        module
    }};
}

impl Vm {
    /// Registers `module` as importable under its name. Like any module
    /// loader, its functions are installed on the first `import`.
    pub fn add_library(&mut self, module: LibraryModule) {
        let name = module.name;
        self.add_module_loader(name, move |vm, handle| {
            for entry in &module.entries {
                let func = entry.func;
                if vm
                    .set_module_func(handle, entry.name, entry.arity, func)
                    .is_err()
                {
                    warn!(module = module.name, function = entry.name, "library function not installed");
                }
            }
        });
    }

    /// Installs every function of `module` as a built-in global. Built-ins
    /// can't be reassigned by scripts.
    pub(crate) fn open_builtins(&mut self, module: &LibraryModule) {
        for entry in &module.entries {
            let value = self.native_function(entry.name, entry.arity, entry.func);
            self.globals.define_builtin(entry.name, value);
        }
    }
}
