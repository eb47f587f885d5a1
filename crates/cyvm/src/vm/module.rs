// Module registrar
//
// A module name moves through: Registered (loader stored) -> Loading (loader
// running with a live ModuleHandle) -> Loaded (function table sealed).
// Loaders run lazily, at most once per VM, when a script first imports the
// name. A handle is only valid while its module is Loading; sealing bumps
// the module generation so later uses are rejected.

use crate::compiler::MAX_CALL_ARGS;
use crate::value::Value;
use crate::vm::{CyError, CyResult, Vm};
use ahash::AHashMap;
use smol_str::SmolStr;
use tracing::{debug, error, warn};

pub type ModuleLoader = Box<dyn FnOnce(&mut Vm, ModuleHandle)>;

/// Transient handle to a module being populated by its loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHandle {
    index: u32,
    generation: u32,
}

impl ModuleHandle {
    /// Packs the handle into a non-zero integer, suitable for an opaque pointer.
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        let index = (raw & 0xFFFF_FFFF) as u32;
        if index == 0 {
            return None;
        }
        Some(ModuleHandle {
            index: index - 1,
            generation: (raw >> 32) as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Registered,
    Loading,
    Loaded,
}

enum ModuleState {
    Registered(ModuleLoader),
    Loading,
    Loaded,
}

struct ModuleEntry {
    name: SmolStr,
    state: ModuleState,
    functions: AHashMap<SmolStr, Value>,
    generation: u32,
}

pub(crate) struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
    by_name: AHashMap<SmolStr, u32>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            entries: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    pub fn function(&self, module: u32, name: &str) -> Option<Value> {
        self.entries
            .get(module as usize)
            .and_then(|entry| entry.functions.get(name).copied())
    }

    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        let index = *self.by_name.get(name)?;
        let entry = self.entries.get(index as usize)?;
        Some(match entry.state {
            ModuleState::Registered(_) => ModuleStatus::Registered,
            ModuleState::Loading => ModuleStatus::Loading,
            ModuleState::Loaded => ModuleStatus::Loaded,
        })
    }

    /// Every native function value held by a module table (GC roots).
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries
            .iter()
            .flat_map(|entry| entry.functions.values().copied())
    }

    fn loading_entry_mut(&mut self, handle: ModuleHandle) -> Option<&mut ModuleEntry> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|entry| {
                entry.generation == handle.generation
                    && matches!(entry.state, ModuleState::Loading)
            })
    }
}

impl Vm {
    /// Registers a loader for `name`. The loader runs on the first
    /// `import name` evaluated by this VM.
    pub fn add_module_loader<F>(&mut self, name: &str, loader: F)
    where
        F: FnOnce(&mut Vm, ModuleHandle) + 'static,
    {
        let loader: ModuleLoader = Box::new(loader);

        if let Some(&index) = self.modules.by_name.get(name) {
            let entry = &mut self.modules.entries[index as usize];
            if matches!(entry.state, ModuleState::Registered(_)) {
                debug!(module = name, "replacing pending module loader");
                entry.state = ModuleState::Registered(loader);
            } else {
                warn!(module = name, "module already loaded, loader ignored");
            }
            return;
        }

        let index = self.modules.entries.len() as u32;
        let name = SmolStr::new(name);
        self.modules.by_name.insert(name.clone(), index);
        self.modules.entries.push(ModuleEntry {
            name,
            state: ModuleState::Registered(loader),
            functions: AHashMap::new(),
            generation: 0,
        });
    }

    /// Installs a native function into a module that is currently loading.
    pub fn set_module_func<F>(
        &mut self,
        module: ModuleHandle,
        name: &str,
        arity: u32,
        func: F,
    ) -> CyResult<()>
    where
        F: Fn(&mut Vm, &[Value]) -> Value + 'static,
    {
        if self.modules.loading_entry_mut(module).is_none() {
            error!(?module, function = name, "module handle used outside of its loader");
            return Err(CyError::InvalidModuleHandle);
        }

        if arity as usize > MAX_CALL_ARGS {
            warn!(
                function = name,
                arity,
                max = MAX_CALL_ARGS,
                "module function takes more parameters than a call can pass"
            );
        }
        let value = self.native_function(name, arity, func);
        let Some(entry) = self.modules.loading_entry_mut(module) else {
            return Err(CyError::InvalidModuleHandle);
        };
        if entry.functions.insert(SmolStr::new(name), value).is_some() {
            warn!(module = %entry.name, "module function registered twice, keeping the last one");
        }
        Ok(())
    }

    pub fn module_status(&self, name: &str) -> Option<ModuleStatus> {
        self.modules.status(name)
    }

    /// Resolves `name` for an import, running its loader on first use.
    pub(crate) fn load_module(&mut self, name: &str) -> Result<u32, String> {
        let Some(&index) = self.modules.by_name.get(name) else {
            return Err(format!("Unknown module `{}`.", name));
        };

        let entry = &mut self.modules.entries[index as usize];
        match std::mem::replace(&mut entry.state, ModuleState::Loading) {
            ModuleState::Loaded => {
                entry.state = ModuleState::Loaded;
                Ok(index)
            }
            ModuleState::Loading => Err(format!("Cyclic import of module `{}`.", name)),
            ModuleState::Registered(loader) => {
                let handle = ModuleHandle {
                    index,
                    generation: entry.generation,
                };
                debug!(module = name, "invoking module loader");
                loader(self, handle);

                let entry = &mut self.modules.entries[index as usize];
                entry.state = ModuleState::Loaded;
                entry.generation = entry.generation.wrapping_add(1);
                debug!(
                    module = name,
                    functions = entry.functions.len(),
                    "module sealed"
                );
                Ok(index)
            }
        }
    }
}
