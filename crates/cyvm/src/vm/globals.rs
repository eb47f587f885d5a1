use crate::value::Value;
use ahash::AHashMap;
use smol_str::SmolStr;

struct GlobalSlot {
    name: SmolStr,
    /// `None` until the first assignment executes.
    value: Option<Value>,
    builtin: bool,
}

/// The persistent global environment shared by every eval on one VM.
pub(crate) struct Globals {
    slots: Vec<GlobalSlot>,
    by_name: AHashMap<SmolStr, u32>,
}

impl Globals {
    pub fn new() -> Self {
        Globals {
            slots: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn declare(&mut self, name: SmolStr) -> u32 {
        if let Some(slot) = self.slot(&name) {
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.by_name.insert(name.clone(), slot);
        self.slots.push(GlobalSlot {
            name,
            value: None,
            builtin: false,
        });
        slot
    }

    pub fn define_builtin(&mut self, name: &str, value: Value) {
        let slot = self.declare(SmolStr::new(name));
        let entry = &mut self.slots[slot as usize];
        entry.value = Some(value);
        entry.builtin = true;
    }

    pub fn is_builtin(&self, slot: u32) -> bool {
        self.slots
            .get(slot as usize)
            .is_some_and(|entry| entry.builtin)
    }

    pub fn name(&self, slot: u32) -> &str {
        self.slots
            .get(slot as usize)
            .map(|entry| entry.name.as_str())
            .unwrap_or("?")
    }

    #[inline]
    pub fn get(&self, slot: u32) -> Option<Value> {
        self.slots.get(slot as usize).and_then(|entry| entry.value)
    }

    /// Returns false when the slot doesn't exist.
    #[inline]
    pub fn set(&mut self, slot: u32, value: Value) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(entry) => {
                entry.value = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots.iter().filter_map(|entry| entry.value)
    }
}
