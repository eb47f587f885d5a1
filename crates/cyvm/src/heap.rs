// Object heap
// Slot-based storage addressed by (index, generation). A freed slot bumps its
// generation so stale values never alias a newer object. Reachability is
// decided by mark & sweep over roots supplied by the VM; host-held values
// are kept alive by per-slot pin counts (the release obligation).

use crate::compiler::Chunk;
use crate::value::Value;
use crate::vm::Vm;
use smol_str::SmolStr;
use std::rc::Rc;

/// Native function signature used inside the VM.
pub type NativeFn = Rc<dyn Fn(&mut Vm, &[Value]) -> Value>;

/// Heap object address. `index` selects the slot, `generation` must match
/// the slot's current generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId {
    pub(crate) index: u32,
    pub(crate) generation: u16,
}

impl ObjectId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u16 {
        self.generation
    }
}

pub struct ScriptFunction {
    pub name: SmolStr,
    pub arity: u32,
    pub chunk: Rc<Chunk>,
}

pub struct NativeFunction {
    pub name: SmolStr,
    pub arity: u32,
    pub func: NativeFn,
}

pub enum HeapObject {
    String(SmolStr),
    List(Vec<Value>),
    Function(ScriptFunction),
    Native(NativeFunction),
}

impl HeapObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::List(_) => "list",
            HeapObject::Function(_) | HeapObject::Native(_) => "function",
        }
    }
}

struct Slot {
    generation: u16,
    pins: u32,
    marked: bool,
    object: Option<HeapObject>,
}

/// Why a release was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFault {
    /// The slot was freed (or reused) since the value was handed out.
    Stale,
    /// The object is live but carries no outstanding pin.
    NotPinned,
}

pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
    allocs_since_collect: usize,
    pub(crate) collections: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(64),
            free_list: Vec::new(),
            live: 0,
            allocs_since_collect: 0,
            collections: 0,
        }
    }

    /// O(1) insertion - reuse a free slot or append a new one
    pub fn alloc(&mut self, object: HeapObject) -> ObjectId {
        self.live += 1;
        self.allocs_since_collect += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.pins = 0;
            slot.marked = false;
            ObjectId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                pins: 0,
                marked: false,
                object: Some(object),
            });
            ObjectId {
                index,
                generation: 0,
            }
        }
    }

    #[inline]
    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.object.is_some())
    }

    #[inline]
    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.object.is_some())
    }

    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.slot(id).and_then(|slot| slot.object.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.slot_mut(id).and_then(|slot| slot.object.as_mut())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.slot(id).is_some()
    }

    pub fn get_str(&self, id: ObjectId) -> Option<&str> {
        match self.get(id)? {
            HeapObject::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Adds one unit of host ownership.
    pub fn pin(&mut self, id: ObjectId) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.pins += 1;
                true
            }
            None => false,
        }
    }

    /// Discharges one unit of host ownership, returning the remaining count.
    pub fn unpin(&mut self, id: ObjectId) -> Result<u32, ReleaseFault> {
        let slot = self.slot_mut(id).ok_or(ReleaseFault::Stale)?;
        if slot.pins == 0 {
            return Err(ReleaseFault::NotPinned);
        }
        slot.pins -= 1;
        Ok(slot.pins)
    }

    pub fn pins(&self, id: ObjectId) -> u32 {
        self.slot(id).map(|slot| slot.pins).unwrap_or(0)
    }

    pub fn live_objects(&self) -> usize {
        self.live
    }

    pub fn pinned_objects(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.object.is_some() && slot.pins > 0)
            .count()
    }

    #[inline]
    pub fn should_collect(&self, step: usize) -> bool {
        step > 0 && self.allocs_since_collect >= step
    }

    /// Mark from `roots` and every pinned slot, then free everything
    /// unmarked. Returns the number of objects freed.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        let mut gray: Vec<ObjectId> = roots.iter().filter_map(|v| v.as_object_id()).collect();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.object.is_some() && slot.pins > 0 {
                gray.push(ObjectId {
                    index: index as u32,
                    generation: slot.generation,
                });
            }
        }

        // Mark
        while let Some(id) = gray.pop() {
            let Some(slot) = self.slot_mut(id) else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            match &slot.object {
                Some(HeapObject::List(items)) => {
                    gray.extend(items.iter().filter_map(|v| v.as_object_id()));
                }
                Some(HeapObject::Function(func)) => {
                    gray.extend(func.chunk.constants.iter().filter_map(|v| v.as_object_id()));
                }
                _ => {}
            }
        }

        // Sweep
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                continue;
            }
            slot.object = None;
            slot.pins = 0;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index as u32);
            freed += 1;
        }

        self.live -= freed;
        self.allocs_since_collect = 0;
        self.collections += 1;
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
