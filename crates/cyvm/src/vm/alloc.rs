// Embedded allocator gateway
// Raw, host-owned buffers allocated through the VM. Used when the host can
// only hand memory to scripts from inside the VM's own region (e.g. a WASM
// guest's linear memory). Not garbage collected; freeing is size-bearing.

use crate::vm::Vm;
use ahash::AHashMap;
use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;
use tracing::{error, warn};

/// Alignment of every gateway allocation.
pub const RAW_ALIGN: usize = 16;

pub(crate) struct RawAllocator {
    live: AHashMap<usize, usize>,
    bytes: usize,
    limit: usize,
}

impl RawAllocator {
    pub fn new(limit: usize) -> Self {
        RawAllocator {
            live: AHashMap::new(),
            bytes: 0,
            limit,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn allocations(&self) -> usize {
        self.live.len()
    }

    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return NonNull::<u128>::dangling().as_ptr() as *mut u8;
        }
        if self.bytes.saturating_add(size) > self.limit {
            warn!(size, live = self.bytes, limit = self.limit, "raw allocation over limit");
            return std::ptr::null_mut();
        }
        let Ok(layout) = Layout::from_size_align(size, RAW_ALIGN) else {
            return std::ptr::null_mut();
        };

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return ptr;
        }
        self.live.insert(ptr as usize, size);
        self.bytes += size;
        ptr
    }

    pub fn free(&mut self, ptr: *mut u8, size: usize) {
        if size == 0 || ptr.is_null() {
            return;
        }
        match self.live.get(&(ptr as usize)) {
            Some(&recorded) if recorded == size => {}
            Some(&recorded) => {
                error!(recorded, size, "raw free with mismatched size ignored");
                return;
            }
            None => {
                error!(?ptr, "raw free of unknown pointer ignored");
                return;
            }
        }

        self.live.remove(&(ptr as usize));
        self.bytes -= size;
        // SAFETY: ptr came from `alloc` with exactly this layout.
        unsafe { dealloc(ptr, Layout::from_size_align_unchecked(size, RAW_ALIGN)) };
    }
}

impl Drop for RawAllocator {
    fn drop(&mut self) {
        if self.live.is_empty() {
            return;
        }
        warn!(
            allocations = self.live.len(),
            bytes = self.bytes,
            "freeing raw allocations still live at VM destroy"
        );
        for (ptr, size) in self.live.drain() {
            // SAFETY: every entry was produced by `alloc` with this layout.
            unsafe {
                dealloc(
                    ptr as *mut u8,
                    Layout::from_size_align_unchecked(size, RAW_ALIGN),
                )
            };
        }
        self.bytes = 0;
    }
}

impl Vm {
    /// Allocates `size` bytes aligned to [`RAW_ALIGN`]. Returns null on
    /// exhaustion or when the configured limit would be exceeded.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        self.raw.alloc(size)
    }

    /// Frees a buffer from [`Vm::alloc`]; `size` must match the request.
    pub fn free(&mut self, ptr: *mut u8, size: usize) {
        self.raw.free(ptr, size)
    }
}
