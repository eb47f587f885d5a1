/// VM limits and tuning knobs.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmOption {
    /// Maximum number of value-stack slots.
    pub max_stack_size: usize,
    /// Maximum script call nesting depth.
    pub max_call_depth: usize,
    /// Allocations between automatic collections at interpreter safe points.
    /// 0 disables allocation-driven collection.
    pub gc_step_objects: usize,
    /// Collect when a release drops an object's last pin.
    pub collect_on_release: bool,
    /// Upper bound on live bytes handed out by the allocator gateway.
    pub max_raw_alloc_bytes: usize,
    /// Name used for eval sources in error reports.
    pub chunk_name: String,
}

impl Default for VmOption {
    fn default() -> Self {
        Self {
            max_stack_size: 1_000_000,
            max_call_depth: 256,
            gc_step_objects: 4096,
            collect_on_release: true,
            max_raw_alloc_bytes: isize::MAX as usize,
            chunk_name: String::from("<eval>"),
        }
    }
}
