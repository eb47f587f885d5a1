pub mod test_ffi;
pub mod test_heap;
pub mod test_module;
pub mod test_value;
#[cfg(feature = "serde")]
pub mod test_serde;
