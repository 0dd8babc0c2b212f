//! placeheap - placed-resource heap sub-allocator
//!
//! Hands out aligned byte offsets inside a fixed-size GPU heap, using a
//! power-of-two size-class ladder with buddy splitting and coalescing.
//! Only offsets are managed; mapping them onto real device memory is the
//! caller's business.

pub mod error;
pub mod heap;
pub mod logging;

pub use error::{ErrorCategory, HeapError, HeapResult};
pub use heap::{
    HeapAllocator, HeapConfig, HeapPreset, HeapStats, SharedHeapAllocator, SizeClass,
    SizeClassTable,
};
pub use logging::{init_logging_default, init_logging_from_env, LoggingConfig, LoggingError};
