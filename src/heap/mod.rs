//! Placed-resource heap sub-allocator
//!
//! Carves a fixed-size GPU heap into power-of-two blocks and hands out byte
//! offsets. The heap memory itself is never touched; only offsets and sizes
//! are tracked.

pub mod allocator;
pub mod config;
pub mod node_pool;
pub mod page_list;
pub mod shared;
pub mod size_class;
pub mod span;
pub mod stats;

pub use allocator::HeapAllocator;
pub use config::{HeapConfig, HeapPreset};
pub use shared::SharedHeapAllocator;
pub use size_class::{SizeClass, SizeClassTable};
pub use stats::{ClassStats, HeapCounters, HeapStats};
