//! Heap statistics
//!
//! [`HeapStats`] is a point-in-time snapshot of the allocator, serializable so
//! it can be dumped next to GPU memory reports.

use serde::Serialize;

/// Per-class block counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    /// Block size of the class in bytes
    pub block_size: u64,
    /// Blocks sitting on the free list
    pub free_blocks: usize,
    /// Blocks handed out from this class
    pub used_blocks: usize,
}

impl ClassStats {
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks as u64 * self.block_size
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_blocks as u64 * self.block_size
    }
}

/// Running counters, reset by `initialize`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapCounters {
    pub total_allocations: u64,
    pub total_frees: u64,
    pub span_allocations: u64,
    pub splits: u64,
    pub merges: u64,
    pub failed_allocations: u64,
    pub peak_used_bytes: u64,
}

/// Snapshot of a heap allocator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeapStats {
    pub arena_size: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    /// Bytes held by multi-block allocations (included in `used_bytes`)
    pub span_bytes: u64,
    pub live_allocations: usize,
    pub classes: Vec<ClassStats>,
    pub pool_chunks: usize,
    pub pool_capacity: usize,
    pub pool_spare: usize,
    pub counters: HeapCounters,
}

impl HeapStats {
    /// Size of the largest free block, 0 when nothing is free
    pub fn largest_free_block(&self) -> u64 {
        self.classes
            .iter()
            .rev()
            .find(|c| c.free_blocks > 0)
            .map(|c| c.block_size)
            .unwrap_or(0)
    }

    /// Fragmentation ratio (0.0 = all free memory in the largest block)
    pub fn fragmentation(&self) -> f32 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - (self.largest_free_block() as f32 / self.free_bytes as f32)
    }

    /// Fraction of the arena handed out
    pub fn utilization(&self) -> f32 {
        if self.arena_size == 0 {
            return 0.0;
        }
        self.used_bytes as f32 / self.arena_size as f32
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> String {
        // Plain data with string keys, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(classes: Vec<ClassStats>, free_bytes: u64) -> HeapStats {
        HeapStats {
            arena_size: 1024,
            free_bytes,
            used_bytes: 1024 - free_bytes,
            span_bytes: 0,
            live_allocations: 0,
            classes,
            pool_chunks: 1,
            pool_capacity: 128,
            pool_spare: 120,
            counters: HeapCounters::default(),
        }
    }

    #[test]
    fn test_fragmentation_single_block() {
        let s = stats(
            vec![
                ClassStats { block_size: 256, free_blocks: 0, used_blocks: 0 },
                ClassStats { block_size: 512, free_blocks: 1, used_blocks: 0 },
            ],
            512,
        );
        assert_eq!(s.largest_free_block(), 512);
        assert_eq!(s.fragmentation(), 0.0);
        assert_eq!(s.utilization(), 0.5);
    }

    #[test]
    fn test_fragmentation_scattered() {
        let s = stats(
            vec![
                ClassStats { block_size: 256, free_blocks: 2, used_blocks: 2 },
                ClassStats { block_size: 512, free_blocks: 0, used_blocks: 0 },
            ],
            512,
        );
        assert_eq!(s.largest_free_block(), 256);
        assert_eq!(s.fragmentation(), 0.5);
    }

    #[test]
    fn test_fragmentation_full_heap() {
        let s = stats(
            vec![ClassStats { block_size: 256, free_blocks: 0, used_blocks: 4 }],
            0,
        );
        assert_eq!(s.fragmentation(), 0.0);
        assert_eq!(s.largest_free_block(), 0);
    }

    #[test]
    fn test_class_bytes() {
        let c = ClassStats { block_size: 1024, free_blocks: 3, used_blocks: 2 };
        assert_eq!(c.free_bytes(), 3072);
        assert_eq!(c.used_bytes(), 2048);
    }

    #[test]
    fn test_stats_serializable() {
        let s = stats(
            vec![ClassStats { block_size: 256, free_blocks: 4, used_blocks: 0 }],
            1024,
        );
        let json = s.to_json();
        assert!(json.contains("\"arena_size\":1024"));
        assert!(json.contains("\"block_size\":256"));
        assert!(json.contains("\"peak_used_bytes\":0"));
    }
}
