//! Size class table
//!
//! Maps request sizes onto the fixed ladder of block sizes. Every class is
//! exactly twice the size of the one below it, so splitting a class-`n` block
//! yields two class-`n-1` buddies.

use crate::error::{HeapError, HeapResult};

/// Smallest block size of the reference table (256 bytes)
pub const DEFAULT_MIN_BLOCK_SIZE: u64 = 256;

/// Number of classes in the reference table (256 B .. 128 KiB)
pub const DEFAULT_CLASS_COUNT: usize = 10;

/// Upper bound on the class count, keeps ordinals in a `u8`
pub const MAX_CLASS_COUNT: usize = 32;

/// Ordinal of a size class, `0` being the smallest block size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SizeClass(u8);

impl SizeClass {
    /// Create a size class from its ordinal
    ///
    /// `index` must fit in a `u8`; tables never hold more than
    /// [`MAX_CLASS_COUNT`] classes.
    pub const fn new(index: usize) -> Self {
        debug_assert!(index <= u8::MAX as usize, "size class ordinal out of range");
        SizeClass(index as u8)
    }

    /// Like [`SizeClass::new`], but `None` when `index` does not fit
    pub fn try_new(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(SizeClass)
    }

    /// Ordinal of this class
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The class whose blocks split into two blocks of this class
    pub const fn parent(self) -> SizeClass {
        SizeClass(self.0 + 1)
    }

    /// The class produced by splitting a block of this class
    ///
    /// Must not be called on class 0.
    pub const fn child(self) -> SizeClass {
        SizeClass(self.0 - 1)
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "class {}", self.0)
    }
}

/// Ascending table of block sizes, each double the previous
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    min_block_size: u64,
    class_count: usize,
}

impl Default for SizeClassTable {
    fn default() -> Self {
        SizeClassTable {
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            class_count: DEFAULT_CLASS_COUNT,
        }
    }
}

impl SizeClassTable {
    /// Build a table of `class_count` classes starting at `min_block_size`
    ///
    /// # Errors
    /// - `min_block_size` is not a power of two
    /// - `class_count` is zero or above [`MAX_CLASS_COUNT`]
    /// - the largest class would overflow `u64`
    pub fn new(min_block_size: u64, class_count: usize) -> HeapResult<Self> {
        if !min_block_size.is_power_of_two() {
            return Err(HeapError::InvalidConfiguration(format!(
                "min block size must be a power of two, got {}",
                min_block_size
            )));
        }

        if class_count == 0 || class_count > MAX_CLASS_COUNT {
            return Err(HeapError::InvalidConfiguration(format!(
                "class count must be in 1..={}, got {}",
                MAX_CLASS_COUNT, class_count
            )));
        }

        let shift = (class_count - 1) as u32;
        if min_block_size.leading_zeros() < shift {
            return Err(HeapError::InvalidConfiguration(format!(
                "largest class overflows: {} << {}",
                min_block_size, shift
            )));
        }

        Ok(SizeClassTable {
            min_block_size,
            class_count,
        })
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.class_count
    }

    /// Always false: a table has at least one class
    pub fn is_empty(&self) -> bool {
        self.class_count == 0
    }

    /// Smallest class
    pub fn smallest(&self) -> SizeClass {
        SizeClass::new(0)
    }

    /// Largest class, the one the arena is tiled with
    pub fn largest(&self) -> SizeClass {
        SizeClass::new(self.class_count - 1)
    }

    /// Block size in bytes of a class
    pub fn block_size(&self, class: SizeClass) -> u64 {
        debug_assert!(class.index() < self.class_count);
        self.min_block_size << class.index()
    }

    /// Block size of the largest class
    pub fn max_block_size(&self) -> u64 {
        self.block_size(self.largest())
    }

    /// Smallest class whose blocks hold `size` bytes
    ///
    /// Returns `None` for zero or for sizes above the largest class (those take
    /// the multi-block path).
    pub fn resolve(&self, size: u64) -> Option<SizeClass> {
        if size == 0 || size > self.max_block_size() {
            return None;
        }

        if size <= self.min_block_size {
            return Some(self.smallest());
        }

        // ceil(log2(size / min)) without floating point
        let blocks = (size + self.min_block_size - 1) / self.min_block_size;
        let index = 64 - (blocks - 1).leading_zeros() as usize;
        Some(SizeClass::new(index))
    }

    /// All classes in ascending order
    pub fn classes(&self) -> impl DoubleEndedIterator<Item = SizeClass> + ExactSizeIterator {
        (0..self.class_count).map(SizeClass::new)
    }

    /// Offset of the other half of the split that produced `offset`
    pub fn buddy_of(&self, offset: u64, class: SizeClass) -> u64 {
        offset ^ self.block_size(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_new_rejects_wide_ordinals() {
        assert_eq!(SizeClass::try_new(9), Some(SizeClass::new(9)));
        assert_eq!(SizeClass::try_new(255).map(SizeClass::index), Some(255));
        assert_eq!(SizeClass::try_new(256), None);
        assert_eq!(SizeClass::try_new(300), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "size class ordinal out of range")]
    fn test_new_rejects_wide_ordinal() {
        let _ = SizeClass::new(300);
    }

    #[test]
    fn test_reference_table() {
        let table = SizeClassTable::default();
        assert_eq!(table.len(), 10);
        assert_eq!(table.block_size(SizeClass::new(0)), 256);
        assert_eq!(table.block_size(SizeClass::new(1)), 512);
        assert_eq!(table.block_size(SizeClass::new(2)), 1024);
        assert_eq!(table.max_block_size(), 128 * 1024);
    }

    #[test]
    fn test_every_class_doubles() {
        let table = SizeClassTable::default();
        for class in table.classes().skip(1) {
            assert_eq!(
                table.block_size(class),
                2 * table.block_size(class.child())
            );
        }
    }

    #[test]
    fn test_resolve_exact_sizes() {
        let table = SizeClassTable::default();
        assert_eq!(table.resolve(256), Some(SizeClass::new(0)));
        assert_eq!(table.resolve(512), Some(SizeClass::new(1)));
        assert_eq!(table.resolve(4096), Some(SizeClass::new(4)));
        assert_eq!(table.resolve(128 * 1024), Some(SizeClass::new(9)));
    }

    #[test]
    fn test_resolve_intermediate_sizes() {
        let table = SizeClassTable::default();
        assert_eq!(table.resolve(1), Some(SizeClass::new(0)));
        assert_eq!(table.resolve(100), Some(SizeClass::new(0)));
        assert_eq!(table.resolve(257), Some(SizeClass::new(1)));
        assert_eq!(table.resolve(513), Some(SizeClass::new(2)));
        assert_eq!(table.resolve(64 * 1024 + 1), Some(SizeClass::new(9)));
    }

    #[test]
    fn test_resolve_out_of_range() {
        let table = SizeClassTable::default();
        assert_eq!(table.resolve(0), None);
        assert_eq!(table.resolve(128 * 1024 + 1), None);
        assert_eq!(table.resolve(u64::MAX), None);
    }

    #[test]
    fn test_resolve_matches_linear_scan() {
        let table = SizeClassTable::new(64, 8).unwrap();
        for size in 1..=table.max_block_size() {
            let linear = table.classes().find(|&c| table.block_size(c) >= size);
            assert_eq!(table.resolve(size), linear, "size {}", size);
        }
    }

    #[test]
    fn test_invalid_tables() {
        assert!(matches!(
            SizeClassTable::new(300, 4),
            Err(HeapError::InvalidConfiguration(_))
        ));
        assert!(SizeClassTable::new(256, 0).is_err());
        assert!(SizeClassTable::new(256, MAX_CLASS_COUNT + 1).is_err());
        assert!(SizeClassTable::new(1 << 40, 30).is_err());
        assert!(SizeClassTable::new(1, 1).is_ok());
    }

    #[test]
    fn test_buddy_offsets() {
        let table = SizeClassTable::default();
        let c0 = SizeClass::new(0);
        assert_eq!(table.buddy_of(0, c0), 256);
        assert_eq!(table.buddy_of(256, c0), 0);
        assert_eq!(table.buddy_of(1024, SizeClass::new(1)), 1536);
        assert_eq!(table.buddy_of(128 * 1024, SizeClass::new(8)), 192 * 1024);
    }

    #[test]
    fn test_class_navigation() {
        let c = SizeClass::new(3);
        assert_eq!(c.parent(), SizeClass::new(4));
        assert_eq!(c.child(), SizeClass::new(2));
        assert_eq!(c.to_string(), "class 3");
    }
}
