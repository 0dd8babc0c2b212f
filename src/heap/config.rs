//! Heap configuration
//!
//! Describes the size-class ladder and pool limits of a [`HeapAllocator`].
//! The defaults reproduce the reference table (256 B .. 128 KiB, ten classes)
//! with coalescing enabled and an unbounded node pool.
//!
//! # Environment Variables
//!
//! - `PLACEHEAP_MIN_BLOCK_SIZE`: smallest block size in bytes
//! - `PLACEHEAP_CLASS_COUNT`: number of size classes
//! - `PLACEHEAP_MAX_POOL_CHUNKS`: node pool chunk limit (`0` or unset = unbounded)
//! - `PLACEHEAP_COALESCE`: `true`/`false`, merge buddies on free
//!
//! [`HeapAllocator`]: super::HeapAllocator

use super::size_class::{SizeClassTable, DEFAULT_CLASS_COUNT, DEFAULT_MIN_BLOCK_SIZE};
use crate::error::{HeapError, HeapResult};
use serde::{Deserialize, Serialize};

const MIN_BLOCK_SIZE_ENV: &str = "PLACEHEAP_MIN_BLOCK_SIZE";
const CLASS_COUNT_ENV: &str = "PLACEHEAP_CLASS_COUNT";
const MAX_POOL_CHUNKS_ENV: &str = "PLACEHEAP_MAX_POOL_CHUNKS";
const COALESCE_ENV: &str = "PLACEHEAP_COALESCE";

/// Configuration for a heap allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Block size of the smallest class, power of two
    pub min_block_size: u64,
    /// Number of size classes; each doubles the previous
    pub class_count: usize,
    /// Upper bound on node pool chunks, `None` for unbounded
    pub max_pool_chunks: Option<usize>,
    /// Merge free buddies back into their parent on free
    pub coalesce: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            class_count: DEFAULT_CLASS_COUNT,
            max_pool_chunks: None,
            coalesce: true,
        }
    }
}

/// Preset size-class ladders for common heap usages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapPreset {
    /// 256 B .. 128 KiB, the reference table
    Reference,
    /// 64 B .. 128 KiB, for many small constant buffers
    FineGrained,
    /// 64 KiB .. 8 MiB, matching the 64 KiB placement alignment of GPU resources
    PlacedResources,
}

impl HeapPreset {
    /// Smallest block size for this preset
    pub fn min_block_size(self) -> u64 {
        match self {
            HeapPreset::Reference => DEFAULT_MIN_BLOCK_SIZE,
            HeapPreset::FineGrained => 64,
            HeapPreset::PlacedResources => 64 * 1024,
        }
    }

    /// Number of classes for this preset
    pub fn class_count(self) -> usize {
        match self {
            HeapPreset::Reference => DEFAULT_CLASS_COUNT,
            HeapPreset::FineGrained => 12,
            HeapPreset::PlacedResources => 8,
        }
    }
}

impl HeapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a preset
    pub fn from_preset(preset: HeapPreset) -> Self {
        HeapConfig {
            min_block_size: preset.min_block_size(),
            class_count: preset.class_count(),
            ..Self::default()
        }
    }

    /// Set the smallest block size
    pub fn with_min_block_size(mut self, min_block_size: u64) -> Self {
        self.min_block_size = min_block_size;
        self
    }

    /// Set the number of size classes
    pub fn with_class_count(mut self, class_count: usize) -> Self {
        self.class_count = class_count;
        self
    }

    /// Limit the node pool to `max` chunks
    pub fn with_max_pool_chunks(mut self, max: Option<usize>) -> Self {
        self.max_pool_chunks = max;
        self
    }

    /// Enable or disable buddy coalescing on free
    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Check the configuration and build its size-class table
    pub fn validate(&self) -> HeapResult<SizeClassTable> {
        if self.max_pool_chunks == Some(0) {
            return Err(HeapError::InvalidConfiguration(
                "max_pool_chunks must be at least 1".to_string(),
            ));
        }
        SizeClassTable::new(self.min_block_size, self.class_count)
    }

    /// Block size of the largest class; arena sizes must be a multiple of it
    pub fn max_block_size(&self) -> HeapResult<u64> {
        Ok(self.validate()?.max_block_size())
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> HeapResult<Self> {
        let config: HeapConfig = serde_json::from_str(json)
            .map_err(|e| HeapError::InvalidConfiguration(format!("bad JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> HeapResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HeapError::InvalidConfiguration(format!("cannot serialize config: {}", e)))
    }

    /// Default configuration with `PLACEHEAP_*` environment overrides applied
    pub fn from_env() -> HeapResult<Self> {
        Self::default().apply_env()
    }

    /// Apply `PLACEHEAP_*` environment overrides on top of `self`
    pub fn apply_env(mut self) -> HeapResult<Self> {
        if let Some(value) = read_env(MIN_BLOCK_SIZE_ENV) {
            self.min_block_size = parse_env(MIN_BLOCK_SIZE_ENV, &value)?;
        }

        if let Some(value) = read_env(CLASS_COUNT_ENV) {
            self.class_count = parse_env(CLASS_COUNT_ENV, &value)?;
        }

        if let Some(value) = read_env(MAX_POOL_CHUNKS_ENV) {
            let max: usize = parse_env(MAX_POOL_CHUNKS_ENV, &value)?;
            self.max_pool_chunks = if max == 0 { None } else { Some(max) };
        }

        if let Some(value) = read_env(COALESCE_ENV) {
            self.coalesce = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(HeapError::InvalidConfiguration(format!(
                        "{}: expected a boolean, got {:?}",
                        COALESCE_ENV, value
                    )))
                }
            };
        }

        self.validate()?;
        Ok(self)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> HeapResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| HeapError::InvalidConfiguration(format!("{}={:?}: {}", name, value, e)))
}
