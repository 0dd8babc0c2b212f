//! Unified error handling for placeheap
//!
//! Every fallible operation of the heap returns a [`HeapError`]. Errors are
//! grouped into categories so callers can decide how to react:
//! - Configuration errors (bad arena size or configuration, lifecycle misuse)
//! - Exhaustion (no block large enough, node pool could not grow)
//! - Usage errors (bad size/alignment, double free), i.e. caller bugs
//! - Internal errors (invariant violations, poisoned locks)

use std::fmt;

/// Unified error type for placeheap
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    // ========== Configuration Errors ==========
    /// Arena size is zero or not a multiple of the largest block size
    #[error("Invalid arena size: {size} bytes (must be a positive multiple of {block_size})")]
    InvalidArenaSize { size: u64, block_size: u64 },

    /// Heap configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `initialize` called on a heap that is already live
    #[error("Heap already initialized")]
    AlreadyInitialized,

    /// Operation requires an initialized heap
    #[error("Heap not initialized")]
    NotInitialized,

    // ========== Exhaustion ==========
    /// No free block (or node storage) can satisfy the request
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // ========== Usage Errors ==========
    /// Requested size is zero or larger than the arena
    #[error("Invalid allocation size: {0}")]
    InvalidSize(u64),

    /// Alignment is neither 0/1 nor a power of two
    #[error("Invalid alignment: {0}. Must be 0, 1 or a power of two")]
    InvalidAlignment(u64),

    /// Alignment exceeds the natural alignment of the resolved block
    #[error("Alignment {alignment} cannot be satisfied by a {block_size}-byte block")]
    AlignmentUnsatisfiable { alignment: u64, block_size: u64 },

    /// Offset was never returned by `allocate` or has already been freed
    #[error("Double free or invalid offset: {0}")]
    DoubleFreeOrInvalidOffset(u64),

    // ========== Internal Errors ==========
    /// Bookkeeping inconsistency (indicates a bug)
    #[error("Heap invariant violated: {0}")]
    InvariantViolation(String),

    /// Lock poisoned (a thread panicked while holding the heap)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl HeapError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            HeapError::InvalidArenaSize { .. }
            | HeapError::InvalidConfiguration(_)
            | HeapError::AlreadyInitialized
            | HeapError::NotInitialized => ErrorCategory::Configuration,

            HeapError::OutOfMemory(_) => ErrorCategory::Exhaustion,

            HeapError::InvalidSize(_)
            | HeapError::InvalidAlignment(_)
            | HeapError::AlignmentUnsatisfiable { .. }
            | HeapError::DoubleFreeOrInvalidOffset(_) => ErrorCategory::Usage,

            HeapError::InvariantViolation(_) | HeapError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this error is recoverable
    ///
    /// Exhaustion can be retried after the caller frees something.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Exhaustion)
    }

    /// Check if this is a usage error (a bug in the caller)
    pub fn is_usage_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Usage)
    }

    /// Check if this is an internal error (a bug in the heap)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad arena size or configuration, lifecycle misuse
    Configuration,
    /// Arena or node pool exhausted, retry after freeing
    Exhaustion,
    /// Caller bug: bad request or double free
    Usage,
    /// Heap bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Exhaustion => write!(f, "Exhaustion"),
            ErrorCategory::Usage => write!(f, "Usage"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for HeapError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        HeapError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using HeapError
pub type HeapResult<T> = std::result::Result<T, HeapError>;

/// Create an out-of-memory error with context
///
/// # Examples
/// ```ignore
/// return Err(out_of_memory!("no free block of {} bytes", size));
/// ```
#[macro_export]
macro_rules! out_of_memory {
    ($msg:expr) => {
        $crate::error::HeapError::OutOfMemory($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::HeapError::OutOfMemory(format!($fmt, $($arg)*))
    };
}

/// Create an invariant-violation error with context
#[macro_export]
macro_rules! invariant_error {
    ($msg:expr) => {
        $crate::error::HeapError::InvariantViolation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::HeapError::InvariantViolation(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            HeapError::InvalidArenaSize { size: 3, block_size: 128 }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            HeapError::NotInitialized.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            HeapError::OutOfMemory("full".to_string()).category(),
            ErrorCategory::Exhaustion
        );
        assert_eq!(HeapError::InvalidSize(0).category(), ErrorCategory::Usage);
        assert_eq!(
            HeapError::DoubleFreeOrInvalidOffset(42).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            HeapError::InvariantViolation("bad".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(HeapError::OutOfMemory("full".to_string()).is_recoverable());

        assert!(!HeapError::InvalidSize(0).is_recoverable());
        assert!(!HeapError::DoubleFreeOrInvalidOffset(0).is_recoverable());
        assert!(!HeapError::AlreadyInitialized.is_recoverable());
    }

    #[test]
    fn test_usage_and_internal_helpers() {
        assert!(HeapError::InvalidAlignment(3).is_usage_error());
        assert!(HeapError::AlignmentUnsatisfiable {
            alignment: 1024,
            block_size: 256
        }
        .is_usage_error());
        assert!(!HeapError::OutOfMemory("x".to_string()).is_usage_error());

        assert!(HeapError::LockPoisoned("x".to_string()).is_internal_error());
        assert!(!HeapError::InvalidSize(0).is_internal_error());
    }

    #[test]
    fn test_error_display() {
        let err = HeapError::InvalidArenaSize {
            size: 1000,
            block_size: 131072,
        };
        assert_eq!(
            err.to_string(),
            "Invalid arena size: 1000 bytes (must be a positive multiple of 131072)"
        );

        let err = HeapError::AlignmentUnsatisfiable {
            alignment: 4096,
            block_size: 256,
        };
        assert_eq!(
            err.to_string(),
            "Alignment 4096 cannot be satisfied by a 256-byte block"
        );

        let err = HeapError::DoubleFreeOrInvalidOffset(512);
        assert_eq!(err.to_string(), "Double free or invalid offset: 512");
    }

    #[test]
    fn test_macros() {
        let err = out_of_memory!("no block");
        assert!(matches!(err, HeapError::OutOfMemory(_)));

        let err = out_of_memory!("need {} bytes", 256);
        assert_eq!(err.to_string(), "Out of memory: need 256 bytes");

        let err = invariant_error!("class {} broken", 3);
        assert!(matches!(err, HeapError::InvariantViolation(_)));
        assert!(err.is_internal_error());
    }

    #[test]
    fn test_poison_error_conversion() {
        use std::sync::{Arc, Mutex};

        let lock = Arc::new(Mutex::new(0u32));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: HeapError = lock.lock().unwrap_err().into();
        assert!(matches!(err, HeapError::LockPoisoned(_)));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Configuration.to_string(), "Configuration");
        assert_eq!(ErrorCategory::Exhaustion.to_string(), "Exhaustion");
        assert_eq!(ErrorCategory::Usage.to_string(), "Usage");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
    }
}
