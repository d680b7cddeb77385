//! Standalone error types for kiln-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions. Lifecycle
//! contract violations (destroying a ready allocator, double registration)
//! are not represented here: they are assertions, logged and fatal in debug
//! builds.

use core::alloc::Layout;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Allocation Errors ---
    #[error("Memory allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed { size: usize, align: usize },

    #[error("Invalid memory layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Size overflow during operation: {operation}")]
    SizeOverflow { operation: String },

    #[error("Invalid alignment: {alignment}")]
    InvalidAlignment { alignment: usize },

    #[error("Allocation exceeds maximum size: {size} bytes (max: {max_size})")]
    ExceedsMaxSize { size: usize, max_size: usize },

    // --- Pool Errors ---
    #[error("Memory pool '{pool_id}' exhausted (capacity: {capacity})")]
    PoolExhausted { pool_id: String, capacity: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // --- Lifecycle Errors ---
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    // --- General Errors ---
    #[error("Not found: {reason}")]
    NotFound { reason: String },

    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },
}

impl MemoryError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::AllocationFailed { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "MEM:ALLOC:FAILED",
            Self::InvalidLayout { .. } => "MEM:ALLOC:LAYOUT",
            Self::SizeOverflow { .. } => "MEM:ALLOC:OVERFLOW",
            Self::InvalidAlignment { .. } => "MEM:ALLOC:ALIGN",
            Self::ExceedsMaxSize { .. } => "MEM:ALLOC:MAX",
            Self::PoolExhausted { .. } => "MEM:POOL:EXHAUSTED",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::InvalidState { .. } => "MEM:LIFECYCLE:STATE",
            Self::NotFound { .. } => "MEM:NOT_FOUND",
            Self::InvalidOperation { .. } => "MEM:INVALID_OP",
        }
    }

    // ============================================================================
    // Convenience Constructors - Allocation Errors
    // ============================================================================

    /// Create allocation failed error
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        Self::AllocationFailed { size, align }
    }

    /// Create allocation failed error from layout
    pub fn allocation_failed_with_layout(layout: Layout) -> Self {
        Self::allocation_failed(layout.size(), layout.align())
    }

    /// Create invalid layout error
    pub fn invalid_layout(reason: &str) -> Self {
        Self::InvalidLayout {
            reason: reason.to_string(),
        }
    }

    /// Create size overflow error
    pub fn size_overflow(operation: &str) -> Self {
        Self::SizeOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create invalid alignment error
    pub fn invalid_alignment(alignment: usize) -> Self {
        Self::InvalidAlignment { alignment }
    }

    /// Create allocation too large error
    pub fn allocation_too_large(size: usize, max_size: usize) -> Self {
        Self::ExceedsMaxSize { size, max_size }
    }

    // --- Pool Errors ---

    /// Create pool exhausted error
    pub fn pool_exhausted(pool_id: &str, capacity: usize) -> Self {
        warn!(pool = pool_id, capacity, "memory pool exhausted");

        Self::PoolExhausted {
            pool_id: pool_id.to_string(),
            capacity,
        }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    // --- Lifecycle Errors ---

    /// Create invalid state error
    pub fn invalid_state(reason: &str) -> Self {
        Self::InvalidState {
            reason: reason.to_string(),
        }
    }

    // --- General Errors ---

    /// Create not found error
    pub fn not_found(reason: &str) -> Self {
        Self::NotFound {
            reason: reason.to_string(),
        }
    }

    /// Create invalid operation error
    pub fn invalid_operation(reason: &str) -> Self {
        Self::InvalidOperation {
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

/// Allocation-path aliases used by the allocator module
pub type AllocError = MemoryError;
pub type AllocResult<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_error_creation() {
        let error = MemoryError::allocation_failed(1024, 8);
        assert!(error.to_string().contains("1024"));
    }

    #[test]
    fn test_error_with_layout() {
        let layout = Layout::new::<u64>();
        let error = MemoryError::allocation_failed_with_layout(layout);
        assert!(error.to_string().contains(&layout.size().to_string()));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MemoryError::allocation_failed(1024, 8).code(),
            "MEM:ALLOC:FAILED"
        );
        assert_eq!(
            MemoryError::pool_exhausted("test", 100).code(),
            "MEM:POOL:EXHAUSTED"
        );
        assert_eq!(
            MemoryError::invalid_state("twice").code(),
            "MEM:LIFECYCLE:STATE"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(MemoryError::pool_exhausted("test", 100).is_retryable());
        assert!(!MemoryError::invalid_alignment(3).is_retryable());
        assert!(!MemoryError::not_found("instance").is_retryable());
    }
}
