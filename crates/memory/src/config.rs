//! Configuration for the allocator manager
//!
//! Follows the preset pattern used across the crate: `Default` for general
//! use, `debug()` for instrumentation-heavy builds and `production()` for
//! shipping builds. Call [`ManagerConfig::validate`] before handing a custom
//! configuration to [`AllocatorManager::new`](crate::allocator::AllocatorManager::new).

use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};
use crate::records::RecordMode;

/// Upper bound for a memory guard; larger guards are almost certainly a typo.
pub const MAX_GUARD_SIZE: usize = 4096;

/// Configuration for [`AllocatorManager`](crate::allocator::AllocatorManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Turn profiling on for every allocator as it registers
    pub default_profiling: bool,
    /// Record mode used by [`AllocationRecords::from_config`](crate::records::AllocationRecords::from_config)
    pub default_record_mode: RecordMode,
    /// Guard size used by [`AllocationRecords::from_config`](crate::records::AllocationRecords::from_config)
    pub default_guard_size: usize,
    /// Log allocators still registered when the manager shuts down
    pub report_leaked_allocators: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_profiling: false,
            default_record_mode: RecordMode::NoRecords,
            default_guard_size: 0,
            report_leaked_allocators: true,
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug configuration - every allocator is profiled with full records
    pub fn debug() -> Self {
        Self {
            default_profiling: true,
            default_record_mode: RecordMode::Full,
            default_guard_size: 16,
            report_leaked_allocators: true,
        }
    }

    /// Production configuration - no instrumentation on the hot path
    pub fn production() -> Self {
        Self {
            default_profiling: false,
            default_record_mode: RecordMode::NoRecords,
            default_guard_size: 0,
            report_leaked_allocators: false,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> MemoryResult<()> {
        debug!("validating allocator manager configuration");

        if self.default_guard_size > MAX_GUARD_SIZE {
            return Err(MemoryError::invalid_config(&format!(
                "default_guard_size {} exceeds {MAX_GUARD_SIZE}",
                self.default_guard_size
            )));
        }

        if self.default_guard_size > 0 && self.default_record_mode == RecordMode::NoRecords {
            return Err(MemoryError::invalid_config(
                "default_guard_size requires a record mode other than NoRecords",
            ));
        }

        if self.default_profiling && self.default_record_mode == RecordMode::NoRecords {
            warn!("default_profiling is on but records are disabled; events will be dropped");
        }

        Ok(())
    }
}
