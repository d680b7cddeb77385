//! Macros for kiln-memory

/// Enforce a lifecycle contract.
///
/// A violated contract is a programmer error, not a runtime condition: it is
/// always logged at `error` level and panics when `debug_assertions` are on.
/// Release builds log and continue, so callers must leave shared state
/// consistent *before* invoking this macro. A thread that is already
/// unwinding only logs.
macro_rules! lifecycle_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            ::tracing::error!($($arg)+);
            if cfg!(debug_assertions) && !::std::thread::panicking() {
                panic!($($arg)+);
            }
        }
    };
}

pub(crate) use lifecycle_assert;

/// Build an [`AllocationSite`](crate::allocator::AllocationSite) for the
/// current source location.
///
/// # Examples
/// ```
/// use kiln_memory::allocation_site;
///
/// let site = allocation_site!("mesh-buffer");
/// assert_eq!(site.name, Some("mesh-buffer"));
/// assert!(site.file_name.is_some());
/// ```
#[macro_export]
macro_rules! allocation_site {
    () => {
        $crate::allocator::AllocationSite {
            name: None,
            file_name: Some(file!()),
            line: line!(),
        }
    };
    ($name:expr) => {
        $crate::allocator::AllocationSite {
            name: Some($name),
            file_name: Some(file!()),
            line: line!(),
        }
    };
}
