//! Runtime configuration for a heap

/// When recursive sets become eligible for collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanPolicy {
    /// A deref that lowers an object's count to its recursive contribution
    /// checks the object's set right away.
    #[default]
    Eager,

    /// Such objects are queued and checked at the next
    /// [`Heap::safe_point`](crate::Heap::safe_point).
    SafePoint,
}

/// Configuration shared by every object allocated from a heap.
///
/// # Example
///
/// ```
/// use heartwood::{RuntimeConfig, ScanPolicy};
///
/// let config = RuntimeConfig::new()
///     .with_scan_policy(ScanPolicy::SafePoint)
///     .with_max_scan_objects(512);
/// assert_eq!(config.scan_policy, ScanPolicy::SafePoint);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// When cycle collection runs
    pub scan_policy: ScanPolicy,

    /// Upper bound on objects a single scan may visit
    pub max_scan_objects: usize,

    /// Whether storing an object into a member triggers a scan
    pub scan_on_assign: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_policy: ScanPolicy::Eager,
            max_scan_objects: 10_000,
            scan_on_assign: true,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different collection policy.
    pub fn with_scan_policy(self, scan_policy: ScanPolicy) -> Self {
        Self {
            scan_policy,
            ..self
        }
    }

    /// Limit the number of objects a single scan may visit.
    pub fn with_max_scan_objects(self, max_scan_objects: usize) -> Self {
        Self {
            max_scan_objects,
            ..self
        }
    }

    /// Only scan when asked to via [`Heap::scan`](crate::Heap::scan).
    pub fn without_assign_scan(self) -> Self {
        Self {
            scan_on_assign: false,
            ..self
        }
    }
}
