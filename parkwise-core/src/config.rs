//! Runtime tuning for [`SessionManager`](crate::service::SessionManager).
//!
//! The core never reads files; the binary builds a [`ManagerConfig`] and hands it in.

use std::time::Duration;

/// Default window a device has to answer a scan.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(7);

/// Default lifetime of a cached lot tariff.
pub const DEFAULT_TARIFF_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Tuning knobs for the session manager.
pub struct ManagerConfig {
    /// How long a scan may take before falling back to manual entry.
    pub scan_timeout: Duration,
    /// How long a lot's tariff is reused before it is read again.
    pub tariff_cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            tariff_cache_ttl: DEFAULT_TARIFF_CACHE_TTL,
        }
    }
}
