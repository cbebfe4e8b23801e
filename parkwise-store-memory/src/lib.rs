//! In-process storage adapters for the parkwise core.
//!
//! Used by the command-line tool and by end-to-end tests. Data lives only as long as the
//! store value.

/// Session documents and device channels partitioned by lot.
pub mod sessions;
/// Per-lot tariff tables with a shared default.
pub mod tariffs;

pub use sessions::MemorySessionStore;
pub use tariffs::MemoryTariffStore;
