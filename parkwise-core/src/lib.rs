//! Core types and service wiring for the parkwise parking lot manager.

/// Expiring values used for per-lot caches.
pub mod cache;
/// Runtime tuning of the session manager.
pub mod config;
/// Lot metadata and the registry binding lots to their device endpoints.
pub mod lot;
/// Identifiers and value types shared by all crates.
pub mod model;
/// Traits describing storage, device and clock collaborators.
pub mod ports;
/// Revenue and occupancy reports.
pub mod report;
/// Scan coordination with lane devices.
pub mod scan;
/// High-level service facade used by clients.
pub mod service;
/// Vehicle sessions and their lifecycle.
pub mod session;
/// Tariff tables and fee computation.
pub mod tariff;

pub use cache::*;
pub use config::*;
pub use lot::*;
pub use model::*;
pub use ports::*;
pub use report::*;
pub use scan::*;
pub use service::*;
pub use session::*;
pub use tariff::*;
