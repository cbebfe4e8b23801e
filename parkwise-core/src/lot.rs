//! Registry of lots and the companion device endpoint bound to each.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::LotId;
use crate::ports::DevicePort;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Static description of a parking lot.
pub struct Lot {
    /// Unique identifier.
    pub id: LotId,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Number of bays.
    pub capacity: u32,
    /// Soft-delete flag; inactive lots accept no new work.
    pub active: bool,
}

/// A lot together with the device endpoint that prints its slips and opens its barriers.
pub struct LotBinding {
    /// Lot metadata.
    pub lot: Lot,
    /// Companion endpoint, if the lot has one.
    pub device: Option<Arc<dyn DevicePort>>,
}

impl fmt::Debug for LotBinding {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LotBinding")
            .field("lot", &self.lot)
            .field("device", &self.device.is_some())
            .finish()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown or inactive lot: {0}")]
/// The lot is not registered or has been deactivated.
pub struct UnknownLot(pub LotId);

/// Registry that resolves lots by identifier.
#[derive(Debug, Default)]
pub struct LotRegistry {
    lots: HashMap<LotId, LotBinding>,
}

impl LotRegistry {
    /// Build a registry from the provided bindings.
    #[must_use]
    pub fn new(bindings: Vec<LotBinding>) -> Self {
        let lots = bindings
            .into_iter()
            .map(|binding| (binding.lot.id.clone(), binding))
            .collect();
        Self { lots }
    }

    /// Metadata of all active lots, sorted by name.
    #[must_use]
    pub fn active_lots(&self) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self
            .lots
            .values()
            .filter(|binding| binding.lot.active)
            .map(|binding| binding.lot.clone())
            .collect();
        lots.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
        lots
    }

    /// Look up an active lot.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownLot`] when the lot is missing or inactive.
    pub fn binding(&self, lot: &LotId) -> Result<&LotBinding, UnknownLot> {
        self.lots
            .get(lot)
            .filter(|binding| binding.lot.active)
            .ok_or_else(|| UnknownLot(lot.clone()))
    }
}
