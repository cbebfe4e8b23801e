//! Tariff tables kept in memory.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use parkwise_core::{
    model::LotId,
    ports::{StoreError, TariffStore},
    tariff::TariffTable,
};

/// [`TariffStore`] kept in memory. Lots without a table fall back to the caller.
#[derive(Debug)]
pub struct MemoryTariffStore {
    default: TariffTable,
    tables: Mutex<HashMap<LotId, TariffTable>>,
}

impl Default for MemoryTariffStore {
    fn default() -> Self {
        Self::new(TariffTable::default_table())
    }
}

impl MemoryTariffStore {
    /// Create a store whose system-wide default is `default`.
    #[must_use]
    pub fn new(default: TariffTable) -> Self {
        Self {
            default,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the table of one lot.
    #[must_use]
    pub fn with_lot(self, lot: LotId, table: TariffTable) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(lot, table);
        self
    }
}

#[async_trait]
impl TariffStore for MemoryTariffStore {
    async fn get(&self, lot: &LotId) -> Result<Option<TariffTable>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lot)
            .cloned())
    }

    async fn replace(&self, lot: &LotId, table: &TariffTable) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(lot.clone(), table.clone());
        debug!(%lot, "tariff table replaced");
        Ok(())
    }

    async fn default_table(&self) -> Result<TariffTable, StoreError> {
        Ok(self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use parkwise_core::model::VehicleClass;
    use parkwise_core::tariff::TariffSlab;

    use super::*;

    #[tokio::test]
    async fn lots_without_a_table_read_as_none() {
        let lot = LotId("lot-a".into());
        let store = MemoryTariffStore::default();
        assert_eq!(store.get(&lot).await.expect("read"), None);

        let mut table = TariffTable::default_table();
        table
            .set_class(
                VehicleClass::TwoWheeler,
                vec![TariffSlab::UpTo { hours: 24, fee: 5 }],
            )
            .expect("valid slabs");
        store.replace(&lot, &table).await.expect("write");
        assert_eq!(store.get(&lot).await.expect("read"), Some(table));
        assert_eq!(
            store.default_table().await.expect("read"),
            TariffTable::default_table()
        );
    }
}
