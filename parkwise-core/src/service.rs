//! High-level facade that prices, opens and closes vehicle sessions.
//!
//! [`SessionManager`] ties the tariff engine, the session state machine and the scan
//! coordinator to the storage and device ports of each lot. Scans and companion device
//! calls are soft dependencies: their failures are returned alongside a successful
//! result instead of aborting the flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::cache::Cached;
use crate::config::ManagerConfig;
use crate::lot::{Lot, LotRegistry, UnknownLot};
use crate::model::{DeviceId, LotId, Operator, PaymentMethod, Plate, TimeRange, VehicleClass};
use crate::ports::{
    Clock, DeviceError, DevicePort, DeviceReading, EntryReceipt, ExitReceipt, ScanKind,
    SessionStore, StoreError, SystemClock, TariffStore,
};
use crate::report::{Occupancy, RevenueReport};
use crate::scan::{ScanCoordinator, ScanError, ScanResult};
use crate::session::{ExitOutcome, ExitRecord, SessionError, SessionPatch, VehicleSession};
use crate::tariff::{FeeQuote, Pricing, TariffError, TariffSlab, TariffTable};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors returned by [`SessionManager`] operations.
pub enum ManagerError {
    /// The lot is not registered or inactive.
    #[error(transparent)]
    UnknownLot(#[from] UnknownLot),
    /// No active session matches the plate.
    #[error("No active session for {plate} in lot {lot}")]
    SessionNotFound {
        /// Lot that was searched.
        lot: LotId,
        /// Plate that was searched.
        plate: Plate,
    },
    /// Neither the scan nor the operator supplied a plate.
    #[error("No licence plate was scanned or entered")]
    MissingPlate,
    /// Neither the scan nor the operator supplied a vehicle class.
    #[error("No vehicle class was scanned or entered")]
    MissingVehicleClass,
    /// Tariff lookup or validation failed.
    #[error(transparent)]
    Tariff(#[from] TariffError),
    /// Session transition was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
/// Input of [`SessionManager::record_entry`].
pub struct EntryRequest {
    /// Lot the vehicle enters.
    pub lot: LotId,
    /// Entry lane scanner to trigger, if any.
    pub device: Option<DeviceId>,
    /// Plate typed by the operator; wins over the scanned plate.
    pub manual_plate: Option<String>,
    /// Class chosen by the operator; wins over the scanned class.
    pub manual_class: Option<VehicleClass>,
    /// Booked stay in hours.
    pub booked_hours: f64,
    /// Operator recording the entry.
    pub operator: Operator,
}

#[derive(Debug, Clone, PartialEq)]
/// Result of a successful entry.
pub struct EntrySummary {
    /// The persisted session.
    pub session: VehicleSession,
    /// Why the scan was skipped in favour of manual input, if it failed.
    pub scan_error: Option<ScanError>,
    /// Why the companion device reading was unavailable, if it failed.
    pub reading_error: Option<DeviceError>,
    /// Companion device failure that flagged the session for reconciliation.
    pub device_error: Option<DeviceError>,
}

#[derive(Debug, Clone, PartialEq)]
/// Input of [`SessionManager::record_exit`].
pub struct ExitRequest {
    /// Lot the vehicle leaves.
    pub lot: LotId,
    /// Plate confirmed by the operator.
    pub plate: String,
    /// Exit lane scanner to trigger, if any.
    pub device: Option<DeviceId>,
    /// Amount collected, overriding the computed outstanding fee.
    pub manual_fee: Option<u64>,
    /// How the fee was collected.
    pub payment_method: PaymentMethod,
    /// Operator recording the exit.
    pub operator: Operator,
    /// Operator marked the exit as fraudulent.
    pub flag_fraud: bool,
}

#[derive(Debug, Clone, PartialEq)]
/// Current charges of an active session.
pub struct DueQuote {
    /// Session the quote is for.
    pub session: VehicleSession,
    /// Price of the stay so far, never below the booked duration.
    pub quote: FeeQuote,
    /// Amount still owed on top of the prepaid entry fee.
    pub outstanding: u64,
}

#[derive(Debug, Clone, PartialEq)]
/// Result of a successful exit.
pub struct ExitSummary {
    /// The finalized session.
    pub session: VehicleSession,
    /// Price of the whole stay.
    pub quote: FeeQuote,
    /// Amount owed on top of the entry fee before any manual override.
    pub outstanding: u64,
    /// Why the exit scan did not produce a plate, if it failed.
    pub scan_error: Option<ScanError>,
    /// Why the companion device reading was unavailable, if it failed.
    pub reading_error: Option<DeviceError>,
    /// Companion device failure that flagged the session for reconciliation.
    pub device_error: Option<DeviceError>,
}

/// Public entry point for the parking workflows of every registered lot.
pub struct SessionManager {
    registry: Arc<LotRegistry>,
    sessions: Arc<dyn SessionStore>,
    tariffs: Arc<dyn TariffStore>,
    scanner: ScanCoordinator,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
    tariff_cache: Mutex<HashMap<LotId, Cached<Arc<TariffTable>>>>,
}

impl SessionManager {
    /// Create a manager on the wall clock.
    #[must_use]
    pub fn new(
        registry: Arc<LotRegistry>,
        sessions: Arc<dyn SessionStore>,
        tariffs: Arc<dyn TariffStore>,
        config: ManagerConfig,
    ) -> Self {
        Self::with_clock(registry, sessions, tariffs, config, Arc::new(SystemClock))
    }

    /// Create a manager that reads time from `clock`.
    #[must_use]
    pub fn with_clock(
        registry: Arc<LotRegistry>,
        sessions: Arc<dyn SessionStore>,
        tariffs: Arc<dyn TariffStore>,
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scanner = ScanCoordinator::new(Arc::clone(&sessions), config.scan_timeout);
        Self {
            registry,
            sessions,
            tariffs,
            scanner,
            clock,
            config,
            tariff_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Active lots, sorted by name.
    #[must_use]
    pub fn lots(&self) -> Vec<Lot> {
        self.registry.active_lots()
    }

    /// Open a session for a vehicle entering `request.lot`.
    ///
    /// The plate and class come from the operator, then the lane scan, then the lot's
    /// companion device reading. A failed scan or reading is reported alongside the
    /// session. The session is persisted before the companion slip is printed; a failed
    /// print flags the stored session for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::MissingPlate`] when the operator typed an unusable plate or
    /// no source supplied one, [`ManagerError::MissingVehicleClass`] when no source
    /// supplied a class, and propagates tariff, session and store errors.
    pub async fn record_entry(&self, request: EntryRequest) -> Result<EntrySummary, ManagerError> {
        let binding = self.registry.binding(&request.lot)?;
        let manual_plate = request
            .manual_plate
            .as_deref()
            .map(Plate::parse)
            .transpose()
            .map_err(|_err| ManagerError::MissingPlate)?;

        let (scanned, scan_error) = self
            .scan(&request.lot, request.device.as_ref(), ScanKind::Entry)
            .await;
        let (reading, reading_error) =
            read_lane(binding.device.as_deref(), &request.lot, ScanKind::Entry).await;

        let detected_plate = scanned
            .as_ref()
            .map(|result| result.plate.clone())
            .or_else(|| reading_plate(reading.as_ref()));
        let plate = manual_plate
            .or_else(|| detected_plate.clone())
            .ok_or(ManagerError::MissingPlate)?;
        let vehicle_class = request
            .manual_class
            .or_else(|| scanned.as_ref().and_then(|result| result.vehicle_class))
            .or_else(|| {
                reading
                    .as_ref()
                    .and_then(|reading| reading.class_hint.as_deref())
                    .and_then(|hint| hint.parse().ok())
            })
            .ok_or(ManagerError::MissingVehicleClass)?;

        let table = self.tariff_for(&request.lot).await?;
        let mut session = VehicleSession::create(
            request.lot.clone(),
            plate,
            vehicle_class,
            request.booked_hours,
            &table,
            request.operator,
            self.clock.now(),
        )?;
        session.detected_plate = detected_plate;
        if session.pricing != Pricing::Priced {
            warn!(lot = %request.lot, plate = %session.plate, hours = request.booked_hours, "entry quote is not fully priced");
        }

        self.sessions.append(&request.lot, &session).await?;
        info!(
            lot = %request.lot,
            session = %session.id,
            plate = %session.plate,
            class = %session.vehicle_class,
            fee = session.fee_quoted(),
            "vehicle entered"
        );

        let mut device_error = None;
        if let Some(device) = &binding.device {
            let receipt = EntryReceipt {
                token: reading.map(|reading| reading.token),
                session_id: session.id,
                duration: session.expected_duration_hours,
                plate: session.plate.clone(),
                vehicle_class: session.vehicle_class,
                expected_exit_at: session.expected_exit_at,
                fee: session.fee_quoted(),
                payment_slab: session.tariff_label.clone(),
            };
            if let Err(err) = device.record_entry(&receipt).await {
                warn!(lot = %request.lot, session = %session.id, error = %err, "entry slip failed, flagging for reconciliation");
                self.flag_for_reconciliation(&request.lot, &mut session).await;
                device_error = Some(err);
            }
        }

        Ok(EntrySummary {
            session,
            scan_error,
            reading_error,
            device_error,
        })
    }

    /// Price the stay of the most recent active session for `plate` as of now.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] when the plate has no active session, and
    /// propagates tariff and store errors.
    pub async fn quote_current_due(
        &self,
        lot: &LotId,
        plate: &str,
    ) -> Result<DueQuote, ManagerError> {
        self.registry.binding(lot)?;
        let plate = Plate::parse(plate).map_err(|_err| ManagerError::MissingPlate)?;
        let session = self.most_recent_active(lot, &plate).await?;
        let table = self.tariff_for(lot).await?;
        let quote = session.quote_current_due(&table, self.clock.now())?;
        let outstanding = quote.fee.saturating_sub(session.fee_quoted());
        Ok(DueQuote {
            session,
            quote,
            outstanding,
        })
    }

    /// Close the most recent active session for `request.plate`.
    ///
    /// The session becomes `fraud` when the exit scan (or, without a lane scanner, the
    /// companion device reading) shows a different plate or the operator flags it,
    /// `exited` otherwise. The finalization is stored before the companion device is told;
    /// a failed companion call flags the stored session for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] when the plate has no active session and
    /// [`SessionError::AlreadyFinalized`] when a concurrent exit reached the store first.
    /// The companion device is not called in either case.
    pub async fn record_exit(&self, request: ExitRequest) -> Result<ExitSummary, ManagerError> {
        let binding = self.registry.binding(&request.lot)?;
        let plate = Plate::parse(&request.plate).map_err(|_err| ManagerError::MissingPlate)?;
        let mut session = self.most_recent_active(&request.lot, &plate).await?;

        let (scanned, scan_error) = self
            .scan(&request.lot, request.device.as_ref(), ScanKind::Exit)
            .await;
        let (reading, reading_error) =
            read_lane(binding.device.as_deref(), &request.lot, ScanKind::Exit).await;
        let detected_plate = scanned
            .map(|result| result.plate)
            .or_else(|| reading_plate(reading.as_ref()));

        let table = self.tariff_for(&request.lot).await?;
        let now = self.clock.now();
        let quote = session.quote_current_due(&table, now)?;
        if !quote.is_priced() {
            warn!(lot = %request.lot, session = %session.id, label = %quote.label, "exit quote is not fully priced");
        }
        let outstanding = quote.fee.saturating_sub(session.fee_quoted());
        let fee_paid = request.manual_fee.unwrap_or(outstanding);

        let mismatch = detected_plate
            .as_ref()
            .is_some_and(|detected| *detected != session.plate);
        if mismatch {
            warn!(
                lot = %request.lot,
                session = %session.id,
                recorded = %session.plate,
                detected = ?detected_plate,
                "exit plate does not match entry"
            );
        }
        let outcome = if mismatch || request.flag_fraud {
            ExitOutcome::Fraud
        } else {
            ExitOutcome::Exited
        };
        session.finalize(
            outcome,
            ExitRecord {
                exited_at: now,
                fee_paid,
                payment_method: request.payment_method,
                operator_name: request.operator.name,
                detected_plate,
            },
        )?;

        self.sessions
            .patch(&request.lot, session.id, &SessionPatch::finalization(&session))
            .await
            .map_err(|err| match err {
                StoreError::Conflict { id, .. } => {
                    ManagerError::Session(SessionError::AlreadyFinalized(id))
                }
                other => ManagerError::Store(other),
            })?;
        info!(
            lot = %request.lot,
            session = %session.id,
            plate = %session.plate,
            status = %session.status(),
            fee_paid,
            "vehicle exited"
        );

        let mut device_error = None;
        if let Some(device) = &binding.device {
            let receipt = ExitReceipt {
                token: reading.map(|reading| reading.token),
                session_id: session.id,
                fee_paid,
                payment_method: request.payment_method,
            };
            if let Err(err) = device.record_exit(&receipt).await {
                warn!(lot = %request.lot, session = %session.id, error = %err, "exit record failed, flagging for reconciliation");
                self.flag_for_reconciliation(&request.lot, &mut session).await;
                device_error = Some(err);
            }
        }

        Ok(ExitSummary {
            session,
            quote,
            outstanding,
            scan_error,
            reading_error,
            device_error,
        })
    }

    /// Tariff of `lot`, falling back to the store default. Cached per lot.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the tariff store fails.
    pub async fn tariff_for(&self, lot: &LotId) -> Result<Arc<TariffTable>, ManagerError> {
        let now = self.clock.now();
        if let Some(table) = self
            .lock_cache()
            .get(lot)
            .and_then(|cached| cached.fresh(now))
        {
            return Ok(Arc::clone(table));
        }

        let table = match self.tariffs.get(lot).await? {
            Some(table) => table,
            None => {
                debug!(%lot, "lot has no tariff, using default table");
                self.tariffs.default_table().await?
            }
        };
        let table = Arc::new(table);
        self.remember_tariff(lot, Arc::clone(&table), now);
        Ok(table)
    }

    /// Replace every slab of `class` in the tariff of `lot` in one write.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Tariff`] when the slabs are inconsistent; nothing is written
    /// in that case.
    pub async fn replace_class_slabs(
        &self,
        lot: &LotId,
        class: VehicleClass,
        slabs: Vec<TariffSlab>,
    ) -> Result<Arc<TariffTable>, ManagerError> {
        self.registry.binding(lot)?;
        let mut table = TariffTable::clone(&*self.tariff_for(lot).await?);
        table.set_class(class, slabs)?;
        self.tariffs.replace(lot, &table).await?;
        info!(%lot, %class, "tariff slabs replaced");

        let table = Arc::new(table);
        self.remember_tariff(lot, Arc::clone(&table), self.clock.now());
        Ok(table)
    }

    /// Active sessions of `lot` that are past their booked exit at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the query fails.
    pub async fn overdue_sessions(
        &self,
        lot: &LotId,
        now: DateTime<Utc>,
    ) -> Result<Vec<VehicleSession>, ManagerError> {
        self.registry.binding(lot)?;
        let mut overdue: Vec<VehicleSession> = self
            .sessions
            .list_active(lot)
            .await?
            .into_iter()
            .filter(|session| session.is_overdue(now))
            .collect();
        overdue.sort_by_key(|session| session.expected_exit_at);
        Ok(overdue)
    }

    /// Bays in use in `lot`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the query fails.
    pub async fn occupancy(&self, lot: &LotId) -> Result<Occupancy, ManagerError> {
        let binding = self.registry.binding(lot)?;
        let active = self.sessions.list_active(lot).await?.len();
        Ok(Occupancy {
            active,
            capacity: binding.lot.capacity,
        })
    }

    /// Revenue of the sessions that left `lot` during `range`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the query fails.
    pub async fn revenue_report(
        &self,
        lot: &LotId,
        range: TimeRange,
    ) -> Result<RevenueReport, ManagerError> {
        self.registry.binding(lot)?;
        let sessions = self.sessions.list_finalized(lot, range).await?;
        Ok(RevenueReport::build(&sessions, range))
    }

    async fn scan(
        &self,
        lot: &LotId,
        device: Option<&DeviceId>,
        kind: ScanKind,
    ) -> (Option<ScanResult>, Option<ScanError>) {
        let Some(device) = device else {
            return (None, None);
        };
        match self.scanner.request_scan(lot, device, kind).await {
            Ok(result) => (Some(result), None),
            Err(err) => {
                warn!(%lot, %device, %kind, error = %err, "scan failed, falling back to manual input");
                (None, Some(err))
            }
        }
    }

    /// Mark a stored session for manual follow-up. The local copy is flagged even when the
    /// store write fails, so the caller still sees the flag.
    async fn flag_for_reconciliation(&self, lot: &LotId, session: &mut VehicleSession) {
        session.needs_reconciliation = true;
        if let Err(err) = self
            .sessions
            .patch(lot, session.id, &SessionPatch::reconciliation())
            .await
        {
            warn!(%lot, session = %session.id, error = %err, "could not store reconciliation flag");
        }
    }

    async fn most_recent_active(
        &self,
        lot: &LotId,
        plate: &Plate,
    ) -> Result<VehicleSession, ManagerError> {
        self.sessions
            .find_active_by_plate(lot, plate)
            .await?
            .into_iter()
            .max_by_key(|session| session.entered_at)
            .ok_or_else(|| ManagerError::SessionNotFound {
                lot: lot.clone(),
                plate: plate.clone(),
            })
    }

    fn remember_tariff(&self, lot: &LotId, table: Arc<TariffTable>, now: DateTime<Utc>) {
        let ttl = TimeDelta::from_std(self.config.tariff_cache_ttl).unwrap_or(TimeDelta::zero());
        self.lock_cache()
            .insert(lot.clone(), Cached::new(table, now, ttl));
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<LotId, Cached<Arc<TariffTable>>>> {
        self.tariff_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ask the lot's companion device for the vehicle in its lane.
async fn read_lane(
    device: Option<&dyn DevicePort>,
    lot: &LotId,
    kind: ScanKind,
) -> (Option<DeviceReading>, Option<DeviceError>) {
    let Some(device) = device else {
        return (None, None);
    };
    match device.get_vehicle(kind).await {
        Ok(reading) => {
            debug!(%lot, %kind, plate = ?reading.plate, "companion device reading");
            (Some(reading), None)
        }
        Err(err) => {
            warn!(%lot, %kind, error = %err, "companion device reading failed");
            (None, Some(err))
        }
    }
}

fn reading_plate(reading: Option<&DeviceReading>) -> Option<Plate> {
    reading
        .and_then(|reading| reading.plate.as_deref())
        .and_then(|raw| Plate::parse(raw).ok())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::lot::LotBinding;
    use crate::model::SessionId;
    use crate::ports::ChannelSubscription;
    use crate::session::SessionStatus;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct VecStore {
        sessions: Mutex<Vec<VehicleSession>>,
        reject_patches: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for VecStore {
        async fn find_active_by_plate(
            &self,
            lot: &LotId,
            plate: &Plate,
        ) -> Result<Vec<VehicleSession>, StoreError> {
            Ok(self
                .list_active(lot)
                .await?
                .into_iter()
                .filter(|session| session.plate == *plate)
                .collect())
        }

        async fn list_active(&self, lot: &LotId) -> Result<Vec<VehicleSession>, StoreError> {
            Ok(self
                .sessions
                .lock()
                .expect("lock")
                .iter()
                .filter(|session| session.lot_id == *lot && session.status() == SessionStatus::Active)
                .cloned()
                .collect())
        }

        async fn list_finalized(
            &self,
            lot: &LotId,
            range: TimeRange,
        ) -> Result<Vec<VehicleSession>, StoreError> {
            Ok(self
                .sessions
                .lock()
                .expect("lock")
                .iter()
                .filter(|session| session.lot_id == *lot)
                .filter(|session| session.exit().is_some_and(|exit| range.contains(exit.exited_at)))
                .cloned()
                .collect())
        }

        async fn append(
            &self,
            _lot: &LotId,
            session: &VehicleSession,
        ) -> Result<SessionId, StoreError> {
            self.sessions.lock().expect("lock").push(session.clone());
            Ok(session.id)
        }

        async fn patch(
            &self,
            _lot: &LotId,
            id: SessionId,
            patch: &SessionPatch,
        ) -> Result<(), StoreError> {
            if self.reject_patches.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            let mut sessions = self.sessions.lock().expect("lock");
            let stored = sessions
                .iter_mut()
                .find(|session| session.id == id)
                .ok_or(StoreError::NotFound(id))?;
            let status = stored.status();
            stored
                .apply(patch)
                .map_err(|_err| StoreError::Conflict { id, status })
        }

        async fn publish_scan_trigger(
            &self,
            lot: &LotId,
            device: &DeviceId,
            _kind: ScanKind,
        ) -> Result<(), StoreError> {
            Err(StoreError::NoDevice {
                lot: lot.clone(),
                device: device.clone(),
            })
        }

        async fn subscribe_channel(
            &self,
            lot: &LotId,
            device: &DeviceId,
            _kind: ScanKind,
        ) -> Result<ChannelSubscription, StoreError> {
            Err(StoreError::NoDevice {
                lot: lot.clone(),
                device: device.clone(),
            })
        }
    }

    #[derive(Default)]
    struct DefaultTariffs {
        replaced: Mutex<Option<TariffTable>>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl TariffStore for DefaultTariffs {
        async fn get(&self, _lot: &LotId) -> Result<Option<TariffTable>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.replaced.lock().expect("lock").clone())
        }

        async fn replace(&self, _lot: &LotId, table: &TariffTable) -> Result<(), StoreError> {
            *self.replaced.lock().expect("lock") = Some(table.clone());
            Ok(())
        }

        async fn default_table(&self) -> Result<TariffTable, StoreError> {
            Ok(TariffTable::default_table())
        }
    }

    struct BrokenDevice;

    #[async_trait]
    impl DevicePort for BrokenDevice {
        async fn get_vehicle(&self, _kind: ScanKind) -> Result<DeviceReading, DeviceError> {
            Err(DeviceError::Status(503))
        }

        async fn record_entry(&self, _receipt: &EntryReceipt) -> Result<(), DeviceError> {
            Err(DeviceError::Status(503))
        }

        async fn record_exit(&self, _receipt: &ExitReceipt) -> Result<(), DeviceError> {
            Err(DeviceError::Transport("connection refused".into()))
        }
    }

    #[derive(Default)]
    struct LaneDevice {
        entry_plate: Option<&'static str>,
        exit_plate: Option<&'static str>,
        entries: Mutex<Vec<EntryReceipt>>,
        exits: Mutex<Vec<ExitReceipt>>,
    }

    #[async_trait]
    impl DevicePort for LaneDevice {
        async fn get_vehicle(&self, kind: ScanKind) -> Result<DeviceReading, DeviceError> {
            let plate = match kind {
                ScanKind::Entry => self.entry_plate,
                ScanKind::Exit => self.exit_plate,
            };
            Ok(DeviceReading {
                token: format!("tok-{kind}"),
                plate: plate.map(str::to_owned),
                class_hint: Some("4-wheeler".into()),
                image: None,
            })
        }

        async fn record_entry(&self, receipt: &EntryReceipt) -> Result<(), DeviceError> {
            self.entries.lock().expect("lock").push(receipt.clone());
            Ok(())
        }

        async fn record_exit(&self, receipt: &ExitReceipt) -> Result<(), DeviceError> {
            self.exits.lock().expect("lock").push(receipt.clone());
            Ok(())
        }
    }

    fn lot_id() -> LotId {
        LotId("lot-a".into())
    }

    fn ten_o_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn manager(
        device: Option<Arc<dyn DevicePort>>,
        now: DateTime<Utc>,
    ) -> (SessionManager, Arc<DefaultTariffs>) {
        manager_over(device, Arc::new(VecStore::default()), now)
    }

    fn manager_over(
        device: Option<Arc<dyn DevicePort>>,
        store: Arc<VecStore>,
        now: DateTime<Utc>,
    ) -> (SessionManager, Arc<DefaultTariffs>) {
        let registry = LotRegistry::new(vec![LotBinding {
            lot: Lot {
                id: lot_id(),
                name: "Central".into(),
                address: "1 MG Road".into(),
                capacity: 2,
                active: true,
            },
            device,
        }]);
        let tariffs = Arc::new(DefaultTariffs::default());
        let manager = SessionManager::with_clock(
            Arc::new(registry),
            store,
            Arc::clone(&tariffs) as Arc<dyn TariffStore>,
            ManagerConfig::default(),
            Arc::new(FixedClock(now)),
        );
        (manager, tariffs)
    }

    fn entry(plate: Option<&str>, class: Option<VehicleClass>) -> EntryRequest {
        EntryRequest {
            lot: lot_id(),
            device: None,
            manual_plate: plate.map(str::to_owned),
            manual_class: class,
            booked_hours: 2.0,
            operator: Operator::new("u1", "Asha"),
        }
    }

    fn exit(plate: &str) -> ExitRequest {
        ExitRequest {
            lot: lot_id(),
            plate: plate.into(),
            device: None,
            manual_fee: None,
            payment_method: PaymentMethod::Cash,
            operator: Operator::new("u2", "Ravi"),
            flag_fraud: false,
        }
    }

    #[tokio::test]
    async fn manual_entry_is_priced_and_persisted() {
        let (manager, _) = manager(None, ten_o_clock());
        let summary = manager
            .record_entry(entry(Some("ka 01 ab 1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");

        assert_eq!(summary.session.plate.as_str(), "KA01AB1234");
        assert_eq!(summary.session.fee_quoted(), 40);
        assert_eq!(summary.scan_error, None);
        assert_eq!(manager.occupancy(&lot_id()).await.expect("occupancy").active, 1);
    }

    #[tokio::test]
    async fn scan_failure_falls_back_to_manual_fields() {
        let (manager, _) = manager(None, ten_o_clock());
        let mut request = entry(Some("KA01AB1234"), Some(VehicleClass::TwoWheeler));
        request.device = Some(DeviceId("entry".into()));

        let summary = manager.record_entry(request).await.expect("entry recorded");
        assert!(matches!(
            summary.scan_error,
            Some(ScanError::Store(StoreError::NoDevice { .. }))
        ));
        assert_eq!(summary.session.vehicle_class, VehicleClass::TwoWheeler);
        assert_eq!(summary.session.detected_plate, None);
    }

    #[tokio::test]
    async fn entry_without_plate_or_class_is_rejected() {
        let (manager, _) = manager(None, ten_o_clock());
        assert_eq!(
            manager
                .record_entry(entry(Some("  "), Some(VehicleClass::FourWheeler)))
                .await,
            Err(ManagerError::MissingPlate)
        );
        assert_eq!(
            manager.record_entry(entry(Some("KA01AB1234"), None)).await,
            Err(ManagerError::MissingVehicleClass)
        );
    }

    #[tokio::test]
    async fn unknown_lot_is_rejected() {
        let (manager, _) = manager(None, ten_o_clock());
        let mut request = entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler));
        request.lot = LotId("nowhere".into());
        assert!(matches!(
            manager.record_entry(request).await,
            Err(ManagerError::UnknownLot(_))
        ));
    }

    #[tokio::test]
    async fn device_failures_flag_reconciliation_but_finalize() {
        let device: Arc<dyn DevicePort> = Arc::new(BrokenDevice);
        let (manager, _) = manager(Some(device), ten_o_clock());

        let entered = manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");
        assert!(entered.session.needs_reconciliation);
        assert_eq!(entered.device_error, Some(DeviceError::Status(503)));
        assert_eq!(entered.reading_error, Some(DeviceError::Status(503)));

        let exited = manager.record_exit(exit("KA01AB1234")).await.expect("exit recorded");
        assert_eq!(exited.session.status(), SessionStatus::Exited);
        assert!(exited.session.needs_reconciliation);
        assert!(exited.device_error.is_some());
    }

    #[tokio::test]
    async fn failed_exit_call_flags_the_stored_session() {
        let store = Arc::new(VecStore::default());
        let device: Arc<dyn DevicePort> = Arc::new(BrokenDevice);
        let (manager, _) = manager_over(Some(device), Arc::clone(&store), ten_o_clock());
        manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");
        store
            .sessions
            .lock()
            .expect("lock")
            .first_mut()
            .expect("stored session")
            .needs_reconciliation = false;

        manager.record_exit(exit("KA01AB1234")).await.expect("exit recorded");
        let stored = store
            .sessions
            .lock()
            .expect("lock")
            .first()
            .cloned()
            .expect("stored session");
        assert_eq!(stored.status(), SessionStatus::Exited);
        assert!(stored.needs_reconciliation);
    }

    #[tokio::test]
    async fn lane_reading_fills_entry_and_tokens_reach_the_device() {
        let device = Arc::new(LaneDevice {
            entry_plate: Some("ka 01 ab 1234"),
            ..LaneDevice::default()
        });
        let (manager, _) = manager(
            Some(Arc::clone(&device) as Arc<dyn DevicePort>),
            ten_o_clock(),
        );

        let entered = manager
            .record_entry(entry(None, None))
            .await
            .expect("entry recorded");
        assert_eq!(entered.session.plate.as_str(), "KA01AB1234");
        assert_eq!(entered.session.vehicle_class, VehicleClass::FourWheeler);
        assert_eq!(entered.reading_error, None);

        let exited = manager.record_exit(exit("KA01AB1234")).await.expect("exit recorded");
        assert_eq!(exited.session.status(), SessionStatus::Exited);

        let entries = device.entries.lock().expect("lock");
        let exits = device.exits.lock().expect("lock");
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries.first().and_then(|receipt| receipt.token.as_deref()),
            Some("tok-entry")
        );
        assert_eq!(exits.len(), 1);
        assert_eq!(
            exits.first().and_then(|receipt| receipt.token.as_deref()),
            Some("tok-exit")
        );
    }

    #[tokio::test]
    async fn lane_reading_of_another_plate_at_exit_is_fraud() {
        let device = Arc::new(LaneDevice {
            exit_plate: Some("KA01AB1239"),
            ..LaneDevice::default()
        });
        let (manager, _) = manager(Some(device), ten_o_clock());
        manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");

        let exited = manager.record_exit(exit("KA01AB1234")).await.expect("exit recorded");
        assert_eq!(exited.session.status(), SessionStatus::Fraud);
        assert_eq!(
            exited
                .session
                .exit()
                .and_then(|record| record.detected_plate.as_ref())
                .map(Plate::as_str),
            Some("KA01AB1239")
        );
    }

    #[tokio::test]
    async fn unusable_typed_plate_is_not_replaced_by_the_reading() {
        let device: Arc<dyn DevicePort> = Arc::new(LaneDevice {
            entry_plate: Some("KA01AB1234"),
            ..LaneDevice::default()
        });
        let (manager, _) = manager(Some(device), ten_o_clock());
        assert_eq!(
            manager
                .record_entry(entry(Some(" - "), Some(VehicleClass::FourWheeler)))
                .await,
            Err(ManagerError::MissingPlate)
        );
    }

    #[tokio::test]
    async fn store_failure_at_exit_never_reaches_the_device() {
        let store = Arc::new(VecStore::default());
        let device = Arc::new(LaneDevice::default());
        let (manager, _) = manager_over(
            Some(Arc::clone(&device) as Arc<dyn DevicePort>),
            Arc::clone(&store),
            ten_o_clock(),
        );
        manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");
        store.reject_patches.store(true, Ordering::SeqCst);

        assert!(matches!(
            manager.record_exit(exit("KA01AB1234")).await,
            Err(ManagerError::Store(StoreError::Backend(_)))
        ));
        assert!(device.exits.lock().expect("lock").is_empty());
        assert_eq!(
            store
                .sessions
                .lock()
                .expect("lock")
                .first()
                .map(VehicleSession::status),
            Some(SessionStatus::Active)
        );
    }

    #[tokio::test]
    async fn operator_flag_marks_fraud_and_second_exit_fails() {
        let (manager, _) = manager(None, ten_o_clock());
        manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");

        let mut request = exit("KA01AB1234");
        request.flag_fraud = true;
        request.manual_fee = Some(25);
        let summary = manager.record_exit(request).await.expect("exit recorded");
        assert_eq!(summary.session.status(), SessionStatus::Fraud);
        assert_eq!(summary.session.exit().map(|exit| exit.fee_paid), Some(25));

        assert!(matches!(
            manager.record_exit(exit("KA01AB1234")).await,
            Err(ManagerError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tariff_is_cached_and_replaced_whole() {
        let (manager, tariffs) = manager(None, ten_o_clock());
        manager.tariff_for(&lot_id()).await.expect("tariff");
        manager.tariff_for(&lot_id()).await.expect("tariff");
        assert_eq!(tariffs.reads.load(Ordering::SeqCst), 1);

        let table = manager
            .replace_class_slabs(
                &lot_id(),
                VehicleClass::TwoWheeler,
                vec![
                    TariffSlab::UpTo { hours: 4, fee: 25 },
                    TariffSlab::EachAdditional { hours: 24, fee: 60 },
                ],
            )
            .await
            .expect("slabs replaced");
        assert_eq!(table.class(VehicleClass::TwoWheeler).expect("class").slabs().len(), 2);

        let cached = manager.tariff_for(&lot_id()).await.expect("tariff");
        assert_eq!(cached, table);
        assert_eq!(tariffs.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_slabs_are_not_written() {
        let (manager, tariffs) = manager(None, ten_o_clock());
        let result = manager
            .replace_class_slabs(
                &lot_id(),
                VehicleClass::FourWheeler,
                vec![
                    TariffSlab::EachAdditional { hours: 24, fee: 1 },
                    TariffSlab::EachAdditional { hours: 24, fee: 2 },
                ],
            )
            .await;
        assert!(matches!(result, Err(ManagerError::Tariff(_))));
        assert!(tariffs.replaced.lock().expect("lock").is_none());
    }

    #[tokio::test]
    async fn overdue_sessions_are_listed() {
        let (manager, _) = manager(None, ten_o_clock());
        manager
            .record_entry(entry(Some("KA01AB1234"), Some(VehicleClass::FourWheeler)))
            .await
            .expect("entry recorded");

        let later = ten_o_clock() + TimeDelta::hours(3);
        let overdue = manager
            .overdue_sessions(&lot_id(), later)
            .await
            .expect("overdue");
        assert_eq!(overdue.len(), 1);
        assert!(
            manager
                .overdue_sessions(&lot_id(), ten_o_clock())
                .await
                .expect("overdue")
                .is_empty()
        );
    }
}
