//! Traits describing the external collaborators of the parking core and their payloads.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{DeviceId, LotId, PaymentMethod, Plate, SessionId, TimeRange, VehicleClass};
use crate::session::{SessionPatch, SessionStatus, VehicleSession};
use crate::tariff::TariffTable;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors reported by storage backends.
pub enum StoreError {
    /// No document with this identifier exists in the lot.
    #[error("Session {0} not found")]
    NotFound(SessionId),
    /// The stored document is no longer in a state that accepts the write.
    #[error("Session {id} is {status}, write rejected")]
    Conflict {
        /// Document that rejected the write.
        id: SessionId,
        /// Status found in the store.
        status: SessionStatus,
    },
    /// The device channel document does not exist.
    #[error("No device document for {device} in lot {lot}")]
    NoDevice {
        /// Lot that was queried.
        lot: LotId,
        /// Missing device.
        device: DeviceId,
    },
    /// Backend failure (network, permissions, serialization).
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors reported by a lot's companion device endpoint.
pub enum DeviceError {
    /// Request never completed.
    #[error("Device unreachable: {0}")]
    Transport(String),
    /// Device answered with a non-success status.
    #[error("Device returned HTTP {0}")]
    Status(u16),
    /// Response body could not be decoded.
    #[error("Device response malformed: {0}")]
    Decode(String),
    /// Device accepted the request but could not carry it out.
    #[error("Device rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Which side of the barrier a scan is for.
pub enum ScanKind {
    /// Entry lane.
    Entry,
    /// Exit lane.
    Exit,
}

impl fmt::Display for ScanKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            ScanKind::Entry => "entry",
            ScanKind::Exit => "exit",
        };
        write!(formatter, "{slug}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Where a change notification came from.
pub enum NotificationOrigin {
    /// Confirmed by the authoritative store.
    Server,
    /// Local cache replay or optimistic echo of a local write.
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Shared request/response document between the core and a scanning device.
pub struct DeviceDocument {
    /// Set by the core to request a scan; cleared by the device when it answers.
    pub scan_requested_at: Option<DateTime<Utc>>,
    /// Plate read by the device.
    pub recorded_plate: Option<String>,
    /// Raw class string reported by the device.
    pub recorded_class: Option<String>,
    /// Reference to the captured image, if any.
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One change notification on a device channel.
pub struct ChannelEvent {
    /// Whether the server confirmed this state.
    pub origin: NotificationOrigin,
    /// Current document, or `None` if it was deleted or never existed.
    pub document: Option<DeviceDocument>,
}

/// Live subscription to a device channel. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChannelSubscription {
    events: mpsc::Receiver<ChannelEvent>,
}

impl ChannelSubscription {
    /// Wrap the receiving half of a notification channel.
    #[must_use]
    pub fn new(events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { events }
    }

    /// Wait for the next notification; `None` once the store closes the channel.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

#[async_trait]
/// Durable, lot-partitioned storage of vehicle sessions and device channels.
pub trait SessionStore: Send + Sync {
    /// Active sessions in `lot` whose plate equals `plate`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    async fn find_active_by_plate(
        &self,
        lot: &LotId,
        plate: &Plate,
    ) -> Result<Vec<VehicleSession>, StoreError>;

    /// Every active session in `lot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    async fn list_active(&self, lot: &LotId) -> Result<Vec<VehicleSession>, StoreError>;

    /// Finalized sessions in `lot` whose exit falls inside `range`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    async fn list_finalized(
        &self,
        lot: &LotId,
        range: TimeRange,
    ) -> Result<Vec<VehicleSession>, StoreError>;

    /// Insert a new session document in one write.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    async fn append(&self, lot: &LotId, session: &VehicleSession)
    -> Result<SessionId, StoreError>;

    /// Apply `patch` to a stored session in one write.
    ///
    /// Implementations must reject a state change on a session that is no longer active
    /// with [`StoreError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`], [`StoreError::Conflict`], or a backend error.
    async fn patch(&self, lot: &LotId, id: SessionId, patch: &SessionPatch)
    -> Result<(), StoreError>;

    /// Write a scan trigger (`scan_requested_at = now`) to a device channel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoDevice`] when the channel document is missing.
    async fn publish_scan_trigger(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<(), StoreError>;

    /// Subscribe to change notifications of a device channel. The current document is
    /// delivered first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the listener cannot be registered.
    async fn subscribe_channel(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<ChannelSubscription, StoreError>;
}

#[async_trait]
/// Per-lot tariff storage.
pub trait TariffStore: Send + Sync {
    /// Tariff configured for `lot`, if it has one.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend read fails.
    async fn get(&self, lot: &LotId) -> Result<Option<TariffTable>, StoreError>;

    /// Replace the whole table of `lot` in one write.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend write fails.
    async fn replace(&self, lot: &LotId, table: &TariffTable) -> Result<(), StoreError>;

    /// System-wide default table that new lots start from.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend read fails.
    async fn default_table(&self) -> Result<TariffTable, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Answer of the device's `get_vehicle` endpoint.
pub struct DeviceReading {
    /// Opaque token to hand back on the follow-up entry/exit call.
    pub token: String,
    /// Plate read by the camera.
    pub plate: Option<String>,
    /// Raw vehicle class hint.
    pub class_hint: Option<String>,
    /// Captured image reference.
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Entry details sent to the device so it can print a slip.
pub struct EntryReceipt {
    /// Token from a previous reading, if the entry came from a device scan.
    pub token: Option<String>,
    /// Session being recorded.
    pub session_id: SessionId,
    /// Booked hours.
    pub duration: f64,
    /// Operator-confirmed plate.
    pub plate: Plate,
    /// Vehicle class.
    pub vehicle_class: VehicleClass,
    /// Booked exit time.
    pub expected_exit_at: DateTime<Utc>,
    /// Prepaid fee.
    pub fee: u64,
    /// Slab breakdown printed on the slip.
    pub payment_slab: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Exit details sent to the device so it can open the barrier and log the payment.
pub struct ExitReceipt {
    /// Token from a previous reading, if any.
    pub token: Option<String>,
    /// Session being closed.
    pub session_id: SessionId,
    /// Amount collected at exit.
    pub fee_paid: u64,
    /// How it was collected.
    pub payment_method: PaymentMethod,
}

#[async_trait]
/// A lot's companion device endpoint. Calls are best-effort side channels.
pub trait DevicePort: Send + Sync {
    /// Ask the camera for the vehicle currently in the lane.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the request fails.
    async fn get_vehicle(&self, kind: ScanKind) -> Result<DeviceReading, DeviceError>;

    /// Report a recorded entry.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the request fails.
    async fn record_entry(&self, receipt: &EntryReceipt) -> Result<(), DeviceError>;

    /// Report a recorded exit.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the request fails.
    async fn record_exit(&self, receipt: &ExitReceipt) -> Result<(), DeviceError>;
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
