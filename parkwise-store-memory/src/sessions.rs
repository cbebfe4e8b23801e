//! Lot-partitioned session documents plus the device channels scanners talk through.
//!
//! Every write to a channel document is fanned out to its subscribers twice: first as a
//! [`NotificationOrigin::Cache`] echo, then as the [`NotificationOrigin::Server`]
//! confirmation, mirroring what a replicated document store delivers to listeners.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use parkwise_core::{
    model::{DeviceId, LotId, Plate, SessionId, TimeRange},
    ports::{
        ChannelEvent, ChannelSubscription, DeviceDocument, NotificationOrigin, ScanKind,
        SessionStore, StoreError,
    },
    session::{SessionError, SessionPatch, SessionStatus, VehicleSession},
};

const SUBSCRIPTION_BUFFER: usize = 32;

#[derive(Default)]
struct Channel {
    document: Option<DeviceDocument>,
    subscribers: Vec<mpsc::Sender<ChannelEvent>>,
}

impl Channel {
    fn publish(&mut self, origin: NotificationOrigin) {
        let event = ChannelEvent {
            origin,
            document: self.document.clone(),
        };
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            });
    }

    fn write(&mut self, document: DeviceDocument) {
        self.document = Some(document);
        self.publish(NotificationOrigin::Cache);
        self.publish(NotificationOrigin::Server);
    }
}

#[derive(Default)]
struct LotData {
    sessions: Vec<VehicleSession>,
    channels: HashMap<(DeviceId, ScanKind), Channel>,
}

/// [`SessionStore`] kept in memory.
#[derive(Default)]
pub struct MemorySessionStore {
    lots: Mutex<HashMap<LotId, LotData>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel document of a scanner so scans can be requested from it.
    pub fn register_device(&self, lot: &LotId, device: &DeviceId, kind: ScanKind) {
        let mut lots = self.lock();
        let channel = lots
            .entry(lot.clone())
            .or_default()
            .channels
            .entry((device.clone(), kind))
            .or_default();
        if channel.document.is_none() {
            channel.write(DeviceDocument::default());
        }
        debug!(%lot, %device, %kind, "device channel registered");
    }

    /// Delete a channel document; subscribers are told it is gone.
    pub fn remove_device(&self, lot: &LotId, device: &DeviceId, kind: ScanKind) {
        if let Some(channel) = self
            .lock()
            .get_mut(lot)
            .and_then(|data| data.channels.get_mut(&(device.clone(), kind)))
        {
            channel.document = None;
            channel.publish(NotificationOrigin::Server);
        }
    }

    /// Current channel document, if the device is registered.
    #[must_use]
    pub fn device_document(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Option<DeviceDocument> {
        self.lock()
            .get(lot)
            .and_then(|data| data.channels.get(&(device.clone(), kind)))
            .and_then(|channel| channel.document.clone())
    }

    /// Write a detection as the scanner would: store the reading and clear the trigger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoDevice`] when the device is not registered.
    pub fn answer_scan(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
        plate: &str,
        class: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut lots = self.lock();
        let channel = channel_mut(&mut lots, lot, device, kind)?;
        let mut document = channel.document.clone().unwrap_or_default();
        document.scan_requested_at = None;
        document.recorded_plate = Some(plate.to_owned());
        document.recorded_class = class.map(str::to_owned);
        channel.write(document);
        debug!(%lot, %device, %kind, plate, "device answered scan");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LotId, LotData>> {
        self.lots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn channel_mut<'lots>(
    lots: &'lots mut HashMap<LotId, LotData>,
    lot: &LotId,
    device: &DeviceId,
    kind: ScanKind,
) -> Result<&'lots mut Channel, StoreError> {
    lots.get_mut(lot)
        .and_then(|data| data.channels.get_mut(&(device.clone(), kind)))
        .filter(|channel| channel.document.is_some())
        .ok_or_else(|| StoreError::NoDevice {
            lot: lot.clone(),
            device: device.clone(),
        })
}

fn sorted_by_entry(mut sessions: Vec<VehicleSession>) -> Vec<VehicleSession> {
    sessions.sort_by_key(|session| session.entered_at);
    sessions
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_active_by_plate(
        &self,
        lot: &LotId,
        plate: &Plate,
    ) -> Result<Vec<VehicleSession>, StoreError> {
        let lots = self.lock();
        let found = lots
            .get(lot)
            .map(|data| {
                data.sessions
                    .iter()
                    .filter(|session| session.status() == SessionStatus::Active)
                    .filter(|session| session.plate == *plate)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(sorted_by_entry(found))
    }

    async fn list_active(&self, lot: &LotId) -> Result<Vec<VehicleSession>, StoreError> {
        let lots = self.lock();
        let active = lots
            .get(lot)
            .map(|data| {
                data.sessions
                    .iter()
                    .filter(|session| session.status() == SessionStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(sorted_by_entry(active))
    }

    async fn list_finalized(
        &self,
        lot: &LotId,
        range: TimeRange,
    ) -> Result<Vec<VehicleSession>, StoreError> {
        let lots = self.lock();
        let finalized = lots
            .get(lot)
            .map(|data| {
                data.sessions
                    .iter()
                    .filter(|session| {
                        session
                            .exit()
                            .is_some_and(|exit| range.contains(exit.exited_at))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(sorted_by_entry(finalized))
    }

    async fn append(
        &self,
        lot: &LotId,
        session: &VehicleSession,
    ) -> Result<SessionId, StoreError> {
        let mut lots = self.lock();
        let data = lots.entry(lot.clone()).or_default();
        if data.sessions.iter().any(|stored| stored.id == session.id) {
            return Err(StoreError::Backend(format!(
                "session {} already exists",
                session.id
            )));
        }
        data.sessions.push(session.clone());
        trace!(%lot, session = %session.id, "session appended");
        Ok(session.id)
    }

    async fn patch(
        &self,
        lot: &LotId,
        id: SessionId,
        patch: &SessionPatch,
    ) -> Result<(), StoreError> {
        let mut lots = self.lock();
        let stored = lots
            .get_mut(lot)
            .and_then(|data| data.sessions.iter_mut().find(|session| session.id == id))
            .ok_or(StoreError::NotFound(id))?;

        let status = stored.status();
        stored.apply(patch).map_err(|err| match err {
            SessionError::AlreadyFinalized(_) => StoreError::Conflict { id, status },
            other => StoreError::Backend(other.to_string()),
        })?;
        trace!(%lot, session = %id, status = %stored.status(), "session patched");
        Ok(())
    }

    async fn publish_scan_trigger(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<(), StoreError> {
        let mut lots = self.lock();
        let channel = channel_mut(&mut lots, lot, device, kind)?;
        let mut document = channel.document.clone().unwrap_or_default();
        document.scan_requested_at = Some(Utc::now());
        channel.write(document);
        debug!(%lot, %device, %kind, "scan trigger published");
        Ok(())
    }

    async fn subscribe_channel(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<ChannelSubscription, StoreError> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut lots = self.lock();
        let channel = lots
            .entry(lot.clone())
            .or_default()
            .channels
            .entry((device.clone(), kind))
            .or_default();

        let current = ChannelEvent {
            origin: NotificationOrigin::Server,
            document: channel.document.clone(),
        };
        sender
            .try_send(current)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        channel.subscribers.push(sender);
        Ok(ChannelSubscription::new(receiver))
    }
}
