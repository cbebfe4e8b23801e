//! Single request/response exchange with a lane scanner over a store channel.
//!
//! The coordinator writes a trigger to the device's channel document, listens for
//! change notifications, and resolves on the first server-confirmed document that
//! carries a detection and no pending trigger. The whole exchange is bounded by a
//! timeout; when it fires the subscription is dropped, so a late answer cannot
//! resolve anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::model::{DeviceId, LotId, Plate, VehicleClass};
use crate::ports::{DeviceDocument, NotificationOrigin, ScanKind, SessionStore, StoreError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Ways a scan can fail. All are recoverable by falling back to manual entry.
pub enum ScanError {
    /// No qualifying notification arrived in time.
    #[error("Scan timed out after {0:?}")]
    Timeout(Duration),
    /// The device channel document is missing.
    #[error("Device channel document is missing")]
    NoDevice,
    /// The device answered with an unusable plate or class.
    #[error("Invalid detection: {0}")]
    InvalidDetection(String),
    /// The store closed the notification channel before an answer arrived.
    #[error("Device channel closed before a detection arrived")]
    ChannelClosed,
    /// Writing the trigger or subscribing failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Detection returned by a device.
pub struct ScanResult {
    /// Normalized plate.
    pub plate: Plate,
    /// Class, when the device reported one.
    pub vehicle_class: Option<VehicleClass>,
    /// Captured image reference.
    pub image: Option<String>,
}

/// Mediates scans against the devices of any lot through a [`SessionStore`].
pub struct ScanCoordinator {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl ScanCoordinator {
    /// Create a coordinator that gives each scan `timeout` to complete.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Configured scan window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Trigger `device` and wait for its detection.
    ///
    /// Concurrent calls for the same device are not serialized here.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Timeout`] when no qualifying answer arrives within the window,
    /// and the other [`ScanError`] variants for missing devices, unusable detections, or
    /// store failures.
    pub async fn request_scan(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<ScanResult, ScanError> {
        if let Ok(result) =
            timeout(self.timeout, self.await_detection(lot, device, kind)).await
        {
            result
        } else {
            warn!(%lot, %device, %kind, timeout = ?self.timeout, "scan timed out");
            Err(ScanError::Timeout(self.timeout))
        }
    }

    async fn await_detection(
        &self,
        lot: &LotId,
        device: &DeviceId,
        kind: ScanKind,
    ) -> Result<ScanResult, ScanError> {
        self.store.publish_scan_trigger(lot, device, kind).await?;
        let mut subscription = self.store.subscribe_channel(lot, device, kind).await?;

        while let Some(event) = subscription.next().await {
            let Some(document) = event.document else {
                return Err(ScanError::NoDevice);
            };
            debug!(%lot, %device, origin = ?event.origin, pending = document.scan_requested_at.is_some(), "device channel changed");
            if let Some(result) = detection(event.origin, &document) {
                return result;
            }
        }

        Err(ScanError::ChannelClosed)
    }
}

/// `Some` when the notification is a fresh, server-confirmed answer.
fn detection(
    origin: NotificationOrigin,
    document: &DeviceDocument,
) -> Option<Result<ScanResult, ScanError>> {
    if origin != NotificationOrigin::Server || document.scan_requested_at.is_some() {
        return None;
    }
    let raw_plate = document.recorded_plate.as_deref()?;

    let parsed = Plate::parse(raw_plate)
        .map_err(|err| ScanError::InvalidDetection(err.to_string()))
        .and_then(|plate| {
            let vehicle_class = document
                .recorded_class
                .as_deref()
                .map(str::parse::<VehicleClass>)
                .transpose()
                .map_err(|err| ScanError::InvalidDetection(err.to_string()))?;
            Ok(ScanResult {
                plate,
                vehicle_class,
                image: document.image.clone(),
            })
        });
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use super::*;
    use crate::model::{SessionId, TimeRange};
    use crate::ports::{ChannelEvent, ChannelSubscription};
    use crate::session::{SessionPatch, VehicleSession};

    struct ChannelOnlyStore {
        receiver: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
        triggers: AtomicUsize,
    }

    impl ChannelOnlyStore {
        fn new() -> (Arc<Self>, mpsc::Sender<ChannelEvent>) {
            let (sender, receiver) = mpsc::channel(16);
            let store = Arc::new(Self {
                receiver: Mutex::new(Some(receiver)),
                triggers: AtomicUsize::new(0),
            });
            (store, sender)
        }
    }

    fn unused() -> StoreError {
        StoreError::Backend("not used by scan tests".into())
    }

    #[async_trait]
    impl SessionStore for ChannelOnlyStore {
        async fn find_active_by_plate(
            &self,
            _lot: &LotId,
            _plate: &Plate,
        ) -> Result<Vec<VehicleSession>, StoreError> {
            Err(unused())
        }

        async fn list_active(&self, _lot: &LotId) -> Result<Vec<VehicleSession>, StoreError> {
            Err(unused())
        }

        async fn list_finalized(
            &self,
            _lot: &LotId,
            _range: TimeRange,
        ) -> Result<Vec<VehicleSession>, StoreError> {
            Err(unused())
        }

        async fn append(
            &self,
            _lot: &LotId,
            _session: &VehicleSession,
        ) -> Result<SessionId, StoreError> {
            Err(unused())
        }

        async fn patch(
            &self,
            _lot: &LotId,
            _id: SessionId,
            _patch: &SessionPatch,
        ) -> Result<(), StoreError> {
            Err(unused())
        }

        async fn publish_scan_trigger(
            &self,
            _lot: &LotId,
            _device: &DeviceId,
            _kind: ScanKind,
        ) -> Result<(), StoreError> {
            self.triggers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe_channel(
            &self,
            _lot: &LotId,
            _device: &DeviceId,
            _kind: ScanKind,
        ) -> Result<ChannelSubscription, StoreError> {
            let receiver = self
                .receiver
                .lock()
                .expect("lock")
                .take()
                .ok_or_else(|| StoreError::Backend("already subscribed".into()))?;
            Ok(ChannelSubscription::new(receiver))
        }
    }

    fn event(origin: NotificationOrigin, pending: bool, plate: Option<&str>) -> ChannelEvent {
        ChannelEvent {
            origin,
            document: Some(DeviceDocument {
                scan_requested_at: pending.then(Utc::now),
                recorded_plate: plate.map(str::to_owned),
                recorded_class: Some("4".into()),
                image: None,
            }),
        }
    }

    fn coordinator(store: Arc<ChannelOnlyStore>) -> ScanCoordinator {
        ScanCoordinator::new(store, Duration::from_secs(7))
    }

    async fn scan(coordinator: &ScanCoordinator) -> Result<ScanResult, ScanError> {
        coordinator
            .request_scan(
                &LotId("lot-a".into()),
                &DeviceId("entry".into()),
                ScanKind::Entry,
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_on_first_confirmed_detection() {
        let (store, sender) = ChannelOnlyStore::new();
        for queued in [
            event(NotificationOrigin::Server, true, Some("OLD123")),
            event(NotificationOrigin::Cache, false, Some("CACHED1")),
            event(NotificationOrigin::Server, false, None),
            event(NotificationOrigin::Server, false, Some("ka 01 ab 1234")),
            event(NotificationOrigin::Server, false, Some("LATER99")),
        ] {
            sender.send(queued).await.expect("channel open");
        }

        let result = scan(&coordinator(Arc::clone(&store))).await.expect("detected");
        assert_eq!(result.plate.as_str(), "KA01AB1234");
        assert_eq!(result.vehicle_class, Some(VehicleClass::FourWheeler));
        assert_eq!(store.triggers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_ignores_late_answers() {
        let (store, sender) = ChannelOnlyStore::new();
        sender
            .send(event(NotificationOrigin::Server, true, None))
            .await
            .expect("channel open");

        let result = scan(&coordinator(store)).await;
        assert_eq!(result, Err(ScanError::Timeout(Duration::from_secs(7))));

        let late = sender
            .send(event(NotificationOrigin::Server, false, Some("KA01AB1234")))
            .await;
        assert!(late.is_err(), "subscription must be torn down after timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_document_fails_fast() {
        let (store, sender) = ChannelOnlyStore::new();
        sender
            .send(ChannelEvent {
                origin: NotificationOrigin::Server,
                document: None,
            })
            .await
            .expect("channel open");

        assert_eq!(scan(&coordinator(store)).await, Err(ScanError::NoDevice));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_class_is_an_invalid_detection() {
        let (store, sender) = ChannelOnlyStore::new();
        let mut answer = event(NotificationOrigin::Server, false, Some("KA01AB1234"));
        if let Some(document) = answer.document.as_mut() {
            document.recorded_class = Some("truck".into());
        }
        sender.send(answer).await.expect("channel open");

        assert!(matches!(
            scan(&coordinator(store)).await,
            Err(ScanError::InvalidDetection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_is_reported() {
        let (store, sender) = ChannelOnlyStore::new();
        drop(sender);
        assert_eq!(scan(&coordinator(store)).await, Err(ScanError::ChannelClosed));
    }
}
