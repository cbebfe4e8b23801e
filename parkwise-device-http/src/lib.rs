//! Companion device endpoint of a lot, spoken over HTTP.
//!
//! The device exposes `POST /get_vehicle?type=entry|exit`, `POST /entry` and
//! `POST /exit`, all JSON and authorized with a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use parkwise_core::{
    model::{PaymentMethod, VehicleClass},
    ports::{DeviceError, DevicePort, DeviceReading, EntryReceipt, ExitReceipt, ScanKind},
};

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Connection settings of one device endpoint.
pub struct DeviceConfig {
    /// Root URL the endpoint paths are resolved against.
    pub base_url: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Token sent as `Authorization: Bearer ...`.
    pub bearer_token: Option<String>,
}

impl DeviceConfig {
    /// Settings with the default timeout and no token.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            bearer_token: None,
        }
    }
}

/// Response of `/get_vehicle`.
#[derive(Debug, Deserialize)]
struct VehicleResponse {
    token: String,
    #[serde(default)]
    plate: Option<String>,
    #[serde(default, rename = "type")]
    class_hint: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

/// Body of `/entry`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryPayload<'receipt> {
    token: Option<&'receipt str>,
    duration: f64,
    entered_plate: &'receipt str,
    entered_type: &'static str,
    exit_time: DateTime<Utc>,
    fee: u64,
    payment_slab: &'receipt str,
}

/// Response of `/entry`.
#[derive(Debug, Deserialize)]
struct EntryResponse {
    #[serde(default)]
    record: Option<String>,
    #[serde(default)]
    print_success: Option<bool>,
}

/// Body of `/exit`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExitPayload<'receipt> {
    token: Option<&'receipt str>,
    doc_id: String,
    fee_paid: u64,
    payment_method: PaymentMethod,
}

/// Response of `/exit`.
#[derive(Debug, Deserialize)]
struct ExitResponse {
    #[serde(default)]
    status: Option<String>,
}

/// [`DevicePort`] backed by a device's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDevice {
    client: Client,
    base_url: Url,
}

impl HttpDevice {
    /// Build a client with the configured timeout and bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Transport`] when the token is not a valid header value or
    /// the HTTP client cannot be built.
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| DeviceError::Transport(format!("invalid bearer token: {err}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Wrap an existing client; the caller manages timeouts and auth headers.
    #[must_use]
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self {
            client,
            base_url: with_trailing_slash(base_url),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeviceError> {
        self.base_url
            .join(path)
            .map_err(|err| DeviceError::Transport(err.to_string()))
    }
}

#[async_trait]
impl DevicePort for HttpDevice {
    async fn get_vehicle(&self, kind: ScanKind) -> Result<DeviceReading, DeviceError> {
        let url = self.endpoint("get_vehicle")?;
        debug!(%url, %kind, "requesting vehicle reading");

        let request = self
            .client
            .post(url)
            .query(&[("type", kind.to_string())]);
        let response = fetch_json::<VehicleResponse>(request).await?;

        Ok(DeviceReading {
            token: response.token,
            plate: response.plate.filter(|plate| !plate.trim().is_empty()),
            class_hint: response.class_hint,
            image: response.image,
        })
    }

    async fn record_entry(&self, receipt: &EntryReceipt) -> Result<(), DeviceError> {
        let url = self.endpoint("entry")?;
        debug!(%url, session = %receipt.session_id, "recording entry on device");

        let payload = EntryPayload {
            token: receipt.token.as_deref(),
            duration: receipt.duration,
            entered_plate: receipt.plate.as_str(),
            entered_type: wire_class(receipt.vehicle_class),
            exit_time: receipt.expected_exit_at,
            fee: receipt.fee,
            payment_slab: &receipt.payment_slab,
        };
        let response = fetch_json::<EntryResponse>(self.client.post(url).json(&payload)).await?;

        if response.print_success == Some(false) {
            return Err(DeviceError::Rejected("entry slip was not printed".into()));
        }
        debug!(record = ?response.record, "device stored entry");
        Ok(())
    }

    async fn record_exit(&self, receipt: &ExitReceipt) -> Result<(), DeviceError> {
        let url = self.endpoint("exit")?;
        debug!(%url, session = %receipt.session_id, "recording exit on device");

        let payload = ExitPayload {
            token: receipt.token.as_deref(),
            doc_id: receipt.session_id.to_string(),
            fee_paid: receipt.fee_paid,
            payment_method: receipt.payment_method,
        };
        let response = fetch_json::<ExitResponse>(self.client.post(url).json(&payload)).await?;
        debug!(status = ?response.status, "device stored exit");
        Ok(())
    }
}

/// Class names as the device firmware spells them.
fn wire_class(class: VehicleClass) -> &'static str {
    match class {
        VehicleClass::TwoWheeler => "2-wheeler",
        VehicleClass::FourWheeler => "4-wheeler",
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

// Send a request and decode its JSON body, mapping failures onto device errors.
async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, DeviceError> {
    let response = request
        .send()
        .await
        .map_err(|err| DeviceError::Transport(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DeviceError::Status(status.as_u16()));
    }

    response
        .json()
        .await
        .map_err(|err| DeviceError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path() {
        let url = Url::parse("http://10.0.0.5:8080/lane").expect("valid url");
        let device = HttpDevice::with_client(Client::new(), url);
        assert_eq!(
            device.endpoint("entry").expect("joinable").as_str(),
            "http://10.0.0.5:8080/lane/entry"
        );
    }

    #[test]
    fn classes_use_device_spelling() {
        assert_eq!(wire_class(VehicleClass::TwoWheeler), "2-wheeler");
        assert_eq!(
            wire_class(VehicleClass::FourWheeler).parse::<VehicleClass>(),
            Ok(VehicleClass::FourWheeler)
        );
    }
}
