// Integration tests for `HttpDevice` using wiremock.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parkwise_core::{
    DeviceError, DevicePort, EntryReceipt, ExitReceipt, PaymentMethod, Plate, ScanKind,
    SessionId, VehicleClass,
};
use parkwise_device_http::{DeviceConfig, HttpDevice};

async fn setup() -> (MockServer, HttpDevice) {
    let server = MockServer::start().await;
    let config = DeviceConfig {
        base_url: Url::parse(&server.uri()).expect("mock server url"),
        timeout: Duration::from_secs(2),
        bearer_token: Some("lane-secret".into()),
    };
    let device = HttpDevice::new(&config).expect("client builds");
    (server, device)
}

fn entry_receipt() -> EntryReceipt {
    EntryReceipt {
        token: Some("tok-1".into()),
        session_id: SessionId::new(),
        duration: 2.0,
        plate: Plate::parse("KA01AB1234").expect("valid plate"),
        vehicle_class: VehicleClass::FourWheeler,
        expected_exit_at: Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .expect("valid instant"),
        fee: 40,
        payment_slab: "2hr @ ₹40".into(),
    }
}

#[tokio::test]
async fn reads_vehicle_with_bearer_token() {
    let (server, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/get_vehicle"))
        .and(query_param("type", "exit"))
        .and(header("authorization", "Bearer lane-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-9",
            "plate": "KA01AB1234",
            "type": "4-wheeler",
            "image": "https://cdn.example/lane/9.jpg"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reading = device.get_vehicle(ScanKind::Exit).await.expect("reading");
    assert_eq!(reading.token, "tok-9");
    assert_eq!(reading.plate.as_deref(), Some("KA01AB1234"));
    assert_eq!(reading.class_hint.as_deref(), Some("4-wheeler"));
}

#[tokio::test]
async fn blank_plate_reads_as_none() {
    let (server, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/get_vehicle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-2",
            "plate": "  ",
            "type": null,
            "image": ""
        })))
        .mount(&server)
        .await;

    let reading = device.get_vehicle(ScanKind::Entry).await.expect("reading");
    assert_eq!(reading.plate, None);
    assert_eq!(reading.class_hint, None);
}

#[tokio::test]
async fn entry_posts_slip_details() {
    let (server, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/entry"))
        .and(body_json(json!({
            "token": "tok-1",
            "duration": 2.0,
            "enteredPlate": "KA01AB1234",
            "enteredType": "4-wheeler",
            "exitTime": "2025-03-01T12:00:00Z",
            "fee": 40,
            "paymentSlab": "2hr @ ₹40"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "record": "abc",
            "print_success": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    device
        .record_entry(&entry_receipt())
        .await
        .expect("entry stored");
}

#[tokio::test]
async fn failed_print_is_rejected() {
    let (server, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/entry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "record": "abc",
            "print_success": false
        })))
        .mount(&server)
        .await;

    let result = device.record_entry(&entry_receipt()).await;
    assert!(
        matches!(result, Err(DeviceError::Rejected(_))),
        "expected Rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn exit_reports_http_status() {
    let (server, device) = setup().await;
    let session_id = SessionId::new();

    Mock::given(method("POST"))
        .and(path("/exit"))
        .and(body_json(json!({
            "token": null,
            "docId": session_id.to_string(),
            "feePaid": 110,
            "paymentMethod": "upi"
        })))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let result = device
        .record_exit(&ExitReceipt {
            token: None,
            session_id,
            fee_paid: 110,
            payment_method: PaymentMethod::Upi,
        })
        .await;
    assert_eq!(result, Err(DeviceError::Status(502)));
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (server, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/get_vehicle"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let result = device.get_vehicle(ScanKind::Entry).await;
    assert!(
        matches!(result, Err(DeviceError::Decode(_))),
        "expected Decode, got: {result:?}"
    );
}

#[tokio::test]
async fn unreachable_device_is_a_transport_error() {
    let config = DeviceConfig::new(Url::parse("http://127.0.0.1:9").expect("valid url"));
    let device = HttpDevice::new(&config).expect("client builds");

    let result = device.get_vehicle(ScanKind::Entry).await;
    assert!(
        matches!(result, Err(DeviceError::Transport(_))),
        "expected Transport, got: {result:?}"
    );
}
