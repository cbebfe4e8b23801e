//! Command handlers.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use parkwise_core::{
    Clock, DeviceId, DevicePort, EntryRequest, ExitRequest, Lot, LotBinding, LotId, LotRegistry,
    Pricing, ScanKind, SessionManager, SessionStore, TariffTable, VehicleClass, compute_fee,
    hours_to_duration,
};
use parkwise_device_http::HttpDevice;
use parkwise_store_memory::{MemorySessionStore, MemoryTariffStore};

use crate::cli::{GlobalOpts, Lane, QuoteArgs, SimulateArgs};
use crate::config::{self, Config};

const CAMERA_POLL: Duration = Duration::from_millis(20);

/// Tariff from `--tariff`, the configured file, or the built-in default.
fn tariff(global: &GlobalOpts, config: &Config) -> Result<TariffTable> {
    match global.tariff.as_deref().or(config.tariff_file.as_deref()) {
        Some(path) => config::load_tariff(path),
        None => {
            debug!("no tariff file given, using default table");
            Ok(TariffTable::default_table())
        }
    }
}

fn pricing_note(pricing: Pricing) -> &'static str {
    match pricing {
        Pricing::Priced => "",
        Pricing::Unpriced => " (UNPRICED: no slab covers this duration)",
        Pricing::UnpricedOverflow => " (UNPRICED: no each-additional slab)",
    }
}

/// `quote`
#[expect(clippy::print_stdout, reason = "command output")]
pub(crate) fn quote(global: &GlobalOpts, config: &Config, args: &QuoteArgs) -> Result<()> {
    let table = tariff(global, config)?;
    let quote = compute_fee(&table, args.class, args.hours)?;
    println!(
        "{} for {}h: ₹{}{}",
        args.class,
        args.hours,
        quote.fee,
        pricing_note(quote.pricing)
    );
    if !quote.label.is_empty() {
        println!("  {}", quote.label);
    }
    Ok(())
}

/// `validate`
#[expect(clippy::print_stdout, reason = "command output")]
pub(crate) fn validate(file: &Path) -> Result<()> {
    let table = config::load_tariff(file)?;
    for (class, tariff) in table.classes() {
        println!("{class}");
        for slab in tariff.slabs() {
            println!("  {:<24} ₹{}", slab.describe(), slab.fee());
        }
    }
    println!("{} is valid", file.display());
    Ok(())
}

/// `default-tariff`
#[expect(clippy::print_stdout, reason = "command output")]
pub(crate) fn default_tariff() -> Result<()> {
    let text = toml::to_string_pretty(&TariffTable::default_table())
        .context("failed to render default tariff")?;
    print!("{text}");
    Ok(())
}

/// `scan`
#[expect(clippy::print_stdout, reason = "command output")]
pub(crate) async fn scan(config: &Config, lane: Lane) -> Result<()> {
    let device_config = config
        .device_config()?
        .context("no [device] section configured")?;
    let device = HttpDevice::new(&device_config)?;

    let reading = device.get_vehicle(ScanKind::from(lane)).await?;
    let class = reading
        .class_hint
        .as_deref()
        .map(|hint| {
            hint.parse::<VehicleClass>()
                .map_or_else(|_err| format!("unknown ({hint})"), |class| class.to_string())
        })
        .unwrap_or_else(|| "-".into());

    println!("token: {}", reading.token);
    println!("plate: {}", reading.plate.as_deref().unwrap_or("-"));
    println!("class: {class}");
    if let Some(image) = reading.image.as_deref().filter(|image| !image.is_empty()) {
        println!("image: {image}");
    }
    Ok(())
}

/// Clock that only moves when told to.
struct SimulatedClock(Mutex<DateTime<Utc>>);

impl SimulatedClock {
    fn advance(&self, hours: f64) -> Result<()> {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let next = hours_to_duration(hours)
            .and_then(|stay| now.checked_add_signed(stay))
            .with_context(|| format!("cannot advance the clock by {hours}h"))?;
        *now = next;
        Ok(())
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answer the next scan request on `device` with `plate`.
fn spawn_camera(
    store: Arc<MemorySessionStore>,
    lot: LotId,
    device: DeviceId,
    kind: ScanKind,
    plate: String,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let pending = store
                .device_document(&lot, &device, kind)
                .is_some_and(|document| document.scan_requested_at.is_some());
            if pending {
                store.answer_scan(&lot, &device, kind, &plate, None)?;
                return Ok(());
            }
            sleep(CAMERA_POLL).await;
        }
    })
}

/// `simulate`
#[expect(clippy::print_stdout, reason = "command output")]
pub(crate) async fn simulate(
    global: &GlobalOpts,
    config: &Config,
    args: SimulateArgs,
) -> Result<()> {
    let lot = LotId("simulated".into());
    let exit_lane = DeviceId("exit".into());

    let store = Arc::new(MemorySessionStore::new());
    let tariffs = Arc::new(MemoryTariffStore::new(tariff(global, config)?));
    let registry = LotRegistry::new(vec![LotBinding {
        lot: Lot {
            id: lot.clone(),
            name: "Simulated lot".into(),
            address: String::new(),
            capacity: 1,
            active: true,
        },
        device: None,
    }]);
    let clock = Arc::new(SimulatedClock(Mutex::new(Utc::now())));
    let manager = SessionManager::with_clock(
        Arc::new(registry),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        tariffs,
        config.manager_config(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let entered = manager
        .record_entry(EntryRequest {
            lot: lot.clone(),
            device: None,
            manual_plate: Some(args.plate.clone()),
            manual_class: Some(args.class),
            booked_hours: args.booked_hours,
            operator: config.operator(),
        })
        .await?;
    let session = &entered.session;
    println!(
        "entry  {} {} booked {}h, prepaid ₹{}{} [{}]",
        session.plate,
        session.vehicle_class,
        session.expected_duration_hours,
        session.fee_quoted(),
        pricing_note(session.pricing),
        session.tariff_label
    );

    clock.advance(args.stay_hours)?;
    info!(hours = args.stay_hours, "simulated stay elapsed");

    let camera = args.exit_plate.map(|plate| {
        store.register_device(&lot, &exit_lane, ScanKind::Exit);
        spawn_camera(Arc::clone(&store), lot.clone(), exit_lane.clone(), ScanKind::Exit, plate)
    });
    let exited = manager
        .record_exit(ExitRequest {
            lot: lot.clone(),
            plate: args.plate,
            device: camera.is_some().then(|| exit_lane.clone()),
            manual_fee: args.fee,
            payment_method: args.payment,
            operator: config.operator(),
            flag_fraud: false,
        })
        .await?;
    if let Some(camera) = camera {
        camera.await.context("exit camera task failed")??;
    }

    let fee_paid = exited.session.exit().map_or(0, |exit| exit.fee_paid);
    println!(
        "exit   {} after {}h: due ₹{}{} [{}]",
        exited.session.plate,
        args.stay_hours,
        exited.quote.fee,
        pricing_note(exited.quote.pricing),
        exited.quote.label
    );
    println!(
        "       outstanding ₹{}, paid ₹{} by {}, status {}",
        exited.outstanding,
        fee_paid,
        args.payment,
        exited.session.status()
    );
    if let Some(err) = exited.scan_error {
        println!("       exit scan failed: {err}");
    }
    Ok(())
}
