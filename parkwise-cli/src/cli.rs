//! Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use parkwise_core::{PaymentMethod, ScanKind, VehicleClass};

/// Operator tool for parking lot tariffs, lane scanners and session flows.
#[derive(Debug, Parser)]
#[command(name = "parkwise", version, about)]
pub(crate) struct Cli {
    /// Options shared by every command.
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Debug, Args)]
pub(crate) struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file.
    #[arg(long, global = true, env = "PARKWISE_CONFIG", default_value = "parkwise.toml")]
    pub config: PathBuf,

    /// Tariff file overriding the configured one.
    #[arg(long, global = true)]
    pub tariff: Option<PathBuf>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Price a stay against the tariff.
    Quote(QuoteArgs),
    /// Check a tariff file and list its slabs.
    Validate {
        /// Tariff file to check.
        file: PathBuf,
    },
    /// Print the built-in default tariff as TOML.
    DefaultTariff,
    /// Ask the configured lane device for the vehicle in front of it.
    Scan {
        /// Lane to read.
        #[arg(value_enum)]
        kind: Lane,
    },
    /// Run an entry and exit through the session manager on in-memory storage.
    Simulate(SimulateArgs),
}

/// Arguments of `quote`.
#[derive(Debug, Args)]
pub(crate) struct QuoteArgs {
    /// Vehicle class (`2w`, `4w`, `bike`, `car`, ...).
    #[arg(long, value_parser = parse_class)]
    pub class: VehicleClass,

    /// Duration of the stay in hours.
    #[arg(long)]
    pub hours: f64,
}

/// Arguments of `simulate`.
#[derive(Debug, Args)]
pub(crate) struct SimulateArgs {
    /// Plate of the vehicle.
    #[arg(long)]
    pub plate: String,

    /// Vehicle class (`2w`, `4w`, `bike`, `car`, ...).
    #[arg(long, value_parser = parse_class)]
    pub class: VehicleClass,

    /// Hours booked at entry.
    #[arg(long)]
    pub booked_hours: f64,

    /// Hours actually spent in the lot.
    #[arg(long)]
    pub stay_hours: f64,

    /// Plate read by the exit scanner, if it differs.
    #[arg(long)]
    pub exit_plate: Option<String>,

    /// Amount collected at exit, overriding the computed outstanding fee.
    #[arg(long)]
    pub fee: Option<u64>,

    /// How the fee was collected.
    #[arg(long, default_value = "cash", value_parser = parse_payment)]
    pub payment: PaymentMethod,
}

/// Lane selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Lane {
    /// Entry lane.
    Entry,
    /// Exit lane.
    Exit,
}

impl From<Lane> for ScanKind {
    fn from(lane: Lane) -> Self {
        match lane {
            Lane::Entry => ScanKind::Entry,
            Lane::Exit => ScanKind::Exit,
        }
    }
}

fn parse_class(raw: &str) -> Result<VehicleClass, String> {
    raw.parse().map_err(|err: parkwise_core::TariffError| err.to_string())
}

fn parse_payment(raw: &str) -> Result<PaymentMethod, String> {
    raw.parse()
}
