//! Identifiers and small value types shared across the parking core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tariff::TariffError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Identifier for a parking lot. Lots are the partition boundary for all session data.
pub struct LotId(pub String);

impl fmt::Display for LotId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifier for a vehicle session document.
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifier for a scanning device attached to a lot (e.g. `"entry"`, `"exit"`).
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// Normalized licence plate: uppercase, without whitespace or hyphens.
pub struct Plate(String);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("licence plate is empty")]
/// A plate string contained no usable characters.
pub struct EmptyPlate;

impl Plate {
    /// Normalize a raw plate as typed by an operator or reported by a device.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyPlate`] when nothing remains after normalization.
    pub fn parse(raw: &str) -> Result<Self, EmptyPlate> {
        let normalized: String = raw
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '-')
            .flat_map(char::to_uppercase)
            .collect();
        if normalized.is_empty() {
            return Err(EmptyPlate);
        }
        Ok(Self(normalized))
    }

    /// Borrow the normalized plate text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Plate {
    type Error = EmptyPlate;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Plate> for String {
    fn from(plate: Plate) -> Self {
        plate.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Closed set of vehicle classes priced by a tariff table.
pub enum VehicleClass {
    /// Motorcycles and scooters.
    TwoWheeler,
    /// Cars and other four-wheeled vehicles.
    FourWheeler,
}

impl VehicleClass {
    /// Every known class, in display order.
    pub const ALL: [Self; 2] = [Self::TwoWheeler, Self::FourWheeler];
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            VehicleClass::TwoWheeler => "two-wheeler",
            VehicleClass::FourWheeler => "four-wheeler",
        };
        write!(formatter, "{slug}")
    }
}

impl FromStr for VehicleClass {
    type Err = TariffError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let tag = raw.trim().to_lowercase();
        match tag.as_str() {
            "2" | "2w" | "2-wheeler" | "two-wheeler" | "twowheeler" | "two_wheeler" | "bike" => {
                Ok(Self::TwoWheeler)
            }
            "4" | "4w" | "4-wheeler" | "four-wheeler" | "fourwheeler" | "four_wheeler" | "car" => {
                Ok(Self::FourWheeler)
            }
            _ => Err(TariffError::UnknownVehicleClass(raw.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How the operator collected payment at exit.
pub enum PaymentMethod {
    /// Cash at the booth.
    Cash,
    /// Debit or credit card.
    Card,
    /// UPI transfer.
    Upi,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
        };
        write!(formatter, "{slug}")
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "upi" => Ok(Self::Upi),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Staff member performing an entry or exit.
pub struct Operator {
    /// Stable user identifier.
    pub id: String,
    /// Display name printed on slips and reports.
    pub name: String,
}

impl Operator {
    /// Construct an operator reference.
    #[must_use]
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Inclusive start/end range of instants.
pub struct TimeRange {
    /// Start (inclusive).
    pub start: DateTime<Utc>,
    /// End (inclusive).
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether `instant` falls inside the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}
