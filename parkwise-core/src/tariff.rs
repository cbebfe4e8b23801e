//! Piecewise tariff tables and the fee computation over them.
//!
//! A [`TariffTable`] holds one validated slab set per [`VehicleClass`]. Fees are
//! looked up by scanning the class's `UpTo` slabs in ascending order with an
//! inclusive upper bound; durations beyond 24 hours are split into whole days,
//! charged at the `EachAdditional` rate, plus the sub-day remainder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::VehicleClass;

/// Hours in one overflow block.
pub const HOURS_PER_DAY: f64 = 24.0;

/// Symbol printed in front of fees in labels.
pub const CURRENCY_SYMBOL: &str = "₹";

/// Day part of an overflow label when the class has no each-additional slab.
pub const UNPRICED_LABEL: &str = "unpriced";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors raised while validating or evaluating a tariff.
pub enum TariffError {
    /// The class is not priced by the table, or the raw class string is unrecognized.
    #[error("Unknown vehicle class: {0}")]
    UnknownVehicleClass(String),
    /// Elapsed duration is negative or not a number.
    #[error("Invalid duration: {0}h")]
    InvalidDuration(f64),
    /// A slab set violates the table invariants.
    #[error("Invalid slab set for {class}: {reason}")]
    InvalidSlab {
        /// Class whose slabs were rejected.
        class: VehicleClass,
        /// Which invariant failed.
        reason: String,
    },
    /// The table has no slab covering the requested duration.
    #[error("No {class} slab prices {hours:.2}h")]
    UnpricedDuration {
        /// Class being priced.
        class: VehicleClass,
        /// Elapsed hours that fell into the gap.
        hours: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "range", rename_all = "kebab-case")]
/// One tier of a tariff.
pub enum TariffSlab {
    /// Flat fee for any stay of at most `hours`.
    UpTo {
        /// Inclusive upper bound in hours.
        hours: u32,
        /// Fee in whole currency units.
        fee: u64,
    },
    /// Fee for stays between two bounds. Stored for display; not used by [`compute_fee`].
    Between {
        /// Lower bound in hours.
        hours: u32,
        /// Upper bound in hours, strictly greater than `hours`.
        hours_end: u32,
        /// Fee in whole currency units.
        fee: u64,
    },
    /// Repeating rate charged per full 24-hour block.
    EachAdditional {
        /// Block length shown to staff, normally 24.
        hours: u32,
        /// Fee per block.
        fee: u64,
    },
}

impl TariffSlab {
    /// Lower (or only) hour bound of the slab.
    #[must_use]
    pub fn hours(&self) -> u32 {
        match *self {
            TariffSlab::UpTo { hours, .. }
            | TariffSlab::Between { hours, .. }
            | TariffSlab::EachAdditional { hours, .. } => hours,
        }
    }

    /// Fee charged by the slab.
    #[must_use]
    pub fn fee(&self) -> u64 {
        match *self {
            TariffSlab::UpTo { fee, .. }
            | TariffSlab::Between { fee, .. }
            | TariffSlab::EachAdditional { fee, .. } => fee,
        }
    }

    /// Staff-facing description of the range, e.g. `Up to 8h`.
    #[must_use]
    pub fn describe(&self) -> String {
        match *self {
            TariffSlab::UpTo { hours, .. } => format!("Up to {hours}h"),
            TariffSlab::Between {
                hours, hours_end, ..
            } => format!("Between {hours}h and {hours_end}h"),
            TariffSlab::EachAdditional { hours, .. } => format!("Each additional {hours}h"),
        }
    }

    /// Price label used on slips, e.g. `8hr @ ₹50` or `day @ ₹100`.
    #[must_use]
    pub fn price_label(&self) -> String {
        match *self {
            TariffSlab::EachAdditional { hours: 24, fee } => format!("day @ {CURRENCY_SYMBOL}{fee}"),
            slab => format!("{}hr @ {CURRENCY_SYMBOL}{}", slab.hours(), slab.fee()),
        }
    }

    fn sort_key(&self) -> (bool, u32, u32) {
        match *self {
            TariffSlab::UpTo { hours, .. } => (false, hours, hours),
            TariffSlab::Between {
                hours, hours_end, ..
            } => (false, hours, hours_end),
            TariffSlab::EachAdditional { hours, .. } => (true, hours, hours),
        }
    }
}

impl fmt::Display for TariffSlab {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {CURRENCY_SYMBOL}{}", self.describe(), self.fee())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Validated slab set for one vehicle class, sorted ascending with the overflow slab last.
pub struct ClassTariff {
    slabs: Vec<TariffSlab>,
}

impl ClassTariff {
    /// Validate and sort a slab set.
    ///
    /// # Errors
    ///
    /// Returns [`TariffError::InvalidSlab`] when a slab has zero hours, when more than one
    /// `EachAdditional` slab is present, when two `UpTo` slabs share a bound, or when a
    /// `Between` slab is empty or duplicates another.
    pub fn new(class: VehicleClass, mut slabs: Vec<TariffSlab>) -> Result<Self, TariffError> {
        let invalid = |reason: String| TariffError::InvalidSlab { class, reason };

        if slabs.iter().any(|slab| slab.hours() == 0) {
            return Err(invalid("slab hours must be positive".into()));
        }

        let overflow_count = slabs
            .iter()
            .filter(|slab| matches!(slab, TariffSlab::EachAdditional { .. }))
            .count();
        if overflow_count > 1 {
            return Err(invalid(format!(
                "{overflow_count} each-additional slabs, at most one allowed"
            )));
        }

        slabs.sort_by_key(TariffSlab::sort_key);

        for pair in slabs.windows(2) {
            let [first, second] = pair else { continue };
            match (first, second) {
                (TariffSlab::UpTo { hours: lhs, .. }, TariffSlab::UpTo { hours: rhs, .. })
                    if lhs == rhs =>
                {
                    return Err(invalid(format!("duplicate up-to slab for {lhs}h")));
                }
                (
                    TariffSlab::Between {
                        hours: lhs_start,
                        hours_end: lhs_end,
                        ..
                    },
                    TariffSlab::Between {
                        hours: rhs_start,
                        hours_end: rhs_end,
                        ..
                    },
                ) if lhs_start == rhs_start && lhs_end == rhs_end => {
                    return Err(invalid(format!(
                        "duplicate between slab for {lhs_start}h-{lhs_end}h"
                    )));
                }
                _ => {}
            }
        }

        if let Some(TariffSlab::Between {
            hours, hours_end, ..
        }) = slabs.iter().find(|slab| {
            matches!(slab, TariffSlab::Between { hours, hours_end, .. } if hours_end <= hours)
        }) {
            return Err(invalid(format!(
                "between slab must end after it starts ({hours}h-{hours_end}h)"
            )));
        }

        Ok(Self { slabs })
    }

    /// All slabs in evaluation order.
    #[must_use]
    pub fn slabs(&self) -> &[TariffSlab] {
        &self.slabs
    }

    /// The repeating overflow slab, if configured.
    #[must_use]
    pub fn each_additional(&self) -> Option<&TariffSlab> {
        self.slabs
            .iter()
            .find(|slab| matches!(slab, TariffSlab::EachAdditional { .. }))
    }

    /// First `UpTo` slab whose bound covers `hours` (inclusive).
    #[must_use]
    pub fn up_to(&self, hours: f64) -> Option<&TariffSlab> {
        self.slabs.iter().find(
            |slab| matches!(slab, TariffSlab::UpTo { hours: bound, .. } if hours <= f64::from(*bound)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<VehicleClass, Vec<TariffSlab>>",
    into = "BTreeMap<VehicleClass, Vec<TariffSlab>>"
)]
/// Fee schedule of one lot: a validated slab set per vehicle class.
pub struct TariffTable {
    classes: BTreeMap<VehicleClass, ClassTariff>,
}

impl TariffTable {
    /// Build a table, validating every class.
    ///
    /// # Errors
    ///
    /// Returns [`TariffError::InvalidSlab`] for the first class whose slabs are inconsistent.
    pub fn new(classes: BTreeMap<VehicleClass, Vec<TariffSlab>>) -> Result<Self, TariffError> {
        let classes = classes
            .into_iter()
            .map(|(class, slabs)| Ok((class, ClassTariff::new(class, slabs)?)))
            .collect::<Result<_, TariffError>>()?;
        Ok(Self { classes })
    }

    /// System-wide default schedule new lots are seeded from.
    #[must_use]
    pub fn default_table() -> Self {
        let ladder = |fees: [u64; 6]| {
            let [one, two, eight, sixteen, day, overflow] = fees;
            vec![
                TariffSlab::UpTo { hours: 1, fee: one },
                TariffSlab::UpTo { hours: 2, fee: two },
                TariffSlab::UpTo { hours: 8, fee: eight },
                TariffSlab::UpTo {
                    hours: 16,
                    fee: sixteen,
                },
                TariffSlab::UpTo { hours: 24, fee: day },
                TariffSlab::EachAdditional {
                    hours: 24,
                    fee: overflow,
                },
            ]
        };
        let classes = BTreeMap::from([
            (
                VehicleClass::TwoWheeler,
                ClassTariff {
                    slabs: ladder([10, 15, 20, 30, 40, 40]),
                },
            ),
            (
                VehicleClass::FourWheeler,
                ClassTariff {
                    slabs: ladder([30, 40, 50, 80, 100, 100]),
                },
            ),
        ]);
        Self { classes }
    }

    /// Slab set for a class.
    ///
    /// # Errors
    ///
    /// Returns [`TariffError::UnknownVehicleClass`] when the table does not price `class`.
    pub fn class(&self, class: VehicleClass) -> Result<&ClassTariff, TariffError> {
        self.classes
            .get(&class)
            .ok_or_else(|| TariffError::UnknownVehicleClass(class.to_string()))
    }

    /// Iterate over priced classes.
    pub fn classes(&self) -> impl Iterator<Item = (VehicleClass, &ClassTariff)> {
        self.classes.iter().map(|(class, tariff)| (*class, tariff))
    }

    /// Replace every slab of one class at once.
    ///
    /// # Errors
    ///
    /// Returns [`TariffError::InvalidSlab`] and leaves the table untouched when the new
    /// slab set is inconsistent.
    pub fn set_class(
        &mut self,
        class: VehicleClass,
        slabs: Vec<TariffSlab>,
    ) -> Result<(), TariffError> {
        let tariff = ClassTariff::new(class, slabs)?;
        self.classes.insert(class, tariff);
        Ok(())
    }
}

impl TryFrom<BTreeMap<VehicleClass, Vec<TariffSlab>>> for TariffTable {
    type Error = TariffError;

    fn try_from(classes: BTreeMap<VehicleClass, Vec<TariffSlab>>) -> Result<Self, Self::Error> {
        Self::new(classes)
    }
}

impl From<TariffTable> for BTreeMap<VehicleClass, Vec<TariffSlab>> {
    fn from(table: TariffTable) -> Self {
        table
            .classes
            .into_iter()
            .map(|(class, tariff)| (class, tariff.slabs))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Whether a quote is backed by configured slabs.
pub enum Pricing {
    /// Every part of the duration matched a slab.
    Priced,
    /// No `UpTo` slab covers the duration (or its sub-day remainder).
    Unpriced,
    /// The duration exceeds 24h and the class has no `EachAdditional` slab.
    UnpricedOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Result of pricing a duration.
pub struct FeeQuote {
    /// Fee in whole currency units.
    pub fee: u64,
    /// Human-readable breakdown, for display and audit only.
    pub label: String,
    /// Whether the table fully covered the duration.
    pub pricing: Pricing,
}

impl FeeQuote {
    /// `true` when every part of the duration was priced.
    #[must_use]
    pub fn is_priced(&self) -> bool {
        self.pricing == Pricing::Priced
    }

    /// Turn a configuration gap into an error for callers that cannot accept a zero fee.
    ///
    /// # Errors
    ///
    /// Returns [`TariffError::UnpricedDuration`] when the quote is not fully priced.
    pub fn require_priced(self, class: VehicleClass, hours: f64) -> Result<Self, TariffError> {
        if self.is_priced() {
            Ok(self)
        } else {
            Err(TariffError::UnpricedDuration { class, hours })
        }
    }
}

/// Price `elapsed_hours` of parking for `class` against `table`.
///
/// Configuration gaps do not fail; they yield a zero-fee component and a
/// non-[`Pricing::Priced`] marker so staff can override the amount.
///
/// # Errors
///
/// Returns [`TariffError::UnknownVehicleClass`] when the table has no slabs for `class`
/// and [`TariffError::InvalidDuration`] for negative or non-finite durations.
pub fn compute_fee(
    table: &TariffTable,
    class: VehicleClass,
    elapsed_hours: f64,
) -> Result<FeeQuote, TariffError> {
    let tariff = table.class(class)?;
    if !elapsed_hours.is_finite() || elapsed_hours < 0.0 {
        return Err(TariffError::InvalidDuration(elapsed_hours));
    }

    if elapsed_hours <= HOURS_PER_DAY {
        return Ok(match tariff.up_to(elapsed_hours) {
            Some(slab) => FeeQuote {
                fee: slab.fee(),
                label: slab.price_label(),
                pricing: Pricing::Priced,
            },
            None => FeeQuote {
                fee: 0,
                label: String::new(),
                pricing: Pricing::Unpriced,
            },
        });
    }

    let full_days_hours = (elapsed_hours / HOURS_PER_DAY).floor();
    let remainder = elapsed_hours - full_days_hours * HOURS_PER_DAY;
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "finite, positive, already floored"
    )]
    let full_days = full_days_hours as u64;

    let overflow = tariff.each_additional();
    let day_fee = overflow.map_or(0, TariffSlab::fee);
    let day_label = overflow.map_or_else(|| UNPRICED_LABEL.to_owned(), TariffSlab::price_label);

    let mut fee = full_days.saturating_mul(day_fee);
    let mut label = format!("{full_days} x {day_label}");
    let mut pricing = if overflow.is_some() {
        Pricing::Priced
    } else {
        Pricing::UnpricedOverflow
    };

    if remainder > 0.0 {
        match tariff.up_to(remainder) {
            Some(slab) => {
                fee = fee.saturating_add(slab.fee());
                label.push_str(" + ");
                label.push_str(&slab.price_label());
            }
            None if pricing == Pricing::Priced => pricing = Pricing::Unpriced,
            None => {}
        }
    }

    Ok(FeeQuote {
        fee,
        label,
        pricing,
    })
}
