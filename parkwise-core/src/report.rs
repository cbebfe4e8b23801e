//! Revenue and occupancy aggregation over session records.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::model::{TimeRange, VehicleClass};
use crate::session::{SessionStatus, VehicleSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Revenue and vehicle count of one bucket.
pub struct RevenueBucket {
    /// Entry quote plus exit payment, summed.
    pub revenue: u64,
    /// Number of finalized sessions.
    pub vehicles: usize,
}

impl RevenueBucket {
    fn add(&mut self, revenue: u64) {
        self.revenue = self.revenue.saturating_add(revenue);
        self.vehicles += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Revenue summary of the sessions that left a lot during a period.
pub struct RevenueReport {
    /// Totals across the period.
    pub total: RevenueBucket,
    /// Totals per vehicle class.
    pub by_class: BTreeMap<VehicleClass, RevenueBucket>,
    /// Totals per exit day (UTC).
    pub by_day: BTreeMap<NaiveDate, RevenueBucket>,
    /// Hour of day (UTC) with the most entries, earliest on ties.
    pub peak_entry_hour: Option<u32>,
    /// Sessions closed as fraud.
    pub fraud_count: usize,
    /// Sessions waiting for reconciliation with their device.
    pub pending_reconciliation: usize,
}

impl RevenueReport {
    /// Aggregate the finalized sessions whose exit falls in `range`; others are ignored.
    #[must_use]
    pub fn build(sessions: &[VehicleSession], range: TimeRange) -> Self {
        let mut report = Self::default();
        let mut entries_per_hour: BTreeMap<u32, usize> = BTreeMap::new();

        for session in sessions {
            let Some(exit) = session.exit() else { continue };
            if !range.contains(exit.exited_at) {
                continue;
            }
            let revenue = session.fee_quoted().saturating_add(exit.fee_paid);

            report.total.add(revenue);
            report
                .by_class
                .entry(session.vehicle_class)
                .or_default()
                .add(revenue);
            report
                .by_day
                .entry(exit.exited_at.date_naive())
                .or_default()
                .add(revenue);
            *entries_per_hour
                .entry(session.entered_at.hour())
                .or_default() += 1;

            if session.status() == SessionStatus::Fraud {
                report.fraud_count += 1;
            }
            if session.needs_reconciliation {
                report.pending_reconciliation += 1;
            }
        }

        report.peak_entry_hour = entries_per_hour
            .iter()
            .fold(None, |best: Option<(u32, usize)>, (&hour, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((hour, count)),
            })
            .map(|(hour, _)| hour);
        report
    }

    /// Mean revenue per vehicle, `None` for an empty period.
    #[must_use]
    pub fn average_revenue(&self) -> Option<f64> {
        if self.total.vehicles == 0 {
            return None;
        }
        #[expect(clippy::cast_precision_loss, reason = "report-level precision")]
        let average = self.total.revenue as f64 / self.total.vehicles as f64;
        Some(average)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Bays in use versus bays available.
pub struct Occupancy {
    /// Active sessions.
    pub active: usize,
    /// Lot capacity.
    pub capacity: u32,
}

impl Occupancy {
    /// Fraction of capacity in use, `None` for a zero-capacity lot.
    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        if self.capacity == 0 {
            return None;
        }
        #[expect(clippy::cast_precision_loss, reason = "report-level precision")]
        let ratio = self.active as f64 / f64::from(self.capacity);
        Some(ratio)
    }

    /// Whether every bay is taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        !u32::try_from(self.active).is_ok_and(|active| active < self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::model::{LotId, Operator, PaymentMethod, Plate};
    use crate::session::{ExitOutcome, ExitRecord};
    use crate::tariff::TariffTable;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn closed(
        class: VehicleClass,
        entered: DateTime<Utc>,
        hours: f64,
        fee_paid: u64,
        outcome: ExitOutcome,
    ) -> VehicleSession {
        let mut session = VehicleSession::create(
            LotId("lot-a".into()),
            Plate::parse("MH12XY0001").expect("valid plate"),
            class,
            hours,
            &TariffTable::default_table(),
            Operator::new("op", "Op"),
            entered,
        )
        .expect("valid session");
        session
            .finalize(
                outcome,
                ExitRecord {
                    exited_at: entered + Duration::hours(3),
                    fee_paid,
                    payment_method: PaymentMethod::Upi,
                    operator_name: "Op".into(),
                    detected_plate: None,
                },
            )
            .expect("active session");
        session
    }

    #[test]
    fn aggregates_finalized_sessions_in_range() {
        let range = TimeRange {
            start: at(1, 0),
            end: at(2, 23),
        };
        let sessions = vec![
            closed(VehicleClass::FourWheeler, at(1, 9), 2.0, 10, ExitOutcome::Exited),
            closed(VehicleClass::FourWheeler, at(1, 9), 1.0, 0, ExitOutcome::Fraud),
            closed(VehicleClass::TwoWheeler, at(2, 14), 1.0, 5, ExitOutcome::Exited),
            closed(VehicleClass::TwoWheeler, at(5, 14), 1.0, 5, ExitOutcome::Exited),
        ];

        let report = RevenueReport::build(&sessions, range);

        assert_eq!(report.total, RevenueBucket { revenue: 95, vehicles: 3 });
        assert_eq!(
            report.by_class.get(&VehicleClass::FourWheeler),
            Some(&RevenueBucket { revenue: 80, vehicles: 2 })
        );
        assert_eq!(report.by_day.len(), 2);
        assert_eq!(report.peak_entry_hour, Some(9));
        assert_eq!(report.fraud_count, 1);
        let average = report.average_revenue().expect("non-empty");
        assert!((average - 95.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_period_has_no_average() {
        let report = RevenueReport::build(&[], TimeRange {
            start: at(1, 0),
            end: at(1, 1),
        });
        assert_eq!(report.average_revenue(), None);
        assert_eq!(report.peak_entry_hour, None);
    }

    #[test]
    fn occupancy_ratio() {
        let occupancy = Occupancy {
            active: 30,
            capacity: 40,
        };
        assert_eq!(occupancy.ratio(), Some(0.75));
        assert!(!occupancy.is_full());
        assert!(Occupancy { active: 0, capacity: 0 }.is_full());
        assert_eq!(Occupancy { active: 0, capacity: 0 }.ratio(), None);
    }
}
