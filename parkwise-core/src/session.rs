//! Vehicle session records and their `active -> exited | fraud` lifecycle.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LotId, Operator, PaymentMethod, Plate, SessionId, VehicleClass};
use crate::tariff::{FeeQuote, Pricing, TariffError, TariffTable, compute_fee};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors raised by session state transitions.
pub enum SessionError {
    /// Booked duration must be a positive number of hours.
    #[error("Invalid booked duration: {0}h")]
    InvalidDuration(f64),
    /// The session already left the `active` state.
    #[error("Session {0} is already finalized")]
    AlreadyFinalized(SessionId),
    /// Pricing the session failed.
    #[error(transparent)]
    Tariff(#[from] TariffError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Lifecycle state of a session, without payload.
pub enum SessionStatus {
    /// Vehicle is in the lot.
    Active,
    /// Vehicle left and paid.
    Exited,
    /// Vehicle left and the exit was flagged as anomalous.
    Fraud,
}

impl SessionStatus {
    /// `exited` and `fraud` are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            SessionStatus::Active => "active",
            SessionStatus::Exited => "exited",
            SessionStatus::Fraud => "fraud",
        };
        write!(formatter, "{slug}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Terminal state chosen by the caller when finalizing.
pub enum ExitOutcome {
    /// Regular exit.
    Exited,
    /// Exit recorded as fraudulent.
    Fraud,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Fields written when a session leaves the lot.
pub struct ExitRecord {
    /// When the exit was recorded.
    pub exited_at: DateTime<Utc>,
    /// Amount collected at exit, on top of the prepaid entry quote.
    pub fee_paid: u64,
    /// How the exit amount was collected.
    pub payment_method: PaymentMethod,
    /// Operator who processed the exit.
    pub operator_name: String,
    /// Plate reported by the exit scanner, if one was read.
    pub detected_plate: Option<Plate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
/// Status together with the exit fields that only terminal states carry.
pub enum SessionState {
    /// In the lot; no exit fields.
    Active,
    /// Regular exit.
    Exited(ExitRecord),
    /// Fraudulent exit.
    Fraud(ExitRecord),
}

impl SessionState {
    /// Payload-free status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Active => SessionStatus::Active,
            SessionState::Exited(_) => SessionStatus::Exited,
            SessionState::Fraud(_) => SessionStatus::Fraud,
        }
    }

    /// Exit fields, present exactly when the state is terminal.
    #[must_use]
    pub fn exit(&self) -> Option<&ExitRecord> {
        match self {
            SessionState::Active => None,
            SessionState::Exited(record) | SessionState::Fraud(record) => Some(record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Partial update applied to a stored session in one write.
pub struct SessionPatch {
    /// New terminal state; only valid while the stored session is still active.
    pub state: Option<SessionState>,
    /// New reconciliation flag.
    pub needs_reconciliation: Option<bool>,
}

impl SessionPatch {
    /// Patch carrying everything the exit flow writes.
    #[must_use]
    pub fn finalization(session: &VehicleSession) -> Self {
        Self {
            state: Some(session.state.clone()),
            needs_reconciliation: Some(session.needs_reconciliation),
        }
    }

    /// Patch that only raises the reconciliation flag.
    #[must_use]
    pub fn reconciliation() -> Self {
        Self {
            state: None,
            needs_reconciliation: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One vehicle's stay in one lot.
pub struct VehicleSession {
    /// Document identifier.
    pub id: SessionId,
    /// Lot that owns the session.
    pub lot_id: LotId,
    /// Plate confirmed by the operator at entry.
    pub plate: Plate,
    /// Plate read by the entry scanner, when it differed from or preceded manual entry.
    pub detected_plate: Option<Plate>,
    /// Vehicle class priced at entry.
    pub vehicle_class: VehicleClass,
    /// Entry instant.
    pub entered_at: DateTime<Utc>,
    /// Booked stay in hours.
    pub expected_duration_hours: f64,
    /// `entered_at + expected_duration_hours`.
    pub expected_exit_at: DateTime<Utc>,
    fee_quoted: u64,
    /// Slab breakdown of the entry quote.
    pub tariff_label: String,
    /// Whether the entry quote was fully covered by the tariff.
    pub pricing: Pricing,
    /// Operator who recorded the entry.
    pub operator: Operator,
    /// Set when a companion device call failed and the record needs manual follow-up.
    #[serde(default)]
    pub needs_reconciliation: bool,
    #[serde(flatten)]
    state: SessionState,
}

impl VehicleSession {
    /// Open a new active session priced for its booked duration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidDuration`] when `expected_duration_hours` is not a
    /// positive number or puts the expected exit beyond the representable range, and [`SessionError::Tariff`] when the class is not priced.
    pub fn create(
        lot_id: LotId,
        plate: Plate,
        vehicle_class: VehicleClass,
        expected_duration_hours: f64,
        table: &TariffTable,
        operator: Operator,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if !expected_duration_hours.is_finite() || expected_duration_hours <= 0.0 {
            return Err(SessionError::InvalidDuration(expected_duration_hours));
        }
        let expected_exit_at = hours_to_duration(expected_duration_hours)
            .and_then(|booked| now.checked_add_signed(booked))
            .ok_or(SessionError::InvalidDuration(expected_duration_hours))?;
        let quote = compute_fee(table, vehicle_class, expected_duration_hours)?;

        Ok(Self {
            id: SessionId::new(),
            lot_id,
            plate,
            detected_plate: None,
            vehicle_class,
            entered_at: now,
            expected_duration_hours,
            expected_exit_at,
            fee_quoted: quote.fee,
            tariff_label: quote.label,
            pricing: quote.pricing,
            operator,
            needs_reconciliation: false,
            state: SessionState::Active,
        })
    }

    /// Fee frozen at entry.
    #[must_use]
    pub fn fee_quoted(&self) -> u64 {
        self.fee_quoted
    }

    /// Current lifecycle state including exit fields.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Exit fields, if finalized.
    #[must_use]
    pub fn exit(&self) -> Option<&ExitRecord> {
        self.state.exit()
    }

    /// Hours elapsed since entry at `now`; zero if `now` precedes entry.
    #[must_use]
    pub fn elapsed_hours(&self, now: DateTime<Utc>) -> f64 {
        duration_to_hours(now - self.entered_at).max(0.0)
    }

    /// Price the stay as of `now`, never below the booked duration.
    ///
    /// # Errors
    ///
    /// Propagates [`TariffError`] from [`compute_fee`].
    pub fn quote_current_due(
        &self,
        table: &TariffTable,
        now: DateTime<Utc>,
    ) -> Result<FeeQuote, TariffError> {
        let billable = self.expected_duration_hours.max(self.elapsed_hours(now));
        compute_fee(table, self.vehicle_class, billable)
    }

    /// Move an active session to its terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyFinalized`] when the session is not active; the
    /// session is left unchanged.
    pub fn finalize(&mut self, outcome: ExitOutcome, record: ExitRecord) -> Result<(), SessionError> {
        if self.status().is_terminal() {
            return Err(SessionError::AlreadyFinalized(self.id));
        }
        self.state = match outcome {
            ExitOutcome::Exited => SessionState::Exited(record),
            ExitOutcome::Fraud => SessionState::Fraud(record),
        };
        Ok(())
    }

    /// Apply a stored-document patch, enforcing the same monotonic transitions as
    /// [`VehicleSession::finalize`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyFinalized`] when the patch carries a state change and
    /// the session is no longer active. Nothing is applied in that case.
    pub fn apply(&mut self, patch: &SessionPatch) -> Result<(), SessionError> {
        match &patch.state {
            None => {}
            Some(SessionState::Active) => {
                if self.status().is_terminal() {
                    return Err(SessionError::AlreadyFinalized(self.id));
                }
            }
            Some(SessionState::Exited(record)) => {
                self.finalize(ExitOutcome::Exited, record.clone())?;
            }
            Some(SessionState::Fraud(record)) => {
                self.finalize(ExitOutcome::Fraud, record.clone())?;
            }
        }
        if let Some(flag) = patch.needs_reconciliation {
            self.needs_reconciliation = flag;
        }
        Ok(())
    }

    /// Active and past its booked exit time.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status() == SessionStatus::Active && now > self.expected_exit_at
    }
}

/// Convert fractional hours to a millisecond-precision duration.
///
/// `None` when `hours` is not finite or does not fit a [`Duration`].
#[must_use]
pub fn hours_to_duration(hours: f64) -> Option<Duration> {
    let millis = (hours * MILLIS_PER_HOUR).round();
    #[expect(clippy::cast_precision_loss, reason = "bound check only")]
    let in_range = millis.is_finite() && millis.abs() < i64::MAX as f64;
    if !in_range {
        return None;
    }
    #[expect(clippy::cast_possible_truncation, reason = "range checked above")]
    let millis = millis as i64;
    Duration::try_milliseconds(millis)
}

/// Convert a duration to fractional hours.
#[must_use]
pub fn duration_to_hours(duration: Duration) -> f64 {
    #[expect(clippy::cast_precision_loss, reason = "sub-millisecond precision is irrelevant")]
    let millis = duration.num_milliseconds() as f64;
    millis / MILLIS_PER_HOUR
}
