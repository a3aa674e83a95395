//! crates/schedule_rpa_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of the browser adapter and of the HTTP layer.

use crate::error::ErrorCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minutes since local midnight, the unit every schedule interval is expressed in.
pub type MinuteOfDay = u32;

/// `24:00`, the latest time a reservation may end.
pub const END_OF_DAY: MinuteOfDay = 24 * 60;

//=========================================================================================
// Session
//=========================================================================================

/// Lifecycle state of the single shared browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Starting,
    Authenticating,
    Ready,
    Busy,
    Recovering,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Starting => "starting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Recovering => "recovering",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor login plus the tenant (shop) the session is bound to.
///
/// Immutable: a different value tears the session down and builds a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login_id: String,
    pub login_secret: String,
    pub target_id: String,
}

impl Credentials {
    pub fn new(
        login_id: impl Into<String>,
        login_secret: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            login_id: login_id.into(),
            login_secret: login_secret.into(),
            target_id: target_id.into(),
        }
    }
}

// Never print the secret, not even at trace level.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login_id", &self.login_id)
            .field("login_secret", &"***")
            .field("target_id", &self.target_id)
            .finish()
    }
}

//=========================================================================================
// Schedule
//=========================================================================================

/// One bookable opening, valid only for the instant it was read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotInfo {
    pub date: NaiveDate,
    pub start_time: MinuteOfDay,
    pub duration_minutes: u32,
    pub capacity: u32,
    pub resource_id: String,
    pub resource_name: String,
}

/// A working-hours interval of one resource on one date. Filter input only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftRange {
    pub date: NaiveDate,
    pub resource_id: String,
    pub start_minute_of_day: MinuteOfDay,
    pub end_minute_of_day: MinuteOfDay,
}

/// An existing reservation as rendered on the schedule grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRecord {
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub start_time: MinuteOfDay,
    pub end_time: MinuteOfDay,
    pub resource_id: String,
    pub resource_name: String,
    pub label: String,
}

impl ReservationRecord {
    pub fn duration_minutes(&self) -> u32 {
        self.end_time.saturating_sub(self.start_time)
    }
}

//=========================================================================================
// Reservations
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationOperation {
    Create,
    Update,
    Cancel,
    Delete,
}

impl fmt::Display for ReservationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationOperation::Create => "create",
            ReservationOperation::Update => "update",
            ReservationOperation::Cancel => "cancel",
            ReservationOperation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A caller-owned mutation request. Never modified once handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub request_id: Uuid,
    pub operation: ReservationOperation,
    pub date: NaiveDate,
    pub start_time: MinuteOfDay,
    pub duration_minutes: u32,
    pub customer_name: String,
    pub customer_phone: String,
    pub menu_name: Option<String>,
    pub notes: Option<String>,
}

impl ReservationRequest {
    /// Saturates instead of wrapping; see `fits_in_day`.
    pub fn end_time(&self) -> MinuteOfDay {
        self.start_time.saturating_add(self.duration_minutes)
    }

    /// True when the reservation starts and ends on its own day.
    pub fn fits_in_day(&self) -> bool {
        self.duration_minutes > 0
            && self
                .start_time
                .checked_add(self.duration_minutes)
                .is_some_and(|end| end <= END_OF_DAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Conflict,
    Failed,
}

/// The single outcome produced for a submitted `ReservationRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationResult {
    pub request_id: Uuid,
    pub operation: ReservationOperation,
    pub status: ResultStatus,
    pub external_reservation_id: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl ReservationResult {
    pub fn success(request: &ReservationRequest, external_id: Option<String>) -> Self {
        Self {
            request_id: request.request_id,
            operation: request.operation,
            status: ResultStatus::Success,
            external_reservation_id: external_id,
            error_code: None,
            error_message: None,
        }
    }

    /// A failed result; a duplicate booking is reported as a conflict.
    pub fn failure(
        request: &ReservationRequest,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        let status = if code == ErrorCode::DuplicateReservation {
            ResultStatus::Conflict
        } else {
            ResultStatus::Failed
        };
        Self {
            request_id: request.request_id,
            operation: request.operation,
            status,
            external_reservation_id: None,
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Aggregate outcome of a batch of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    PartialFailure,
    AllFailed,
}

impl JobStatus {
    pub fn from_results(results: &[ReservationResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        if succeeded == results.len() {
            JobStatus::Success
        } else if succeeded == 0 {
            JobStatus::AllFailed
        } else {
            JobStatus::PartialFailure
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub status: JobStatus,
    pub results: Vec<ReservationResult>,
}

//=========================================================================================
// Date and time helpers
//=========================================================================================

/// Parses `HH:MM`, `H:MM` or `HHMM` into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Option<MinuteOfDay> {
    let value = value.trim();
    let (h, m) = match value.split_once(':') {
        Some((h, m)) => (h, m),
        None if value.len() == 4 => value.split_at(2),
        None => return None,
    };
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    // 24:00 is a valid end of day on the vendor grid.
    if minutes >= 60 || hours > 24 || (hours == 24 && minutes != 0) {
        return None;
    }
    Some(hours * 60 + minutes)
}

pub fn format_hhmm(minute: MinuteOfDay) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parses `YYYY-MM-DD` or the vendor's compact `YYYYMMDD`.
pub fn parse_ymd(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .ok()
}
