//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response bodies of the REST API and their
//! mapping to the core domain types. Dates travel as `YYYY-MM-DD`, times as `HH:MM`.

use crate::error::{encode_screenshot, ApiError};
use chrono::NaiveDate;
use schedule_rpa_core::domain::{format_hhmm, parse_hhmm, parse_ymd, END_OF_DAY};
use schedule_rpa_core::workflow::form::normalize_phone;
use schedule_rpa_core::{
    ErrorCode, JobStatus, ReservationOperation, ReservationRecord, ReservationRequest,
    ReservationResult, ResultStatus, SlotInfo, Timing,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Slot length assumed when a create omits `duration_min`.
pub const DEFAULT_DURATION_MIN: u32 = 30;

//=========================================================================================
// Requests FROM the Client
//=========================================================================================

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SlotsQuery {
    /// First date, `YYYY-MM-DD`. Defaults to today.
    pub date_from: Option<String>,
    /// Last date, inclusive. Defaults to today.
    pub date_to: Option<String>,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub customer_phone: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CreateReservationBody {
    pub date: String,
    pub time: String,
    pub duration_min: Option<u32>,
    pub customer_name: String,
    pub customer_phone: String,
    pub menu_name: Option<String>,
    pub notes: Option<String>,
}

/// The reservation is found by date, time and name; the phone narrows it when given.
#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct UpdateReservationBody {
    pub date: String,
    pub time: String,
    pub duration_min: Option<u32>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub menu_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CancelReservationBody {
    pub date: String,
    pub time: String,
    pub customer_name: String,
    pub customer_phone: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationDto {
    Create,
    Update,
    Cancel,
    Delete,
}

impl From<OperationDto> for ReservationOperation {
    fn from(op: OperationDto) -> Self {
        match op {
            OperationDto::Create => ReservationOperation::Create,
            OperationDto::Update => ReservationOperation::Update,
            OperationDto::Cancel => ReservationOperation::Cancel,
            OperationDto::Delete => ReservationOperation::Delete,
        }
    }
}

impl From<ReservationOperation> for OperationDto {
    fn from(op: ReservationOperation) -> Self {
        match op {
            ReservationOperation::Create => OperationDto::Create,
            ReservationOperation::Update => OperationDto::Update,
            ReservationOperation::Cancel => OperationDto::Cancel,
            ReservationOperation::Delete => OperationDto::Delete,
        }
    }
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct BatchItem {
    pub operation: OperationDto,
    pub date: String,
    pub time: String,
    pub duration_min: Option<u32>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub menu_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct BatchBody {
    pub requests: Vec<BatchItem>,
}

//=========================================================================================
// Responses TO the Client
//=========================================================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
pub struct TimingDto {
    pub wait_ms: u64,
    pub run_ms: u64,
    pub total_ms: u64,
}

impl From<Timing> for TimingDto {
    fn from(t: Timing) -> Self {
        Self {
            wait_ms: t.wait_ms,
            run_ms: t.run_ms,
            total_ms: t.total_ms,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub session_state: String,
    pub has_credentials: bool,
    pub shop_id: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SessionView {
    pub state: String,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
    pub shop_id: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ConfigView {
    pub keep_alive_interval_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct StatusResponse {
    pub session: SessionView,
    pub config: ConfigView,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct SlotDto {
    pub date: String,
    pub time: String,
    pub duration_min: u32,
    pub capacity: u32,
    pub resource_id: String,
    pub resource_name: String,
}

impl From<&SlotInfo> for SlotDto {
    fn from(slot: &SlotInfo) -> Self {
        Self {
            date: format_date(slot.date),
            time: format_hhmm(slot.start_time),
            duration_min: slot.duration_minutes,
            capacity: slot.capacity,
            resource_id: slot.resource_id.clone(),
            resource_name: slot.resource_name.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SlotsResponse {
    pub success: bool,
    pub available_slots: Vec<SlotDto>,
    pub count: usize,
    pub timing: TimingDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct ReservationDto {
    /// The vendor's reservation id, when the grid exposes one.
    pub reservation_id: Option<String>,
    pub date: String,
    pub time: String,
    pub end_time: String,
    pub duration_min: u32,
    pub resource_id: String,
    pub resource_name: String,
    pub label: String,
}

impl From<&ReservationRecord> for ReservationDto {
    fn from(r: &ReservationRecord) -> Self {
        Self {
            reservation_id: r.external_id.clone(),
            date: format_date(r.date),
            time: format_hhmm(r.start_time),
            end_time: format_hhmm(r.end_time),
            duration_min: r.duration_minutes(),
            resource_id: r.resource_id.clone(),
            resource_name: r.resource_name.clone(),
            label: r.label.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SearchResponse {
    pub success: bool,
    pub reservations: Vec<ReservationDto>,
    pub count: usize,
    pub timing: TimingDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Answer to create, update and cancel/delete.
#[derive(Serialize, Debug, ToSchema)]
pub struct ReservationResponse {
    pub success: bool,
    /// Id of this request, echoed for correlation.
    pub reservation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reservation_id: Option<String>,
    pub timing: TimingDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct BatchResultDto {
    pub request_id: Uuid,
    pub operation: OperationDto,
    /// `success`, `conflict` or `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reservation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&ReservationResult> for BatchResultDto {
    fn from(r: &ReservationResult) -> Self {
        let status = match r.status {
            ResultStatus::Success => "success",
            ResultStatus::Conflict => "conflict",
            ResultStatus::Failed => "failed",
        };
        Self {
            request_id: r.request_id,
            operation: r.operation.into(),
            status: status.to_string(),
            external_reservation_id: r.external_reservation_id.clone(),
            error_code: r.error_code.map(|c| c.as_str().to_string()),
            error_message: r.error_message.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct BatchResponse {
    pub success: bool,
    /// `SUCCESS`, `PARTIAL_FAILURE` or `ALL_FAILED`.
    pub status: String,
    pub results: Vec<BatchResultDto>,
    pub timing: TimingDto,
}

pub fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Success => "SUCCESS",
        JobStatus::PartialFailure => ErrorCode::PartialFailure.as_str(),
        JobStatus::AllFailed => ErrorCode::AllFailed.as_str(),
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RestartResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

//=========================================================================================
// Parsing helpers
//=========================================================================================

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn screenshot_field(png: Option<Vec<u8>>) -> Option<String> {
    png.as_deref().map(encode_screenshot)
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    parse_ymd(value).ok_or_else(|| {
        ApiError::BadRequest(format!("{} must be YYYY-MM-DD, got '{}'", field, value))
    })
}

/// Parses an optional date, falling back to `default`.
pub fn parse_date_or(
    field: &str,
    value: Option<&str>,
    default: NaiveDate,
) -> Result<NaiveDate, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => parse_date(field, value),
        None => Ok(default),
    }
}

fn parse_time(value: &str) -> Result<u32, ApiError> {
    parse_hhmm(value)
        .ok_or_else(|| ApiError::BadRequest(format!("time must be HH:MM, got '{}'", value)))
}

fn require(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

struct RequestFields {
    date: String,
    time: String,
    duration_min: Option<u32>,
    customer_name: String,
    customer_phone: Option<String>,
    menu_name: Option<String>,
    notes: Option<String>,
}

fn build_request(
    operation: ReservationOperation,
    fields: RequestFields,
) -> Result<ReservationRequest, ApiError> {
    let duration_minutes = fields.duration_min.unwrap_or(DEFAULT_DURATION_MIN);
    if duration_minutes == 0 {
        return Err(ApiError::BadRequest("duration_min must be positive".to_string()));
    }
    let start_time = parse_time(&fields.time)?;
    if start_time
        .checked_add(duration_minutes)
        .map_or(true, |end| end > END_OF_DAY)
    {
        return Err(ApiError::BadRequest(format!(
            "duration_min {} from {} runs past 24:00",
            duration_minutes,
            format_hhmm(start_time)
        )));
    }
    let customer_phone = clean(fields.customer_phone).unwrap_or_default();
    let phone_required = matches!(
        operation,
        ReservationOperation::Create | ReservationOperation::Cancel | ReservationOperation::Delete
    );
    if phone_required && customer_phone.is_empty() {
        return Err(ApiError::BadRequest("customer_phone is required".to_string()));
    }
    if !customer_phone.is_empty() && normalize_phone(&customer_phone).is_empty() {
        return Err(ApiError::BadRequest(format!(
            "customer_phone '{}' contains no digits",
            customer_phone
        )));
    }
    Ok(ReservationRequest {
        request_id: Uuid::new_v4(),
        operation,
        date: parse_date("date", &fields.date)?,
        start_time,
        duration_minutes,
        customer_name: require("customer_name", &fields.customer_name)?,
        customer_phone,
        menu_name: clean(fields.menu_name),
        notes: clean(fields.notes),
    })
}

impl CreateReservationBody {
    pub fn into_request(self) -> Result<ReservationRequest, ApiError> {
        build_request(
            ReservationOperation::Create,
            RequestFields {
                date: self.date,
                time: self.time,
                duration_min: self.duration_min,
                customer_name: self.customer_name,
                customer_phone: Some(self.customer_phone),
                menu_name: self.menu_name,
                notes: self.notes,
            },
        )
    }
}

impl UpdateReservationBody {
    pub fn into_request(self) -> Result<ReservationRequest, ApiError> {
        build_request(
            ReservationOperation::Update,
            RequestFields {
                date: self.date,
                time: self.time,
                duration_min: self.duration_min,
                customer_name: self.customer_name,
                customer_phone: self.customer_phone,
                menu_name: self.menu_name,
                notes: self.notes,
            },
        )
    }
}

impl CancelReservationBody {
    /// `operation` is `Cancel` or `Delete`; both identify the reservation the same way.
    pub fn into_request(
        self,
        operation: ReservationOperation,
    ) -> Result<ReservationRequest, ApiError> {
        build_request(
            operation,
            RequestFields {
                date: self.date,
                time: self.time,
                duration_min: None,
                customer_name: self.customer_name,
                customer_phone: Some(self.customer_phone),
                menu_name: None,
                notes: None,
            },
        )
    }
}

impl BatchItem {
    pub fn into_request(self) -> Result<ReservationRequest, ApiError> {
        build_request(
            self.operation.into(),
            RequestFields {
                date: self.date,
                time: self.time,
                duration_min: self.duration_min,
                customer_name: self.customer_name,
                customer_phone: self.customer_phone,
                menu_name: self.menu_name,
                notes: self.notes,
            },
        )
    }
}
