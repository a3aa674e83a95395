//! crates/schedule_rpa_core/src/error.rs
//!
//! The canonical error taxonomy shared by the session manager, the workflow
//! engine and the front door.

use crate::domain::SessionState;
use crate::ports::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    ShopNotFound,
    Timeout,
    DuplicateReservation,
    SlotNotAvailable,
    ReservationNotFound,
    SystemError,
    PartialFailure,
    AllFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ShopNotFound => "SHOP_NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DuplicateReservation => "DUPLICATE_RESERVATION",
            ErrorCode::SlotNotAvailable => "SLOT_NOT_AVAILABLE",
            ErrorCode::ReservationNotFound => "RESERVATION_NOT_FOUND",
            ErrorCode::SystemError => "SYSTEM_ERROR",
            ErrorCode::PartialFailure => "PARTIAL_FAILURE",
            ErrorCode::AllFailed => "ALL_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type of the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RpaError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Shop not found: {0}")]
    ShopNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Duplicate reservation: {0}")]
    DuplicateReservation(String),

    #[error("Slot not available: {0}")]
    SlotNotAvailable(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// The session cannot serve operations in its current state.
    #[error("Session is not available (state: {0})")]
    SessionUnavailable(SessionState),

    #[error("Automation port error: {0}")]
    Port(#[from] PortError),

    #[error("System error: {0}")]
    System(String),
}

impl RpaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RpaError::AuthFailed(_) => ErrorCode::AuthFailed,
            RpaError::ShopNotFound(_) => ErrorCode::ShopNotFound,
            RpaError::Timeout(_) => ErrorCode::Timeout,
            RpaError::DuplicateReservation(_) => ErrorCode::DuplicateReservation,
            RpaError::SlotNotAvailable(_) => ErrorCode::SlotNotAvailable,
            RpaError::ReservationNotFound(_) => ErrorCode::ReservationNotFound,
            RpaError::Port(PortError::Timeout(_)) => ErrorCode::Timeout,
            RpaError::SessionUnavailable(_) | RpaError::Port(_) | RpaError::System(_) => {
                ErrorCode::SystemError
            }
        }
    }

    /// Builds the error matching a canonical code, used when a workflow result
    /// has to be surfaced as a failure.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::AuthFailed => RpaError::AuthFailed(message),
            ErrorCode::ShopNotFound => RpaError::ShopNotFound(message),
            ErrorCode::Timeout => RpaError::Timeout(message),
            ErrorCode::DuplicateReservation => RpaError::DuplicateReservation(message),
            ErrorCode::SlotNotAvailable => RpaError::SlotNotAvailable(message),
            ErrorCode::ReservationNotFound => RpaError::ReservationNotFound(message),
            ErrorCode::SystemError | ErrorCode::PartialFailure | ErrorCode::AllFailed => {
                RpaError::System(message)
            }
        }
    }

    /// True when the browser or its protocol channel went away underneath us.
    pub fn is_actor_lost(&self) -> bool {
        match self {
            RpaError::Port(PortError::ActorLost(_)) => true,
            RpaError::Port(other) => indicates_actor_lost(&other.to_string()),
            RpaError::System(message) => indicates_actor_lost(message),
            _ => false,
        }
    }
}

const ACTOR_LOST_MARKERS: &[&str] = &[
    "target closed",
    "session closed",
    "browser has been closed",
    "websocket",
    "connection closed",
    "no target with given id",
    "channel closed",
];

/// Classifies a raw error message as "the automation actor was torn down externally".
pub fn indicates_actor_lost(message: &str) -> bool {
    let lowered = message.to_lowercase();
    ACTOR_LOST_MARKERS.iter().any(|marker| lowered.contains(marker))
}

pub type RpaResult<T> = Result<T, RpaError>;
