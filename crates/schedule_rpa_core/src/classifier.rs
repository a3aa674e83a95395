//! crates/schedule_rpa_core/src/classifier.rs
//!
//! Maps vendor mutation responses (and the alert text some of them raise) onto
//! the canonical error taxonomy. Structural failures never reach this module.

use crate::error::ErrorCode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// The `{result, message}` envelope every vendor mutation endpoint answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorResponse {
    pub result: bool,
    pub message: Option<String>,
}

impl VendorResponse {
    /// Lenient parse: `result` may arrive as a bool, a number or a string.
    pub fn from_json(value: &Value) -> Self {
        let result = match value.get("result") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => matches!(s.trim(), "true" | "1" | "ok" | "OK"),
            _ => false,
        };
        let message = value
            .get("message")
            .or_else(|| value.get("errorMessage"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        Self { result, message }
    }
}

fn duplicate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(the other reservation exists|already reserved|reservation already exists|他の予約が(存在|入って)|予約が重複)")
            .expect("duplicate pattern is valid")
    })
}

fn outside_hours_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(outside (of )?(the )?working hours|out of business hours|not within business hours|営業時間外|受付時間外|勤務時間外)")
            .expect("outside-hours pattern is valid")
    })
}

/// Classifies free text reported by the vendor.
pub fn classify_text(text: &str) -> ErrorCode {
    if duplicate_pattern().is_match(text) {
        ErrorCode::DuplicateReservation
    } else if outside_hours_pattern().is_match(text) {
        ErrorCode::SlotNotAvailable
    } else {
        ErrorCode::SystemError
    }
}

/// Classifies a failed vendor response, consulting the alert text when the
/// payload itself is not conclusive.
pub fn classify(response: &VendorResponse, alert: Option<&str>) -> ErrorCode {
    let candidates = response.message.as_deref().into_iter().chain(alert);
    let mut code = ErrorCode::SystemError;
    for text in candidates {
        code = classify_text(text);
        if code != ErrorCode::SystemError {
            break;
        }
    }
    code
}

/// Human readable failure text: the payload message, then the alert, then a default.
pub fn failure_message(response: &VendorResponse, alert: Option<&str>) -> String {
    response
        .message
        .clone()
        .or_else(|| alert.map(str::to_string))
        .unwrap_or_else(|| "vendor reported failure without a message".to_string())
}
