//! crates/schedule_rpa_core/src/vendor.rs
//!
//! The vendor UI contract: URLs, element locators, page entry points and the
//! network exchanges the engine correlates with. The vendor owns this surface;
//! when its markup changes, this is the only module that should follow.

use crate::domain::{format_hhmm, MinuteOfDay};
use crate::ports::{ExchangeMatcher, Locator};
use chrono::NaiveDate;

/// A tenant-scoped view of the vendor site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSite {
    pub base_url: String,
    pub shop_id: String,
}

impl VendorSite {
    pub fn new(base_url: impl Into<String>, shop_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shop_id: shop_id.into(),
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn schedule_url(&self) -> String {
        format!("{}/{}/schedule", self.base_url, self.shop_id)
    }
}

//=========================================================================================
// Encodings
//=========================================================================================

/// `YYYYMMDD`, as used in `data-date` attributes and the render entry point.
pub fn encode_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYYMMDDHHMM`, as expected by the popup entry points.
pub fn encode_datetime(date: NaiveDate, minute: MinuteOfDay) -> String {
    format!("{}{:02}{:02}", encode_date(date), minute / 60, minute % 60)
}

/// `HH:MM`, as used in `data-start` / `data-end` attributes.
pub fn encode_time(minute: MinuteOfDay) -> String {
    format_hhmm(minute)
}

//=========================================================================================
// Login
//=========================================================================================

pub const LOGIN_ID_INPUT: &str = "#loginId";
pub const LOGIN_PASSWORD_INPUT: &str = "#loginPassword";
pub const LOGIN_SUBMIT: &str = "#loginSubmit";
pub const LOGIN_ERROR: &str = ".login-error";
pub const AUTHENTICATED_MARKER: &str = "#logoutLink";

//=========================================================================================
// Schedule grid
//=========================================================================================

pub const RENDER_ENTRY_POINT: &str = "changeScheduleDate";
pub const SCHEDULE_EXCHANGE: &str = "/schedule/list";
pub const SCHEDULE_GRID: &str = "#scheduleGrid";
pub const SCHEDULE_CELL: &str = ".schedule-cell";
pub const RESERVATION_BLOCK: &str = ".reservation-block";
pub const SHIFT_RANGE: &str = ".shift-range";
pub const RESOURCE_HEADER: &str = ".resource-header";

/// Classes that mark a cell as not bookable.
pub const UNAVAILABLE_CELL_CLASSES: &[&str] = &["is-closed", "is-disabled", "is-holiday"];

pub const ATTR_DATE: &str = "data-date";
pub const ATTR_START: &str = "data-start";
pub const ATTR_END: &str = "data-end";
pub const ATTR_RESOURCE: &str = "data-resource-id";
pub const ATTR_LINE: &str = "data-line";
pub const ATTR_LINE_COUNT: &str = "data-line-count";
pub const ATTR_RESERVATION_ID: &str = "data-reservation-id";

/// Number of consecutive days the grid renders per call.
pub const RENDER_WINDOW_DAYS: i64 = 8;

//=========================================================================================
// Reservation popups
//=========================================================================================

pub const CREATE_ENTRY_POINT: &str = "openNewReservation";
pub const EDIT_ENTRY_POINT: &str = "openEditReservation";

pub const SIMPLE_FORM: &str = "#simpleReserveForm";
pub const TO_DETAIL_BUTTON: &str = "#toDetailForm";
pub const DETAIL_FORM: &str = "#reserveDetailForm";
pub const LAST_NAME_INPUT: &str = "#customerLastName";
pub const FIRST_NAME_INPUT: &str = "#customerFirstName";
pub const PHONE_INPUT: &str = "#customerTel";
pub const DURATION_INPUT: &str = "#reserveDuration";
pub const NOTES_INPUT: &str = "#reserveMemo";
pub const MENU_SELECT: &str = "#menuSelect";
pub const MENU_OPTION: &str = "#menuSelect option";
pub const SUBMIT_BUTTON: &str = "#reserveSubmit";
pub const REGISTER_EXCHANGE: &str = "/reserve/regist";

pub const CANCEL_BUTTON: &str = "#cancelReserve";
pub const CANCEL_DIALOG: &str = "#cancelDialog";
pub const CANCEL_REASON_RADIO: &str = "input[name=\"cancelReason\"]";
pub const CANCEL_REASON_NO_CONTACT: &str = "noContact";
pub const CANCEL_REASON_CONTACTED: &str = "contacted";
pub const CANCEL_CONFIRM: &str = "#cancelConfirm";
pub const CANCEL_EXCHANGE: &str = "/reserve/cancel";

pub const DELETE_BUTTON: &str = "#deleteReserve";
pub const DELETE_DIALOG: &str = "#deleteDialog";
pub const DELETE_CONFIRM: &str = "#deleteConfirm";
pub const DELETE_EXCHANGE: &str = "/reserve/delete";

//=========================================================================================
// Locator helpers
//=========================================================================================

pub fn locator(selector: &str) -> Locator {
    Locator::css(selector)
}

pub fn cells_on(date: NaiveDate) -> Locator {
    Locator::css(SCHEDULE_CELL).with_attr(ATTR_DATE, encode_date(date))
}

pub fn reservations_on(date: NaiveDate) -> Locator {
    Locator::css(RESERVATION_BLOCK).with_attr(ATTR_DATE, encode_date(date))
}

pub fn reservations_at(date: NaiveDate, start: MinuteOfDay) -> Locator {
    reservations_on(date).with_attr(ATTR_START, encode_time(start))
}

pub fn cancel_reason(value: &str) -> Locator {
    Locator::css(CANCEL_REASON_RADIO).with_attr("value", value)
}

pub fn schedule_exchange() -> ExchangeMatcher {
    ExchangeMatcher::post(SCHEDULE_EXCHANGE)
}

pub fn register_exchange() -> ExchangeMatcher {
    ExchangeMatcher::post(REGISTER_EXCHANGE)
}

pub fn cancel_exchange() -> ExchangeMatcher {
    ExchangeMatcher::post(CANCEL_EXCHANGE)
}

pub fn delete_exchange() -> ExchangeMatcher {
    ExchangeMatcher::post(DELETE_EXCHANGE)
}
