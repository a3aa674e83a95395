//! crates/schedule_rpa_core/src/workflow/slots.rs
//!
//! Pure slot computation over a rendered schedule window. Intervals are
//! half-open `[start, end)` in minutes of day.

use crate::domain::{parse_hhmm, parse_ymd, MinuteOfDay, ReservationRecord, ShiftRange, SlotInfo};
use crate::ports::ElementRecord;
use crate::vendor;
use chrono::NaiveDate;
use tracing::debug;

/// An open-looking cell of the grid, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCell {
    pub date: NaiveDate,
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
    pub resource_id: String,
    pub line: u32,
    pub line_count: u32,
    pub unavailable: bool,
}

/// Where a new reservation is placed on the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTarget {
    pub resource_id: String,
    pub line: u32,
    pub line_count: u32,
}

/// Everything the engine reads from one rendered window.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    pub cells: Vec<CandidateCell>,
    pub reservations: Vec<ReservationRecord>,
    pub shifts: Vec<ShiftRange>,
    /// `(resource_id, name)` in grid order.
    pub resources: Vec<(String, String)>,
}

/// Half-open overlap: touching intervals do not overlap.
pub fn overlaps(
    start: MinuteOfDay,
    end: MinuteOfDay,
    other_start: MinuteOfDay,
    other_end: MinuteOfDay,
) -> bool {
    start < other_end && end > other_start
}

/// Clips `[start, end)` to the first shift range it intersects.
/// Returns `None` when it intersects none of them.
pub fn clip_to_shift<'a, I>(
    start: MinuteOfDay,
    end: MinuteOfDay,
    shifts: I,
) -> Option<(MinuteOfDay, MinuteOfDay)>
where
    I: IntoIterator<Item = &'a ShiftRange>,
{
    shifts
        .into_iter()
        .find(|s| overlaps(start, end, s.start_minute_of_day, s.end_minute_of_day))
        .map(|s| (start.max(s.start_minute_of_day), end.min(s.end_minute_of_day)))
}

impl ScheduleSnapshot {
    /// Parses the raw element records. Malformed elements are skipped.
    pub fn from_elements(
        cells: &[ElementRecord],
        reservations: &[ElementRecord],
        shifts: &[ElementRecord],
        resources: &[ElementRecord],
    ) -> Self {
        let resources: Vec<(String, String)> = resources
            .iter()
            .filter_map(|r| {
                let id = r.attr(vendor::ATTR_RESOURCE)?.to_string();
                Some((id, r.text.trim().to_string()))
            })
            .collect();

        let mut snapshot = Self {
            cells: cells.iter().filter_map(parse_cell).collect(),
            reservations: Vec::new(),
            shifts: shifts.iter().filter_map(parse_shift).collect(),
            resources,
        };
        snapshot.reservations = reservations
            .iter()
            .filter_map(|r| parse_reservation(r, &snapshot))
            .collect();

        let skipped = cells.len() - snapshot.cells.len();
        if skipped > 0 {
            debug!(skipped, "Skipped malformed schedule cells.");
        }
        snapshot
    }

    pub fn resource_name(&self, resource_id: &str) -> String {
        self.resources
            .iter()
            .find(|(id, _)| id == resource_id)
            .map(|(_, name)| name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("resource {}", resource_id))
    }

    fn is_reserved(
        &self,
        date: NaiveDate,
        resource_id: &str,
        start: MinuteOfDay,
        end: MinuteOfDay,
    ) -> bool {
        self.reservations.iter().any(|r| {
            r.date == date
                && r.resource_id == resource_id
                && overlaps(start, end, r.start_time, r.end_time)
        })
    }

    /// Every surviving open cell becomes one slot of capacity 1.
    pub fn open_slots(&self) -> Vec<SlotInfo> {
        let tenant_has_shifts = !self.shifts.is_empty();
        self.cells
            .iter()
            .filter(|cell| !cell.unavailable)
            .filter(|cell| !self.is_reserved(cell.date, &cell.resource_id, cell.start, cell.end))
            .filter_map(|cell| {
                let (start, end) = if tenant_has_shifts {
                    let own_shifts = self
                        .shifts
                        .iter()
                        .filter(|s| s.date == cell.date && s.resource_id == cell.resource_id);
                    clip_to_shift(cell.start, cell.end, own_shifts)?
                } else {
                    (cell.start, cell.end)
                };
                if end <= start {
                    return None;
                }
                Some(SlotInfo {
                    date: cell.date,
                    start_time: start,
                    duration_minutes: end - start,
                    capacity: 1,
                    resource_id: cell.resource_id.clone(),
                    resource_name: self.resource_name(&cell.resource_id),
                })
            })
            .collect()
    }

    /// Picks where a new reservation goes: the first free, available cell starting
    /// at `start`, otherwise the first resource on the grid.
    pub fn booking_target(
        &self,
        date: NaiveDate,
        start: MinuteOfDay,
        end: MinuteOfDay,
    ) -> Option<BookingTarget> {
        let free_cell = self.cells.iter().find(|cell| {
            cell.date == date
                && cell.start == start
                && !cell.unavailable
                && !self.is_reserved(date, &cell.resource_id, start, end)
        });
        if let Some(cell) = free_cell {
            return Some(BookingTarget {
                resource_id: cell.resource_id.clone(),
                line: cell.line,
                line_count: cell.line_count,
            });
        }
        self.resources.first().map(|(id, _)| BookingTarget {
            resource_id: id.clone(),
            line: 1,
            line_count: 1,
        })
    }
}

fn attr_date(record: &ElementRecord) -> Option<NaiveDate> {
    parse_ymd(record.attr(vendor::ATTR_DATE)?)
}

fn attr_time(record: &ElementRecord, name: &str) -> Option<MinuteOfDay> {
    parse_hhmm(record.attr(name)?)
}

fn attr_u32(record: &ElementRecord, name: &str) -> u32 {
    record
        .attr(name)
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

fn parse_cell(record: &ElementRecord) -> Option<CandidateCell> {
    let unavailable = vendor::UNAVAILABLE_CELL_CLASSES
        .iter()
        .any(|class| record.has_class(class))
        || record.attr("aria-disabled") == Some("true");
    Some(CandidateCell {
        date: attr_date(record)?,
        start: attr_time(record, vendor::ATTR_START)?,
        end: attr_time(record, vendor::ATTR_END)?,
        resource_id: record.attr(vendor::ATTR_RESOURCE)?.to_string(),
        line: attr_u32(record, vendor::ATTR_LINE),
        line_count: attr_u32(record, vendor::ATTR_LINE_COUNT),
        unavailable,
    })
}

fn parse_shift(record: &ElementRecord) -> Option<ShiftRange> {
    Some(ShiftRange {
        date: attr_date(record)?,
        resource_id: record.attr(vendor::ATTR_RESOURCE)?.to_string(),
        start_minute_of_day: attr_time(record, vendor::ATTR_START)?,
        end_minute_of_day: attr_time(record, vendor::ATTR_END)?,
    })
}

pub(crate) fn parse_reservation(
    record: &ElementRecord,
    snapshot: &ScheduleSnapshot,
) -> Option<ReservationRecord> {
    let resource_id = record.attr(vendor::ATTR_RESOURCE)?.to_string();
    Some(ReservationRecord {
        external_id: record
            .attr(vendor::ATTR_RESERVATION_ID)
            .map(str::to_string)
            .filter(|id| !id.is_empty()),
        date: attr_date(record)?,
        start_time: attr_time(record, vendor::ATTR_START)?,
        end_time: attr_time(record, vendor::ATTR_END)?,
        resource_name: snapshot.resource_name(&resource_id),
        resource_id,
        label: record.text.trim().to_string(),
    })
}
