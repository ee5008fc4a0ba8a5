//! Rule-to-slot expansion and slot arithmetic.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time, Weekday};

use crate::error::SchedulingError;

/// A weekly recurrence rule with working hours and an optional break.
/// Times of day are `HH:MM` strings, matching the FHIR availableTime
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    /// FHIR day codes: mon tue wed thu fri sat sun.
    pub days_of_week: Vec<String>,
    pub start: String,
    pub end: String,
    pub slot_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_end: Option<String>,
}

/// One bookable window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub minutes: i64,
}

impl TimeSlot {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            start,
            end,
            minutes: (end - start).whole_minutes(),
        }
    }
}

/// Parameters of a `Slot/$find`-style availability query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    pub duration: Option<i64>,
    pub slot_type: Option<String>,
    pub service_type: Option<String>,
    pub specialty: Option<String>,
    pub practitioner: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub include_schedule: bool,
}

fn parse_time_of_day(s: &str) -> Result<Time, SchedulingError> {
    let (hour, minute) = s
        .split_once(':')
        .ok_or_else(|| SchedulingError::InvalidTimeOfDay(s.to_string()))?;
    let hour: u8 = hour
        .parse()
        .map_err(|_| SchedulingError::InvalidTimeOfDay(s.to_string()))?;
    let minute: u8 = minute
        .parse()
        .map_err(|_| SchedulingError::InvalidTimeOfDay(s.to_string()))?;
    Time::from_hms(hour, minute, 0).map_err(|_| SchedulingError::InvalidTimeOfDay(s.to_string()))
}

fn parse_day_code(s: &str) -> Result<Weekday, SchedulingError> {
    match s.to_ascii_lowercase().as_str() {
        "mon" => Ok(Weekday::Monday),
        "tue" => Ok(Weekday::Tuesday),
        "wed" => Ok(Weekday::Wednesday),
        "thu" => Ok(Weekday::Thursday),
        "fri" => Ok(Weekday::Friday),
        "sat" => Ok(Weekday::Saturday),
        "sun" => Ok(Weekday::Sunday),
        other => Err(SchedulingError::InvalidDayOfWeek(other.to_string())),
    }
}

/// Strict interval overlap. Adjacent ranges do not overlap, and a
/// zero-length range never overlaps anything.
pub fn overlaps_time_range(
    a_start: OffsetDateTime,
    a_end: OffsetDateTime,
    b_start: OffsetDateTime,
    b_end: OffsetDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Expand a rule into slots over `[range_start, range_end]`.
///
/// For each matching day, slots step by `slot_minutes` from the rule's
/// start time; a slot whose end would pass the rule's end time is not
/// emitted, and slots overlapping the break window are dropped.
pub fn generate_time_slots(
    rule: &AvailabilityRule,
    range_start: OffsetDateTime,
    range_end: OffsetDateTime,
) -> Result<Vec<TimeSlot>, SchedulingError> {
    if rule.slot_minutes == 0 || range_end < range_start {
        return Ok(Vec::new());
    }

    let days: Vec<Weekday> = rule
        .days_of_week
        .iter()
        .map(|d| parse_day_code(d))
        .collect::<Result<_, _>>()?;
    let day_start = parse_time_of_day(&rule.start)?;
    let day_end = parse_time_of_day(&rule.end)?;
    let break_window = match (&rule.break_start, &rule.break_end) {
        (Some(bs), Some(be)) => Some((parse_time_of_day(bs)?, parse_time_of_day(be)?)),
        _ => None,
    };

    let step = Duration::minutes(rule.slot_minutes as i64);
    let offset = range_start.offset();
    let mut slots = Vec::new();

    let mut date = range_start.date();
    while date <= range_end.date() {
        if days.contains(&date.weekday()) {
            let window_end = date.with_time(day_end).assume_offset(offset);
            let mut cursor = date.with_time(day_start).assume_offset(offset);
            while cursor + step <= window_end {
                let slot = TimeSlot::new(cursor, cursor + step);
                let in_break = break_window.is_some_and(|(bs, be)| {
                    let break_start = date.with_time(bs).assume_offset(offset);
                    let break_end = date.with_time(be).assume_offset(offset);
                    overlaps_time_range(slot.start, slot.end, break_start, break_end)
                });
                if !in_break {
                    slots.push(slot);
                }
                cursor += step;
            }
        }
        date = match date.next_day() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(slots)
}

/// Drop every available slot that overlaps any busy slot.
pub fn merge_availability(available: Vec<TimeSlot>, busy: &[TimeSlot]) -> Vec<TimeSlot> {
    available
        .into_iter()
        .filter(|slot| {
            !busy
                .iter()
                .any(|b| overlaps_time_range(slot.start, slot.end, b.start, b.end))
        })
        .collect()
}

/// Keep slots at least `min_minutes` long; zero keeps everything.
pub fn filter_slots_by_duration(slots: Vec<TimeSlot>, min_minutes: i64) -> Vec<TimeSlot> {
    if min_minutes == 0 {
        return slots;
    }
    slots
        .into_iter()
        .filter(|slot| slot.minutes >= min_minutes)
        .collect()
}
