//! FHIR datetime parsing with the search fallback chain.
//!
//! Search values and FHIRPath literals accept progressively coarser
//! shapes: RFC3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD`, `YYYY-MM`,
//! `YYYY`. Partial shapes resolve to the start of their period in UTC.

use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime};

use crate::error::{CoreError, Result};

/// A parsed FHIR instant plus whether the source text carried a time
/// component. Date-only values get half-open day-range semantics under
/// the `eq` search prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FhirInstant {
    pub instant: OffsetDateTime,
    pub date_only: bool,
}

impl FhirInstant {
    pub fn new(instant: OffsetDateTime, date_only: bool) -> Self {
        Self { instant, date_only }
    }

    /// End of the day range for a date-only value: start + 1 day - 1 ns.
    pub fn day_range_end(&self) -> OffsetDateTime {
        self.instant + time::Duration::days(1) - time::Duration::nanoseconds(1)
    }
}

/// Current instant in UTC.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Parse a FHIR date or datetime using the fallback chain.
///
/// Order: RFC3339, naive datetime (assumed UTC), date, year-month, year.
pub fn parse_fhir_datetime(s: &str) -> Result<FhirInstant> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::Time("empty datetime value".to_string()));
    }

    if let Ok(dt) = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339) {
        return Ok(FhirInstant::new(dt, false));
    }

    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, naive) {
        return Ok(FhirInstant::new(dt.assume_utc(), false));
    }

    let date = format_description!("[year]-[month]-[day]");
    if let Ok(d) = Date::parse(s, date) {
        return Ok(FhirInstant::new(d.midnight().assume_utc(), true));
    }

    if let Some(dt) = parse_year_month(s) {
        return Ok(FhirInstant::new(dt, true));
    }

    if let Some(dt) = parse_year(s) {
        return Ok(FhirInstant::new(dt, true));
    }

    Err(CoreError::Time(format!("unparseable datetime '{s}'")))
}

fn parse_year_month(s: &str) -> Option<OffsetDateTime> {
    let (year, month) = s.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u8 = month.parse().ok()?;
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, 1).ok()?;
    Some(date.midnight().assume_utc())
}

fn parse_year(s: &str) -> Option<OffsetDateTime> {
    if s.len() != 4 {
        return None;
    }
    let year: i32 = s.parse().ok()?;
    let date = Date::from_calendar_date(year, Month::January, 1).ok()?;
    Some(date.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rfc3339_parses_with_time() {
        let parsed = parse_fhir_datetime("2023-05-15T14:30:00Z").unwrap();
        assert_eq!(parsed.instant, datetime!(2023-05-15 14:30:00 UTC));
        assert!(!parsed.date_only);
    }

    #[test]
    fn naive_datetime_assumes_utc() {
        let parsed = parse_fhir_datetime("2023-05-15T14:30:00").unwrap();
        assert_eq!(parsed.instant, datetime!(2023-05-15 14:30:00 UTC));
        assert!(!parsed.date_only);
    }

    #[test]
    fn date_only_marks_day_precision() {
        let parsed = parse_fhir_datetime("2023-05-15").unwrap();
        assert_eq!(parsed.instant, datetime!(2023-05-15 0:00:00 UTC));
        assert!(parsed.date_only);
    }

    #[test]
    fn year_month_resolves_to_first_day() {
        let parsed = parse_fhir_datetime("2023-05").unwrap();
        assert_eq!(parsed.instant, datetime!(2023-05-01 0:00:00 UTC));
        assert!(parsed.date_only);
    }

    #[test]
    fn bare_year_resolves_to_january_first() {
        let parsed = parse_fhir_datetime("2023").unwrap();
        assert_eq!(parsed.instant, datetime!(2023-01-01 0:00:00 UTC));
        assert!(parsed.date_only);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_fhir_datetime("not-a-date").is_err());
        assert!(parse_fhir_datetime("").is_err());
        assert!(parse_fhir_datetime("20230").is_err());
    }

    #[test]
    fn day_range_end_is_one_nanosecond_short_of_midnight() {
        let parsed = parse_fhir_datetime("2023-05-15").unwrap();
        let end = parsed.day_range_end();
        assert_eq!(
            end,
            datetime!(2023-05-16 0:00:00 UTC) - time::Duration::nanoseconds(1)
        );
    }

    #[test]
    fn offset_datetimes_are_normalized() {
        let parsed = parse_fhir_datetime("2023-05-15T14:30:00+02:00").unwrap();
        assert_eq!(
            parsed.instant.to_offset(time::UtcOffset::UTC),
            datetime!(2023-05-15 12:30:00 UTC)
        );
    }
}
