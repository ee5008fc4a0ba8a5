use thiserror::Error;

/// Errors from availability computation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Invalid time of day '{0}': expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("Invalid day of week: {0}")]
    InvalidDayOfWeek(String),

    #[error("Unknown schedule actor: {0}")]
    UnknownActor(String),
}
