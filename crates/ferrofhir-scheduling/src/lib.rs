//! Availability primitives: expanding recurrence rules into bookable
//! time slots, merging against busy time, and conflict checks.

pub mod availability;
pub mod store;

mod error;

pub use availability::{
    AvailabilityRequest, AvailabilityRule, TimeSlot, filter_slots_by_duration,
    generate_time_slots, merge_availability, overlaps_time_range,
};
pub use error::SchedulingError;
pub use store::{ConflictResult, ScheduleStore};
