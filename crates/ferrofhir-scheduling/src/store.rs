//! In-memory schedule store: busy slots per actor reference.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::availability::{TimeSlot, overlaps_time_range};

/// Result of a conflict check for one proposed time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResult {
    pub has_conflict: bool,
    pub conflicting: Vec<TimeSlot>,
}

/// Busy time keyed by actor reference (`Practitioner/x`, `Location/y`).
/// Reads clone so callers may mutate freely.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    busy: RwLock<HashMap<String, Vec<TimeSlot>>>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_busy(&self, actor: &str, slot: TimeSlot) {
        let mut busy = self.busy.write().expect("schedule lock poisoned");
        busy.entry(actor.to_string()).or_default().push(slot);
    }

    pub fn busy_for(&self, actor: &str) -> Vec<TimeSlot> {
        self.busy
            .read()
            .expect("schedule lock poisoned")
            .get(actor)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self, actor: &str) {
        self.busy
            .write()
            .expect("schedule lock poisoned")
            .remove(actor);
    }

    /// Scan the actor's busy slots for any overlap with the proposed
    /// range. An unknown actor has no busy time and never conflicts.
    pub fn check_conflicts(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        actor: &str,
    ) -> ConflictResult {
        let conflicting: Vec<TimeSlot> = self
            .busy_for(actor)
            .into_iter()
            .filter(|slot| overlaps_time_range(start, end, slot.start, slot.end))
            .collect();
        ConflictResult {
            has_conflict: !conflicting.is_empty(),
            conflicting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn conflict_detection_finds_overlapping_busy_slots() {
        let store = ScheduleStore::new();
        store.add_busy(
            "Practitioner/d1",
            TimeSlot::new(
                datetime!(2025-06-02 9:00:00 UTC),
                datetime!(2025-06-02 10:00:00 UTC),
            ),
        );

        let result = store.check_conflicts(
            datetime!(2025-06-02 9:30:00 UTC),
            datetime!(2025-06-02 10:30:00 UTC),
            "Practitioner/d1",
        );
        assert!(result.has_conflict);
        assert_eq!(result.conflicting.len(), 1);
    }

    #[test]
    fn adjacent_busy_slot_is_not_a_conflict() {
        let store = ScheduleStore::new();
        store.add_busy(
            "Practitioner/d1",
            TimeSlot::new(
                datetime!(2025-06-02 9:00:00 UTC),
                datetime!(2025-06-02 10:00:00 UTC),
            ),
        );

        let result = store.check_conflicts(
            datetime!(2025-06-02 10:00:00 UTC),
            datetime!(2025-06-02 11:00:00 UTC),
            "Practitioner/d1",
        );
        assert!(!result.has_conflict);
    }

    #[test]
    fn unknown_actor_never_conflicts() {
        let store = ScheduleStore::new();
        let result = store.check_conflicts(
            datetime!(2025-06-02 9:00:00 UTC),
            datetime!(2025-06-02 10:00:00 UTC),
            "Practitioner/ghost",
        );
        assert!(!result.has_conflict);
    }

    #[test]
    fn reads_are_defensive_copies() {
        let store = ScheduleStore::new();
        store.add_busy(
            "Practitioner/d1",
            TimeSlot::new(
                datetime!(2025-06-02 9:00:00 UTC),
                datetime!(2025-06-02 10:00:00 UTC),
            ),
        );
        let mut copy = store.busy_for("Practitioner/d1");
        copy.clear();
        assert_eq!(store.busy_for("Practitioner/d1").len(), 1);
    }
}
