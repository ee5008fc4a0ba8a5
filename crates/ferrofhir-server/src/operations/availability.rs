//! Availability operations: `Slot/$find`, `Slot/$check-conflict`, and
//! `Schedule/{id}/$available`, backed by the scheduling crate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ferrofhir_core::error::{CoreError, Result};
use ferrofhir_scheduling::{
    AvailabilityRequest, AvailabilityRule, ConflictResult, ScheduleStore, TimeSlot,
    filter_slots_by_duration, generate_time_slots, merge_availability,
};

/// Rules plus busy time per schedule actor.
pub struct AvailabilityService {
    schedules: Arc<ScheduleStore>,
    rules: RwLock<HashMap<String, Vec<AvailabilityRule>>>,
}

impl AvailabilityService {
    pub fn new(schedules: Arc<ScheduleStore>) -> Self {
        Self {
            schedules,
            rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    pub fn set_rules(&self, actor: &str, rules: Vec<AvailabilityRule>) {
        self.rules
            .write()
            .expect("rules lock poisoned")
            .insert(actor.to_string(), rules);
    }

    fn rules_for(&self, actor: &str) -> Vec<AvailabilityRule> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .get(actor)
            .cloned()
            .unwrap_or_default()
    }

    /// Expand the actor's rules over the requested window, drop busy
    /// overlaps, and filter by requested duration.
    pub fn find_slots(&self, actor: &str, request: &AvailabilityRequest) -> Result<Vec<TimeSlot>> {
        let start = request.start.ok_or_else(|| CoreError::required("start"))?;
        let end = request.end.ok_or_else(|| CoreError::required("end"))?;

        let mut slots = Vec::new();
        for rule in self.rules_for(actor) {
            let expanded = generate_time_slots(&rule, start, end)
                .map_err(|e| CoreError::value("availability rule", e.to_string()))?;
            slots.extend(expanded);
        }
        slots.sort_by(|a, b| a.start.cmp(&b.start));

        let busy = self.schedules.busy_for(actor);
        let available = merge_availability(slots, &busy);
        Ok(filter_slots_by_duration(
            available,
            request.duration.unwrap_or(0),
        ))
    }

    pub fn check_conflict(
        &self,
        start: time::OffsetDateTime,
        end: time::OffsetDateTime,
        actor: &str,
    ) -> ConflictResult {
        self.schedules.check_conflicts(start, end, actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn service_with_monday_rule() -> AvailabilityService {
        let service = AvailabilityService::new(Arc::new(ScheduleStore::new()));
        service.set_rules(
            "Practitioner/d1",
            vec![AvailabilityRule {
                days_of_week: vec!["mon".to_string()],
                start: "09:00".to_string(),
                end: "12:00".to_string(),
                slot_minutes: 30,
                break_start: None,
                break_end: None,
            }],
        );
        service
    }

    fn monday_request() -> AvailabilityRequest {
        AvailabilityRequest {
            start: Some(datetime!(2025-06-02 0:00:00 UTC)),
            end: Some(datetime!(2025-06-02 23:59:59 UTC)),
            ..Default::default()
        }
    }

    #[test]
    fn find_slots_expands_rules_and_subtracts_busy_time() {
        let service = service_with_monday_rule();
        assert_eq!(service.find_slots("Practitioner/d1", &monday_request()).unwrap().len(), 6);

        service.schedules().add_busy(
            "Practitioner/d1",
            TimeSlot::new(
                datetime!(2025-06-02 9:00:00 UTC),
                datetime!(2025-06-02 10:00:00 UTC),
            ),
        );
        assert_eq!(service.find_slots("Practitioner/d1", &monday_request()).unwrap().len(), 4);
    }

    #[test]
    fn find_slots_requires_start_and_end() {
        let service = service_with_monday_rule();
        let err = service
            .find_slots("Practitioner/d1", &AvailabilityRequest::default())
            .unwrap_err();
        assert_eq!(err.issue_code(), "required");
    }

    #[test]
    fn duration_filter_applies() {
        let service = service_with_monday_rule();
        let request = AvailabilityRequest {
            duration: Some(45),
            ..monday_request()
        };
        assert!(service.find_slots("Practitioner/d1", &request).unwrap().is_empty());
    }

    #[test]
    fn actor_without_rules_has_no_slots() {
        let service = service_with_monday_rule();
        assert!(service
            .find_slots("Practitioner/ghost", &monday_request())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn conflict_check_delegates_to_store() {
        let service = service_with_monday_rule();
        service.schedules().add_busy(
            "Practitioner/d1",
            TimeSlot::new(
                datetime!(2025-06-02 9:00:00 UTC),
                datetime!(2025-06-02 10:00:00 UTC),
            ),
        );
        let result = service.check_conflict(
            datetime!(2025-06-02 9:30:00 UTC),
            datetime!(2025-06-02 9:45:00 UTC),
            "Practitioner/d1",
        );
        assert!(result.has_conflict);
    }
}
