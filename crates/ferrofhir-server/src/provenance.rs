//! Append-only provenance records captured for successful writes.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

/// Clock function for `recorded` stamps.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceActivity {
    Create,
    Update,
    Delete,
}

impl ProvenanceActivity {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Activity implied by the HTTP method of a successful write.
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "POST" => Some(Self::Create),
            "PUT" | "PATCH" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One audit record linking a write to its agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: String,
    /// `Type/id` of the written resource.
    pub target_reference: String,
    pub activity: ProvenanceActivity,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded: OffsetDateTime,
    pub agent_who: String,
    pub agent_type: String,
    pub reason: Option<String>,
}

impl ProvenanceRecord {
    /// Project into a FHIR Provenance resource.
    pub fn to_fhir(&self) -> Value {
        let mut provenance = json!({
            "resourceType": "Provenance",
            "id": self.id,
            "target": [{"reference": self.target_reference}],
            "recorded": self.recorded
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            "activity": {
                "coding": [{
                    "system": "http://terminology.hl7.org/CodeSystem/v3-DataOperation",
                    "code": self.activity.code(),
                }]
            },
            "agent": [{
                "type": {"coding": [{"code": self.agent_type}]},
                "who": {"reference": self.agent_who},
            }],
        });
        if let Some(reason) = &self.reason {
            provenance["reason"] = json!([{"text": reason}]);
        }
        provenance
    }
}

/// Append-only in-memory provenance store; safe for concurrent writers.
#[derive(Default)]
pub struct ProvenanceStore {
    records: RwLock<Vec<ProvenanceRecord>>,
    clock: Option<Clock>,
}

impl ProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock: Some(clock),
        }
    }

    fn now(&self) -> OffsetDateTime {
        match &self.clock {
            Some(clock) => clock(),
            None => OffsetDateTime::now_utc(),
        }
    }

    /// Append a record, stamping id and timestamp.
    pub fn record(
        &self,
        target_reference: &str,
        activity: ProvenanceActivity,
        agent_who: &str,
        reason: Option<String>,
    ) -> ProvenanceRecord {
        let record = ProvenanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_reference: target_reference.to_string(),
            activity,
            recorded: self.now(),
            agent_who: agent_who.to_string(),
            agent_type: "author".to_string(),
            reason,
        };
        self.records
            .write()
            .expect("provenance lock poisoned")
            .push(record.clone());
        record
    }

    pub fn all(&self) -> Vec<ProvenanceRecord> {
        self.records
            .read()
            .expect("provenance lock poisoned")
            .clone()
    }

    pub fn for_target(&self, target_reference: &str) -> Vec<ProvenanceRecord> {
        self.records
            .read()
            .expect("provenance lock poisoned")
            .iter()
            .filter(|r| r.target_reference == target_reference)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("provenance lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_and_filters_by_target() {
        let store = ProvenanceStore::new();
        store.record("Patient/p1", ProvenanceActivity::Create, "user/alice", None);
        store.record("Patient/p2", ProvenanceActivity::Update, "user/bob", None);

        assert_eq!(store.len(), 2);
        let for_p1 = store.for_target("Patient/p1");
        assert_eq!(for_p1.len(), 1);
        assert_eq!(for_p1[0].activity, ProvenanceActivity::Create);
    }

    #[test]
    fn to_fhir_projects_all_fields() {
        let store = ProvenanceStore::new();
        let record = store.record(
            "Patient/p1",
            ProvenanceActivity::Delete,
            "user/alice",
            Some("cleanup".to_string()),
        );

        let fhir = record.to_fhir();
        assert_eq!(fhir["resourceType"], "Provenance");
        assert_eq!(fhir["target"][0]["reference"], "Patient/p1");
        assert_eq!(fhir["activity"]["coding"][0]["code"], "delete");
        assert_eq!(fhir["agent"][0]["who"]["reference"], "user/alice");
        assert_eq!(fhir["agent"][0]["type"]["coding"][0]["code"], "author");
        assert_eq!(fhir["reason"][0]["text"], "cleanup");
        assert!(fhir["recorded"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn reason_is_omitted_when_absent() {
        let store = ProvenanceStore::new();
        let record = store.record("Patient/p1", ProvenanceActivity::Create, "system", None);
        assert!(record.to_fhir().get("reason").is_none());
    }

    #[test]
    fn activity_from_method() {
        assert_eq!(
            ProvenanceActivity::from_method("POST"),
            Some(ProvenanceActivity::Create)
        );
        assert_eq!(
            ProvenanceActivity::from_method("PUT"),
            Some(ProvenanceActivity::Update)
        );
        assert_eq!(
            ProvenanceActivity::from_method("PATCH"),
            Some(ProvenanceActivity::Update)
        );
        assert_eq!(
            ProvenanceActivity::from_method("DELETE"),
            Some(ProvenanceActivity::Delete)
        );
        assert_eq!(ProvenanceActivity::from_method("GET"), None);
    }

    #[test]
    fn injectable_clock_controls_recorded() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let store = ProvenanceStore::with_clock(Arc::new(move || fixed));
        let record = store.record("Patient/p1", ProvenanceActivity::Create, "system", None);
        assert_eq!(record.recorded, fixed);
    }
}
