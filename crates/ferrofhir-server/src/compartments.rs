//! Compartment definitions: static tables linking root resource types
//! to the member types and reference parameters that place a resource
//! in the compartment.

use serde_json::{Value, json};

/// Supported compartment roots.
pub const COMPARTMENTS: [&str; 3] = ["Patient", "Encounter", "Practitioner"];

fn members(compartment: &str) -> Vec<(&'static str, Vec<&'static str>)> {
    match compartment {
        "Patient" => vec![
            ("Observation", vec!["subject", "performer"]),
            ("Condition", vec!["subject"]),
            ("Encounter", vec!["subject"]),
            ("MedicationRequest", vec!["subject"]),
            ("AllergyIntolerance", vec!["patient"]),
            ("Appointment", vec!["actor"]),
            ("Provenance", vec!["patient"]),
        ],
        "Encounter" => vec![
            ("Observation", vec!["encounter"]),
            ("Condition", vec!["encounter"]),
            ("Procedure", vec!["encounter"]),
            ("MedicationRequest", vec!["encounter"]),
        ],
        "Practitioner" => vec![
            ("Observation", vec!["performer"]),
            ("Appointment", vec!["actor"]),
            ("Encounter", vec!["participant"]),
            ("MedicationRequest", vec!["requester"]),
        ],
        _ => Vec::new(),
    }
}

/// The CompartmentDefinition resource for one root type, or `None` for
/// an unknown compartment.
pub fn compartment_definition(code: &str) -> Option<Value> {
    if !COMPARTMENTS.contains(&code) {
        return None;
    }
    let resources: Vec<Value> = members(code)
        .into_iter()
        .map(|(resource_type, params)| {
            json!({
                "code": resource_type,
                "param": params,
            })
        })
        .collect();

    Some(json!({
        "resourceType": "CompartmentDefinition",
        "id": code.to_lowercase(),
        "url": format!("http://hl7.org/fhir/CompartmentDefinition/{}", code.to_lowercase()),
        "name": format!("{code}Compartment"),
        "status": "active",
        "code": code,
        "search": true,
        "resource": resources,
    }))
}

/// All supported compartment definitions.
pub fn all_compartment_definitions() -> Vec<Value> {
    COMPARTMENTS
        .iter()
        .filter_map(|code| compartment_definition(code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_compartments_have_definitions() {
        for code in COMPARTMENTS {
            let definition = compartment_definition(code).unwrap();
            assert_eq!(definition["resourceType"], "CompartmentDefinition");
            assert_eq!(definition["code"], code);
            assert!(!definition["resource"].as_array().unwrap().is_empty());
        }
    }

    #[test]
    fn unknown_compartment_is_none() {
        assert!(compartment_definition("Device").is_none());
    }

    #[test]
    fn patient_compartment_links_observation_by_subject() {
        let definition = compartment_definition("Patient").unwrap();
        let observation = definition["resource"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["code"] == "Observation")
            .unwrap();
        assert!(observation["param"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("subject")));
    }

    #[test]
    fn listing_covers_all_roots() {
        assert_eq!(all_compartment_definitions().len(), COMPARTMENTS.len());
    }
}
