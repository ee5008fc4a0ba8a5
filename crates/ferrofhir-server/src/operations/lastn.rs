//! `Observation/$lastn`: the most recent N observations per code.

use std::collections::HashMap;

use serde_json::Value;

use ferrofhir_core::time::parse_fhir_datetime;

fn observation_code(observation: &Value) -> Option<String> {
    let code = observation.get("code")?;
    if let Some(coding) = code.get("coding").and_then(|v| v.as_array())
        && let Some(first) = coding.first()
        && let Some(code) = first.get("code").and_then(|v| v.as_str())
    {
        return Some(code.to_string());
    }
    code.get("text").and_then(|v| v.as_str()).map(String::from)
}

fn effective_instant(observation: &Value) -> Option<time::OffsetDateTime> {
    let effective = observation
        .get("effectiveDateTime")
        .or_else(|| observation.get("issued"))?
        .as_str()?;
    parse_fhir_datetime(effective).ok().map(|p| p.instant)
}

/// Group observations by code, order each group newest first, and keep
/// at most `max` per group. Observations with no code are dropped; a
/// missing effective time sorts last.
pub fn lastn(observations: Vec<Value>, max: usize) -> Vec<Value> {
    if max == 0 {
        return Vec::new();
    }

    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    for observation in observations {
        let Some(code) = observation_code(&observation) else {
            continue;
        };
        groups.entry(code).or_default().push(observation);
    }

    let mut codes: Vec<String> = groups.keys().cloned().collect();
    codes.sort();

    let mut result = Vec::new();
    for code in codes {
        let mut group = groups.remove(&code).unwrap_or_default();
        group.sort_by(|a, b| {
            let a_time = effective_instant(a);
            let b_time = effective_instant(b);
            b_time.cmp(&a_time)
        });
        group.truncate(max);
        result.extend(group);
    }
    result
}
