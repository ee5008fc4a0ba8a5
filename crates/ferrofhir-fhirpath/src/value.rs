//! Collection values produced by FHIRPath evaluation.

use std::cmp::Ordering;

use serde_json::Value;
use time::OffsetDateTime;

/// One element of a FHIRPath collection.
///
/// Scalars are unwrapped into native variants; objects, arrays, and
/// JSON null stay as `Json`.
#[derive(Debug, Clone, PartialEq)]
pub enum FpValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    DateTime(OffsetDateTime),
    Json(Value),
}

impl FpValue {
    /// Convert a JSON value into a collection element.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::Decimal(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Self::String(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// The canonical string form, used for union/distinct dedup and as
    /// the fallback comparison domain.
    pub fn string_form(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => format_decimal(*d),
            Self::String(s) => s.clone(),
            Self::DateTime(dt) => dt
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            Self::Json(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }

    /// JSON null counts as nil; everything else is a value.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Json(Value::Null))
    }

    pub fn as_object(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            Self::Json(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

fn format_decimal(d: f64) -> String {
    if d == d.trunc() && d.is_finite() && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

/// Collection-to-boolean coercion: empty is false, a singleton bool is
/// itself, a singleton non-nil value is true, multiple elements are true.
pub fn collection_to_bool(collection: &[FpValue]) -> bool {
    match collection {
        [] => false,
        [single] => match single {
            FpValue::Boolean(b) => *b,
            other => !other.is_nil(),
        },
        _ => true,
    }
}

/// Compare two collection elements.
///
/// Numbers coerce across integer/decimal; datetimes order temporally;
/// booleans compare by equality; everything else falls back to the
/// lexicographic ordering of string forms.
pub fn compare_values(left: &FpValue, right: &FpValue) -> Ordering {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r).unwrap_or(Ordering::Equal);
    }
    if let (FpValue::DateTime(l), FpValue::DateTime(r)) = (left, right) {
        return l.cmp(r);
    }
    if let (FpValue::Boolean(l), FpValue::Boolean(r)) = (left, right) {
        return if l == r { Ordering::Equal } else { Ordering::Less };
    }
    left.string_form().cmp(&right.string_form())
}

/// Deduplicate a collection by string form, keeping first occurrences.
pub fn dedup_by_string_form(collection: Vec<FpValue>) -> Vec<FpValue> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(collection.len());
    for item in collection {
        if seen.insert(item.string_form()) {
            out.push(item);
        }
    }
    out
}
