//! Tree-walking FHIRPath evaluator.

use std::cmp::Ordering;

use serde_json::Value;
use time::OffsetDateTime;

use ferrofhir_core::time::parse_fhir_datetime;

use crate::ast::{CompareOp, Expr, Literal};
use crate::error::FhirPathError;
use crate::value::{FpValue, collection_to_bool, compare_values, dedup_by_string_form};

type EvalResult = Result<Vec<FpValue>, FhirPathError>;

/// Evaluate an expression against an input collection. `root` is the
/// resource the whole evaluation started from; uppercase path heads
/// filter against its `resourceType`.
pub fn eval(expr: &Expr, input: &[FpValue], root: &Value) -> EvalResult {
    match expr {
        Expr::Literal(literal) => Ok(vec![literal_value(literal)]),
        Expr::Path(name) => Ok(eval_path(name, input, root)),
        Expr::Dot(left, right) => {
            let piped = eval(left, input, root)?;
            eval(right, &piped, root)
        }
        Expr::Index(inner, index) => {
            let collection = eval(inner, input, root)?;
            if *index < 0 {
                return Ok(Vec::new());
            }
            Ok(collection
                .into_iter()
                .nth(*index as usize)
                .map(|v| vec![v])
                .unwrap_or_default())
        }
        Expr::Union(left, right) => {
            let mut combined = eval(left, input, root)?;
            combined.extend(eval(right, input, root)?);
            Ok(dedup_by_string_form(combined))
        }
        Expr::Compare { op, left, right } => {
            let lhs = eval(left, input, root)?;
            let rhs = eval(right, input, root)?;
            if lhs.is_empty() || rhs.is_empty() {
                return Ok(Vec::new());
            }
            let ordering = compare_values(&lhs[0], &rhs[0]);
            Ok(vec![FpValue::Boolean(apply_op(*op, ordering))])
        }
        Expr::And(left, right) => {
            let l = collection_to_bool(&eval(left, input, root)?);
            let r = collection_to_bool(&eval(right, input, root)?);
            Ok(vec![FpValue::Boolean(l && r)])
        }
        Expr::Or(left, right) => {
            let l = collection_to_bool(&eval(left, input, root)?);
            let r = collection_to_bool(&eval(right, input, root)?);
            Ok(vec![FpValue::Boolean(l || r)])
        }
        Expr::Implies(left, right) => {
            let l = collection_to_bool(&eval(left, input, root)?);
            let r = collection_to_bool(&eval(right, input, root)?);
            Ok(vec![FpValue::Boolean(!l || r)])
        }
        Expr::Function {
            name,
            receiver,
            args,
        } => {
            let rcv = match receiver {
                Some(inner) => eval(inner, input, root)?,
                None => input.to_vec(),
            };
            eval_function(name, &rcv, args, input, root)
        }
    }
}

fn literal_value(literal: &Literal) -> FpValue {
    match literal {
        Literal::String(s) => FpValue::String(s.clone()),
        Literal::Integer(i) => FpValue::Integer(*i),
        Literal::Decimal(d) => FpValue::Decimal(*d),
        Literal::DateTime(dt) => FpValue::DateTime(*dt),
    }
}

fn eval_path(name: &str, input: &[FpValue], root: &Value) -> Vec<FpValue> {
    // An uppercase head is a resource-type filter against the root.
    if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        let matches = root
            .get("resourceType")
            .and_then(|v| v.as_str())
            .is_some_and(|rt| rt == name);
        return if matches {
            vec![FpValue::from_json(root)]
        } else {
            Vec::new()
        };
    }

    let mut out = Vec::new();
    for item in input {
        if let Some(map) = item.as_object()
            && let Some(field) = map.get(name)
        {
            match field {
                Value::Array(arr) => out.extend(arr.iter().map(FpValue::from_json)),
                other => out.push(FpValue::from_json(other)),
            }
        }
    }
    out
}

fn apply_op(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn eval_function(
    name: &str,
    rcv: &[FpValue],
    args: &[Expr],
    input: &[FpValue],
    root: &Value,
) -> EvalResult {
    match name {
        "where" => {
            let predicate = single_arg(name, args)?;
            let mut out = Vec::new();
            for item in rcv {
                let matched = eval(predicate, std::slice::from_ref(item), root)?;
                if collection_to_bool(&matched) {
                    out.push(item.clone());
                }
            }
            Ok(out)
        }
        "exists" => match args {
            [] => Ok(vec![FpValue::Boolean(!rcv.is_empty())]),
            [predicate] => {
                for item in rcv {
                    let matched = eval(predicate, std::slice::from_ref(item), root)?;
                    if collection_to_bool(&matched) {
                        return Ok(vec![FpValue::Boolean(true)]);
                    }
                }
                Ok(vec![FpValue::Boolean(false)])
            }
            _ => Err(arity_error(name, "0 or 1")),
        },
        "all" => {
            let predicate = single_arg(name, args)?;
            for item in rcv {
                let matched = eval(predicate, std::slice::from_ref(item), root)?;
                if !collection_to_bool(&matched) {
                    return Ok(vec![FpValue::Boolean(false)]);
                }
            }
            Ok(vec![FpValue::Boolean(true)])
        }
        "count" => Ok(vec![FpValue::Integer(rcv.len() as i64)]),
        "first" => Ok(rcv.first().cloned().map(|v| vec![v]).unwrap_or_default()),
        "last" => Ok(rcv.last().cloned().map(|v| vec![v]).unwrap_or_default()),
        "tail" => Ok(rcv.iter().skip(1).cloned().collect()),
        "empty" => Ok(vec![FpValue::Boolean(rcv.is_empty())]),
        "distinct" => Ok(dedup_by_string_form(rcv.to_vec())),
        "select" => {
            let projection = single_arg(name, args)?;
            let mut out = Vec::new();
            for item in rcv {
                out.extend(eval(projection, std::slice::from_ref(item), root)?);
            }
            Ok(out)
        }
        "ofType" | "as" => {
            let type_name = type_name_arg(name, args)?;
            Ok(rcv
                .iter()
                .filter(|v| matches_type(v, &type_name))
                .cloned()
                .collect())
        }
        "is" => {
            let type_name = type_name_arg(name, args)?;
            let matches = rcv.first().is_some_and(|v| matches_type(v, &type_name));
            Ok(vec![FpValue::Boolean(matches)])
        }
        "hasValue" => Ok(vec![FpValue::Boolean(
            rcv.len() == 1 && !rcv[0].is_nil(),
        )]),
        "not" => Ok(vec![FpValue::Boolean(!collection_to_bool(rcv))]),
        "startsWith" => string_predicate(rcv, args, input, root, name, |s, arg| {
            s.starts_with(arg)
        }),
        "endsWith" => string_predicate(rcv, args, input, root, name, |s, arg| s.ends_with(arg)),
        "contains" => string_predicate(rcv, args, input, root, name, |s, arg| s.contains(arg)),
        "matches" => {
            let pattern = string_arg(name, args, input, root)?;
            let regex = regex::Regex::new(&pattern)?;
            let Some(first) = rcv.first() else {
                return Ok(vec![FpValue::Boolean(false)]);
            };
            Ok(vec![FpValue::Boolean(regex.is_match(&first.string_form()))])
        }
        "length" => Ok(rcv
            .first()
            .map(|v| vec![FpValue::Integer(v.string_form().len() as i64)])
            .unwrap_or_default()),
        "upper" => Ok(rcv
            .first()
            .map(|v| vec![FpValue::String(v.string_form().to_uppercase())])
            .unwrap_or_default()),
        "lower" => Ok(rcv
            .first()
            .map(|v| vec![FpValue::String(v.string_form().to_lowercase())])
            .unwrap_or_default()),
        "replace" => {
            let [from, to] = args else {
                return Err(arity_error(name, "2"));
            };
            let from = first_string(eval(from, input, root)?);
            let to = first_string(eval(to, input, root)?);
            Ok(rcv
                .first()
                .map(|v| vec![FpValue::String(v.string_form().replace(&from, &to))])
                .unwrap_or_default())
        }
        "substring" => {
            let (start, length) = match args {
                [start] => (start, None),
                [start, length] => (start, Some(length)),
                _ => return Err(arity_error(name, "1 or 2")),
            };
            let start = first_integer(eval(start, input, root)?).unwrap_or(0).max(0) as usize;
            let length = match length {
                Some(expr) => first_integer(eval(expr, input, root)?).map(|l| l.max(0) as usize),
                None => None,
            };
            Ok(rcv
                .first()
                .map(|v| {
                    vec![FpValue::String(byte_substring(
                        &v.string_form(),
                        start,
                        length,
                    ))]
                })
                .unwrap_or_default())
        }
        "abs" | "ceiling" | "floor" | "round" => {
            let Some(first) = rcv.first() else {
                return Ok(Vec::new());
            };
            let Some(value) = first.as_f64() else {
                return Ok(Vec::new());
            };
            let result = match name {
                "abs" => value.abs(),
                "ceiling" => value.ceil(),
                "floor" => value.floor(),
                _ => value.round(),
            };
            Ok(vec![numeric_value(result)])
        }
        "toDate" | "toDateTime" => {
            let Some(first) = rcv.first() else {
                return Ok(Vec::new());
            };
            match parse_fhir_datetime(&first.string_form()) {
                Ok(parsed) => Ok(vec![FpValue::DateTime(parsed.instant)]),
                Err(_) => Ok(Vec::new()),
            }
        }
        "now" => Ok(vec![FpValue::DateTime(OffsetDateTime::now_utc())]),
        "today" => {
            let now = OffsetDateTime::now_utc();
            Ok(vec![FpValue::DateTime(
                now.date().midnight().assume_utc(),
            )])
        }
        "iif" => {
            let (condition, then_branch, else_branch) = match args {
                [c, t] => (c, t, None),
                [c, t, e] => (c, t, Some(e)),
                _ => return Err(arity_error(name, "2 or 3")),
            };
            let condition = collection_to_bool(&eval(condition, input, root)?);
            if condition {
                eval(then_branch, input, root)
            } else {
                match else_branch {
                    Some(expr) => eval(expr, input, root),
                    None => Ok(Vec::new()),
                }
            }
        }
        other => Err(FhirPathError::eval(format!("unknown function '{other}'"))),
    }
}

fn single_arg<'a>(name: &str, args: &'a [Expr]) -> Result<&'a Expr, FhirPathError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(arity_error(name, "1")),
    }
}

fn arity_error(name: &str, expected: &str) -> FhirPathError {
    FhirPathError::eval(format!("{name}() takes {expected} argument(s)"))
}

fn type_name_arg(name: &str, args: &[Expr]) -> Result<String, FhirPathError> {
    match single_arg(name, args)? {
        Expr::Path(type_name) => Ok(type_name.clone()),
        Expr::Literal(Literal::String(type_name)) => Ok(type_name.clone()),
        _ => Err(FhirPathError::eval(format!(
            "{name}() expects a type identifier"
        ))),
    }
}

fn matches_type(value: &FpValue, type_name: &str) -> bool {
    match type_name {
        "string" => matches!(value, FpValue::String(_)),
        "integer" | "int" => matches!(value, FpValue::Integer(_)),
        "decimal" | "float" => matches!(value, FpValue::Decimal(_)),
        "boolean" | "bool" => matches!(value, FpValue::Boolean(_)),
        "date" | "dateTime" | "datetime" => matches!(value, FpValue::DateTime(_)),
        resource_type => value
            .as_object()
            .and_then(|map| map.get("resourceType"))
            .and_then(|v| v.as_str())
            .is_some_and(|rt| rt == resource_type),
    }
}

fn string_predicate(
    rcv: &[FpValue],
    args: &[Expr],
    input: &[FpValue],
    root: &Value,
    name: &str,
    predicate: impl Fn(&str, &str) -> bool,
) -> EvalResult {
    let arg = string_arg(name, args, input, root)?;
    let Some(first) = rcv.first() else {
        return Ok(vec![FpValue::Boolean(false)]);
    };
    Ok(vec![FpValue::Boolean(predicate(
        &first.string_form(),
        &arg,
    ))])
}

fn string_arg(
    name: &str,
    args: &[Expr],
    input: &[FpValue],
    root: &Value,
) -> Result<String, FhirPathError> {
    let arg = single_arg(name, args)?;
    Ok(first_string(eval(arg, input, root)?))
}

fn first_string(collection: Vec<FpValue>) -> String {
    collection
        .first()
        .map(FpValue::string_form)
        .unwrap_or_default()
}

fn first_integer(collection: Vec<FpValue>) -> Option<i64> {
    match collection.first() {
        Some(FpValue::Integer(i)) => Some(*i),
        Some(FpValue::Decimal(d)) => Some(*d as i64),
        _ => None,
    }
}

fn numeric_value(value: f64) -> FpValue {
    if value == value.trunc() && value.is_finite() && value.abs() < i64::MAX as f64 {
        FpValue::Integer(value as i64)
    } else {
        FpValue::Decimal(value)
    }
}

/// UTF-8-safe byte-indexed substring with bounds clamping.
fn byte_substring(s: &str, start: usize, length: Option<usize>) -> String {
    let start = floor_char_boundary(s, start.min(s.len()));
    let end = match length {
        Some(l) => floor_char_boundary(s, start.saturating_add(l).min(s.len())),
        None => s.len(),
    };
    s[start..end.max(start)].to_string()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
