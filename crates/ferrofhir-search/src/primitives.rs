//! Per-type clause builders for search parameter values.
//!
//! Each builder is a pure function from a raw value to a `Fragment`:
//! SQL text with `$N` placeholders, its bound arguments, and the next
//! free placeholder index. Malformed input always degrades to textual
//! equality against the column cast to text, never an error.

use ferrofhir_core::time::parse_fhir_datetime;

/// A compiled WHERE-clause fragment with positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<String>,
    pub next_index: usize,
}

impl Fragment {
    fn new(sql: String, args: Vec<String>, start: usize) -> Self {
        let next_index = start + args.len();
        Self {
            sql,
            args,
            next_index,
        }
    }

    pub fn empty(start: usize) -> Self {
        Self {
            sql: String::new(),
            args: Vec::new(),
            next_index: start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// FHIR search value prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl SearchPrefix {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }
}

/// Search parameter modifiers (the `:suffix` after a parameter name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchModifier {
    Exact,
    Contains,
    Text,
    Not,
    Above,
    Below,
    Missing,
}

impl SearchModifier {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "text" => Some(Self::Text),
            "not" => Some(Self::Not),
            "above" => Some(Self::Above),
            "below" => Some(Self::Below),
            "missing" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// Split a value into its prefix and remainder. The first two bytes are
/// checked case-insensitively; absent a recognized prefix, `eq` applies.
pub fn split_prefix(value: &str) -> (SearchPrefix, &str) {
    if let Some(head) = value.get(..2)
        && let Some(prefix) = SearchPrefix::parse(head)
    {
        return (prefix, &value[2..]);
    }
    (SearchPrefix::Eq, value)
}

/// Split a parameter name into its base name and modifier.
pub fn split_modifier(name: &str) -> (&str, Option<SearchModifier>) {
    match name.split_once(':') {
        Some((base, suffix)) => (base, SearchModifier::parse(suffix)),
        None => (name, None),
    }
}

/// Fallback clause for values nothing else can interpret.
fn textual_equality(column: &str, value: &str, start: usize) -> Fragment {
    Fragment::new(
        format!("{column}::text = ${start}"),
        vec![value.to_string()],
        start,
    )
}

/// Date clause with prefix semantics and the datetime fallback chain.
pub fn date_clause(column: &str, raw: &str, start: usize) -> Fragment {
    let (prefix, remainder) = split_prefix(raw);
    let Ok(parsed) = parse_fhir_datetime(remainder) else {
        return textual_equality(column, raw, start);
    };

    let rfc3339 = |dt: time::OffsetDateTime| {
        dt.format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default()
    };

    match prefix {
        SearchPrefix::Gt | SearchPrefix::Sa => Fragment::new(
            format!("{column} > ${start}"),
            vec![rfc3339(parsed.instant)],
            start,
        ),
        SearchPrefix::Lt | SearchPrefix::Eb => Fragment::new(
            format!("{column} < ${start}"),
            vec![rfc3339(parsed.instant)],
            start,
        ),
        SearchPrefix::Ge => Fragment::new(
            format!("{column} >= ${start}"),
            vec![rfc3339(parsed.instant)],
            start,
        ),
        SearchPrefix::Le => Fragment::new(
            format!("{column} <= ${start}"),
            vec![rfc3339(parsed.instant)],
            start,
        ),
        SearchPrefix::Ne => Fragment::new(
            format!("{column} != ${start}"),
            vec![rfc3339(parsed.instant)],
            start,
        ),
        SearchPrefix::Ap => {
            let window = time::Duration::days(1);
            Fragment::new(
                format!("{column} BETWEEN ${start} AND ${}", start + 1),
                vec![
                    rfc3339(parsed.instant - window),
                    rfc3339(parsed.instant + window),
                ],
                start,
            )
        }
        SearchPrefix::Eq => {
            if parsed.date_only {
                Fragment::new(
                    format!("{column} >= ${start} AND {column} <= ${}", start + 1),
                    vec![rfc3339(parsed.instant), rfc3339(parsed.day_range_end())],
                    start,
                )
            } else {
                Fragment::new(
                    format!("{column} = ${start}"),
                    vec![rfc3339(parsed.instant)],
                    start,
                )
            }
        }
    }
}

/// Token clause: `system|code` splits across two columns; a bare value
/// matches the code column. `:not` inverts the whole match.
pub fn token_clause(
    code_column: &str,
    system_column: Option<&str>,
    raw: &str,
    modifier: Option<SearchModifier>,
    start: usize,
) -> Fragment {
    let fragment = match raw.split_once('|') {
        Some((system, code)) => {
            let system_column = system_column.unwrap_or(code_column);
            match (system.is_empty(), code.is_empty()) {
                (false, false) => Fragment::new(
                    format!("({system_column} = ${start} AND {code_column} = ${})", start + 1),
                    vec![system.to_string(), code.to_string()],
                    start,
                ),
                (false, true) => Fragment::new(
                    format!("{system_column} = ${start}"),
                    vec![system.to_string()],
                    start,
                ),
                _ => Fragment::new(
                    format!("{code_column} = ${start}"),
                    vec![code.to_string()],
                    start,
                ),
            }
        }
        None => Fragment::new(
            format!("{code_column} = ${start}"),
            vec![raw.to_string()],
            start,
        ),
    };

    if modifier == Some(SearchModifier::Not) {
        Fragment {
            sql: format!("NOT ({})", fragment.sql),
            ..fragment
        }
    } else {
        fragment
    }
}

/// String clause: case-insensitive prefix by default, equality under
/// `:exact`, infix under `:contains` / `:text`.
pub fn string_clause(
    column: &str,
    raw: &str,
    modifier: Option<SearchModifier>,
    start: usize,
) -> Fragment {
    match modifier {
        Some(SearchModifier::Exact) => Fragment::new(
            format!("{column} = ${start}"),
            vec![raw.to_string()],
            start,
        ),
        Some(SearchModifier::Contains) | Some(SearchModifier::Text) => Fragment::new(
            format!("{column} ILIKE ${start}"),
            vec![format!("%{raw}%")],
            start,
        ),
        _ => Fragment::new(
            format!("{column} ILIKE ${start}"),
            vec![format!("{raw}%")],
            start,
        ),
    }
}

/// Number clause with the same prefix dispatch as dates. Approximate
/// matches use a ±10% window.
pub fn number_clause(column: &str, raw: &str, start: usize) -> Fragment {
    let (prefix, remainder) = split_prefix(raw);
    let Ok(value) = remainder.parse::<f64>() else {
        return textual_equality(column, raw, start);
    };

    let operator = match prefix {
        SearchPrefix::Gt | SearchPrefix::Sa => ">",
        SearchPrefix::Lt | SearchPrefix::Eb => "<",
        SearchPrefix::Ge => ">=",
        SearchPrefix::Le => "<=",
        SearchPrefix::Ne => "!=",
        SearchPrefix::Ap => {
            let window = value.abs() * 0.1;
            return Fragment::new(
                format!("{column} BETWEEN ${start} AND ${}", start + 1),
                vec![
                    format_number(value - window),
                    format_number(value + window),
                ],
                start,
            );
        }
        SearchPrefix::Eq => "=",
    };

    Fragment::new(
        format!("{column} {operator} ${start}"),
        vec![remainder.to_string()],
        start,
    )
}

/// Quantity clause: `number|system|code` keeps only the numeric portion.
pub fn quantity_clause(column: &str, raw: &str, start: usize) -> Fragment {
    let numeric = raw.split('|').next().unwrap_or(raw);
    number_clause(column, numeric, start)
}

/// Reference clause: only the substring after the last `/` matters.
pub fn reference_clause(column: &str, raw: &str, start: usize) -> Fragment {
    let id = raw.rsplit('/').next().unwrap_or(raw);
    Fragment::new(
        format!("{column} = ${start}"),
        vec![id.to_string()],
        start,
    )
}

/// URI clause: exact by default; `:below` matches descendants by prefix.
pub fn uri_clause(
    column: &str,
    raw: &str,
    modifier: Option<SearchModifier>,
    start: usize,
) -> Fragment {
    match modifier {
        Some(SearchModifier::Below) => Fragment::new(
            format!("{column} LIKE ${start}"),
            vec![format!("{raw}%")],
            start,
        ),
        _ => Fragment::new(
            format!("{column} = ${start}"),
            vec![raw.to_string()],
            start,
        ),
    }
}

fn format_number(value: f64) -> String {
    if value == value.trunc() {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_extraction_is_case_insensitive_with_eq_default() {
        assert_eq!(split_prefix("ge2020"), (SearchPrefix::Ge, "2020"));
        assert_eq!(split_prefix("GE2020"), (SearchPrefix::Ge, "2020"));
        assert_eq!(split_prefix("2020"), (SearchPrefix::Eq, "2020"));
        assert_eq!(split_prefix("x"), (SearchPrefix::Eq, "x"));
    }

    #[test]
    fn modifier_split_recognizes_known_suffixes() {
        assert_eq!(split_modifier("name:exact"), ("name", Some(SearchModifier::Exact)));
        assert_eq!(split_modifier("code:not"), ("code", Some(SearchModifier::Not)));
        assert_eq!(split_modifier("name"), ("name", None));
        assert_eq!(split_modifier("name:bogus"), ("name", None));
    }

    #[test]
    fn date_eq_on_date_only_builds_day_range() {
        let frag = date_clause("effective_date", "2024-06-02", 1);
        assert_eq!(
            frag.sql,
            "effective_date >= $1 AND effective_date <= $2"
        );
        assert_eq!(frag.args.len(), 2);
        assert!(frag.args[0].starts_with("2024-06-02T00:00:00"));
        assert!(frag.args[1].starts_with("2024-06-02T23:59:59"));
        assert_eq!(frag.next_index, 3);
    }

    #[test]
    fn date_eq_on_full_datetime_is_equality() {
        let frag = date_clause("effective_date", "2024-06-02T10:30:00Z", 1);
        assert_eq!(frag.sql, "effective_date = $1");
        assert_eq!(frag.args, vec!["2024-06-02T10:30:00Z"]);
    }

    #[test]
    fn date_prefixes_map_to_operators() {
        assert!(date_clause("d", "gt2024-01-01", 1).sql.contains("d > $1"));
        assert!(date_clause("d", "sa2024-01-01", 1).sql.contains("d > $1"));
        assert!(date_clause("d", "lt2024-01-01", 1).sql.contains("d < $1"));
        assert!(date_clause("d", "eb2024-01-01", 1).sql.contains("d < $1"));
        assert!(date_clause("d", "ge2024-01-01", 1).sql.contains("d >= $1"));
        assert!(date_clause("d", "le2024-01-01", 1).sql.contains("d <= $1"));
        assert!(date_clause("d", "ne2024-01-01", 1).sql.contains("d != $1"));
    }

    #[test]
    fn date_ap_builds_one_day_window() {
        let frag = date_clause("d", "ap2024-06-02T12:00:00Z", 1);
        assert_eq!(frag.sql, "d BETWEEN $1 AND $2");
        assert!(frag.args[0].starts_with("2024-06-01T12:00:00"));
        assert!(frag.args[1].starts_with("2024-06-03T12:00:00"));
    }

    #[test]
    fn unparseable_date_degrades_to_textual_equality() {
        let frag = date_clause("d", "gtlater", 1);
        assert_eq!(frag.sql, "d::text = $1");
        assert_eq!(frag.args, vec!["gtlater"]);
    }

    #[test]
    fn token_with_system_and_code_matches_both_columns() {
        let frag = token_clause("code_value", Some("code_system"), "http://loinc.org|8480-6", None, 1);
        assert_eq!(frag.sql, "(code_system = $1 AND code_value = $2)");
        assert_eq!(frag.args, vec!["http://loinc.org", "8480-6"]);
        assert_eq!(frag.next_index, 3);
    }

    #[test]
    fn token_with_only_system_or_only_code() {
        let frag = token_clause("code_value", Some("code_system"), "http://loinc.org|", None, 1);
        assert_eq!(frag.sql, "code_system = $1");

        let frag = token_clause("code_value", Some("code_system"), "|8480-6", None, 1);
        assert_eq!(frag.sql, "code_value = $1");
        assert_eq!(frag.args, vec!["8480-6"]);
    }

    #[test]
    fn bare_token_matches_code_column() {
        let frag = token_clause("status", None, "active", None, 4);
        assert_eq!(frag.sql, "status = $4");
        assert_eq!(frag.next_index, 5);
    }

    #[test]
    fn token_not_modifier_inverts_the_match() {
        let frag = token_clause("status", None, "active", Some(SearchModifier::Not), 1);
        assert_eq!(frag.sql, "NOT (status = $1)");
    }

    #[test]
    fn string_clause_modes() {
        let frag = string_clause("family", "smith", None, 1);
        assert_eq!(frag.sql, "family ILIKE $1");
        assert_eq!(frag.args, vec!["smith%"]);

        let frag = string_clause("family", "smith", Some(SearchModifier::Exact), 1);
        assert_eq!(frag.sql, "family = $1");

        let frag = string_clause("family", "smith", Some(SearchModifier::Contains), 1);
        assert_eq!(frag.args, vec!["%smith%"]);
    }

    #[test]
    fn number_prefixes_and_fallback() {
        let frag = number_clause("value_quantity", "gt5.4", 1);
        assert_eq!(frag.sql, "value_quantity > $1");
        assert_eq!(frag.args, vec!["5.4"]);

        let frag = number_clause("value_quantity", "abc", 1);
        assert_eq!(frag.sql, "value_quantity::text = $1");
    }

    #[test]
    fn quantity_keeps_numeric_portion() {
        let frag = quantity_clause("value_quantity", "gt5.4|http://unitsofmeasure.org|mmHg", 1);
        assert_eq!(frag.sql, "value_quantity > $1");
        assert_eq!(frag.args, vec!["5.4"]);
    }

    #[test]
    fn reference_keeps_trailing_id() {
        let frag = reference_clause("subject_id", "Patient/p1", 1);
        assert_eq!(frag.args, vec!["p1"]);

        let frag = reference_clause("subject_id", "p1", 1);
        assert_eq!(frag.args, vec!["p1"]);
    }

    #[test]
    fn uri_below_is_prefix_match() {
        let frag = uri_clause("url", "http://example.org", Some(SearchModifier::Below), 1);
        assert_eq!(frag.sql, "url LIKE $1");
        assert_eq!(frag.args, vec!["http://example.org%"]);
    }
}
