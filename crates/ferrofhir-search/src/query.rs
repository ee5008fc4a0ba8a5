//! The `SearchQuery` builder: accumulates clause fragments and emits
//! count and data SQL with positional placeholders.

use crate::composite::composite_clause;
use crate::params::SearchParamType;
use crate::primitives::{
    self, Fragment, SearchModifier, date_clause, number_clause, quantity_clause, reference_clause,
    string_clause, token_clause, uri_clause,
};

/// One component of a composite parameter.
#[derive(Debug, Clone)]
pub struct CompositeComponent {
    pub name: String,
    pub param_type: SearchParamType,
    pub column: String,
    pub system_column: Option<String>,
}

/// Static configuration for a non-composite parameter.
#[derive(Debug, Clone)]
pub struct ParamConfig {
    pub name: String,
    pub param_type: SearchParamType,
    pub column: String,
    pub system_column: Option<String>,
    pub components: Vec<CompositeComponent>,
}

/// A sortable column with its public parameter name.
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub name: String,
    pub column: String,
}

/// Accumulating SQL builder for one search request.
///
/// Positional placeholders are 1-based; after any sequence of `add_*`
/// calls the number of bound arguments always equals the number of
/// placeholders emitted.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    table: String,
    columns: String,
    where_sql: String,
    args: Vec<String>,
    next_index: usize,
    order_by: Option<String>,
}

impl SearchQuery {
    pub fn new(table: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into(),
            where_sql: String::new(),
            args: Vec::new(),
            next_index: 1,
            order_by: None,
        }
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    fn push(&mut self, fragment: Fragment) {
        if fragment.is_empty() {
            return;
        }
        self.where_sql.push_str(" AND ");
        self.where_sql.push_str(&fragment.sql);
        self.args.extend(fragment.args);
        self.next_index = fragment.next_index;
    }

    pub fn add_token(
        &mut self,
        code_column: &str,
        system_column: Option<&str>,
        value: &str,
        modifier: Option<SearchModifier>,
    ) {
        let fragment = token_clause(code_column, system_column, value, modifier, self.next_index);
        self.push(fragment);
    }

    pub fn add_date(&mut self, column: &str, value: &str) {
        let fragment = date_clause(column, value, self.next_index);
        self.push(fragment);
    }

    pub fn add_string(&mut self, column: &str, value: &str, modifier: Option<SearchModifier>) {
        let fragment = string_clause(column, value, modifier, self.next_index);
        self.push(fragment);
    }

    pub fn add_number(&mut self, column: &str, value: &str) {
        let fragment = number_clause(column, value, self.next_index);
        self.push(fragment);
    }

    pub fn add_quantity(&mut self, column: &str, value: &str) {
        let fragment = quantity_clause(column, value, self.next_index);
        self.push(fragment);
    }

    pub fn add_reference(&mut self, column: &str, value: &str) {
        let fragment = reference_clause(column, value, self.next_index);
        self.push(fragment);
    }

    pub fn add_uri(&mut self, column: &str, value: &str, modifier: Option<SearchModifier>) {
        let fragment = uri_clause(column, value, modifier, self.next_index);
        self.push(fragment);
    }

    pub fn add_composite(&mut self, components: &[CompositeComponent], value: &str) {
        let fragment = composite_clause(components, value, self.next_index);
        self.push(fragment);
    }

    /// Dispatch a raw value through the clause builder for the
    /// parameter's configured type.
    pub fn apply_param(&mut self, config: &ParamConfig, value: &str, modifier: Option<SearchModifier>) {
        match config.param_type {
            SearchParamType::Token => {
                self.add_token(&config.column, config.system_column.as_deref(), value, modifier)
            }
            SearchParamType::Date => self.add_date(&config.column, value),
            SearchParamType::String => self.add_string(&config.column, value, modifier),
            SearchParamType::Number => self.add_number(&config.column, value),
            SearchParamType::Quantity => self.add_quantity(&config.column, value),
            SearchParamType::Reference => self.add_reference(&config.column, value),
            SearchParamType::Uri => self.add_uri(&config.column, value, modifier),
            SearchParamType::Composite => self.add_composite(&config.components, value),
        }
    }

    /// Resolve a `_sort` value against the sortable columns. Comma
    /// separated; a leading `-` sorts descending; unknown names are
    /// skipped; an empty resolution falls back to the default column.
    pub fn apply_sort(&mut self, sort_value: &str, default: &str, configs: &[SortConfig]) {
        let mut terms = Vec::new();
        for raw in sort_value.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (name, descending) = match raw.strip_prefix('-') {
                Some(stripped) => (stripped, true),
                None => (raw, false),
            };
            if let Some(config) = configs.iter().find(|c| c.name == name) {
                let direction = if descending { "DESC" } else { "ASC" };
                terms.push(format!("{} {direction}", config.column));
            }
        }
        if terms.is_empty() {
            self.order_by = Some(default.to_string());
        } else {
            self.order_by = Some(terms.join(", "));
        }
    }

    fn where_clause(&self) -> String {
        format!("WHERE 1=1{}", self.where_sql)
    }

    /// Count query over the accumulated filters; no ORDER BY, LIMIT, or
    /// OFFSET.
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {} {}", self.table, self.where_clause())
    }

    pub fn count_args(&self) -> Vec<String> {
        self.args.clone()
    }

    /// Data query: ORDER BY plus the final two placeholders for LIMIT
    /// and OFFSET.
    pub fn data_sql(&self) -> String {
        let order = self
            .order_by
            .clone()
            .unwrap_or_else(|| "id ASC".to_string());
        format!(
            "SELECT {} FROM {} {} ORDER BY {order} LIMIT ${} OFFSET ${}",
            self.columns,
            self.table,
            self.where_clause(),
            self.next_index,
            self.next_index + 1,
        )
    }

    pub fn data_args(&self, limit: usize, offset: usize) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(limit.to_string());
        args.push(offset.to_string());
        args
    }
}

/// Convenience re-export so callers can split `name:modifier` without
/// importing primitives directly.
pub fn split_param_name(name: &str) -> (&str, Option<SearchModifier>) {
    primitives::split_modifier(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_placeholders(sql: &str) -> usize {
        let mut max = 0;
        let mut chars = sql.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '$' {
                let digits: String = sql[i + 1..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if let Ok(n) = digits.parse::<usize>() {
                    max = max.max(n);
                }
            }
        }
        max
    }

    #[test]
    fn args_always_match_placeholders() {
        let mut q = SearchQuery::new("observations", "id, resource");
        q.add_token("code_value", Some("code_system"), "http://loinc.org|8480-6", None);
        q.add_date("effective_date", "ge2024-01-01");
        q.add_string("status_text", "fin", None);
        q.add_number("value_quantity", "gt5.4");

        assert_eq!(q.count_args().len(), count_placeholders(&q.count_sql()));
        assert_eq!(
            q.data_args(10, 0).len(),
            count_placeholders(&q.data_sql())
        );
    }

    #[test]
    fn data_args_are_count_args_plus_two() {
        let mut q = SearchQuery::new("patients", "id");
        q.add_string("family", "smith", None);
        q.add_date("birth_date", "1980-01-01");
        assert_eq!(q.data_args(20, 40).len(), q.count_args().len() + 2);
    }

    #[test]
    fn count_sql_omits_order_limit_offset() {
        let mut q = SearchQuery::new("patients", "id");
        q.add_string("family", "smith", None);
        let sql = q.count_sql();
        assert!(sql.starts_with("SELECT COUNT(*) FROM patients"));
        assert!(!sql.contains("ORDER BY"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn data_sql_ends_with_limit_offset_placeholders() {
        let mut q = SearchQuery::new("patients", "id, resource");
        q.add_string("family", "smith", None);
        let sql = q.data_sql();
        assert!(sql.contains("LIMIT $2 OFFSET $3"));
        let args = q.data_args(10, 20);
        assert_eq!(args, vec!["smith%".to_string(), "10".to_string(), "20".to_string()]);
    }

    #[test]
    fn apply_sort_resolves_directions_and_skips_unknown() {
        let configs = [
            SortConfig {
                name: "date".to_string(),
                column: "effective_date".to_string(),
            },
            SortConfig {
                name: "code".to_string(),
                column: "code_value".to_string(),
            },
        ];

        let mut q = SearchQuery::new("observations", "id");
        q.apply_sort("-date,bogus,code", "id ASC", &configs);
        assert!(q.data_sql().contains("ORDER BY effective_date DESC, code_value ASC"));
    }

    #[test]
    fn apply_sort_falls_back_to_default() {
        let mut q = SearchQuery::new("observations", "id");
        q.apply_sort("bogus", "last_updated DESC", &[]);
        assert!(q.data_sql().contains("ORDER BY last_updated DESC"));
    }

    #[test]
    fn apply_param_dispatches_by_type() {
        let config = ParamConfig {
            name: "code".to_string(),
            param_type: SearchParamType::Token,
            column: "code_value".to_string(),
            system_column: Some("code_system".to_string()),
            components: Vec::new(),
        };
        let mut q = SearchQuery::new("observations", "id");
        q.apply_param(&config, "http://loinc.org|8480-6", None);
        assert!(q.count_sql().contains("(code_system = $1 AND code_value = $2)"));
    }

    #[test]
    fn empty_fragment_does_not_advance_index() {
        let mut q = SearchQuery::new("observations", "id");
        q.add_composite(&[], "anything");
        assert_eq!(q.next_index(), 1);
        assert!(q.count_args().is_empty());
    }
}
