//! Composite search parameters: `$`-joined sub-values dispatched to the
//! per-type clause builders, combined with AND.

use crate::params::SearchParamType;
use crate::primitives::{
    Fragment, date_clause, number_clause, quantity_clause, reference_clause, string_clause,
    token_clause, uri_clause,
};
use crate::query::CompositeComponent;

/// Build the clause for one composite value. The i-th `$`-separated
/// part feeds the i-th component; surplus parts are ignored and empty
/// parts skip their component.
pub fn composite_clause(
    components: &[CompositeComponent],
    value: &str,
    start: usize,
) -> Fragment {
    let parts: Vec<&str> = value.split('$').collect();
    let n = parts.len().min(components.len());

    let mut clauses = Vec::new();
    let mut args = Vec::new();
    let mut index = start;

    for i in 0..n {
        let part = parts[i];
        if part.is_empty() {
            continue;
        }
        let component = &components[i];
        let fragment = match component.param_type {
            SearchParamType::Token => token_clause(
                &component.column,
                component.system_column.as_deref(),
                part,
                None,
                index,
            ),
            SearchParamType::Date => date_clause(&component.column, part, index),
            SearchParamType::String => string_clause(&component.column, part, None, index),
            SearchParamType::Number => number_clause(&component.column, part, index),
            SearchParamType::Quantity => quantity_clause(&component.column, part, index),
            SearchParamType::Reference => reference_clause(&component.column, part, index),
            SearchParamType::Uri => uri_clause(&component.column, part, None, index),
            // Composites do not nest.
            SearchParamType::Composite => Fragment::empty(index),
        };
        if fragment.is_empty() {
            continue;
        }
        index = fragment.next_index;
        clauses.push(fragment.sql);
        args.extend(fragment.args);
    }

    if clauses.is_empty() {
        return Fragment::empty(start);
    }

    Fragment {
        sql: clauses.join(" AND "),
        args,
        next_index: index,
    }
}
