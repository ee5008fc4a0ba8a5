//! Search-parameter compilation and dynamic parameter indexing.
//!
//! Turns FHIR search syntax (prefixes, modifiers, `system|code` tokens,
//! `$`-joined composites, user-defined FHIRPath parameters) into
//! portable parameterized query fragments, and maintains an in-memory
//! index for dynamically registered parameters.

pub mod composite;
pub mod extract;
pub mod index;
pub mod params;
pub mod primitives;
pub mod query;
pub mod registry;
pub mod sql;

mod error;

pub use composite::composite_clause;
pub use error::SearchError;
pub use index::SearchIndex;
pub use params::{SearchIndexValue, SearchParamExpression, SearchParamType};
pub use primitives::{Fragment, SearchModifier, SearchPrefix, split_modifier, split_prefix};
pub use query::{CompositeComponent, ParamConfig, SearchQuery, SortConfig};
pub use registry::DynamicParamRegistry;
