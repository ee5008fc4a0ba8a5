//! Core FHIR types and utilities shared across the Ferrofhir workspace.
//!
//! This crate holds the pieces every other crate leans on: the error
//! taxonomy, OperationOutcome projection, JSON resource helpers, the
//! FHIR datetime fallback parser, resource events, and Bundle assembly.

pub mod bundle;
pub mod error;
pub mod events;
pub mod outcome;
pub mod resource;
pub mod time;

pub use bundle::{
    Bundle, BundleEntry, BundleLink, BundleProcessor, BundleRequest, BundleResponse,
    EntryRequest, SearchSetParams,
};
pub use error::{CoreError, ErrorKind, Result};
pub use events::{EventBroadcaster, ResourceAction, ResourceEvent};
pub use outcome::{OperationOutcome, OperationOutcomeIssue};
pub use time::{FhirInstant, now_utc, parse_fhir_datetime};
