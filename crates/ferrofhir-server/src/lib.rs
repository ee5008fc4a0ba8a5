//! HTTP protocol layer: the middleware suite (conditional requests,
//! idempotency, Prefer handling, auto-provenance), protocol stores,
//! FHIR operations, and the router that ties the platform crates to a
//! thin axum surface.

pub mod compartments;
pub mod config;
pub mod handlers;
pub mod idempotency;
pub mod middleware;
pub mod operations;
pub mod provenance;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use idempotency::{IdempotencyRecord, IdempotencyStore};
pub use provenance::{ProvenanceActivity, ProvenanceRecord, ProvenanceStore};
pub use state::AppState;
