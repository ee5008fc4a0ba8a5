//! Protocol middleware: conditional requests, idempotency key replay,
//! Prefer-header rewriting, and auto-provenance capture.

pub mod conditional;
pub mod idempotency;
pub mod prefer;
pub mod provenance;

use axum::body::{Body, Bytes};
use axum::http::response::Parts;
use axum::response::Response;

/// Buffer a response into its parts and full body bytes.
pub(crate) async fn buffer_response(response: Response) -> (Parts, Bytes) {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    (parts, bytes)
}

/// Rebuild a response from buffered parts and bytes.
pub(crate) fn rebuild_response(parts: Parts, bytes: Bytes) -> Response {
    Response::from_parts(parts, Body::from(bytes))
}
