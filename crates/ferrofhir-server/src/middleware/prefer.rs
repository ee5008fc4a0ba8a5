//! Prefer middleware: rewrite write responses per `return=`.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::Response;

use ferrofhir_core::outcome::OperationOutcome;

use super::{buffer_response, rebuild_response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnPreference {
    Minimal,
    OperationOutcome,
    Representation,
}

/// Find the `return=` token in a Prefer header. Tokens are separated by
/// both commas and semicolons.
fn parse_return_preference(prefer: &str) -> Option<ReturnPreference> {
    for token in prefer.split([',', ';']) {
        let token = token.trim();
        if let Some(value) = token.strip_prefix("return=") {
            return match value {
                "minimal" => Some(ReturnPreference::Minimal),
                "OperationOutcome" => Some(ReturnPreference::OperationOutcome),
                _ => Some(ReturnPreference::Representation),
            };
        }
    }
    None
}

/// Prefer middleware over POST/PUT/PATCH.
pub async fn prefer(request: Request, next: Next) -> Response {
    if !matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(request).await;
    }
    let preference = request
        .headers()
        .get("Prefer")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_return_preference);

    match preference {
        Some(ReturnPreference::Minimal) => {
            let response = next.run(request).await;
            let (mut parts, _) = buffer_response(response).await;
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            parts.headers.remove(header::CONTENT_TYPE);
            Response::from_parts(parts, Body::empty())
        }
        Some(ReturnPreference::OperationOutcome) => {
            let response = next.run(request).await;
            let (mut parts, _) = buffer_response(response).await;
            let outcome = OperationOutcome::informational("Operation completed successfully");
            let body = serde_json::to_vec(&outcome).unwrap_or_default();
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/fhir+json"),
            );
            rebuild_response(parts, body.into())
        }
        _ => next.run(request).await,
    }
}
