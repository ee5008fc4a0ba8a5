//! Auto-provenance middleware: record an audit entry for every
//! successful write under `/fhir/`, off the response path.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use tracing::debug;

use ferrofhir_core::resource::{id_of, resource_type_of};

use crate::provenance::{ProvenanceActivity, ProvenanceStore};

use super::{buffer_response, rebuild_response};

/// Authenticated user id, inserted into request extensions upstream.
#[derive(Debug, Clone)]
pub struct RequestUser(pub String);

const ANONYMOUS_AGENT: &str = "system";

fn target_from_body(body: &[u8]) -> Option<String> {
    let resource: Value = serde_json::from_slice(body).ok()?;
    let resource_type = resource_type_of(&resource)?;
    let id = id_of(&resource)?;
    Some(format!("{resource_type}/{id}"))
}

/// For DELETE the body is usually empty; derive `Type/id` from the URL.
fn target_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/fhir/")?;
    let mut segments = rest.split('/');
    let resource_type = segments.next().filter(|s| !s.is_empty())?;
    let id = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("{resource_type}/{id}"))
}

/// Auto-provenance middleware. Scope: `/fhir/*` writes answering 2xx
/// without `X-No-Provenance`. Recording happens on a spawned task so
/// the response is never delayed.
pub async fn provenance(
    State(store): State<Arc<ProvenanceStore>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let applies = path.starts_with("/fhir/")
        && matches!(method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
        && !request.headers().contains_key("x-no-provenance");

    if !applies {
        return next.run(request).await;
    }

    let Some(activity) = ProvenanceActivity::from_method(method.as_str()) else {
        return next.run(request).await;
    };

    let reason = request
        .headers()
        .get("X-Provenance-Reason")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let agent = request
        .extensions()
        .get::<RequestUser>()
        .map(|user| user.0.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ANONYMOUS_AGENT.to_string());

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, bytes) = buffer_response(response).await;
    let body = bytes.clone();

    tokio::spawn(async move {
        let target = match target_from_body(&body) {
            Some(target) => target,
            // Empty or unparseable bodies only produce a record for
            // DELETE, where the URL carries the identity.
            None if activity == ProvenanceActivity::Delete => match target_from_path(&path) {
                Some(target) => target,
                None => return,
            },
            None => return,
        };
        let record = store.record(&target, activity, &agent, reason);
        debug!(target = %record.target_reference, activity = record.activity.code(), "provenance recorded");
    });

    rebuild_response(parts, bytes)
}
