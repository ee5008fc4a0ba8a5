//! Idempotency middleware: capture the first response for a key and
//! replay it on reuse.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use ferrofhir_core::outcome::OperationOutcome;

use crate::idempotency::IdempotencyStore;

use super::buffer_response;

const REPLAYED_HEADER: &str = "x-idempotency-replayed";

fn idempotency_key(request: &Request) -> Option<String> {
    for name in ["Idempotency-Key", "X-Idempotency-Key"] {
        if let Some(value) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Idempotency middleware over POST/PUT/PATCH.
pub async fn idempotency(
    State(store): State<Arc<IdempotencyStore>>,
    request: Request,
    next: Next,
) -> Response {
    if !matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(request).await;
    }
    let Some(key) = idempotency_key(&request) else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if let Some(record) = store.get(&key) {
        if record.method != method || record.path != path {
            let outcome = OperationOutcome::error(
                "conflict",
                format!(
                    "idempotency key was used for {} {}, not {method} {path}",
                    record.method, record.path
                ),
            );
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response();
        }

        let mut builder = Response::builder()
            .status(StatusCode::from_u16(record.status).unwrap_or(StatusCode::OK));
        for (name, value) in &record.headers {
            builder = builder.header(name, value);
        }
        builder = builder.header(REPLAYED_HEADER, "true");
        return builder
            .body(Body::from(record.body.clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let response = next.run(request).await;
    let (parts, bytes) = buffer_response(response).await;

    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    store.set(
        &key,
        &method,
        &path,
        parts.status.as_u16(),
        headers,
        bytes.to_vec(),
    );

    super::rebuild_response(parts, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(store: Arc<IdempotencyStore>, calls: Arc<AtomicUsize>) -> Router {
        let create = move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::CREATED,
                    [("content-type", "application/fhir+json")],
                    r#"{"resourceType":"Patient","id":"p1"}"#,
                )
            }
        };
        Router::new()
            .route("/fhir/Patient", post(create.clone()))
            .route("/fhir/Observation", post(create))
            .layer(axum::middleware::from_fn_with_state(store, idempotency))
    }

    fn post_request(path: &str, key: &str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("Idempotency-Key", key)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn replay_is_byte_equal_and_marked() {
        let store = Arc::new(IdempotencyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = app(store.clone(), calls.clone())
            .oneshot(post_request("/fhir/Patient", "ABC"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert!(first.headers().get(REPLAYED_HEADER).is_none());
        let first_body = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();

        let second = app(store.clone(), calls.clone())
            .oneshot(post_request("/fhir/Patient", "ABC"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(second.headers().get(REPLAYED_HEADER).unwrap(), "true");
        let second_body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();

        assert_eq!(first_body, second_body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_reuse_across_different_path_is_422() {
        let store = Arc::new(IdempotencyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        app(store.clone(), calls.clone())
            .oneshot(post_request("/fhir/Patient", "ABC"))
            .await
            .unwrap();

        let conflicting = app(store.clone(), calls.clone())
            .oneshot(post_request("/fhir/Observation", "ABC"))
            .await
            .unwrap();
        assert_eq!(conflicting.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(conflicting.into_body(), usize::MAX).await.unwrap();
        let outcome: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome["issue"][0]["code"], "conflict");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn x_prefixed_key_header_is_accepted() {
        let store = Arc::new(IdempotencyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/fhir/Patient")
            .header("X-Idempotency-Key", "XYZ")
            .body(Body::empty())
            .unwrap();
        app(store.clone(), calls.clone()).oneshot(request).await.unwrap();
        assert!(store.get("XYZ").is_some());
    }

    #[tokio::test]
    async fn requests_without_key_are_not_cached() {
        let store = Arc::new(IdempotencyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/fhir/Patient")
            .body(Body::empty())
            .unwrap();
        app(store.clone(), calls.clone()).oneshot(request).await.unwrap();
        assert!(store.is_empty());
    }
}
