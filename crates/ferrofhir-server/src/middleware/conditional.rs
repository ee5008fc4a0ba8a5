//! Conditional read (ETag / If-Modified-Since) and conditional create
//! (If-None-Exist).

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use ferrofhir_core::error::CoreError;
use ferrofhir_core::outcome::OperationOutcome;

use super::{buffer_response, rebuild_response};

/// Strip the weak marker and quotes so strong and weak tags of the same
/// version compare equal.
fn normalize_etag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

fn etag_matches(if_none_match: &str, response_etag: Option<&str>) -> bool {
    if if_none_match.trim() == "*" {
        return true;
    }
    let Some(current) = response_etag else {
        return false;
    };
    let current = normalize_etag(current);
    if_none_match
        .split(',')
        .any(|candidate| normalize_etag(candidate) == current)
}

fn looks_like_searchset(body: &[u8]) -> bool {
    // Cheap structural sniff; full parsing is wasted work on the hot
    // read path.
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    text.contains("\"Bundle\"") && text.contains("\"searchset\"")
}

fn not_modified(if_modified_since: &str, last_modified: Option<&str>) -> bool {
    let Ok(since) = httpdate::parse_http_date(if_modified_since) else {
        return false;
    };
    // Without a Last-Modified on the response there is nothing to
    // compare; never report 304.
    let Some(last_modified) = last_modified else {
        return false;
    };
    let Ok(modified) = httpdate::parse_http_date(last_modified) else {
        return false;
    };
    modified <= since
}

/// Conditional read middleware. Applies to GET; 200 non-searchset
/// responses honor `If-None-Match` and `If-Modified-Since` with a 304
/// that strips the body but keeps the ETag.
pub async fn conditional_read(request: Request, next: Next) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let if_none_match = request
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let if_modified_since = request
        .headers()
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if if_none_match.is_none() && if_modified_since.is_none() {
        return next.run(request).await;
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, bytes) = buffer_response(response).await;
    if looks_like_searchset(&bytes) {
        return rebuild_response(parts, bytes);
    }

    let etag = parts
        .headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let last_modified = parts
        .headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let matched = if_none_match
        .as_deref()
        .is_some_and(|inm| etag_matches(inm, etag.as_deref()))
        || if_modified_since
            .as_deref()
            .is_some_and(|ims| not_modified(ims, last_modified.as_deref()));

    if !matched {
        return rebuild_response(parts, bytes);
    }

    let mut builder = Response::builder().status(StatusCode::NOT_MODIFIED);
    if let Some(etag) = etag {
        builder = builder.header(header::ETAG, etag);
    }
    builder
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::NOT_MODIFIED.into_response())
}

/// Outcome of an `If-None-Exist` search.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub count: usize,
    pub fhir_id: Option<String>,
}

/// Searcher callback used by conditional create.
#[async_trait]
pub trait ConditionalSearcher: Send + Sync {
    async fn count_matches(
        &self,
        resource_type: &str,
        params: &[(String, String)],
    ) -> Result<MatchOutcome, CoreError>;
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn resource_type_from_path(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Conditional create middleware. On POST with `If-None-Exist`, runs
/// the searcher first: zero matches forward to the handler, exactly one
/// answers 200 with the existing id, two or more answer 412.
pub async fn conditional_create(
    State(searcher): State<Arc<dyn ConditionalSearcher>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }
    let Some(query) = request
        .headers()
        .get("If-None-Exist")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    else {
        return next.run(request).await;
    };

    let resource_type = resource_type_from_path(request.uri().path()).to_string();
    let params = parse_query_pairs(&query);

    let outcome = match searcher.count_matches(&resource_type, &params).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let outcome = OperationOutcome::from(&e);
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome)).into_response();
        }
    };

    match outcome.count {
        0 => next.run(request).await,
        1 => {
            let id = outcome.fhir_id.unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({"resourceType": resource_type, "id": id})),
            )
                .into_response()
        }
        _ => {
            let outcome = OperationOutcome::error(
                "conflict",
                format!("If-None-Exist matched {} resources", outcome.count),
            );
            (StatusCode::PRECONDITION_FAILED, Json(outcome)).into_response()
        }
    }
}
