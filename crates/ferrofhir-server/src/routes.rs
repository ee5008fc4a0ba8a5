//! Router assembly: the `/fhir` surface with the protocol middleware
//! chain layered around it.

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

use crate::handlers;
use crate::middleware::conditional::{ConditionalSearcher, conditional_create, conditional_read};
use crate::middleware::idempotency::idempotency;
use crate::middleware::prefer::prefer;
use crate::middleware::provenance::provenance;
use crate::state::{AppState, StoreSearcher};

/// Build the full application router for one state.
pub fn router(state: AppState) -> Router {
    let searcher: Arc<dyn ConditionalSearcher> = Arc::new(StoreSearcher(state.store.clone()));

    let api = Router::new()
        // Conformance and operations; literals take precedence over the
        // generic {type} routes below.
        .route("/fhir/metadata", get(handlers::metadata))
        .route(
            "/fhir/TerminologyCapabilities",
            get(handlers::terminology_capabilities),
        )
        .route("/fhir/CompartmentDefinition", get(handlers::compartment_list))
        .route(
            "/fhir/CompartmentDefinition/{id}",
            get(handlers::compartment_read),
        )
        .route(
            "/fhir/$import",
            get(handlers::job_list).post(handlers::import_start),
        )
        .route("/fhir/$import/{id}", get(handlers::import_status))
        .route("/fhir/$bulk-edit", post(handlers::bulk_edit))
        .route("/fhir/$bulk-delete", post(handlers::bulk_delete))
        .route(
            "/fhir/$bulk-edit/{id}",
            get(handlers::import_status).delete(handlers::job_cancel),
        )
        .route("/fhir/$graph", get(handlers::graph).post(handlers::graph))
        .route(
            "/fhir/ValueSet/$expand",
            get(handlers::expand).post(handlers::expand),
        )
        .route(
            "/fhir/ConceptMap/$translate",
            get(handlers::translate).post(handlers::translate),
        )
        .route("/fhir/CodeSystem/$closure", post(handlers::closure))
        .route(
            "/fhir/CodeSystem/$subsumes",
            get(handlers::subsumes).post(handlers::subsumes),
        )
        .route("/fhir/Observation/$lastn", get(handlers::observation_lastn))
        .route(
            "/fhir/Slot/$find",
            get(handlers::slot_find).post(handlers::slot_find),
        )
        .route(
            "/fhir/Slot/$check-conflict",
            get(handlers::slot_check_conflict).post(handlers::slot_check_conflict),
        )
        .route(
            "/fhir/Schedule/{id}/$available",
            get(handlers::schedule_available),
        )
        // Transaction / batch bundles at the root.
        .route("/fhir", post(handlers::process_bundle))
        // Generic type-level routes.
        .route(
            "/fhir/{type}",
            get(handlers::search_resources).post(handlers::create_resource),
        )
        .route("/fhir/{type}/_history", get(handlers::type_history))
        .route(
            "/fhir/{type}/{id}",
            get(handlers::read_resource)
                .put(handlers::update_resource)
                .patch(handlers::patch_resource)
                .delete(handlers::delete_resource),
        )
        .route(
            "/fhir/{type}/{id}/_history",
            get(handlers::instance_history),
        )
        .route(
            "/fhir/{type}/{id}/_history/{vid}",
            get(handlers::vread),
        );

    // Layers wrap outside-in as they are added, so the last layer added
    // runs first: conditional read, conditional create, idempotency,
    // prefer, provenance, handler.
    api.layer(from_fn_with_state(state.provenance.clone(), provenance))
        .layer(from_fn(prefer))
        .layer(from_fn_with_state(state.idempotency.clone(), idempotency))
        .layer(from_fn_with_state(searcher, conditional_create))
        .layer(from_fn(conditional_read))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let state = AppState::new(ServerConfig::default());
        (router(state.clone()), state)
    }

    fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/fhir+json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_read_roundtrip_with_etag() {
        let (app, _) = app();
        let created = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/fhir/Patient",
                &json!({"resourceType": "Patient", "id": "p1", "active": true}),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let etag = created
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let read = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/fhir/Patient/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);

        // Conditional re-read with the same ETag answers 304.
        let not_modified = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/fhir/Patient/p1")
                    .header(header::IF_NONE_MATCH, etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(not_modified.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn missing_resource_is_an_operation_outcome() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/fhir/Patient/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let outcome = body_json(response).await;
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["code"], "not-found");
    }

    #[tokio::test]
    async fn idempotent_create_replays_response() {
        let (app, _) = app();
        let body = json!({"resourceType": "Patient", "id": "p1"});

        let first = app
            .clone()
            .oneshot({
                let mut request = json_request(Method::POST, "/fhir/Patient", &body);
                request
                    .headers_mut()
                    .insert("Idempotency-Key", "ABC".parse().unwrap());
                request
            })
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let replayed = app
            .clone()
            .oneshot({
                let mut request = json_request(Method::POST, "/fhir/Patient", &body);
                request
                    .headers_mut()
                    .insert("Idempotency-Key", "ABC".parse().unwrap());
                request
            })
            .await
            .unwrap();
        assert_eq!(replayed.status(), StatusCode::CREATED);
        assert_eq!(
            replayed.headers().get("x-idempotency-replayed").unwrap(),
            "true"
        );

        // Same key on a different path conflicts.
        let conflicting = app
            .clone()
            .oneshot({
                let mut request = json_request(
                    Method::POST,
                    "/fhir/Observation",
                    &json!({"resourceType": "Observation", "id": "o1"}),
                );
                request
                    .headers_mut()
                    .insert("Idempotency-Key", "ABC".parse().unwrap());
                request
            })
            .await
            .unwrap();
        assert_eq!(conflicting.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn conditional_create_short_circuits_on_match() {
        let (app, _) = app();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/fhir/Patient",
                &json!({"resourceType": "Patient", "id": "p1", "identifier": [{"value": "12345"}]}),
            ))
            .await
            .unwrap();

        let matched = app
            .clone()
            .oneshot({
                let mut request = json_request(
                    Method::POST,
                    "/fhir/Patient",
                    &json!({"resourceType": "Patient", "identifier": [{"value": "12345"}]}),
                );
                request
                    .headers_mut()
                    .insert("If-None-Exist", "identifier.value=12345".parse().unwrap());
                request
            })
            .await
            .unwrap();
        assert_eq!(matched.status(), StatusCode::OK);
        let body = body_json(matched).await;
        assert_eq!(body["id"], "p1");
    }

    #[tokio::test]
    async fn prefer_minimal_strips_create_body() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot({
                let mut request = json_request(
                    Method::POST,
                    "/fhir/Patient",
                    &json!({"resourceType": "Patient", "id": "p1"}),
                );
                request
                    .headers_mut()
                    .insert("Prefer", "return=minimal".parse().unwrap());
                request
            })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn search_returns_paginated_bundle() {
        let (app, _) = app();
        for i in 0..3 {
            app.clone()
                .oneshot(json_request(
                    Method::POST,
                    "/fhir/Patient",
                    &json!({"resourceType": "Patient", "id": format!("p{i}"), "gender": "female"}),
                ))
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/fhir/Patient?gender=female&_count=2&_offset=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bundle = body_json(response).await;
        assert_eq!(bundle["resourceType"], "Bundle");
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 3);
        assert_eq!(bundle["entry"].as_array().unwrap().len(), 2);
        let relations: Vec<&str> = bundle["link"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["relation"].as_str().unwrap())
            .collect();
        assert!(relations.contains(&"next"));
        assert!(!relations.contains(&"previous"));
    }

    #[tokio::test]
    async fn transaction_bundle_processes_entries() {
        let (app, _) = app();
        let transaction = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {
                    "request": {"method": "POST", "url": "Patient"},
                    "resource": {"resourceType": "Patient", "id": "p1"}
                },
                {
                    "request": {"method": "GET", "url": "/Patient/p1"}
                }
            ]
        });

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/fhir", &transaction))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bundle = body_json(response).await;
        assert_eq!(bundle["type"], "transaction-response");
        assert_eq!(bundle["entry"][0]["response"]["status"], "201");
        assert_eq!(bundle["entry"][1]["response"]["status"], "200");
    }

    #[tokio::test]
    async fn delete_records_provenance_and_answers_204() {
        let (app, state) = app();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/fhir/Patient",
                &json!({"resourceType": "Patient", "id": "p1"}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/fhir/Patient/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = state.provenance.all();
        assert!(records.iter().any(|r| r.target_reference == "Patient/p1"));
    }

    #[tokio::test]
    async fn bulk_import_roundtrip() {
        let (app, _) = app();
        let ndjson = "{\"resourceType\":\"Patient\",\"id\":\"p1\"}\n{broken\n";
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/fhir/$import?type=Patient")
                    .body(Body::from(ndjson))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job = body_json(response).await;
        assert_eq!(job["status"], "completed");
        assert_eq!(job["counters"]["total"], 2);
        assert_eq!(job["counters"]["success"], 1);
        assert_eq!(job["counters"]["error"], 1);

        let id = job["id"].as_str().unwrap();
        let status = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/fhir/$import/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn compartment_definitions_are_served() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/fhir/CompartmentDefinition/patient")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let definition = body_json(response).await;
        assert_eq!(definition["resourceType"], "CompartmentDefinition");
        assert_eq!(definition["code"], "Patient");
    }

    #[tokio::test]
    async fn graph_operation_walks_references() {
        let (app, _) = app();
        for body in [
            json!({"resourceType": "GraphDefinition", "id": "g1", "name": "org", "start": "Patient",
                   "link": [{"path": "managingOrganization", "target": [{"type": "Organization"}]}]}),
            json!({"resourceType": "Patient", "id": "p1",
                   "managingOrganization": {"reference": "Organization/org1"}}),
            json!({"resourceType": "Organization", "id": "org1"}),
        ] {
            let resource_type = body["resourceType"].as_str().unwrap().to_string();
            app.clone()
                .oneshot(json_request(
                    Method::POST,
                    &format!("/fhir/{resource_type}"),
                    &body,
                ))
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/fhir/$graph?graph=g1&start=Patient/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bundle = body_json(response).await;
        assert_eq!(bundle["type"], "collection");
        assert_eq!(bundle["entry"].as_array().unwrap().len(), 2);
    }
}
