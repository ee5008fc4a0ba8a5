//! Request handlers: CRUD, search, history, transaction bundles, and
//! the extended operations.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use ferrofhir_core::bundle::{
    Bundle, BundleEntry, BundleProcessor, BundleRequest, SearchSetParams, parse_entry_request,
};
use ferrofhir_core::error::CoreError;
use ferrofhir_core::outcome::OperationOutcome;
use ferrofhir_core::resource::resource_type_of;
use ferrofhir_jobs::{EditOperation, JobError};
use ferrofhir_scheduling::AvailabilityRequest;
use ferrofhir_storage::{ResourceStore, StorageError, StoredResource};

use crate::compartments;
use crate::operations::graph::parse_graph_definition;
use crate::operations::lastn::lastn;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub(crate) fn outcome_response(status: StatusCode, outcome: OperationOutcome) -> Response {
    (status, Json(outcome)).into_response()
}

pub(crate) fn core_error_response(err: &CoreError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    outcome_response(status, OperationOutcome::from(err))
}

fn storage_error_response(err: &StorageError) -> Response {
    let (status, code) = match err {
        StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "not-found"),
        StorageError::AlreadyExists { .. } => (StatusCode::CONFLICT, "conflict"),
        StorageError::InvalidResource(_) => (StatusCode::BAD_REQUEST, "structure"),
        StorageError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "processing"),
    };
    outcome_response(status, OperationOutcome::error(code, err.to_string()))
}

fn job_error_response(err: &JobError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match err {
        JobError::NotFound(_) => "not-found",
        JobError::CancelConflict { .. } => "conflict",
        JobError::TooManyJobs { .. } => "too-many-requests",
        JobError::EmptyInput | JobError::MissingCriteria => "required",
        JobError::Storage(_) => "processing",
    };
    outcome_response(status, OperationOutcome::error(code, err.to_string()))
}

fn stored_response(status: StatusCode, stored: &StoredResource) -> Response {
    let last_modified = httpdate::fmt_http_date(std::time::SystemTime::from(stored.last_updated));
    (
        status,
        [
            (header::ETAG.as_str(), stored.etag()),
            (header::LAST_MODIFIED.as_str(), last_modified),
            (header::CONTENT_TYPE.as_str(), "application/fhir+json".to_string()),
        ],
        Json(stored.resource.clone()),
    )
        .into_response()
}

fn not_found(resource_type: &str, id: &str) -> Response {
    outcome_response(
        StatusCode::NOT_FOUND,
        OperationOutcome::error("not-found", format!("{resource_type}/{id} does not exist")),
    )
}

// ---------------------------------------------------------------------------
// CRUD and search
// ---------------------------------------------------------------------------

const CONTROL_PARAMS: [&str; 3] = ["_count", "_offset", "_sort"];

pub async fn search_resources(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let count = params
        .get("_count")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(state.config.search.default_count)
        .min(state.config.search.max_count);
    let offset = params
        .get("_offset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    // Registered dynamic parameters search the index; everything else
    // is direct field equality against the stored JSON.
    let mut criteria = HashMap::new();
    let mut index_ids: Option<Vec<String>> = None;
    for (name, value) in &params {
        if CONTROL_PARAMS.contains(&name.as_str()) {
            continue;
        }
        let (base_name, _) = ferrofhir_search::split_modifier(name);
        if state.registry.get(&resource_type, base_name).is_some() {
            let ids = state.index.search(&resource_type, base_name, value);
            index_ids = Some(match index_ids {
                Some(existing) => existing.into_iter().filter(|id| ids.contains(id)).collect(),
                None => ids,
            });
        } else {
            criteria.insert(name.clone(), value.clone());
        }
    }

    let matched = match state.store.search(&resource_type, &criteria).await {
        Ok(matched) => matched,
        Err(e) => return storage_error_response(&e),
    };
    let matched: Vec<StoredResource> = match &index_ids {
        Some(ids) => matched
            .into_iter()
            .filter(|stored| ids.contains(&stored.id))
            .collect(),
        None => matched,
    };

    let total = matched.len() as u64;
    let page: Vec<Value> = matched
        .into_iter()
        .skip(offset)
        .take(count)
        .map(|stored| stored.resource)
        .collect();

    let bundle = Bundle::searchset_with_links(SearchSetParams {
        resources: page,
        total,
        base_url: format!("/fhir/{resource_type}"),
        offset: offset as u64,
        count: count as u64,
    });
    (StatusCode::OK, Json(bundle)).into_response()
}

pub async fn create_resource(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match resource_type_of(&body) {
        Some(rt) if rt == resource_type => {}
        _ => {
            return core_error_response(&CoreError::structure(format!(
                "body resourceType must be '{resource_type}'"
            )));
        }
    }

    match state.store.create(&body).await {
        Ok(stored) => {
            state
                .events
                .send_created(&stored.resource_type, &stored.id, stored.resource.clone());
            stored_response(StatusCode::CREATED, &stored)
        }
        Err(e) => storage_error_response(&e),
    }
}

pub async fn read_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    match state.store.read(&resource_type, &id).await {
        Ok(Some(stored)) => stored_response(StatusCode::OK, &stored),
        Ok(None) => not_found(&resource_type, &id),
        Err(e) => storage_error_response(&e),
    }
}

pub async fn update_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(mut body): Json<Value>,
) -> Response {
    if let Value::Object(map) = &mut body {
        map.insert("id".to_string(), Value::String(id.clone()));
    }
    match resource_type_of(&body) {
        Some(rt) if rt == resource_type => {}
        _ => {
            return core_error_response(&CoreError::structure(format!(
                "body resourceType must be '{resource_type}'"
            )));
        }
    }

    match state.store.update(&body).await {
        Ok(stored) => {
            state
                .events
                .send_updated(&stored.resource_type, &stored.id, stored.resource.clone());
            stored_response(StatusCode::OK, &stored)
        }
        Err(e) => storage_error_response(&e),
    }
}

pub async fn patch_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Response {
    let current = match state.store.read(&resource_type, &id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return not_found(&resource_type, &id),
        Err(e) => return storage_error_response(&e),
    };

    let mut resource = current.resource;
    match &patch {
        // RFC 6902 patch document.
        Value::Array(_) => {
            let operations: json_patch::Patch = match serde_json::from_value(patch.clone()) {
                Ok(operations) => operations,
                Err(e) => {
                    return core_error_response(&CoreError::structure(format!(
                        "invalid JSON Patch: {e}"
                    )));
                }
            };
            if let Err(e) = json_patch::patch(&mut resource, &operations) {
                return core_error_response(&CoreError::structure(format!("patch failed: {e}")));
            }
        }
        // Shallow merge for object bodies.
        Value::Object(changes) => {
            if let Value::Object(target) = &mut resource {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        _ => {
            return core_error_response(&CoreError::structure(
                "PATCH body must be a JSON Patch array or an object",
            ));
        }
    }

    match state.store.update(&resource).await {
        Ok(stored) => {
            state
                .events
                .send_updated(&stored.resource_type, &stored.id, stored.resource.clone());
            stored_response(StatusCode::OK, &stored)
        }
        Err(e) => storage_error_response(&e),
    }
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let previous = state
        .store
        .read(&resource_type, &id)
        .await
        .ok()
        .flatten()
        .map(|stored| stored.resource)
        .unwrap_or_else(|| json!({"resourceType": resource_type, "id": id}));

    match state.store.delete(&resource_type, &id).await {
        Ok(()) => {
            state.events.send_deleted(&resource_type, &id, previous);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => storage_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

fn history_bundle(entries: Vec<ferrofhir_storage::HistoryEntry>) -> Bundle {
    let total = entries.len() as u64;
    let entries = entries
        .into_iter()
        .map(|entry| BundleEntry {
            full_url: Some(entry.resource.local_reference()),
            resource: Some(entry.resource.resource.clone()),
            request: Some(BundleRequest {
                method: entry.method.http_method().to_string(),
                url: entry.resource.local_reference(),
            }),
            ..Default::default()
        })
        .collect();
    Bundle::history(entries, total)
}

pub async fn type_history(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
) -> Response {
    match state.store.history(&resource_type, None).await {
        Ok(entries) => (StatusCode::OK, Json(history_bundle(entries))).into_response(),
        Err(e) => storage_error_response(&e),
    }
}

pub async fn instance_history(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    match state.store.history(&resource_type, Some(&id)).await {
        Ok(entries) => (StatusCode::OK, Json(history_bundle(entries))).into_response(),
        Err(e) => storage_error_response(&e),
    }
}

pub async fn vread(
    State(state): State<AppState>,
    Path((resource_type, id, version_id)): Path<(String, String, String)>,
) -> Response {
    match state.store.history(&resource_type, Some(&id)).await {
        Ok(entries) => match entries
            .into_iter()
            .find(|entry| entry.resource.version_id == version_id)
        {
            Some(entry) => stored_response(StatusCode::OK, &entry.resource),
            None => not_found(&resource_type, &format!("{id}/_history/{version_id}")),
        },
        Err(e) => storage_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Transaction / batch bundles
// ---------------------------------------------------------------------------

pub async fn process_bundle(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let bundle: Bundle = match serde_json::from_value(body) {
        Ok(bundle) => bundle,
        Err(e) => {
            return core_error_response(&CoreError::structure(format!("unparseable bundle: {e}")));
        }
    };
    let is_transaction = match bundle.bundle_type.as_str() {
        "transaction" => true,
        "batch" => false,
        other => {
            return core_error_response(&CoreError::value(
                "Bundle.type",
                format!("expected transaction or batch, got '{other}'"),
            ));
        }
    };

    let processor = BundleProcessor::new();
    let mut response_entries = Vec::new();

    for entry in &bundle.entry {
        let Some(request) = &entry.request else {
            response_entries.push(BundleEntry::default());
            continue;
        };
        let parsed = match parse_entry_request(request) {
            Ok(parsed) => parsed,
            Err(e) => {
                if is_transaction {
                    return core_error_response(&e);
                }
                response_entries.push(BundleEntry::default());
                continue;
            }
        };

        let result = match parsed.method.as_str() {
            "POST" => match &entry.resource {
                Some(resource) => state.store.create(resource).await.map(|stored| {
                    state.events.send_created(
                        &stored.resource_type,
                        &stored.id,
                        stored.resource.clone(),
                    );
                    Some(stored.resource)
                }),
                None => Err(StorageError::invalid_resource("POST entry has no resource")),
            },
            "PUT" => match &entry.resource {
                Some(resource) => state.store.update(resource).await.map(|stored| {
                    state.events.send_updated(
                        &stored.resource_type,
                        &stored.id,
                        stored.resource.clone(),
                    );
                    Some(stored.resource)
                }),
                None => Err(StorageError::invalid_resource("PUT entry has no resource")),
            },
            "DELETE" => match &parsed.id {
                Some(id) => state
                    .store
                    .delete(&parsed.resource_type, id)
                    .await
                    .map(|_| None),
                None => Err(StorageError::invalid_resource("DELETE entry has no id")),
            },
            "GET" => match &parsed.id {
                Some(id) => state
                    .store
                    .read(&parsed.resource_type, id)
                    .await
                    .map(|found| found.map(|stored| stored.resource)),
                None => state
                    .store
                    .search(&parsed.resource_type, &HashMap::new())
                    .await
                    .map(|found| {
                        Some(serde_json::to_value(Bundle::searchset(
                            found.into_iter().map(|s| s.resource).collect(),
                            0,
                            "",
                        ))
                        .unwrap_or_default())
                    }),
            },
            _ => Err(StorageError::invalid_resource("unsupported method")),
        };

        match result {
            Ok(resource) => match processor.response_entry(&parsed.method, resource) {
                Ok(response_entry) => response_entries.push(response_entry),
                Err(e) => {
                    if is_transaction {
                        return core_error_response(&e);
                    }
                    response_entries.push(BundleEntry::default());
                }
            },
            Err(e) => {
                if is_transaction {
                    return storage_error_response(&e);
                }
                response_entries.push(BundleEntry::default());
            }
        }
    }

    let response_bundle = if is_transaction {
        Bundle::transaction_response(response_entries)
    } else {
        Bundle::batch_response(response_entries)
    };
    (StatusCode::OK, Json(response_bundle)).into_response()
}

// ---------------------------------------------------------------------------
// Bulk jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ImportParams {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
}

pub async fn import_start(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
    body: Bytes,
) -> Response {
    let Some(resource_type) = params.resource_type.filter(|s| !s.is_empty()) else {
        return core_error_response(&CoreError::required("type"));
    };
    match state.jobs.start_import(&resource_type, &body).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => job_error_response(&e),
    }
}

pub async fn import_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.get_status(&id) {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => job_error_response(&e),
    }
}

pub async fn job_list(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.jobs.list(50))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BulkEditBody {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default)]
    pub criteria: HashMap<String, String>,
    #[serde(default)]
    pub patch: Value,
    #[serde(default)]
    pub operation: Option<EditOperation>,
}

pub async fn bulk_edit(State(state): State<AppState>, Json(body): Json<BulkEditBody>) -> Response {
    let operation = body.operation.unwrap_or(EditOperation::Update);
    match state
        .jobs
        .start_bulk_update(&body.resource_type, body.criteria, body.patch, operation)
        .await
    {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => job_error_response(&e),
    }
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(body): Json<BulkEditBody>,
) -> Response {
    match state
        .jobs
        .start_bulk_delete(&body.resource_type, body.criteria)
        .await
    {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => job_error_response(&e),
    }
}

pub async fn job_cancel(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.cancel(&id) {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => job_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Terminology operations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TranslateParams {
    pub system: Option<String>,
    pub code: Option<String>,
}

pub async fn translate(
    State(state): State<AppState>,
    Query(params): Query<TranslateParams>,
) -> Response {
    let system = params.system.unwrap_or_default();
    let code = params.code.unwrap_or_default();
    match state.terminology.translate(&system, &code).await {
        Ok(matches) => {
            let result = json!({
                "resourceType": "Parameters",
                "parameter": [
                    {"name": "result", "valueBoolean": !matches.is_empty()},
                    {"name": "match", "part": matches},
                ]
            });
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => core_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubsumesParams {
    pub system: Option<String>,
    #[serde(rename = "codeA")]
    pub code_a: Option<String>,
    #[serde(rename = "codeB")]
    pub code_b: Option<String>,
}

pub async fn subsumes(
    State(state): State<AppState>,
    Query(params): Query<SubsumesParams>,
) -> Response {
    let (Some(system), Some(code_a), Some(code_b)) = (params.system, params.code_a, params.code_b)
    else {
        return core_error_response(&CoreError::required("system, codeA, codeB"));
    };
    match state.terminology.subsumes(&system, &code_a, &code_b).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "resourceType": "Parameters",
                "parameter": [{"name": "outcome", "valueCode": outcome}]
            })),
        )
            .into_response(),
        Err(e) => core_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ClosureBody {
    pub name: String,
    #[serde(default)]
    pub concepts: Vec<ClosureConcept>,
}

#[derive(Debug, Deserialize)]
pub struct ClosureConcept {
    pub system: String,
    pub code: String,
}

pub async fn closure(State(state): State<AppState>, Json(body): Json<ClosureBody>) -> Response {
    let pairs: Vec<(String, String)> = body
        .concepts
        .into_iter()
        .map(|concept| (concept.system, concept.code))
        .collect();
    let added = state.terminology.closure(&body.name, &pairs);
    let elements: Vec<Value> = added
        .into_iter()
        .map(|(system, code)| json!({"system": system, "code": code}))
        .collect();
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "ConceptMap",
            "name": body.name,
            "group": [{"element": elements}]
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ExpandParams {
    pub url: Option<String>,
    pub filter: Option<String>,
}

pub async fn expand(State(state): State<AppState>, Query(params): Query<ExpandParams>) -> Response {
    let Some(url) = params.url else {
        return core_error_response(&CoreError::required("url"));
    };
    match state.terminology.expand(&url, params.filter.as_deref()).await {
        Ok(codings) => (
            StatusCode::OK,
            Json(json!({
                "resourceType": "ValueSet",
                "url": url,
                "expansion": {
                    "total": codings.len(),
                    "contains": codings,
                }
            })),
        )
            .into_response(),
        Err(e) => core_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Graph, $lastn, availability
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    pub graph: Option<String>,
    pub start: Option<String>,
}

pub async fn graph(State(state): State<AppState>, Query(params): Query<GraphParams>) -> Response {
    let Some(graph_id) = params.graph else {
        return core_error_response(&CoreError::required("graph"));
    };
    let Some(start) = params.start else {
        return core_error_response(&CoreError::required("start"));
    };
    let Some((start_type, start_id)) = start.split_once('/') else {
        return core_error_response(&CoreError::value("start", "expected Type/id"));
    };

    let definition = match state.store.read("GraphDefinition", &graph_id).await {
        Ok(Some(stored)) => stored.resource,
        Ok(None) => return not_found("GraphDefinition", &graph_id),
        Err(e) => return storage_error_response(&e),
    };
    let model = match parse_graph_definition(&definition) {
        Ok(model) => model,
        Err(e) => return core_error_response(&e),
    };

    // One type-agnostic fetcher serves every type the graph can reach.
    let mut types: Vec<&str> = vec![start_type];
    collect_target_types(&model.links, &mut types);
    let traverser = state.graph_traverser(&types);

    match traverser.traverse(&model, start_type, start_id).await {
        Ok(bundle) => (StatusCode::OK, Json(bundle)).into_response(),
        Err(e) => core_error_response(&e),
    }
}

fn collect_target_types<'a>(
    links: &'a [crate::operations::graph::GraphLink],
    types: &mut Vec<&'a str>,
) {
    for link in links {
        for target in &link.targets {
            if !types.contains(&target.resource_type.as_str()) {
                types.push(&target.resource_type);
            }
            collect_target_types(&target.links, types);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LastnParams {
    pub patient: Option<String>,
    pub max: Option<usize>,
}

pub async fn observation_lastn(
    State(state): State<AppState>,
    Query(params): Query<LastnParams>,
) -> Response {
    let mut criteria = HashMap::new();
    if let Some(patient) = &params.patient {
        criteria.insert("subject.reference".to_string(), format!("Patient/{patient}"));
    }
    let observations = match state.store.search("Observation", &criteria).await {
        Ok(matched) => matched.into_iter().map(|stored| stored.resource).collect(),
        Err(e) => return storage_error_response(&e),
    };
    let result = lastn(observations, params.max.unwrap_or(1));
    let total = result.len() as u64;
    (
        StatusCode::OK,
        Json(Bundle::searchset(result, total, "/fhir/Observation/$lastn")),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SlotQueryParams {
    pub actor: Option<String>,
    pub schedule: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<i64>,
}

fn availability_request(params: &SlotQueryParams) -> Result<AvailabilityRequest, CoreError> {
    let start = params
        .start
        .as_deref()
        .ok_or_else(|| CoreError::required("start"))?;
    let end = params
        .end
        .as_deref()
        .ok_or_else(|| CoreError::required("end"))?;
    let start = ferrofhir_core::time::parse_fhir_datetime(start)
        .map_err(|e| CoreError::value("start", e.to_string()))?;
    let end = ferrofhir_core::time::parse_fhir_datetime(end)
        .map_err(|e| CoreError::value("end", e.to_string()))?;
    Ok(AvailabilityRequest {
        start: Some(start.instant),
        end: Some(end.instant),
        duration: params.duration,
        ..Default::default()
    })
}

pub async fn slot_find(
    State(state): State<AppState>,
    Query(params): Query<SlotQueryParams>,
) -> Response {
    let Some(actor) = params.actor.clone().or_else(|| params.schedule.clone()) else {
        return core_error_response(&CoreError::required("actor"));
    };
    let request = match availability_request(&params) {
        Ok(request) => request,
        Err(e) => return core_error_response(&e),
    };
    match state.availability.find_slots(&actor, &request) {
        Ok(slots) => (StatusCode::OK, Json(json!({"actor": actor, "slots": slots}))).into_response(),
        Err(e) => core_error_response(&e),
    }
}

pub async fn slot_check_conflict(
    State(state): State<AppState>,
    Query(params): Query<SlotQueryParams>,
) -> Response {
    let Some(actor) = params.actor.clone() else {
        return core_error_response(&CoreError::required("actor"));
    };
    let request = match availability_request(&params) {
        Ok(request) => request,
        Err(e) => return core_error_response(&e),
    };
    let (Some(start), Some(end)) = (request.start, request.end) else {
        return core_error_response(&CoreError::required("start, end"));
    };
    let result = state.availability.check_conflict(start, end, &actor);
    (StatusCode::OK, Json(result)).into_response()
}

pub async fn schedule_available(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SlotQueryParams>,
) -> Response {
    let actor = format!("Schedule/{id}");
    let request = match availability_request(&params) {
        Ok(request) => request,
        Err(e) => return core_error_response(&e),
    };
    match state.availability.find_slots(&actor, &request) {
        Ok(slots) => (StatusCode::OK, Json(json!({"schedule": actor, "slots": slots}))).into_response(),
        Err(e) => core_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Conformance endpoints
// ---------------------------------------------------------------------------

pub async fn compartment_list() -> Response {
    let definitions = compartments::all_compartment_definitions();
    let total = definitions.len() as u64;
    (
        StatusCode::OK,
        Json(Bundle::searchset(
            definitions,
            total,
            "/fhir/CompartmentDefinition",
        )),
    )
        .into_response()
}

pub async fn compartment_read(Path(id): Path<String>) -> Response {
    // Ids are lowercase; accept the type name casing too.
    let code = match id.to_lowercase().as_str() {
        "patient" => "Patient",
        "encounter" => "Encounter",
        "practitioner" => "Practitioner",
        _ => "",
    };
    match compartments::compartment_definition(code) {
        Some(definition) => (StatusCode::OK, Json(definition)).into_response(),
        None => not_found("CompartmentDefinition", &id),
    }
}

pub async fn terminology_capabilities() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "TerminologyCapabilities",
            "status": "active",
            "kind": "instance",
            "translation": {"needsMap": true},
            "expansion": {"hierarchical": false, "paging": false},
        })),
    )
        .into_response()
}

pub async fn metadata() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": "4.0.1",
            "format": ["application/fhir+json"],
            "rest": [{"mode": "server"}],
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_bundle_carries_request_methods() {
        use ferrofhir_storage::{HistoryEntry, HistoryMethod};
        let stored = StoredResource {
            id: "p1".to_string(),
            resource_type: "Patient".to_string(),
            version_id: "1".to_string(),
            resource: json!({"resourceType": "Patient", "id": "p1"}),
            last_updated: time::OffsetDateTime::now_utc(),
        };
        let bundle = history_bundle(vec![HistoryEntry {
            resource: stored,
            method: HistoryMethod::Create,
        }]);
        assert_eq!(bundle.bundle_type, "history");
        assert_eq!(bundle.entry[0].request.as_ref().unwrap().method, "POST");
    }
}
