//! # API REST
//!
//! Reference implementation of the medical-data API contract.
//!
//! Handles:
//! - HTTP endpoints with axum over any [`MedicalStore`]
//! - OpenAPI document at `/api/openapi.json`
//! - REST-specific concerns (JSON serialization, CORS, `X-API-Key` checks)
//!
//! Uses `api-shared` for the wire models and authentication. The suite's end-to-end tests run
//! the harness against this router.

#![warn(rust_2018_idioms)]

use std::sync::Arc;
use std::time::Instant;

use api_shared::envelope::{LabResultsEnvelope, PatientEnvelope};
use api_shared::{
    validate_api_key, DataEnvelope, ErrorBody, HealthRes, HealthService, LabResultRecord, Patient,
    ResponseMetadata, API_KEY_HEADER,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use medata_core::{DateWindow, MedicalStore};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn MedicalStore>,
    api_key: Arc<str>,
}

impl ApiState {
    pub fn new(store: Arc<dyn MedicalStore>, api_key: &str) -> Self {
        Self {
            store,
            api_key: Arc::from(api_key),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health, get_patient, get_lab_results),
    components(schemas(
        HealthRes,
        Patient,
        LabResultRecord,
        ResponseMetadata,
        ErrorBody,
        PatientEnvelope,
        LabResultsEnvelope
    ))
)]
pub struct ApiDoc;

/// Builds the router: `/health`, the `/api/v1` patient endpoints and `/api/openapi.json`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/patients/:patient_id", get(get_patient))
        .route("/api/v1/patients/:patient_id/lab_results", get(get_lab_results))
        .route("/api/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody::new(detail)))
}

fn internal(e: medata_core::HarnessError) -> ApiError {
    tracing::error!("Store error: {e}");
    error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn authorize(headers: &HeaderMap, state: &ApiState) -> Result<(), ApiError> {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    validate_api_key(provided, &state.api_key)
        .map_err(|e| error(StatusCode::UNAUTHORIZED, e.to_string()))
}

/// Optional inclusive bounds on `performed_date`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LabResultsQuery {
    /// ISO date, `YYYY-MM-DD`
    from_date: Option<String>,
    /// ISO date, `YYYY-MM-DD`
    to_date: Option<String>,
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                error(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid {field} '{raw}': expected YYYY-MM-DD"),
                )
            }),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are up", body = HealthRes),
        (status = 503, description = "Database unreachable", body = HealthRes)
    )
)]
/// Health check endpoint
///
/// Probes the backing store and reports the current UTC time.
#[axum::debug_handler]
async fn health(State(state): State<ApiState>) -> Result<Json<HealthRes>, (StatusCode, Json<HealthRes>)> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(HealthService::check_health())),
        Err(e) => {
            tracing::error!("Health probe failed: {e}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthService::unhealthy("database unreachable")),
            ))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/patients/{patient_id}",
    params(("patient_id" = String, Path, description = "Patient identifier")),
    responses(
        (status = 200, description = "Patient record", body = PatientEnvelope),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody),
        (status = 404, description = "Unknown patient", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
#[axum::debug_handler]
async fn get_patient(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DataEnvelope<Patient>>, ApiError> {
    let started = Instant::now();
    authorize(&headers, &state)?;

    let patient = state
        .store
        .find_patient(&patient_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody::patient_not_found(&patient_id)),
            )
        })?;

    Ok(Json(DataEnvelope {
        data: patient,
        metadata: ResponseMetadata::timed(started.elapsed()),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/patients/{patient_id}/lab_results",
    params(
        ("patient_id" = String, Path, description = "Patient identifier"),
        LabResultsQuery
    ),
    responses(
        (status = 200, description = "Lab results inside the window", body = LabResultsEnvelope),
        (status = 400, description = "Malformed date", body = ErrorBody),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody),
        (status = 404, description = "Unknown patient", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
/// Lab results of a patient, optionally bounded by `from_date`/`to_date`
///
/// Each record carries the owning test's name. A known patient with nothing in the window gets
/// an empty list, not a 404.
#[axum::debug_handler]
async fn get_lab_results(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
    Query(query): Query<LabResultsQuery>,
    headers: HeaderMap,
) -> Result<Json<DataEnvelope<Vec<LabResultRecord>>>, ApiError> {
    let started = Instant::now();
    authorize(&headers, &state)?;

    let from = parse_date(query.from_date.as_deref(), "from_date")?;
    let to = parse_date(query.to_date.as_deref(), "to_date")?;

    let records = state
        .store
        .lab_results(&patient_id, DateWindow::new(from, to))
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody::patient_not_found(&patient_id)),
            )
        })?;

    let count = records.len();
    Ok(Json(DataEnvelope {
        data: records,
        metadata: ResponseMetadata::timed(started.elapsed()).with_count(count),
    }))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use medata_core::{FixtureSet, MemoryStore};
    use serde_json::Value;
    use tower::ServiceExt;

    const KEY: &str = "test_api_key";

    async fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let set = FixtureSet::unscoped().expect("fixtures");
        store.insert_fixtures(&set).await.expect("insert");
        router(ApiState::new(store, KEY))
    }

    async fn call(app: Router, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(key) = key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = app
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_needs_no_key() {
        let (status, body) = call(app().await, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_known_patient_is_wrapped_in_envelope() {
        let (status, body) = call(app().await, "/api/v1/patients/P0001", Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["patient_id"], "P0001");
        assert_eq!(body["data"]["first_name"], "John");
        assert!(body["metadata"]["response_time_ms"].is_number());
        assert!(body["metadata"].get("record_count").is_none());
    }

    #[tokio::test]
    async fn test_unknown_patient_is_404_with_detail() {
        let (status, body) = call(app().await, "/api/v1/patients/NONEXISTENT", Some(KEY)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Patient NONEXISTENT not found");
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys_are_rejected_without_data() {
        let (status, body) = call(app().await, "/api/v1/patients/P0001", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Missing API key");
        assert!(body.get("data").is_none());

        let (status, body) =
            call(app().await, "/api/v1/patients/P0001/lab_results", Some("invalid_key")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid API key");
    }

    #[tokio::test]
    async fn test_lab_results_are_filtered_by_window() {
        let (status, body) = call(
            app().await,
            "/api/v1/patients/P0001/lab_results?from_date=2024-01-01&to_date=2024-01-31",
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().expect("array");
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|r| r["test_id"] == "T1"));
        assert!(data.iter().all(|r| r["test_name"] == "Blood Test"));
        assert_eq!(body["metadata"]["record_count"], 3);
    }

    #[tokio::test]
    async fn test_empty_window_and_patient_without_results_are_200() {
        let (status, body) = call(
            app().await,
            "/api/v1/patients/P0001/lab_results?from_date=2024-03-01&to_date=2024-03-31",
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
        assert_eq!(body["metadata"]["record_count"], 0);

        let (status, body) =
            call(app().await, "/api/v1/patients/P0002/lab_results", Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["record_count"], 0);
    }

    #[tokio::test]
    async fn test_malformed_date_is_400() {
        let (status, body) = call(
            app().await,
            "/api/v1/patients/P0001/lab_results?from_date=2024-13-45",
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["detail"],
            "Invalid from_date '2024-13-45': expected YYYY-MM-DD"
        );
    }

    #[tokio::test]
    async fn test_unknown_patient_lab_results_is_404() {
        let (status, _) =
            call(app().await, "/api/v1/patients/NONEXISTENT/lab_results", Some(KEY)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_paths() {
        let (status, body) = call(app().await, "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]
            .get("/api/v1/patients/{patient_id}/lab_results")
            .is_some());
    }

    #[test]
    fn test_parse_date_treats_blank_as_absent() {
        assert_eq!(parse_date(Some(" "), "from_date").expect("blank"), None);
        let (status, _) = parse_date(Some("01/02/2024"), "to_date").expect_err("malformed");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
