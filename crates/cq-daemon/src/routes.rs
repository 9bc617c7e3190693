//! Axum router and all HTTP handlers for cq-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Mutation handlers run the credential gate on the raw
//! body before handing it to the engine.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cq_queue::{BatchReport, PatientWithEntries, QueueError, SyncSummary, WaitingList};
use cq_schemas::QueueEntry;
use serde_json::Value;
use tracing::info;

use crate::{
    api_types::{ApiError, ApiResult, Envelope, HealthResponse, QueuesUpdated},
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/api/patients", get(list_patients))
        .route("/api/patients/add", post(add_patients))
        .route("/api/patients/call", post(call_patient))
        .route("/api/patients/:id", get(get_patient))
        .route("/api/queue/update", post(update_queue))
        .route("/api/queue/waiting/:servis_id", get(waiting_patients))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.clone(),
            version: st.build.version.clone(),
            uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

/// Parse the body and run the credential gate on it.
async fn gated_body(
    st: &AppState,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    st.engine.authenticate(&body).await?;
    Ok(body)
}

// ---------------------------------------------------------------------------
// POST /api/patients/add
// ---------------------------------------------------------------------------

/// Add or update one patient, or a batch of them.
///
/// Succeeds when at least one record was applied; otherwise 400 with the
/// per-record results as `data`, or 500 when every record hit a store fault.
pub(crate) async fn add_patients(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Envelope<BatchReport>> {
    let body = gated_body(&st, payload).await?;
    let report = st.engine.admit_batch(body).await?;

    if !report.any_success() {
        let data = serde_json::to_value(&report)
            .map_err(|e| ApiError::from(QueueError::Internal(e.into())))?;
        let err = if report.all_internal() {
            QueueError::Internal(anyhow::anyhow!("every patient record failed on the store"))
        } else {
            QueueError::validation("No patients were added successfully")
        };
        return Err(ApiError::with_data(err, data));
    }
    info!(
        category = "http",
        records = report.results.len(),
        failed = report.failures().count(),
        "patients processed"
    );
    Ok(Envelope::success(report))
}

// ---------------------------------------------------------------------------
// POST /api/patients/call
// ---------------------------------------------------------------------------

pub(crate) async fn call_patient(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Envelope<QueueEntry>> {
    let body = gated_body(&st, payload).await?;
    let entry = st.engine.call(&body).await?;
    Ok(Envelope::success(entry))
}

// ---------------------------------------------------------------------------
// POST /api/queue/update
// ---------------------------------------------------------------------------

pub(crate) async fn update_queue(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Envelope<QueuesUpdated<SyncSummary>>> {
    let body = gated_body(&st, payload).await?;
    let queues = st.engine.sync_batch(body).await?;
    Ok(Envelope::success(QueuesUpdated {
        message: "Queue updated successfully",
        queues,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/queue/waiting/{servisID}
// ---------------------------------------------------------------------------

/// Public read: no credentials.
pub(crate) async fn waiting_patients(
    State(st): State<Arc<AppState>>,
    Path(servis_id): Path<String>,
) -> ApiResult<Envelope<WaitingList>> {
    let list = st.engine.waiting_list(&servis_id).await?;
    Ok(Envelope::success(list))
}

// ---------------------------------------------------------------------------
// GET /api/patients, GET /api/patients/{id}
// ---------------------------------------------------------------------------

pub(crate) async fn list_patients(
    State(st): State<Arc<AppState>>,
) -> ApiResult<Envelope<Vec<PatientWithEntries>>> {
    Ok(Envelope::success(st.engine.list_patients().await?))
}

pub(crate) async fn get_patient(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Envelope<PatientWithEntries>> {
    Ok(Envelope::success(st.engine.patient_detail(&id).await?))
}
