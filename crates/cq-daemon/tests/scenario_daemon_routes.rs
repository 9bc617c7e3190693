//! In-process scenario tests for cq-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test builds the router over a seeded in-memory store and drives it
//! via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use cq_daemon::{routes, state};
use cq_queue::{EngineSettings, InMemoryQueueStore};
use cq_testkit::{bad_credentials, call as call_body, list_update, seeded_store, Admission};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_router(store: Arc<InMemoryQueueStore>) -> axum::Router {
    let st = Arc::new(state::AppState::new(store, EngineSettings::default()));
    routes::build_router(st)
}

/// Drive the router with a single request and return (status, json).
async fn send(router: &axum::Router, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).expect("body is not valid JSON");
    (status, json)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post(uri: &str, body: &Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn admit(router: &axum::Router, body: Value) -> (StatusCode, Value) {
    send(router, post("/api/patients/add", &body)).await
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let router = make_router(seeded_store());
    let (status, json) = send(&router, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "cq-daemon");
    assert!(json.get("config_hash").is_none());
}

#[tokio::test]
async fn health_reports_the_loaded_config_hash() {
    let st = state::AppState::new(seeded_store(), EngineSettings::default())
        .with_config_hash("abc123");
    let router = routes::build_router(Arc::new(st));
    let (status, json) = send(&router, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["config_hash"], "abc123");
}

// ---------------------------------------------------------------------------
// POST /api/patients/add
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_creates_then_replay_updates() {
    let store = seeded_store();
    let router = make_router(Arc::clone(&store));
    let body = Admission::new("1001", 4, 3474).build();

    let (status, first) = admit(&router, body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "success");
    assert_eq!(first["data"]["results"][0]["success"], true);
    assert_eq!(first["data"]["results"][0]["isUpdate"], false);
    assert_eq!(first["data"]["results"][0]["data"]["protokolNo"], "1001");

    let (status, second) = admit(&router, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["results"][0]["isUpdate"], true);
    assert_eq!(
        second["data"]["results"][0]["data"]["id"],
        first["data"]["results"][0]["data"]["id"]
    );
    assert_eq!(store.patient_count(), 1);
    assert_eq!(store.entry_count(), 1);
}

#[tokio::test]
async fn batch_with_one_bad_record_still_succeeds() {
    let router = make_router(seeded_store());
    let good = Admission::new("1001", 1, 3474).build();
    let bad = Admission::new("1002", 2, 3474)
        .field("servisID", json!("abc"))
        .build();

    let (status, json) = admit(&router, json!([good, bad])).await;
    assert_eq!(status, StatusCode::OK);
    let results = json["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"], "Invalid servisID: must be a number");
}

#[tokio::test]
async fn fully_failed_batch_is_400_with_results() {
    let router = make_router(seeded_store());
    let body = Admission::new("1001", 1, 3474)
        .field("adiSoyadi", json!(""))
        .build();

    let (status, json) = admit(&router, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "fail");
    assert_eq!(json["data"]["results"][0]["success"], false);
    assert_eq!(
        json["data"]["results"][0]["error"],
        "Missing required fields: adiSoyadi"
    );
}

#[tokio::test]
async fn lost_race_is_marked_retryable() {
    let store = seeded_store();
    store.fail_next_create_with_conflict();
    let router = make_router(Arc::clone(&store));

    let (status, json) = admit(&router, Admission::new("1001", 1, 3474).build()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["results"][0]["retryable"], true);

    let (status, _) = admit(&router, Admission::new("1001", 1, 3474).build()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn store_fault_on_second_record_keeps_first_result() {
    let store = seeded_store();
    store.fail_entry_upsert_after(1);
    let router = make_router(Arc::clone(&store));
    let body = json!([
        Admission::new("1001", 1, 3474).build(),
        Admission::new("1002", 2, 3474).build(),
        Admission::new("1003", 3, 3474).build()
    ]);

    let (status, json) = admit(&router, body).await;
    assert_eq!(status, StatusCode::OK);
    let results = json["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"], "Internal server error");
    assert_eq!(results[2]["success"], true);
    assert_eq!(store.entry_count(), 2);
}

#[tokio::test]
async fn store_fault_on_only_record_is_500_with_results() {
    let store = seeded_store();
    store.fail_entry_upsert_after(0);
    let router = make_router(store);

    let (status, json) = admit(&router, Admission::new("1001", 1, 3474).build()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "error");
    assert_eq!(json["data"]["results"][0]["success"], false);
}

#[tokio::test]
async fn missing_credentials_is_400() {
    let router = make_router(seeded_store());
    let body = Admission::new("1001", 1, 3474).without_credentials().build();

    let (status, json) = admit(&router, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "fail");
    assert_eq!(json["message"], "User credentials are required");
}

#[tokio::test]
async fn wrong_secret_is_401() {
    let store = seeded_store();
    let router = make_router(Arc::clone(&store));
    let body = Admission::new("1001", 1, 3474)
        .credentials(bad_credentials())
        .build();

    let (status, json) = admit(&router, body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Invalid username or secret");
    assert_eq!(store.patient_count(), 0);
}

#[tokio::test]
async fn malformed_json_gets_fail_envelope() {
    let router = make_router(seeded_store());
    let req = Request::builder()
        .method("POST")
        .uri("/api/patients/add")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let (status, json) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "fail");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON body"));
}

// ---------------------------------------------------------------------------
// POST /api/patients/call
// ---------------------------------------------------------------------------

#[tokio::test]
async fn call_cycle_round_trips_through_http() {
    let router = make_router(seeded_store());
    admit(&router, Admission::new("1001", 1, 3474).build()).await;

    let (status, called) = send(
        &router,
        post("/api/patients/call", &call_body("1001", 3474, "NewCall")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(called["data"]["status"], "CALLED");
    assert_eq!(called["data"]["calledBy"], "dr.kaya");

    let (status, cancelled) = send(
        &router,
        post("/api/patients/call", &call_body("1001", 3474, "CancelCall")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["data"]["status"], "WAITING");
    assert!(cancelled["data"]["calledAt"].is_null());
}

#[tokio::test]
async fn call_for_unknown_patient_is_404() {
    let router = make_router(seeded_store());
    let (status, json) = send(
        &router,
        post("/api/patients/call", &call_body("9999", 3474, "NewCall")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "Patient not found");
}

#[tokio::test]
async fn call_with_unknown_type_is_400() {
    let router = make_router(seeded_store());
    admit(&router, Admission::new("1001", 1, 3474).build()).await;
    let (status, json) = send(
        &router,
        post("/api/patients/call", &call_body("1001", 3474, "Later")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Invalid cagriTipi: Later");
}

// ---------------------------------------------------------------------------
// POST /api/queue/update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_update_returns_summaries() {
    let router = make_router(seeded_store());
    let (status, json) = send(
        &router,
        post("/api/queue/update", &list_update(3474, &["2001", "2002"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["message"], "Queue updated successfully");
    let queue = &json["data"]["queues"][0];
    assert_eq!(queue["servisID"], 3474);
    assert_eq!(queue["siradakiHastalar"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn queue_update_without_valid_blocks_is_400() {
    let router = make_router(seeded_store());
    let mut body = list_update(3474, &["2001"]);
    body["listeGuncelle"]["servisID"] = json!("abc");

    let (status, json) = send(&router, post("/api/queue/update", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "No valid queue updates to process");
}

// ---------------------------------------------------------------------------
// GET /api/queue/waiting/{servisID}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn waiting_list_needs_no_credentials_and_keeps_order() {
    let router = make_router(seeded_store());
    admit(
        &router,
        Admission::new("P1", 1, 3474)
            .appointment("2026-03-01T10:00:00Z")
            .build(),
    )
    .await;
    admit(&router, Admission::new("P2", 2, 3474).build()).await;
    admit(
        &router,
        Admission::new("P3", 3, 3474)
            .appointment("2026-03-01T09:00:00Z")
            .build(),
    )
    .await;

    let (status, json) = send(&router, get("/api/queue/waiting/3474")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["siradakiHastaSayisi"], 3);
    let order: Vec<&str> = json["data"]["siradakiHastalar"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["protokolNo"].as_str().unwrap())
        .collect();
    assert_eq!(order, ["P3", "P1", "P2"]);
}

#[tokio::test]
async fn waiting_list_rejects_bad_and_unknown_ids() {
    let router = make_router(seeded_store());

    let (status, json) = send(&router, get("/api/queue/waiting/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Invalid servisID");

    let (status, json) = send(&router, get("/api/queue/waiting/4040")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "Service not found");
}

// ---------------------------------------------------------------------------
// GET /api/patients, GET /api/patients/{id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn patients_listing_and_detail() {
    let router = make_router(seeded_store());
    let (_, added) = admit(&router, Admission::new("1001", 1, 3474).build()).await;
    let id = added["data"]["results"][0]["data"]["id"].as_i64().unwrap();

    let (status, list) = send(&router, get("/api/patients")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"][0]["queue"].as_array().unwrap().len(), 1);

    let (status, one) = send(&router, get(&format!("/api/patients/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["data"]["protokolNo"], "1001");

    let (status, _) = send(&router, get("/api/patients/777")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, get("/api/patients/x1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
