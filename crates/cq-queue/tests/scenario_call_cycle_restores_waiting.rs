//! NewCall followed by CancelCall returns the entry to WAITING with no
//! trace of the call.

use std::sync::Arc;

use cq_queue::{EngineSettings, InMemoryQueueStore, QueueEngine, QueueError, QueueStore};
use cq_schemas::QueueStatus;
use serde_json::{json, Value};

async fn seeded() -> QueueEngine {
    let store = Arc::new(InMemoryQueueStore::new());
    let engine = QueueEngine::new(store, EngineSettings::default());
    engine
        .admit_batch(json!({"hastaEkle": {
            "adiSoyadi": "Zeynep Acar", "siraNo": 3, "protokolNo": "77001",
            "servisID": 3474, "servisAdi": "KBB"
        }}))
        .await
        .unwrap();
    engine
}

fn call(call_type: &str) -> Value {
    json!({"hastaBilgisi": {
        "protokolNo": "77001", "servisID": "3474", "cagriTipi": call_type,
        "kullaniciAdi": "dr.kaya"
    }})
}

#[tokio::test]
async fn new_call_then_cancel_restores_waiting() {
    let engine = seeded().await;

    let called = engine.call(&call("NewCall")).await.unwrap();
    assert_eq!(called.status, QueueStatus::Called);
    assert!(called.called_at.is_some());
    assert_eq!(called.called_by.as_deref(), Some("dr.kaya"));

    let cancelled = engine.call(&call("CancelCall")).await.unwrap();
    assert_eq!(cancelled.status, QueueStatus::Waiting);
    assert!(cancelled.called_at.is_none());
    assert!(cancelled.called_by.is_none());
    assert!(cancelled.updated_at >= called.updated_at);
}

#[tokio::test]
async fn legacy_call_type_names_are_accepted() {
    let engine = seeded().await;
    assert_eq!(
        engine.call(&call("YeniCagri")).await.unwrap().status,
        QueueStatus::Called
    );
    assert_eq!(
        engine.call(&call("IptalCagri")).await.unwrap().status,
        QueueStatus::Waiting
    );
}

#[tokio::test]
async fn unknown_protocol_is_not_found() {
    let engine = seeded().await;
    let err = engine
        .call(&json!({"hastaBilgisi": {
            "protokolNo": "00000", "servisID": 3474, "cagriTipi": "NewCall", "kullaniciAdi": "dr"
        }}))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn patient_without_entry_in_that_service_is_not_found() {
    let engine = seeded().await;
    engine.store().upsert_service(99, "Goz").await.unwrap();
    let err = engine
        .call(&json!({"hastaBilgisi": {
            "protokolNo": "77001", "servisID": 99, "cagriTipi": "NewCall", "kullaniciAdi": "dr"
        }}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Queue entry not found");
}

#[tokio::test]
async fn missing_fields_are_listed() {
    let engine = seeded().await;
    let err = engine
        .call(&json!({"hastaBilgisi": {"protokolNo": "77001"}}))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Missing required fields: servisID, cagriTipi, kullaniciAdi"
    );
}
