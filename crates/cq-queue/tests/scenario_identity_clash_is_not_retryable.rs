//! An admission whose identity lookup lands on a row in another service,
//! while the target service already holds the same protocol number, can
//! never succeed. It must be reported as a validation failure, not as a
//! retryable race.

use std::sync::Arc;

use cq_queue::{EngineSettings, InMemoryQueueStore, QueueEngine};
use serde_json::json;

fn list(service_id: i64) -> serde_json::Value {
    json!({"listeGuncelle": {
        "servisID": service_id, "servisAdi": format!("S{service_id}"),
        "siradakiHastaSayisi": 1,
        "siradakiHastalar": [{"protokolNo": "P1", "adiSoyadi": "Ali Veli", "siraNo": 1}]
    }})
}

#[tokio::test]
async fn protocol_registered_in_two_services_rejects_cross_service_admission() {
    let store = Arc::new(InMemoryQueueStore::new());
    let engine = QueueEngine::new(store.clone(), EngineSettings::default());
    engine.sync_batch(list(10)).await.unwrap();
    engine.sync_batch(list(20)).await.unwrap();
    assert_eq!(store.patient_count(), 2);

    let admission = json!({"hastaEkle": {
        "adiSoyadi": "Ali Veli", "siraNo": 99, "protokolNo": "P1",
        "servisID": 20, "servisAdi": "S20"
    }});
    for _ in 0..3 {
        let report = engine.admit_batch(admission.clone()).await.unwrap();
        let r = &report.results[0];
        assert!(!r.success);
        assert!(!r.retryable);
        assert_eq!(
            r.error.as_deref(),
            Some("protokolNo P1 is already registered in servisID 20 by another patient")
        );
    }
    assert_eq!(store.patient_count(), 2);
}
