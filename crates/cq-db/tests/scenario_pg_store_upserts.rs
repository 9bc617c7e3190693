//! DB-backed store tests, skipped if CQ_DATABASE_URL is not set.
//!
//! Every test works in its own service id range so runs against a shared
//! database do not collide.

use std::sync::Arc;

use cq_db::PgQueueStore;
use cq_queue::{EngineSettings, PatientLookup, QueueEngine, QueueStore, StoreError};
use cq_schemas::{PatientDraft, QueueStatus};
use serde_json::json;

async fn store() -> anyhow::Result<Option<PgQueueStore>> {
    let url = match std::env::var(cq_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: CQ_DATABASE_URL not set");
            return Ok(None);
        }
    };
    let pool = cq_db::connect(&url, 2).await?;
    cq_db::migrate(&pool).await?;
    Ok(Some(PgQueueStore::new(pool)))
}

fn unique_service_id() -> i32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    100_000 + (nanos % 1_000_000) as i32
}

#[tokio::test]
async fn migrate_twice_is_idempotent() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    cq_db::migrate(store.pool()).await?;
    let st = cq_db::status(store.pool()).await?;
    assert!(st.ok);
    assert!(st.has_queue_tables);
    Ok(())
}

#[tokio::test]
async fn duplicate_create_is_a_conflict() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let sid = unique_service_id();
    store.upsert_service(sid, "Test").await?;
    let draft = PatientDraft {
        full_name: "Ayse".into(),
        sequence_no: 1,
        protocol_no: format!("PG-{sid}"),
        service_id: sid,
        service_name: "Test".into(),
        ip_address: None,
        priority_reason: None,
    };
    store.create_patient(&draft).await?;
    let err = store.create_patient(&draft).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn engine_call_cycle_against_postgres() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let sid = unique_service_id();
    let protocol = format!("PGC-{sid}");
    let engine = QueueEngine::new(Arc::new(store.clone()), EngineSettings::default());

    let report = engine
        .admit_batch(json!({"hastaEkle": {
            "adiSoyadi": "Ayse", "siraNo": sid, "protokolNo": protocol,
            "servisID": sid, "servisAdi": "Test"
        }}))
        .await?;
    assert!(report.any_success());

    let call = |t: &str| {
        json!({"hastaBilgisi": {
            "protokolNo": protocol, "servisID": sid, "cagriTipi": t, "kullaniciAdi": "dr"
        }})
    };
    let called = engine.call(&call("NewCall")).await?;
    assert_eq!(called.status, QueueStatus::Called);
    let back = engine.call(&call("CancelCall")).await?;
    assert_eq!(back.status, QueueStatus::Waiting);
    assert!(back.called_at.is_none());

    let list = engine.waiting_list(&sid.to_string()).await?;
    assert_eq!(list.count, 1);
    Ok(())
}

#[tokio::test]
async fn sync_upsert_reports_created_then_updated() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let sid = unique_service_id();
    let engine = QueueEngine::new(Arc::new(store.clone()), EngineSettings::default());
    let body = json!({"listeGuncelle": {
        "servisID": sid, "servisAdi": "Test", "triajID": "1", "siradakiHastaSayisi": 1,
        "siradakiHastalar": [{"protokolNo": format!("S-{sid}"), "adiSoyadi": "Veli", "siraNo": 1}]
    }});
    engine.sync_batch(body.clone()).await?;
    engine.sync_batch(body).await?;

    let patient = store
        .find_patient(&PatientLookup::ProtocolInService {
            protocol_no: format!("S-{sid}"),
            service_id: sid,
        })
        .await?
        .expect("patient synced");
    assert_eq!(patient.ip_address.as_deref(), Some("0.0.0.0"));
    assert_eq!(store.patient_entries(patient.id).await?.len(), 1);
    Ok(())
}
