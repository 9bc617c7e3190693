//! Payload fixtures and a seeded in-memory store for scenario tests.

use std::sync::Arc;

use cq_queue::{EngineSettings, InMemoryQueueStore, QueueEngine};
use serde_json::{json, Map, Value};

pub const USERNAME: &str = "kiosk";
pub const SECRET: &str = "s3cret";

/// In-memory store with the default test user provisioned.
pub fn seeded_store() -> Arc<InMemoryQueueStore> {
    let store = Arc::new(InMemoryQueueStore::new());
    store.insert_user(USERNAME, SECRET);
    store
}

pub fn engine_with(store: Arc<InMemoryQueueStore>, settings: EngineSettings) -> QueueEngine {
    QueueEngine::new(store, settings)
}

pub fn credentials() -> Value {
    json!({"kullanici_adi": USERNAME, "sifre": SECRET})
}

pub fn bad_credentials() -> Value {
    json!({"kullanici_adi": USERNAME, "sifre": "wrong"})
}

/// Builder for one `hastaEkle` record.
#[derive(Debug, Clone)]
pub struct Admission {
    fields: Map<String, Value>,
    creds: Option<Value>,
}

impl Admission {
    pub fn new(protocol_no: &str, sequence_no: i64, service_id: i64) -> Self {
        let mut fields = Map::new();
        fields.insert("adiSoyadi".into(), json!(format!("Hasta {protocol_no}")));
        fields.insert("siraNo".into(), json!(sequence_no));
        fields.insert("protokolNo".into(), json!(protocol_no));
        fields.insert("servisID".into(), json!(service_id));
        fields.insert("servisAdi".into(), json!("KBB"));
        Self {
            fields,
            creds: Some(credentials()),
        }
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn appointment(self, at: &str) -> Self {
        self.field("randevuTarihi", json!(at))
    }

    pub fn without_credentials(mut self) -> Self {
        self.creds = None;
        self
    }

    pub fn credentials(mut self, creds: Value) -> Self {
        self.creds = Some(creds);
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({"hastaEkle": Value::Object(self.fields)});
        if let Some(c) = self.creds {
            body["kullaniciBilgisi"] = c;
        }
        body
    }
}

pub fn call(protocol_no: &str, service_id: i64, call_type: &str) -> Value {
    json!({
        "hastaBilgisi": {
            "protokolNo": protocol_no,
            "servisID": service_id,
            "cagriTipi": call_type,
            "kullaniciAdi": "dr.kaya"
        },
        "kullaniciBilgisi": credentials()
    })
}

/// `listeGuncelle` for `service_id` listing `protocols` in order.
pub fn list_update(service_id: i64, protocols: &[&str]) -> Value {
    let patients: Vec<Value> = protocols
        .iter()
        .enumerate()
        .map(|(i, p)| {
            json!({
                "protokolNo": p,
                "adiSoyadi": format!("Hasta {p}"),
                "siraNo": i + 1,
                "randevuVar": "0",
                "maskeleme": "0"
            })
        })
        .collect();
    json!({
        "listeGuncelle": {
            "servisID": service_id,
            "servisAdi": "KBB",
            "triajID": "1",
            "triajAdi": "Yesil Alan",
            "siradakiHastaSayisi": protocols.len(),
            "ortalamaMuayeneSuresi": 10,
            "siradakiHastalar": patients,
            "kayitsizHastalar": []
        },
        "kullaniciBilgisi": credentials()
    })
}
