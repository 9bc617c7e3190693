//! Queue state reconciliation.
//!
//! [`QueueEngine`] applies add-patient, call-patient and queue-list payloads
//! to the store. Records of a batch are processed one after another; a
//! failing record is reported in place and never aborts the batch.
//!
//! Status transitions:
//!
//! ```text
//! (new) --admit/sync--> WAITING --NewCall--> CALLED --CancelCall--> WAITING
//!                          ^                    |
//!                          +----admit/sync------+
//! ```

use std::sync::Arc;

use chrono::Utc;
use cq_schemas::{
    Patient, PatientId, QueueEntry, QueueEntryDraft, QueuePatch, QueueStatus, Service, ServiceId,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::batch::{BatchReport, RecordResult};
use crate::error::{QueueError, Result};
use crate::identity::IdentityResolver;
use crate::payload::{
    records, section, Admission, CallRequest, CallType, ListedPatient, ServiceListUpdate,
    ServiceProjection, ADMISSION_KEY, CALL_KEY, SYNC_KEY,
};
use crate::store::QueueStore;
use crate::EngineSettings;

/// A patient row with every queue entry it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientWithEntries {
    #[serde(flatten)]
    pub patient: Patient,
    pub queue: Vec<QueueEntry>,
}

/// Per-service summary of a queue-list sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    #[serde(rename = "servisID")]
    pub service_id: ServiceId,
    #[serde(rename = "servisAdi")]
    pub service_name: String,
    /// Echo of the announced size as received.
    #[serde(rename = "siradakiHastaSayisi")]
    pub announced: Value,
    #[serde(rename = "siradakiHastalar")]
    pub patients: Vec<Value>,
    #[serde(rename = "kayitsizHastalar")]
    pub unregistered: Value,
    pub applied: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RecordResult>,
}

#[derive(Clone)]
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    settings: EngineSettings,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn QueueStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(self.store.as_ref())
    }

    // -----------------------------------------------------------------------
    // Add patient
    // -----------------------------------------------------------------------

    /// Apply every `hastaEkle` record of `body`. Only an empty array fails
    /// the call itself; per-record failures, store faults included, land in
    /// the report.
    pub async fn admit_batch(&self, body: Value) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for record in records(body)? {
            let input = record
                .get(ADMISSION_KEY)
                .cloned()
                .unwrap_or_else(|| record.clone());
            match self.admit_one(&record).await {
                Ok((patient, updated)) => {
                    let data = serde_json::to_value(&patient)
                        .map_err(|e| QueueError::Internal(e.into()))?;
                    report.push(RecordResult::ok(data, updated));
                }
                Err(e @ QueueError::Internal(_)) => {
                    error!(error = %e, "patient record failed on the store");
                    report.push(RecordResult::failed(&e, input));
                }
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "patient record rejected");
                    report.push(RecordResult::failed(&e, input));
                }
            }
        }
        Ok(report)
    }

    async fn admit_one(&self, record: &Value) -> Result<(Patient, bool)> {
        let admission = Admission::from_value(section(record, ADMISSION_KEY)?)?;
        let resolver = self.resolver();

        let service = resolver
            .service(admission.patient.service_id, &admission.patient.service_name)
            .await?;
        let mut draft = admission.patient.clone();
        draft.service_name = service.name.clone();

        let patient = resolver
            .admit(self.settings.admission_identity, &draft)
            .await?;

        let appt = &admission.appointment;
        let entry_draft = QueueEntryDraft {
            status: QueueStatus::Waiting,
            triage_id: None,
            triage_name: None,
            announced_queue_size: 0,
            average_exam_minutes: None,
            has_appointment: appt.at.is_some(),
            appointment_at: appt.at,
            appointment_time: appt.time.clone(),
            appointment_type: appt.kind.clone(),
            masked: false,
        };
        let patch = QueuePatch {
            status: Some(QueueStatus::Waiting),
            has_appointment: Some(appt.at.is_some()),
            appointment_at: Some(appt.at),
            appointment_time: Some(appt.time.clone()),
            appointment_type: Some(appt.kind.clone()),
            called_at: Some(None),
            called_by: Some(None),
            ..QueuePatch::default()
        };
        self.store
            .upsert_queue_entry(patient.row.id, service.id, &entry_draft, &patch)
            .await?;

        info!(
            patient_id = patient.row.id,
            servis_id = service.id,
            is_update = !patient.created,
            "patient admitted"
        );
        Ok((patient.row, !patient.created))
    }

    // -----------------------------------------------------------------------
    // Call patient
    // -----------------------------------------------------------------------

    /// Apply a `NewCall` or `CancelCall` to an existing queue entry.
    pub async fn call(&self, body: &Value) -> Result<QueueEntry> {
        if body.is_array() {
            return Err(QueueError::validation(
                "Call request must be a single object",
            ));
        }
        let req = CallRequest::from_value(section(body, CALL_KEY)?)?;

        let patient = self
            .resolver()
            .find(self.settings.call_identity, &req.protocol_no, req.service_id)
            .await?
            .ok_or_else(|| {
                warn!(protokol_no = %req.protocol_no, "call for unknown patient");
                QueueError::not_found("Patient not found")
            })?;

        let entry = self
            .store
            .find_queue_entry(patient.id, req.service_id)
            .await?
            .ok_or_else(|| {
                warn!(patient_id = patient.id, servis_id = req.service_id, "queue entry not found");
                QueueError::not_found("Queue entry not found")
            })?;

        let call_type = CallType::parse(&req.call_type).ok_or_else(|| {
            QueueError::validation(format!("Invalid cagriTipi: {}", req.call_type))
        })?;

        let patch = match call_type {
            CallType::NewCall => QueuePatch {
                status: Some(QueueStatus::Called),
                called_at: Some(Some(Utc::now())),
                called_by: Some(Some(req.caller.clone())),
                ..QueuePatch::default()
            },
            CallType::CancelCall => QueuePatch {
                status: Some(QueueStatus::Waiting),
                called_at: Some(None),
                called_by: Some(None),
                ..QueuePatch::default()
            },
        };
        let updated = self.store.update_queue_entry(entry.id, &patch).await?;

        info!(
            patient_id = patient.id,
            status = %updated.status,
            called_by = updated.called_by.as_deref().unwrap_or(""),
            "patient status updated"
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Queue-list sync
    // -----------------------------------------------------------------------

    /// Apply every valid `listeGuncelle` block. Invalid blocks are skipped;
    /// if none is valid the call fails.
    pub async fn sync_batch(&self, body: Value) -> Result<Vec<SyncSummary>> {
        let mut summaries = Vec::new();
        for record in records(body)? {
            let update = match section(&record, SYNC_KEY).and_then(ServiceListUpdate::from_value) {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "skipping invalid queue update");
                    continue;
                }
            };
            summaries.push(self.sync_one(update).await?);
        }
        if summaries.is_empty() {
            return Err(QueueError::validation("No valid queue updates to process"));
        }
        Ok(summaries)
    }

    async fn sync_one(&self, update: ServiceListUpdate) -> Result<SyncSummary> {
        let resolver = self.resolver();
        let service = resolver
            .service(update.service_id, &update.service_name)
            .await?;
        let proj = &update.projection;

        let mut applied = 0;
        let mut rejected = Vec::new();
        for raw in &update.patients {
            let listed = match ListedPatient::from_value(raw) {
                Ok(p) => p,
                Err(e) => {
                    rejected.push(RecordResult::failed(&e, raw.clone()));
                    continue;
                }
            };

            let outcome = self.sync_patient(&service, proj, &listed).await;

            match outcome {
                Ok(()) => applied += 1,
                Err(e @ QueueError::Internal(_)) => {
                    error!(protokol_no = %listed.protocol_no, error = %e, "listed patient failed on the store");
                    rejected.push(RecordResult::failed(&e, raw.clone()));
                }
                Err(e) => {
                    warn!(protokol_no = %listed.protocol_no, error = %e, "listed patient rejected");
                    rejected.push(RecordResult::failed(&e, raw.clone()));
                }
            }
        }

        info!(servis_id = service.id, applied, rejected = rejected.len(), "queue updated for service");
        Ok(SyncSummary {
            service_id: service.id,
            service_name: service.name,
            announced: update.announced_raw,
            patients: update.patients,
            unregistered: update.unregistered,
            applied,
            rejected,
        })
    }

    async fn sync_patient(
        &self,
        service: &Service,
        proj: &ServiceProjection,
        listed: &ListedPatient,
    ) -> Result<()> {
        let patient = self.resolver().listed(service, listed).await?;
        let draft = QueueEntryDraft {
            status: QueueStatus::Waiting,
            triage_id: proj.triage_id.clone(),
            triage_name: proj.triage_name.clone(),
            announced_queue_size: proj.announced_queue_size,
            average_exam_minutes: proj.average_exam_minutes,
            has_appointment: listed.has_appointment,
            appointment_at: None,
            appointment_time: listed.appointment_time.clone(),
            appointment_type: listed.appointment_type.clone(),
            masked: listed.masked,
        };
        let patch = QueuePatch {
            status: Some(QueueStatus::Waiting),
            triage_id: Some(proj.triage_id.clone()),
            triage_name: Some(proj.triage_name.clone()),
            announced_queue_size: Some(proj.announced_queue_size),
            average_exam_minutes: Some(proj.average_exam_minutes),
            has_appointment: Some(listed.has_appointment),
            appointment_time: Some(listed.appointment_time.clone()),
            appointment_type: Some(listed.appointment_type.clone()),
            masked: Some(listed.masked),
            called_at: Some(None),
            called_by: Some(None),
            ..QueuePatch::default()
        };
        self.store
            .upsert_queue_entry(patient.row.id, service.id, &draft, &patch)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Patient reads
    // -----------------------------------------------------------------------

    /// Every patient, newest first, with its queue entries.
    pub async fn list_patients(&self) -> Result<Vec<PatientWithEntries>> {
        let patients = self.store.list_patients().await?;
        let mut out = Vec::with_capacity(patients.len());
        for patient in patients {
            let queue = self.store.patient_entries(patient.id).await?;
            out.push(PatientWithEntries { patient, queue });
        }
        Ok(out)
    }

    pub async fn patient_detail(&self, raw_id: &str) -> Result<PatientWithEntries> {
        let id: PatientId = raw_id
            .trim()
            .parse()
            .map_err(|_| QueueError::validation("Invalid patient id"))?;
        let patient = self
            .store
            .patient_by_id(id)
            .await?
            .ok_or_else(|| QueueError::not_found("Patient not found"))?;
        let queue = self.store.patient_entries(id).await?;
        Ok(PatientWithEntries { patient, queue })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueStore;
    use serde_json::json;

    fn engine() -> (Arc<InMemoryQueueStore>, QueueEngine) {
        let store = Arc::new(InMemoryQueueStore::new());
        let engine = QueueEngine::new(store.clone(), EngineSettings::default());
        (store, engine)
    }

    fn admission(protocol: &str, seq: i32) -> Value {
        json!({"hastaEkle": {
            "adiSoyadi": "Ayse Yilmaz", "siraNo": seq, "protokolNo": protocol,
            "servisID": 3474, "servisAdi": "KBB"
        }})
    }

    #[tokio::test]
    async fn admission_creates_then_updates() {
        let (store, engine) = engine();
        let first = engine.admit_batch(admission("P1", 1)).await.unwrap();
        assert_eq!(first.results[0].is_update, Some(false));
        let second = engine.admit_batch(admission("P1", 1)).await.unwrap();
        assert_eq!(second.results[0].is_update, Some(true));
        assert_eq!(store.patient_count(), 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn missing_section_is_a_record_failure() {
        let (_, engine) = engine();
        let report = engine.admit_batch(json!({"foo": 1})).await.unwrap();
        assert!(!report.any_success());
        assert_eq!(report.results[0].error.as_deref(), Some("No hastaEkle data found"));
    }

    #[tokio::test]
    async fn conflict_on_create_is_retryable() {
        let (store, engine) = engine();
        store.fail_next_create_with_conflict();
        let report = engine.admit_batch(admission("P1", 1)).await.unwrap();
        assert!(report.results[0].retryable);
    }

    #[tokio::test]
    async fn call_with_array_body_is_rejected() {
        let (_, engine) = engine();
        let err = engine.call(&json!([{}])).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_call_type_checked_after_lookup() {
        let (_, engine) = engine();
        engine.admit_batch(admission("P1", 1)).await.unwrap();

        let unknown_patient = json!({"hastaBilgisi": {
            "protokolNo": "NOPE", "servisID": 3474, "cagriTipi": "Recall", "kullaniciAdi": "dr"
        }});
        assert!(matches!(
            engine.call(&unknown_patient).await,
            Err(QueueError::NotFound(_))
        ));

        let bad_type = json!({"hastaBilgisi": {
            "protokolNo": "P1", "servisID": 3474, "cagriTipi": "Recall", "kullaniciAdi": "dr"
        }});
        assert!(matches!(
            engine.call(&bad_type).await,
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn patient_detail_validates_id() {
        let (_, engine) = engine();
        assert!(matches!(
            engine.patient_detail("x1").await,
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            engine.patient_detail("42").await,
            Err(QueueError::NotFound(_))
        ));
    }
}
