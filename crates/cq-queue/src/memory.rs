//! In-memory [`QueueStore`] for tests and local development.
//!
//! - **Single-process only**: nothing is shared across processes.
//! - **No persistence**: all rows are lost when the store is dropped.
//!
//! Unique keys are enforced the same way the Postgres schema enforces them,
//! so engine behaviour observed against this store carries over.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use cq_schemas::{
    Patient, PatientDraft, PatientId, PatientRefresh, QueueEntry, QueueEntryDraft, QueueEntryId,
    QueuePatch, Service, ServiceId, User,
};

use crate::error::StoreError;
use crate::store::{PatientLookup, QueueStore, StoreResult, Upserted};

#[derive(Debug, Default)]
struct Tables {
    services: BTreeMap<ServiceId, Service>,
    patients: BTreeMap<PatientId, Patient>,
    entries: BTreeMap<QueueEntryId, QueueEntry>,
    users: HashMap<String, User>,
    next_patient_id: PatientId,
    next_entry_id: QueueEntryId,
}

#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    tables: RwLock<Tables>,
    conflict_on_next_create: AtomicBool,
    /// `n + 1` arms a backend fault after `n` more entry upserts; 0 is off.
    entry_fault_countdown: AtomicUsize,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend(anyhow!("in-memory store lock poisoned"))
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a credential row.
    pub fn insert_user(&self, username: &str, secret: &str) {
        let mut t = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        t.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                secret: secret.to_string(),
            },
        );
    }

    /// Make the next `create_patient` fail as if a concurrent writer had
    /// inserted the same key first.
    pub fn fail_next_create_with_conflict(&self) {
        self.conflict_on_next_create.store(true, Ordering::SeqCst);
    }

    /// Let `successes` more `upsert_queue_entry` calls through, then fail the
    /// next one with a backend error.
    pub fn fail_entry_upsert_after(&self, successes: usize) {
        self.entry_fault_countdown
            .store(successes + 1, Ordering::SeqCst);
    }

    fn entry_fault_due(&self) -> bool {
        let prev = self
            .entry_fault_countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        prev == 1
    }

    pub fn patient_count(&self) -> usize {
        self.tables
            .read()
            .map(|t| t.patients.len())
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.tables
            .read()
            .map(|t| t.entries.len())
            .unwrap_or_default()
    }
}

impl Tables {
    fn patient_key_taken(&self, protocol_no: &str, service_id: ServiceId, except: Option<PatientId>) -> bool {
        self.patients.values().any(|p| {
            Some(p.id) != except && p.protocol_no == protocol_no && p.service_id == service_id
        })
    }

    fn insert_patient(&mut self, draft: &PatientDraft) -> Patient {
        self.next_patient_id += 1;
        let now = Utc::now();
        let p = Patient {
            id: self.next_patient_id,
            full_name: draft.full_name.clone(),
            sequence_no: draft.sequence_no,
            protocol_no: draft.protocol_no.clone(),
            service_id: draft.service_id,
            service_name: draft.service_name.clone(),
            ip_address: draft.ip_address.clone(),
            priority_reason: draft.priority_reason.clone(),
            created_at: now,
            updated_at: now,
        };
        self.patients.insert(p.id, p.clone());
        p
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn upsert_service(&self, id: ServiceId, name: &str) -> StoreResult<Service> {
        let mut t = self.tables.write().map_err(poison_err)?;
        let svc = Service {
            id,
            name: name.to_string(),
        };
        t.services.insert(id, svc.clone());
        Ok(svc)
    }

    async fn find_service(&self, id: ServiceId) -> StoreResult<Option<Service>> {
        let t = self.tables.read().map_err(poison_err)?;
        Ok(t.services.get(&id).cloned())
    }

    async fn find_patient(&self, lookup: &PatientLookup) -> StoreResult<Option<Patient>> {
        let t = self.tables.read().map_err(poison_err)?;
        // BTreeMap iterates in id order: first match is the lowest id.
        Ok(t.patients.values().find(|p| lookup.matches(p)).cloned())
    }

    async fn patient_by_id(&self, id: PatientId) -> StoreResult<Option<Patient>> {
        let t = self.tables.read().map_err(poison_err)?;
        Ok(t.patients.get(&id).cloned())
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let t = self.tables.read().map_err(poison_err)?;
        let mut out: Vec<Patient> = t.patients.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn create_patient(&self, draft: &PatientDraft) -> StoreResult<Patient> {
        let mut t = self.tables.write().map_err(poison_err)?;
        if self.conflict_on_next_create.swap(false, Ordering::SeqCst)
            || t.patient_key_taken(&draft.protocol_no, draft.service_id, None)
        {
            return Err(StoreError::Conflict(format!(
                "patients (protocol_no, service_id) = ({}, {})",
                draft.protocol_no, draft.service_id
            )));
        }
        Ok(t.insert_patient(draft))
    }

    async fn update_patient(&self, id: PatientId, draft: &PatientDraft) -> StoreResult<Patient> {
        let mut t = self.tables.write().map_err(poison_err)?;
        if t.patient_key_taken(&draft.protocol_no, draft.service_id, Some(id)) {
            return Err(StoreError::Conflict(format!(
                "patients (protocol_no, service_id) = ({}, {})",
                draft.protocol_no, draft.service_id
            )));
        }
        let p = t
            .patients
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("patient {id}")))?;
        p.full_name = draft.full_name.clone();
        p.sequence_no = draft.sequence_no;
        p.protocol_no = draft.protocol_no.clone();
        p.service_id = draft.service_id;
        p.service_name = draft.service_name.clone();
        p.ip_address = draft.ip_address.clone();
        p.priority_reason = draft.priority_reason.clone();
        p.updated_at = Utc::now();
        Ok(p.clone())
    }

    async fn upsert_patient_in_service(
        &self,
        draft: &PatientDraft,
        refresh: &PatientRefresh,
    ) -> StoreResult<Upserted<Patient>> {
        let mut t = self.tables.write().map_err(poison_err)?;
        let existing = t
            .patients
            .values_mut()
            .find(|p| p.protocol_no == draft.protocol_no && p.service_id == draft.service_id);
        if let Some(p) = existing {
            p.full_name = refresh.full_name.clone();
            p.sequence_no = refresh.sequence_no;
            p.priority_reason = refresh.priority_reason.clone();
            p.updated_at = Utc::now();
            return Ok(Upserted {
                row: p.clone(),
                created: false,
            });
        }
        Ok(Upserted {
            row: t.insert_patient(draft),
            created: true,
        })
    }

    async fn find_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
    ) -> StoreResult<Option<QueueEntry>> {
        let t = self.tables.read().map_err(poison_err)?;
        Ok(t
            .entries
            .values()
            .find(|e| e.patient_id == patient_id && e.service_id == service_id)
            .cloned())
    }

    async fn upsert_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
        draft: &QueueEntryDraft,
        patch: &QueuePatch,
    ) -> StoreResult<Upserted<QueueEntry>> {
        if self.entry_fault_due() {
            return Err(StoreError::Backend(anyhow!("injected queue_entries write failure")));
        }
        let mut t = self.tables.write().map_err(poison_err)?;
        if !t.patients.contains_key(&patient_id) {
            return Err(StoreError::Missing(format!("patient {patient_id}")));
        }
        if !t.services.contains_key(&service_id) {
            return Err(StoreError::Missing(format!("service {service_id}")));
        }

        let now = Utc::now();
        let existing = t
            .entries
            .values_mut()
            .find(|e| e.patient_id == patient_id && e.service_id == service_id);
        if let Some(e) = existing {
            patch.apply_to(e, now);
            return Ok(Upserted {
                row: e.clone(),
                created: false,
            });
        }

        t.next_entry_id += 1;
        let entry = QueueEntry {
            id: t.next_entry_id,
            patient_id,
            service_id,
            status: draft.status,
            triage_id: draft.triage_id.clone(),
            triage_name: draft.triage_name.clone(),
            announced_queue_size: draft.announced_queue_size,
            average_exam_minutes: draft.average_exam_minutes,
            has_appointment: draft.has_appointment,
            appointment_at: draft.appointment_at,
            appointment_time: draft.appointment_time.clone(),
            appointment_type: draft.appointment_type.clone(),
            masked: draft.masked,
            created_at: now,
            updated_at: now,
            called_at: None,
            called_by: None,
        };
        t.entries.insert(entry.id, entry.clone());
        Ok(Upserted {
            row: entry,
            created: true,
        })
    }

    async fn update_queue_entry(
        &self,
        id: QueueEntryId,
        patch: &QueuePatch,
    ) -> StoreResult<QueueEntry> {
        let mut t = self.tables.write().map_err(poison_err)?;
        let e = t
            .entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("queue entry {id}")))?;
        patch.apply_to(e, Utc::now());
        Ok(e.clone())
    }

    async fn service_entries(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Vec<(QueueEntry, Patient)>> {
        let t = self.tables.read().map_err(poison_err)?;
        let mut out = Vec::new();
        for e in t.entries.values().filter(|e| e.service_id == service_id) {
            let p = t
                .patients
                .get(&e.patient_id)
                .ok_or_else(|| StoreError::Missing(format!("patient {}", e.patient_id)))?;
            out.push((e.clone(), p.clone()));
        }
        Ok(out)
    }

    async fn patient_entries(&self, patient_id: PatientId) -> StoreResult<Vec<QueueEntry>> {
        let t = self.tables.read().map_err(poison_err)?;
        Ok(t.entries
            .values()
            .filter(|e| e.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().map_err(poison_err)?;
        Ok(t.users.get(username).cloned())
    }
}
