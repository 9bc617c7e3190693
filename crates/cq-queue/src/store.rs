//! Persistence port.
//!
//! The engine talks to the relational store only through [`QueueStore`]. The
//! Postgres implementation lives in `cq-db`; [`crate::memory`] holds the
//! in-process one used by tests. A store is built once at start-up and shared
//! by reference (`Arc<dyn QueueStore>`).

use async_trait::async_trait;
use cq_schemas::{
    Patient, PatientDraft, PatientId, PatientRefresh, QueueEntry, QueueEntryDraft, QueueEntryId,
    QueuePatch, Service, ServiceId, User,
};

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key used to find an existing patient row.
///
/// Lookups that can match several rows return the one with the lowest id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientLookup {
    ProtocolOrSequence {
        protocol_no: String,
        sequence_no: i32,
    },
    ProtocolInService {
        protocol_no: String,
        service_id: ServiceId,
    },
    Protocol {
        protocol_no: String,
    },
}

impl PatientLookup {
    pub fn matches(&self, p: &Patient) -> bool {
        match self {
            PatientLookup::ProtocolOrSequence {
                protocol_no,
                sequence_no,
            } => p.protocol_no == *protocol_no || p.sequence_no == *sequence_no,
            PatientLookup::ProtocolInService {
                protocol_no,
                service_id,
            } => p.protocol_no == *protocol_no && p.service_id == *service_id,
            PatientLookup::Protocol { protocol_no } => p.protocol_no == *protocol_no,
        }
    }
}

/// Whether an upsert created a new row or updated an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub row: T,
    pub created: bool,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert the service or overwrite its name.
    async fn upsert_service(&self, id: ServiceId, name: &str) -> StoreResult<Service>;

    async fn find_service(&self, id: ServiceId) -> StoreResult<Option<Service>>;

    async fn find_patient(&self, lookup: &PatientLookup) -> StoreResult<Option<Patient>>;

    async fn patient_by_id(&self, id: PatientId) -> StoreResult<Option<Patient>>;

    /// All patients, newest first.
    async fn list_patients(&self) -> StoreResult<Vec<Patient>>;

    /// Plain insert. A clash on `(protocol_no, service_id)` is
    /// [`StoreError::Conflict`].
    async fn create_patient(&self, draft: &PatientDraft) -> StoreResult<Patient>;

    /// Overwrite every mutable column of an existing patient.
    async fn update_patient(&self, id: PatientId, draft: &PatientDraft) -> StoreResult<Patient>;

    /// Upsert keyed by `(draft.protocol_no, draft.service_id)`: insert
    /// `draft`, or apply `refresh` to the existing row.
    async fn upsert_patient_in_service(
        &self,
        draft: &PatientDraft,
        refresh: &PatientRefresh,
    ) -> StoreResult<Upserted<Patient>>;

    async fn find_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
    ) -> StoreResult<Option<QueueEntry>>;

    /// Upsert keyed by `(patient_id, service_id)`: insert `draft`, or apply
    /// `patch` to the existing row.
    async fn upsert_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
        draft: &QueueEntryDraft,
        patch: &QueuePatch,
    ) -> StoreResult<Upserted<QueueEntry>>;

    async fn update_queue_entry(
        &self,
        id: QueueEntryId,
        patch: &QueuePatch,
    ) -> StoreResult<QueueEntry>;

    /// Every entry of a service joined with its patient, in no particular
    /// order.
    async fn service_entries(&self, service_id: ServiceId)
        -> StoreResult<Vec<(QueueEntry, Patient)>>;

    async fn patient_entries(&self, patient_id: PatientId) -> StoreResult<Vec<QueueEntry>>;

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>>;
}
