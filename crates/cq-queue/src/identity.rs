//! Identity resolution: map an inbound payload onto canonical Service and
//! Patient rows.

use cq_schemas::{IdentityStrategy, Patient, PatientDraft, PatientRefresh, Service, ServiceId};
use tracing::debug;

use crate::error::{QueueError, Result, StoreError};
use crate::payload::{ListedPatient, SYNC_SOURCE_IP};
use crate::store::{PatientLookup, QueueStore, Upserted};

/// Build the lookup key for `strategy`.
///
/// `ProtocolOrSequence` also matches on the sequence number, so two
/// different patients sharing a sequence number resolve to the same row.
pub fn lookup_for(
    strategy: IdentityStrategy,
    protocol_no: &str,
    sequence_no: Option<i32>,
    service_id: ServiceId,
) -> PatientLookup {
    match (strategy, sequence_no) {
        (IdentityStrategy::ProtocolOrSequence, Some(sequence_no)) => {
            PatientLookup::ProtocolOrSequence {
                protocol_no: protocol_no.to_string(),
                sequence_no,
            }
        }
        (IdentityStrategy::ProtocolInService, _) => PatientLookup::ProtocolInService {
            protocol_no: protocol_no.to_string(),
            service_id,
        },
        _ => PatientLookup::Protocol {
            protocol_no: protocol_no.to_string(),
        },
    }
}

pub struct IdentityResolver<'a> {
    store: &'a dyn QueueStore,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn QueueStore) -> Self {
        Self { store }
    }

    /// Ensure the service row exists with `name` as its current name.
    pub async fn service(&self, id: ServiceId, name: &str) -> Result<Service> {
        Ok(self.store.upsert_service(id, name).await?)
    }

    /// Add-patient path: find by `strategy`, then overwrite or create.
    pub async fn admit(
        &self,
        strategy: IdentityStrategy,
        draft: &PatientDraft,
    ) -> Result<Upserted<Patient>> {
        let lookup = lookup_for(
            strategy,
            &draft.protocol_no,
            Some(draft.sequence_no),
            draft.service_id,
        );
        match self.store.find_patient(&lookup).await? {
            Some(existing) => {
                debug!(patient_id = existing.id, ?lookup, "admission matched existing patient");
                // A key clash on update is another row already holding
                // (protocol_no, service_id); retrying cannot resolve it.
                let row = match self.store.update_patient(existing.id, draft).await {
                    Ok(row) => row,
                    Err(StoreError::Conflict(_)) => {
                        return Err(QueueError::validation(format!(
                            "protokolNo {} is already registered in servisID {} by another patient",
                            draft.protocol_no, draft.service_id
                        )))
                    }
                    Err(e) => return Err(e.into()),
                };
                Ok(Upserted {
                    row,
                    created: false,
                })
            }
            None => {
                let row = self.store.create_patient(draft).await?;
                Ok(Upserted { row, created: true })
            }
        }
    }

    /// Queue-list path: upsert keyed by `(protocol_no, service_id)`.
    pub async fn listed(&self, service: &Service, p: &ListedPatient) -> Result<Upserted<Patient>> {
        let draft = PatientDraft {
            full_name: p.full_name.clone(),
            sequence_no: p.sequence_no,
            protocol_no: p.protocol_no.clone(),
            service_id: service.id,
            service_name: service.name.clone(),
            ip_address: Some(SYNC_SOURCE_IP.to_string()),
            priority_reason: p.priority_reason.clone(),
        };
        let refresh = PatientRefresh {
            full_name: p.full_name.clone(),
            sequence_no: p.sequence_no,
            priority_reason: p.priority_reason.clone(),
        };
        Ok(self.store.upsert_patient_in_service(&draft, &refresh).await?)
    }

    /// Call path: find only, never create.
    pub async fn find(
        &self,
        strategy: IdentityStrategy,
        protocol_no: &str,
        service_id: ServiceId,
    ) -> Result<Option<Patient>> {
        let lookup = lookup_for(strategy, protocol_no, None, service_id);
        Ok(self.store.find_patient(&lookup).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_or_sequence_without_sequence_degrades_to_protocol() {
        assert_eq!(
            lookup_for(IdentityStrategy::ProtocolOrSequence, "P1", None, 1),
            PatientLookup::Protocol {
                protocol_no: "P1".into()
            }
        );
    }

    #[test]
    fn protocol_in_service_carries_service_id() {
        assert_eq!(
            lookup_for(IdentityStrategy::ProtocolInService, "P1", Some(4), 3474),
            PatientLookup::ProtocolInService {
                protocol_no: "P1".into(),
                service_id: 3474
            }
        );
    }
}
