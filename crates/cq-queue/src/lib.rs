//! Queue reconciliation engine.
//!
//! Maps loosely structured add-patient, call-patient and queue-list payloads
//! onto Service, Patient and QueueEntry rows, and projects the ordered
//! waiting list for a service.
//!
//! - [`identity`]: find or create canonical Service and Patient rows.
//! - [`reconciler`]: [`QueueEngine`], the WAITING/CALLED state machine and
//!   batch handling.
//! - [`projector`]: waiting-list ordering and wire format.
//! - [`gate`]: body-carried credential check.
//! - [`store`]: the persistence port; [`memory`] is an in-process adapter.
//!
//! Pure with respect to IO except through [`QueueStore`].

use cq_schemas::{IdentityStrategy, NullsPolicy};

pub mod batch;
pub mod error;
pub mod gate;
pub mod identity;
pub mod memory;
pub mod payload;
pub mod projector;
pub mod reconciler;
pub mod store;

pub use batch::{BatchReport, RecordResult};
pub use error::{QueueError, Result, StoreError};
pub use gate::{authenticate, extract_credentials, Credentials};
pub use memory::InMemoryQueueStore;
pub use payload::{CallType, ServiceProjection};
pub use projector::{order_entries, waiting_list, WaitingList, WaitingPatient};
pub use reconciler::{PatientWithEntries, QueueEngine, SyncSummary};
pub use store::{PatientLookup, QueueStore, StoreResult, Upserted};

/// Engine policies chosen at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub admission_identity: IdentityStrategy,
    pub call_identity: IdentityStrategy,
    pub waiting_list_nulls: NullsPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            admission_identity: IdentityStrategy::ProtocolOrSequence,
            call_identity: IdentityStrategy::ProtocolOnly,
            waiting_list_nulls: NullsPolicy::Last,
        }
    }
}

impl QueueEngine {
    /// Waiting list for `raw_id` using the configured null policy.
    pub async fn waiting_list(&self, raw_id: &str) -> Result<WaitingList> {
        projector::waiting_list(self.store().as_ref(), raw_id, self.settings().waiting_list_nulls)
            .await
    }

    /// Authenticate a mutation body against this engine's store.
    pub async fn authenticate(&self, body: &serde_json::Value) -> Result<cq_schemas::User> {
        gate::authenticate(self.store().as_ref(), body).await
    }
}
