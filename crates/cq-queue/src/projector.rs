//! Waiting-list projection for a service.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use cq_schemas::{NullsPolicy, Patient, PatientId, QueueEntry, QueueStatus, ServiceId};
use serde::Serialize;
use tracing::warn;

use crate::error::{QueueError, Result};
use crate::store::QueueStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingPatient {
    pub id: PatientId,
    #[serde(rename = "adiSoyadi")]
    pub full_name: String,
    #[serde(rename = "siraNo")]
    pub sequence_no: i32,
    #[serde(rename = "protokolNo")]
    pub protocol_no: String,
    #[serde(rename = "oncelikNedeni")]
    pub priority_reason: Option<String>,
    #[serde(rename = "randevuVar")]
    pub has_appointment: &'static str,
    #[serde(rename = "randevuTarihi")]
    pub appointment_at: Option<String>,
    #[serde(rename = "randevuSaati")]
    pub appointment_time: Option<String>,
    #[serde(rename = "randevuTuru")]
    pub appointment_type: Option<String>,
    #[serde(rename = "maskeleme")]
    pub masked: &'static str,
    #[serde(rename = "beklemeBaslangic")]
    pub waiting_since: String,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingList {
    #[serde(rename = "servisID")]
    pub service_id: ServiceId,
    #[serde(rename = "servisAdi")]
    pub service_name: String,
    /// Number of rows in `patients`, not the announced size.
    #[serde(rename = "siradakiHastaSayisi")]
    pub count: usize,
    #[serde(rename = "siradakiHastalar")]
    pub patients: Vec<WaitingPatient>,
}

fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn cmp_appointment(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
    nulls: NullsPolicy,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => match nulls {
            NullsPolicy::First => Ordering::Less,
            NullsPolicy::Last => Ordering::Greater,
        },
        (Some(_), None) => match nulls {
            NullsPolicy::First => Ordering::Greater,
            NullsPolicy::Last => Ordering::Less,
        },
    }
}

/// Sort by appointment time (nulls placed per `nulls`), then entry creation
/// time, then entry id. All statuses are kept.
pub fn order_entries(rows: &mut [(QueueEntry, Patient)], nulls: NullsPolicy) {
    rows.sort_by(|(a, _), (b, _)| {
        cmp_appointment(a.appointment_at, b.appointment_at, nulls)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl WaitingPatient {
    fn project(entry: &QueueEntry, patient: &Patient) -> Self {
        WaitingPatient {
            id: patient.id,
            full_name: patient.full_name.clone(),
            sequence_no: patient.sequence_no,
            protocol_no: patient.protocol_no.clone(),
            priority_reason: patient.priority_reason.clone(),
            has_appointment: flag(entry.has_appointment),
            appointment_at: entry.appointment_at.map(iso_millis),
            appointment_time: entry.appointment_time.clone(),
            appointment_type: entry.appointment_type.clone(),
            masked: flag(entry.masked),
            waiting_since: iso_millis(entry.created_at),
            status: entry.status,
        }
    }
}

/// Build the waiting list for the service named by `raw_id`.
pub async fn waiting_list(
    store: &dyn QueueStore,
    raw_id: &str,
    nulls: NullsPolicy,
) -> Result<WaitingList> {
    let service_id: ServiceId = raw_id.trim().parse().map_err(|_| {
        warn!(servis_id = raw_id, "invalid service id");
        QueueError::validation("Invalid servisID")
    })?;

    let service = store.find_service(service_id).await?.ok_or_else(|| {
        warn!(servis_id = service_id, "service not found");
        QueueError::not_found("Service not found")
    })?;

    let mut rows = store.service_entries(service_id).await?;
    order_entries(&mut rows, nulls);

    let patients: Vec<WaitingPatient> = rows
        .iter()
        .map(|(e, p)| WaitingPatient::project(e, p))
        .collect();
    Ok(WaitingList {
        service_id: service.id,
        service_name: service.name,
        count: patients.len(),
        patients,
    })
}
