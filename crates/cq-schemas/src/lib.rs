//! Row types shared by the queue engine, the Postgres store and the daemon.
//!
//! Field names on the wire follow the hospital information system's payloads
//! (`adiSoyadi`, `protokolNo`, ...), so every struct carries explicit serde
//! renames. No IO and no business logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally assigned service (polyclinic) identifier.
pub type ServiceId = i32;
/// Internal surrogate key of a patient row.
pub type PatientId = i64;
/// Internal surrogate key of a queue entry row.
pub type QueueEntryId = i64;

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue entry.
///
/// `Completed` and `Cancelled` are part of the stored enumeration but no code
/// path in this workspace assigns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Called,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "WAITING",
            QueueStatus::Called => "CALLED",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse a stored status value.
    ///
    /// Matching is case-insensitive so rows written with the legacy lowercase
    /// `waiting` sentinel read back as [`QueueStatus::Waiting`].
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Some(QueueStatus::Waiting),
            "CALLED" => Some(QueueStatus::Called),
            "COMPLETED" => Some(QueueStatus::Completed),
            "CANCELLED" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    #[serde(rename = "servisAdi")]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Patient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    #[serde(rename = "adiSoyadi")]
    pub full_name: String,
    #[serde(rename = "siraNo")]
    pub sequence_no: i32,
    #[serde(rename = "protokolNo")]
    pub protocol_no: String,
    #[serde(rename = "servisID")]
    pub service_id: ServiceId,
    /// Denormalized copy of the service name at the last write.
    #[serde(rename = "servisAdi")]
    pub service_name: String,
    #[serde(rename = "ipAdres")]
    pub ip_address: Option<String>,
    #[serde(rename = "oncelikNedeni")]
    pub priority_reason: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Every mutable patient column, used for creates and full overwrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDraft {
    pub full_name: String,
    pub sequence_no: i32,
    pub protocol_no: String,
    pub service_id: ServiceId,
    pub service_name: String,
    pub ip_address: Option<String>,
    pub priority_reason: Option<String>,
}

/// Columns a queue-list sync is allowed to overwrite on an existing patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRefresh {
    pub full_name: String,
    pub sequence_no: i32,
    pub priority_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    #[serde(rename = "patientId")]
    pub patient_id: PatientId,
    #[serde(rename = "serviceId")]
    pub service_id: ServiceId,
    pub status: QueueStatus,
    #[serde(rename = "triajID")]
    pub triage_id: Option<String>,
    #[serde(rename = "triajAdi")]
    pub triage_name: Option<String>,
    /// Queue length as last announced by the hospital system.
    #[serde(rename = "siradakiHastaSayisi")]
    pub announced_queue_size: i32,
    #[serde(rename = "ortalamaMuayeneSuresi")]
    pub average_exam_minutes: Option<i32>,
    #[serde(rename = "randevuVar")]
    pub has_appointment: bool,
    #[serde(rename = "randevuTarihi")]
    pub appointment_at: Option<DateTime<Utc>>,
    #[serde(rename = "randevuSaati")]
    pub appointment_time: Option<String>,
    #[serde(rename = "randevuTuru")]
    pub appointment_type: Option<String>,
    #[serde(rename = "maskeleme")]
    pub masked: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "calledAt")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(rename = "calledBy")]
    pub called_by: Option<String>,
}

/// Column values for a brand-new queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntryDraft {
    pub status: QueueStatus,
    pub triage_id: Option<String>,
    pub triage_name: Option<String>,
    pub announced_queue_size: i32,
    pub average_exam_minutes: Option<i32>,
    pub has_appointment: bool,
    pub appointment_at: Option<DateTime<Utc>>,
    pub appointment_time: Option<String>,
    pub appointment_type: Option<String>,
    pub masked: bool,
}

/// Partial update of a queue entry.
///
/// `None` leaves the column untouched; `Some(None)` on a nullable column
/// writes NULL. Applying any patch bumps `updated_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueuePatch {
    pub status: Option<QueueStatus>,
    pub triage_id: Option<Option<String>>,
    pub triage_name: Option<Option<String>>,
    pub announced_queue_size: Option<i32>,
    pub average_exam_minutes: Option<Option<i32>>,
    pub has_appointment: Option<bool>,
    pub appointment_at: Option<Option<DateTime<Utc>>>,
    pub appointment_time: Option<Option<String>>,
    pub appointment_type: Option<Option<String>>,
    pub masked: Option<bool>,
    pub called_at: Option<Option<DateTime<Utc>>>,
    pub called_by: Option<Option<String>>,
}

impl QueuePatch {
    /// Apply this patch to an in-memory row.
    pub fn apply_to(&self, entry: &mut QueueEntry, now: DateTime<Utc>) {
        if let Some(s) = self.status {
            entry.status = s;
        }
        if let Some(v) = &self.triage_id {
            entry.triage_id = v.clone();
        }
        if let Some(v) = &self.triage_name {
            entry.triage_name = v.clone();
        }
        if let Some(v) = self.announced_queue_size {
            entry.announced_queue_size = v;
        }
        if let Some(v) = self.average_exam_minutes {
            entry.average_exam_minutes = v;
        }
        if let Some(v) = self.has_appointment {
            entry.has_appointment = v;
        }
        if let Some(v) = self.appointment_at {
            entry.appointment_at = v;
        }
        if let Some(v) = &self.appointment_time {
            entry.appointment_time = v.clone();
        }
        if let Some(v) = &self.appointment_type {
            entry.appointment_type = v.clone();
        }
        if let Some(v) = self.masked {
            entry.masked = v;
        }
        if let Some(v) = self.called_at {
            entry.called_at = v;
        }
        if let Some(v) = &self.called_by {
            entry.called_by = v.clone();
        }
        entry.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// Engine policies (selected in config)
// ---------------------------------------------------------------------------

/// How an incoming payload is matched against existing patient rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Protocol number OR sequence number, lowest patient id wins.
    ProtocolOrSequence,
    /// Protocol number AND service id.
    ProtocolInService,
    /// Protocol number alone, lowest patient id wins.
    ProtocolOnly,
}

/// Where entries without an appointment time sort in the waiting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullsPolicy {
    First,
    #[default]
    Last,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Pre-provisioned credential row. The secret is stored and compared in
/// plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_parse_accepts_legacy_lowercase_waiting() {
        assert_eq!(QueueStatus::parse("waiting"), Some(QueueStatus::Waiting));
        assert_eq!(QueueStatus::parse("WAITING"), Some(QueueStatus::Waiting));
        assert_eq!(QueueStatus::parse("Called"), Some(QueueStatus::Called));
        assert_eq!(QueueStatus::parse("DONE"), None);
    }

    #[test]
    fn status_serializes_uppercase() {
        let v = serde_json::to_value(QueueStatus::Cancelled).unwrap();
        assert_eq!(v, serde_json::json!("CANCELLED"));
    }

    #[test]
    fn patch_clears_nullable_columns_and_bumps_updated_at() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let mut entry = QueueEntry {
            id: 1,
            patient_id: 1,
            service_id: 3474,
            status: QueueStatus::Called,
            triage_id: Some("1".into()),
            triage_name: None,
            announced_queue_size: 0,
            average_exam_minutes: None,
            has_appointment: false,
            appointment_at: None,
            appointment_time: None,
            appointment_type: None,
            masked: false,
            created_at: t0,
            updated_at: t0,
            called_at: Some(t0),
            called_by: Some("kiosk".into()),
        };

        let patch = QueuePatch {
            status: Some(QueueStatus::Waiting),
            called_at: Some(None),
            called_by: Some(None),
            ..QueuePatch::default()
        };
        patch.apply_to(&mut entry, t1);

        assert_eq!(entry.status, QueueStatus::Waiting);
        assert!(entry.called_at.is_none());
        assert!(entry.called_by.is_none());
        assert_eq!(entry.triage_id.as_deref(), Some("1"), "untouched column kept");
        assert_eq!(entry.updated_at, t1);
    }

    #[test]
    fn user_debug_redacts_secret() {
        let u = User {
            username: "kiosk".into(),
            secret: "hunter2".into(),
        };
        let dbg = format!("{u:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
