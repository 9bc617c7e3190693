//! Loose request payloads and their validation into typed commands.
//!
//! The hospital system sends numbers as JSON numbers or numeric strings and
//! omits optional fields freely, so every inbound field is read from a
//! `serde_json::Value` and converted here. Validation order matches the order
//! in which errors are reported to callers: missing fields first, then
//! numeric conversion.

use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use cq_schemas::{PatientDraft, ServiceId};
use serde_json::Value;

use crate::error::{QueueError, Result};

pub const ADMISSION_KEY: &str = "hastaEkle";
pub const CALL_KEY: &str = "hastaBilgisi";
pub const SYNC_KEY: &str = "listeGuncelle";

/// IP recorded for patients created by a queue-list sync.
pub const SYNC_SOURCE_IP: &str = "0.0.0.0";

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

/// Absent, `null` and `""` all count as missing.
fn is_missing(obj: &Value, key: &str) -> bool {
    match obj.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn missing_fields(obj: &Value, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|k| is_missing(obj, k))
        .collect()
}

fn require(obj: &Value, required: &[&'static str]) -> Result<()> {
    let missing = missing_fields(obj, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(QueueError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Integer from a JSON number or a numeric string. Fractions and trailing
/// garbage are rejected.
pub fn parse_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn int_field<T: TryFrom<i64>>(obj: &Value, key: &str) -> Result<T> {
    obj.get(key)
        .and_then(parse_int)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| QueueError::validation(format!("Invalid {key}: must be a number")))
}

/// Optional integer: missing is `None`, present but malformed is an error.
fn opt_int_field<T: TryFrom<i64>>(obj: &Value, key: &str) -> Result<Option<T>> {
    if is_missing(obj, key) {
        return Ok(None);
    }
    int_field(obj, key).map(Some)
}

/// Text from a string or number; missing and blank are `None`.
fn text_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Required text: a string or number. Anything else is rejected rather than
/// stored as an empty value.
fn required_text(obj: &Value, key: &str) -> Result<String> {
    text_field(obj, key).ok_or_else(|| QueueError::validation(format!("Invalid {key}")))
}

/// Wire flags are the string `"1"`; `1` and `true` are accepted too.
fn flag_field(obj: &Value, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim() == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// RFC 3339, or a naive date-time / date read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Take the object stored under `key`, or explain why it is unusable.
pub fn section<'a>(record: &'a Value, key: &str) -> Result<&'a Value> {
    match record.get(key) {
        Some(v @ Value::Object(_)) => Ok(v),
        _ => Err(QueueError::validation(format!("No {key} data found"))),
    }
}

/// Split a request body into records: an array is a batch, anything else is
/// a batch of one. An empty array is rejected.
pub fn records(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) if items.is_empty() => Err(QueueError::validation(
            "Request body array cannot be empty",
        )),
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

// ---------------------------------------------------------------------------
// Add patient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Appointment {
    pub at: Option<DateTime<Utc>>,
    pub time: Option<String>,
    pub kind: Option<String>,
}

/// A validated `hastaEkle` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub patient: PatientDraft,
    pub appointment: Appointment,
}

impl Admission {
    pub fn from_value(v: &Value) -> Result<Self> {
        require(
            v,
            &["adiSoyadi", "siraNo", "protokolNo", "servisID", "servisAdi"],
        )?;
        let service_id: ServiceId = int_field(v, "servisID")?;
        let sequence_no: i32 = int_field(v, "siraNo")?;

        let ip_address = text_field(v, "ipAdres");
        if let Some(ip) = &ip_address {
            if ip.trim().parse::<IpAddr>().is_err() {
                return Err(QueueError::validation(format!("Invalid ipAdres: {ip}")));
            }
        }

        let at = match text_field(v, "randevuTarihi") {
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                QueueError::validation(format!("Invalid randevuTarihi: {raw}"))
            })?),
            None => None,
        };

        Ok(Admission {
            patient: PatientDraft {
                full_name: required_text(v, "adiSoyadi")?,
                sequence_no,
                protocol_no: required_text(v, "protokolNo")?,
                service_id,
                service_name: required_text(v, "servisAdi")?,
                ip_address,
                priority_reason: text_field(v, "oncelikNedeni"),
            },
            appointment: Appointment {
                at,
                time: text_field(v, "randevuSaati"),
                kind: text_field(v, "randevuTuru"),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Call patient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    NewCall,
    CancelCall,
}

impl CallType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "NewCall" | "YeniCagri" => Some(CallType::NewCall),
            "CancelCall" | "IptalCagri" => Some(CallType::CancelCall),
            _ => None,
        }
    }
}

/// A `hastaBilgisi` block with required fields present and `servisID`
/// numeric. The call type is kept raw: it is checked only after the patient
/// and queue entry have been found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub protocol_no: String,
    pub service_id: ServiceId,
    pub call_type: String,
    pub caller: String,
}

impl CallRequest {
    pub fn from_value(v: &Value) -> Result<Self> {
        require(v, &["protokolNo", "servisID", "cagriTipi", "kullaniciAdi"])?;
        let service_id: ServiceId = int_field(v, "servisID")
            .map_err(|_| QueueError::validation("Invalid servisID"))?;
        Ok(CallRequest {
            protocol_no: required_text(v, "protokolNo")?,
            service_id,
            call_type: required_text(v, "cagriTipi")?,
            caller: required_text(v, "kullaniciAdi")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Queue-list sync
// ---------------------------------------------------------------------------

/// Service-level fields of a list update, merged into every touched entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceProjection {
    pub triage_id: Option<String>,
    pub triage_name: Option<String>,
    pub average_exam_minutes: Option<i32>,
    pub announced_queue_size: i32,
}

/// One element of `siradakiHastalar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPatient {
    pub protocol_no: String,
    pub full_name: String,
    pub sequence_no: i32,
    pub priority_reason: Option<String>,
    pub has_appointment: bool,
    pub appointment_time: Option<String>,
    pub appointment_type: Option<String>,
    pub masked: bool,
}

impl ListedPatient {
    pub fn from_value(v: &Value) -> Result<Self> {
        if !v.is_object() {
            return Err(QueueError::validation("patient entry must be an object"));
        }
        require(v, &["protokolNo", "adiSoyadi", "siraNo"])?;
        Ok(ListedPatient {
            protocol_no: required_text(v, "protokolNo")?,
            full_name: required_text(v, "adiSoyadi")?,
            sequence_no: int_field(v, "siraNo")?,
            priority_reason: text_field(v, "oncelikNedeni"),
            has_appointment: flag_field(v, "randevuVar"),
            appointment_time: text_field(v, "randevuSaati"),
            appointment_type: text_field(v, "randevuTuru"),
            masked: flag_field(v, "maskeleme"),
        })
    }
}

/// A validated `listeGuncelle` block. Patients are kept raw so each can be
/// validated, and rejected, on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceListUpdate {
    pub service_id: ServiceId,
    pub service_name: String,
    pub projection: ServiceProjection,
    pub announced_raw: Value,
    pub patients: Vec<Value>,
    pub unregistered: Value,
}

impl ServiceListUpdate {
    pub fn from_value(v: &Value) -> Result<Self> {
        require(v, &["servisID", "servisAdi"])?;
        let service_id: ServiceId = int_field(v, "servisID")?;
        let patients = match v.get("siradakiHastalar") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(QueueError::validation(
                    "Invalid siradakiHastalar: must be an array",
                ))
            }
        };
        Ok(ServiceListUpdate {
            service_id,
            service_name: required_text(v, "servisAdi")?,
            projection: ServiceProjection {
                triage_id: text_field(v, "triajID"),
                triage_name: text_field(v, "triajAdi"),
                average_exam_minutes: opt_int_field(v, "ortalamaMuayeneSuresi")?,
                announced_queue_size: opt_int_field(v, "siradakiHastaSayisi")?.unwrap_or(0),
            },
            announced_raw: v.get("siradakiHastaSayisi").cloned().unwrap_or(Value::Null),
            patients,
            unregistered: match v.get("kayitsizHastalar") {
                Some(arr @ Value::Array(_)) => arr.clone(),
                _ => Value::Array(Vec::new()),
            },
        })
    }
}
