//! Postgres implementation of [`QueueStore`].

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use cq_queue::{PatientLookup, QueueStore, StoreError, StoreResult, Upserted};
use cq_schemas::{
    Patient, PatientDraft, PatientId, PatientRefresh, QueueEntry, QueueEntryDraft, QueueEntryId,
    QueuePatch, QueueStatus, Service, ServiceId, User,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::is_unique_violation;

const PATIENT_COLS: &str = r#"
    p.id as p_id, p.full_name as p_full_name, p.sequence_no as p_sequence_no,
    p.protocol_no as p_protocol_no, p.service_id as p_service_id,
    p.service_name as p_service_name, p.ip_address as p_ip_address,
    p.priority_reason as p_priority_reason, p.created_at as p_created_at,
    p.updated_at as p_updated_at
"#;

const ENTRY_COLS: &str = r#"
    e.id as e_id, e.patient_id as e_patient_id, e.service_id as e_service_id,
    e.status as e_status, e.triage_id as e_triage_id, e.triage_name as e_triage_name,
    e.announced_queue_size as e_announced_queue_size,
    e.average_exam_minutes as e_average_exam_minutes,
    e.has_appointment as e_has_appointment, e.appointment_at as e_appointment_at,
    e.appointment_time as e_appointment_time, e.appointment_type as e_appointment_type,
    e.masked as e_masked, e.created_at as e_created_at, e.updated_at as e_updated_at,
    e.called_at as e_called_at, e.called_by as e_called_by
"#;

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_patient(&self, id: PatientId) -> StoreResult<Option<Patient>> {
        let sql = format!("select {PATIENT_COLS} from patients p where p.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "fetch patient"))?;
        row.map(|r| patient_from_row(&r)).transpose()
    }

    async fn fetch_entries(
        &self,
        filter: &str,
        id: i64,
    ) -> StoreResult<Vec<QueueEntry>> {
        let sql = format!("select {ENTRY_COLS} from queue_entries e where {filter} = $1");
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(e, "fetch queue entries"))?;
        rows.iter().map(entry_from_row).collect()
    }
}

/// Unique violations become [`StoreError::Conflict`]; everything else is a
/// backend failure with `what` as context.
fn db_err(e: sqlx::Error, what: &str) -> StoreError {
    if is_unique_violation(&e) {
        return StoreError::Conflict(format!("{what}: {e}"));
    }
    match e {
        sqlx::Error::RowNotFound => StoreError::Missing(what.to_string()),
        other => StoreError::Backend(anyhow::Error::new(other).context(what.to_string())),
    }
}

fn patient_from_row(r: &PgRow) -> StoreResult<Patient> {
    let decode = || -> Result<Patient, sqlx::Error> {
        Ok(Patient {
            id: r.try_get("p_id")?,
            full_name: r.try_get("p_full_name")?,
            sequence_no: r.try_get("p_sequence_no")?,
            protocol_no: r.try_get("p_protocol_no")?,
            service_id: r.try_get("p_service_id")?,
            service_name: r.try_get("p_service_name")?,
            ip_address: r.try_get("p_ip_address")?,
            priority_reason: r.try_get("p_priority_reason")?,
            created_at: r.try_get("p_created_at")?,
            updated_at: r.try_get("p_updated_at")?,
        })
    };
    decode()
        .context("decode patients row")
        .map_err(StoreError::Backend)
}

fn entry_from_row(r: &PgRow) -> StoreResult<QueueEntry> {
    let status_raw: String = r
        .try_get("e_status")
        .context("queue_entries.status")?;
    let status = QueueStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("invalid queue_entries.status: {status_raw}"))?;

    let decode = || -> Result<QueueEntry, sqlx::Error> {
        Ok(QueueEntry {
            id: r.try_get("e_id")?,
            patient_id: r.try_get("e_patient_id")?,
            service_id: r.try_get("e_service_id")?,
            status,
            triage_id: r.try_get("e_triage_id")?,
            triage_name: r.try_get("e_triage_name")?,
            announced_queue_size: r.try_get("e_announced_queue_size")?,
            average_exam_minutes: r.try_get("e_average_exam_minutes")?,
            has_appointment: r.try_get("e_has_appointment")?,
            appointment_at: r.try_get("e_appointment_at")?,
            appointment_time: r.try_get("e_appointment_time")?,
            appointment_type: r.try_get("e_appointment_type")?,
            masked: r.try_get("e_masked")?,
            created_at: r.try_get("e_created_at")?,
            updated_at: r.try_get("e_updated_at")?,
            called_at: r.try_get("e_called_at")?,
            called_by: r.try_get("e_called_by")?,
        })
    };
    decode()
        .context("decode queue_entries row")
        .map_err(StoreError::Backend)
}

/// `set` clause for a patch. `updated_at` is always bumped.
fn push_patch(qb: &mut QueryBuilder<'_, Postgres>, patch: &QueuePatch) {
    let mut set = qb.separated(", ");
    set.push("updated_at = clock_timestamp()");
    if let Some(s) = patch.status {
        set.push("status = ").push_bind_unseparated(s.as_str());
    }
    if let Some(v) = &patch.triage_id {
        set.push("triage_id = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = &patch.triage_name {
        set.push("triage_name = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = patch.announced_queue_size {
        set.push("announced_queue_size = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.average_exam_minutes {
        set.push("average_exam_minutes = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.has_appointment {
        set.push("has_appointment = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.appointment_at {
        set.push("appointment_at = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.appointment_time {
        set.push("appointment_time = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = &patch.appointment_type {
        set.push("appointment_type = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = patch.masked {
        set.push("masked = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.called_at {
        set.push("called_at = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.called_by {
        set.push("called_by = ").push_bind_unseparated(v.clone());
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn upsert_service(&self, id: ServiceId, name: &str) -> StoreResult<Service> {
        let row = sqlx::query(
            r#"
            insert into services (id, name) values ($1, $2)
            on conflict (id) do update set name = excluded.name, updated_at = now()
            returning id, name
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(e, "upsert service"))?;

        Ok(Service {
            id: row.try_get("id").context("services.id")?,
            name: row.try_get("name").context("services.name")?,
        })
    }

    async fn find_service(&self, id: ServiceId) -> StoreResult<Option<Service>> {
        let row = sqlx::query("select id, name from services where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "find service"))?;
        match row {
            Some(r) => Ok(Some(Service {
                id: r.try_get("id").context("services.id")?,
                name: r.try_get("name").context("services.name")?,
            })),
            None => Ok(None),
        }
    }

    async fn find_patient(&self, lookup: &PatientLookup) -> StoreResult<Option<Patient>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("select {PATIENT_COLS} from patients p where "));
        match lookup {
            PatientLookup::ProtocolOrSequence {
                protocol_no,
                sequence_no,
            } => {
                qb.push("p.protocol_no = ")
                    .push_bind(protocol_no.clone())
                    .push(" or p.sequence_no = ")
                    .push_bind(*sequence_no);
            }
            PatientLookup::ProtocolInService {
                protocol_no,
                service_id,
            } => {
                qb.push("p.protocol_no = ")
                    .push_bind(protocol_no.clone())
                    .push(" and p.service_id = ")
                    .push_bind(*service_id);
            }
            PatientLookup::Protocol { protocol_no } => {
                qb.push("p.protocol_no = ").push_bind(protocol_no.clone());
            }
        }
        qb.push(" order by p.id asc limit 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "find patient"))?;
        row.map(|r| patient_from_row(&r)).transpose()
    }

    async fn patient_by_id(&self, id: PatientId) -> StoreResult<Option<Patient>> {
        self.fetch_patient(id).await
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let sql = format!("select {PATIENT_COLS} from patients p order by p.created_at desc, p.id desc");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(e, "list patients"))?;
        rows.iter().map(patient_from_row).collect()
    }

    async fn create_patient(&self, draft: &PatientDraft) -> StoreResult<Patient> {
        let sql = format!(
            r#"
            with p as (
              insert into patients (
                full_name, sequence_no, protocol_no, service_id, service_name,
                ip_address, priority_reason
              ) values ($1, $2, $3, $4, $5, $6, $7)
              returning *
            )
            select {PATIENT_COLS} from p
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&draft.full_name)
            .bind(draft.sequence_no)
            .bind(&draft.protocol_no)
            .bind(draft.service_id)
            .bind(&draft.service_name)
            .bind(&draft.ip_address)
            .bind(&draft.priority_reason)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(e, "create patient"))?;
        patient_from_row(&row)
    }

    async fn update_patient(&self, id: PatientId, draft: &PatientDraft) -> StoreResult<Patient> {
        let sql = format!(
            r#"
            with p as (
              update patients set
                full_name = $2, sequence_no = $3, protocol_no = $4, service_id = $5,
                service_name = $6, ip_address = $7, priority_reason = $8,
                updated_at = now()
              where id = $1
              returning *
            )
            select {PATIENT_COLS} from p
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&draft.full_name)
            .bind(draft.sequence_no)
            .bind(&draft.protocol_no)
            .bind(draft.service_id)
            .bind(&draft.service_name)
            .bind(&draft.ip_address)
            .bind(&draft.priority_reason)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(e, "update patient"))?;
        patient_from_row(&row)
    }

    async fn upsert_patient_in_service(
        &self,
        draft: &PatientDraft,
        refresh: &PatientRefresh,
    ) -> StoreResult<Upserted<Patient>> {
        // xmax = 0 only on a freshly inserted tuple.
        let sql = format!(
            r#"
            with p as (
              insert into patients (
                full_name, sequence_no, protocol_no, service_id, service_name,
                ip_address, priority_reason
              ) values ($1, $2, $3, $4, $5, $6, $7)
              on conflict (protocol_no, service_id) do update set
                full_name = $8, sequence_no = $9, priority_reason = $10,
                updated_at = now()
              returning *, (xmax = 0) as inserted
            )
            select {PATIENT_COLS}, p.inserted from p
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&draft.full_name)
            .bind(draft.sequence_no)
            .bind(&draft.protocol_no)
            .bind(draft.service_id)
            .bind(&draft.service_name)
            .bind(&draft.ip_address)
            .bind(&draft.priority_reason)
            .bind(&refresh.full_name)
            .bind(refresh.sequence_no)
            .bind(&refresh.priority_reason)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(e, "upsert patient in service"))?;
        let created: bool = row.try_get("inserted").context("patients.inserted")?;
        Ok(Upserted {
            row: patient_from_row(&row)?,
            created,
        })
    }

    async fn find_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
    ) -> StoreResult<Option<QueueEntry>> {
        let sql = format!(
            "select {ENTRY_COLS} from queue_entries e where e.patient_id = $1 and e.service_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(patient_id)
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "find queue entry"))?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    async fn upsert_queue_entry(
        &self,
        patient_id: PatientId,
        service_id: ServiceId,
        draft: &QueueEntryDraft,
        patch: &QueuePatch,
    ) -> StoreResult<Upserted<QueueEntry>> {
        let insert = format!(
            r#"
            with e as (
              insert into queue_entries (
                patient_id, service_id, status, triage_id, triage_name,
                announced_queue_size, average_exam_minutes, has_appointment,
                appointment_at, appointment_time, appointment_type, masked
              ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
              on conflict (patient_id, service_id) do nothing
              returning *
            )
            select {ENTRY_COLS} from e
            "#
        );
        let inserted = sqlx::query(&insert)
            .bind(patient_id)
            .bind(service_id)
            .bind(draft.status.as_str())
            .bind(&draft.triage_id)
            .bind(&draft.triage_name)
            .bind(draft.announced_queue_size)
            .bind(draft.average_exam_minutes)
            .bind(draft.has_appointment)
            .bind(draft.appointment_at)
            .bind(&draft.appointment_time)
            .bind(&draft.appointment_type)
            .bind(draft.masked)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "insert queue entry"))?;

        if let Some(row) = inserted {
            return Ok(Upserted {
                row: entry_from_row(&row)?,
                created: true,
            });
        }

        let mut qb = QueryBuilder::<Postgres>::new("with e as (update queue_entries set ");
        push_patch(&mut qb, patch);
        qb.push(" where patient_id = ")
            .push_bind(patient_id)
            .push(" and service_id = ")
            .push_bind(service_id)
            .push(" returning *) select ")
            .push(ENTRY_COLS)
            .push(" from e");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "update queue entry"))?
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "queue entry ({patient_id}, {service_id}) vanished between insert and update"
                ))
            })?;
        Ok(Upserted {
            row: entry_from_row(&row)?,
            created: false,
        })
    }

    async fn update_queue_entry(
        &self,
        id: QueueEntryId,
        patch: &QueuePatch,
    ) -> StoreResult<QueueEntry> {
        let mut qb = QueryBuilder::<Postgres>::new("with e as (update queue_entries set ");
        push_patch(&mut qb, patch);
        qb.push(" where id = ")
            .push_bind(id)
            .push(" returning *) select ")
            .push(ENTRY_COLS)
            .push(" from e");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "update queue entry"))?
            .ok_or_else(|| StoreError::Missing(format!("queue entry {id}")))?;
        entry_from_row(&row)
    }

    async fn service_entries(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Vec<(QueueEntry, Patient)>> {
        let sql = format!(
            r#"
            select {ENTRY_COLS}, {PATIENT_COLS}
            from queue_entries e
            join patients p on p.id = e.patient_id
            where e.service_id = $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(service_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(e, "service entries"))?;
        rows.iter()
            .map(|r| -> StoreResult<(QueueEntry, Patient)> {
                Ok((entry_from_row(r)?, patient_from_row(r)?))
            })
            .collect()
    }

    async fn patient_entries(&self, patient_id: PatientId) -> StoreResult<Vec<QueueEntry>> {
        self.fetch_entries("e.patient_id", patient_id).await
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("select username, secret from users where username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "find user"))?;
        match row {
            Some(r) => Ok(Some(User {
                username: r.try_get("username").context("users.username")?,
                secret: r.try_get("secret").context("users.secret")?,
            })),
            None => Ok(None),
        }
    }
}
