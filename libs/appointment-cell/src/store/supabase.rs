use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentStatus, AppointmentToken,
    AppointmentType, BatchInsertOutcome, CheckedUpdate, ConflictExclusions, ConflictPolicy,
    ConflictingAppointment, FieldUpdate, LinkAction, RecurrenceDefinition, StatusUpdate,
    TimeInterval,
};
use super::{AppointmentStore, RecurrenceStore, TokenStore};

/// Shared plumbing for the PostgREST-backed stores.
#[derive(Clone)]
struct Rest {
    supabase: Arc<SupabaseClient>,
    service_token: Option<String>,
}

impl Rest {
    fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            service_token: config.service_token().map(str::to_string),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, self.service_token.as_deref(), None)
            .await?;
        parse_rows(rows)
    }

    async fn write<T: DeserializeOwned>(&self, method: Method, path: &str, body: Value) -> Result<Vec<T>, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request_returning(method, path, self.service_token.as_deref(), body)
            .await?;
        parse_rows(rows)
    }

    async fn rpc<T: DeserializeOwned>(&self, function: &str, args: Value) -> Result<T, AppointmentError> {
        debug!("Calling scheduling function {}", function);
        let result: Value = self
            .supabase
            .rpc(function, self.service_token.as_deref(), args)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AppointmentError::Database(format!("Unexpected {} result: {}", function, e)))
    }
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| AppointmentError::Database(format!("Failed to parse rows: {}", e)))
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339()).into_owned()
}

fn exclusion_args(exclusions: &ConflictExclusions) -> (Value, Value) {
    (json!(exclusions.exclude_ids), json!(exclusions.exclude_group_id))
}

/// `(touch, value)` pair for a nullable timestamp column in an RPC call.
fn field_args(update: FieldUpdate<DateTime<Utc>>) -> (bool, Option<String>) {
    match update {
        FieldUpdate::Unchanged => (false, None),
        FieldUpdate::Set(value) => (true, Some(value.to_rfc3339())),
        FieldUpdate::Cleared => (true, None),
    }
}

fn appointment_row(appointment: &Appointment) -> Value {
    json!({
        "id": appointment.id,
        "professional_id": appointment.professional_id,
        "patient_id": appointment.patient_id,
        "patient_name": appointment.patient_name,
        "title": appointment.title,
        "scheduled_at": appointment.scheduled_at.to_rfc3339(),
        "end_at": appointment.end_at.to_rfc3339(),
        "status": appointment.status,
        "appointment_type": appointment.appointment_type,
        "blocks_time": appointment.blocks_time,
        "group_id": appointment.group_id,
        "recurrence_id": appointment.recurrence_id,
        "created_at": appointment.created_at.to_rfc3339(),
        "updated_at": appointment.updated_at.to_rfc3339()
    })
}

#[derive(Debug, Deserialize)]
struct ConflictRow {
    idx: usize,
    id: Uuid,
    scheduled_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    display_name: String,
    appointment_type: AppointmentType,
}

#[derive(Debug, Deserialize)]
struct UpdateResult {
    appointment: Option<Appointment>,
    conflict: Option<ConflictingAppointment>,
    #[serde(default)]
    stale: bool,
}

/// Appointment store backed by PostgREST. Locked operations go through the
/// `*_checked` Postgres functions, each running as a single transaction.
pub struct SupabaseAppointmentStore {
    rest: Rest,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self { rest: Rest::new(supabase, config) }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_conflicts(
        &self,
        professional_id: Uuid,
        intervals: &[TimeInterval],
        exclusions: &ConflictExclusions,
    ) -> Result<Vec<Option<ConflictingAppointment>>, AppointmentError> {
        let (exclude_ids, exclude_group_id) = exclusion_args(exclusions);
        let rows: Vec<ConflictRow> = self.rest.rpc("find_appointment_conflicts", json!({
            "p_professional_id": professional_id,
            "p_intervals": intervals,
            "p_exclude_ids": exclude_ids,
            "p_exclude_group_id": exclude_group_id
        })).await?;

        let mut results = vec![None; intervals.len()];
        for row in rows {
            match results.get_mut(row.idx) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(ConflictingAppointment {
                        id: row.id,
                        scheduled_at: row.scheduled_at,
                        end_at: row.end_at,
                        display_name: row.display_name,
                        appointment_type: row.appointment_type,
                    });
                }
                Some(_) => {}
                None => warn!("find_appointment_conflicts returned unknown index {}", row.idx),
            }
        }
        Ok(results)
    }

    async fn insert_checked(
        &self,
        professional_id: Uuid,
        batch: Vec<Appointment>,
        exclusions: &ConflictExclusions,
        policy: ConflictPolicy,
    ) -> Result<BatchInsertOutcome, AppointmentError> {
        let (exclude_ids, exclude_group_id) = exclusion_args(exclusions);
        let rows: Vec<Value> = batch.iter().map(appointment_row).collect();

        self.rest.rpc("book_appointments_checked", json!({
            "p_professional_id": professional_id,
            "p_appointments": rows,
            "p_exclude_ids": exclude_ids,
            "p_exclude_group_id": exclude_group_id,
            "p_policy": policy
        })).await
    }

    async fn update_checked(
        &self,
        appointment_id: Uuid,
        change: AppointmentChange,
        exclusions: &ConflictExclusions,
    ) -> Result<CheckedUpdate, AppointmentError> {
        let (exclude_ids, exclude_group_id) = exclusion_args(exclusions);
        let status = change.status.as_ref().map(|u| u.status);
        let (set_confirmed, confirmed_at) = change
            .status
            .as_ref()
            .map_or((false, None), |u| field_args(u.confirmed_at));
        let (set_cancelled, cancelled_at) = change
            .status
            .as_ref()
            .map_or((false, None), |u| field_args(u.cancelled_at));

        let result: UpdateResult = self.rest.rpc("update_appointment_checked", json!({
            "p_appointment_id": appointment_id,
            "p_expected_status": change.expected_status,
            "p_scheduled_at": change.interval.scheduled_at.to_rfc3339(),
            "p_end_at": change.interval.end_at.to_rfc3339(),
            "p_status": status,
            "p_set_confirmed_at": set_confirmed,
            "p_confirmed_at": confirmed_at,
            "p_set_cancelled_at": set_cancelled,
            "p_cancelled_at": cancelled_at,
            "p_exclude_ids": exclude_ids,
            "p_exclude_group_id": exclude_group_id
        })).await?;

        match result {
            UpdateResult { stale: true, .. } => Err(AppointmentError::StaleStatus),
            UpdateResult { conflict: Some(conflict), .. } => Ok(CheckedUpdate::Conflict(conflict)),
            UpdateResult { appointment: Some(appointment), .. } => Ok(CheckedUpdate::Updated(appointment)),
            UpdateResult { appointment: None, conflict: None, .. } => Err(AppointmentError::NotFound),
        }
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut rows: Vec<Appointment> = self.rest.fetch(&path).await?;
        rows.pop().ok_or(AppointmentError::NotFound)
    }

    async fn apply_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        update: &StatusUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let mut body = Map::new();
        body.insert("status".to_string(), json!(update.status));
        body.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        for (column, field) in [("confirmed_at", update.confirmed_at), ("cancelled_at", update.cancelled_at)] {
            if let (true, value) = field_args(field) {
                body.insert(column.to_string(), json!(value));
            }
        }

        // Filtering on the expected status makes the update a compare-and-set
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id,
            expected.as_str()
        );
        let mut rows: Vec<Appointment> = self.rest.write(Method::PATCH, &path, Value::Object(body)).await?;
        rows.pop().ok_or(AppointmentError::StaleStatus)
    }

    async fn list_for_professional(
        &self,
        professional_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?professional_id=eq.{}&scheduled_at=gte.{}&scheduled_at=lt.{}&order=scheduled_at.asc",
            professional_id,
            encode_instant(from),
            encode_instant(to)
        );
        self.rest.fetch(&path).await
    }

    async fn list_for_recurrence(&self, recurrence_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?recurrence_id=eq.{}&order=scheduled_at.asc",
            recurrence_id
        );
        self.rest.fetch(&path).await
    }

    async fn record_patient_visit(
        &self,
        patient_id: Uuid,
        visited_at: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        // Only ever moves the marker forward
        let path = format!(
            "/rest/v1/patients?id=eq.{}&or=(last_visit_at.is.null,last_visit_at.lt.{})",
            patient_id,
            encode_instant(visited_at)
        );
        let _: Value = self
            .rest
            .supabase
            .request(
                Method::PATCH,
                &path,
                self.rest.service_token.as_deref(),
                Some(json!({ "last_visit_at": visited_at.to_rfc3339() })),
            )
            .await?;
        Ok(())
    }
}

pub struct SupabaseRecurrenceStore {
    rest: Rest,
}

impl SupabaseRecurrenceStore {
    pub fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self { rest: Rest::new(supabase, config) }
    }

    async fn patch(&self, recurrence_id: Uuid, mut body: Value) -> Result<RecurrenceDefinition, AppointmentError> {
        if let Some(object) = body.as_object_mut() {
            object.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        }
        let path = format!("/rest/v1/appointment_recurrences?id=eq.{}", recurrence_id);
        let mut rows: Vec<RecurrenceDefinition> = self.rest.write(Method::PATCH, &path, body).await?;
        rows.pop().ok_or(AppointmentError::RecurrenceNotFound)
    }
}

#[async_trait]
impl RecurrenceStore for SupabaseRecurrenceStore {
    async fn insert(&self, definition: RecurrenceDefinition) -> Result<RecurrenceDefinition, AppointmentError> {
        let body = serde_json::to_value(&definition)
            .map_err(|e| AppointmentError::Database(format!("Failed to encode recurrence: {}", e)))?;
        let mut rows: Vec<RecurrenceDefinition> = self
            .rest
            .write(Method::POST, "/rest/v1/appointment_recurrences", body)
            .await?;
        rows.pop()
            .ok_or_else(|| AppointmentError::Database("Insert returned no rows".to_string()))
    }

    async fn get(&self, recurrence_id: Uuid) -> Result<RecurrenceDefinition, AppointmentError> {
        let path = format!("/rest/v1/appointment_recurrences?id=eq.{}", recurrence_id);
        let mut rows: Vec<RecurrenceDefinition> = self.rest.fetch(&path).await?;
        rows.pop().ok_or(AppointmentError::RecurrenceNotFound)
    }

    async fn delete(&self, recurrence_id: Uuid) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/appointment_recurrences?id=eq.{}", recurrence_id);
        let _: Value = self
            .rest
            .supabase
            .request(Method::DELETE, &path, self.rest.service_token.as_deref(), None)
            .await?;
        Ok(())
    }

    async fn list_active_biweekly(
        &self,
        professional_id: Option<Uuid>,
    ) -> Result<Vec<RecurrenceDefinition>, AppointmentError> {
        let mut path = "/rest/v1/appointment_recurrences?is_active=eq.true&recurrence_type=eq.BIWEEKLY".to_string();
        if let Some(id) = professional_id {
            path.push_str(&format!("&professional_id=eq.{}", id));
        }
        path.push_str("&order=created_at.asc");
        self.rest.fetch(&path).await
    }

    async fn list_active_indefinite(&self) -> Result<Vec<RecurrenceDefinition>, AppointmentError> {
        self.rest
            .fetch("/rest/v1/appointment_recurrences?is_active=eq.true&end_type=eq.INDEFINITE&order=created_at.asc")
            .await
    }

    async fn update_exceptions(
        &self,
        recurrence_id: Uuid,
        exceptions: &[NaiveDate],
    ) -> Result<RecurrenceDefinition, AppointmentError> {
        self.patch(recurrence_id, json!({ "exceptions": exceptions })).await
    }

    async fn update_schedule(
        &self,
        recurrence_id: Uuid,
        day_of_week: i32,
        start_date: NaiveDate,
    ) -> Result<RecurrenceDefinition, AppointmentError> {
        self.patch(recurrence_id, json!({ "day_of_week": day_of_week, "start_date": start_date })).await
    }

    async fn set_last_generated(&self, recurrence_id: Uuid, date: NaiveDate) -> Result<(), AppointmentError> {
        self.patch(recurrence_id, json!({ "last_generated_date": date })).await?;
        Ok(())
    }
}

pub struct SupabaseTokenStore {
    rest: Rest,
}

impl SupabaseTokenStore {
    pub fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self { rest: Rest::new(supabase, config) }
    }
}

#[async_trait]
impl TokenStore for SupabaseTokenStore {
    async fn insert(&self, token: AppointmentToken) -> Result<(), AppointmentError> {
        let body = serde_json::to_value(&token)
            .map_err(|e| AppointmentError::Database(format!("Failed to encode token: {}", e)))?;
        let _: Vec<AppointmentToken> = self
            .rest
            .write(Method::POST, "/rest/v1/appointment_tokens", body)
            .await?;
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<AppointmentToken>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointment_tokens?token=eq.{}&limit=1",
            urlencoding::encode(token)
        );
        let mut rows: Vec<AppointmentToken> = self.rest.fetch(&path).await?;
        Ok(rows.pop())
    }

    async fn invalidate_for_appointment(
        &self,
        appointment_id: Uuid,
        action: Option<LinkAction>,
        used_at: DateTime<Utc>,
    ) -> Result<usize, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointment_tokens?appointment_id=eq.{}&used_at=is.null",
            appointment_id
        );
        if let Some(action) = action {
            let code = match action {
                LinkAction::Confirm => "CONFIRM",
                LinkAction::Cancel => "CANCEL",
            };
            path.push_str(&format!("&action=eq.{}", code));
        }

        let rows: Vec<AppointmentToken> = self
            .rest
            .write(Method::PATCH, &path, json!({ "used_at": used_at.to_rfc3339() }))
            .await?;
        Ok(rows.len())
    }
}
