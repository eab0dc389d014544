use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentStatus, AppointmentToken,
    BatchInsertOutcome, CheckedUpdate, ConflictExclusions, ConflictPolicy, ConflictingAppointment,
    LinkAction, RecurrenceDefinition, RecurrenceEndType, StatusUpdate, TimeInterval,
};
use crate::services::conflict::{first_conflict, plan_batch};
use super::{AppointmentStore, RecurrenceStore, TokenStore};

/// Process-local appointment store. Conflict decisions and writes for one
/// professional are serialised by a mutex keyed by professional id.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    professional_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    last_visits: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn professional_lock(&self, professional_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.professional_locks.lock().await;
        locks.entry(professional_id).or_default().clone()
    }

    async fn appointments_of(&self, professional_id: Uuid) -> Vec<Appointment> {
        self.appointments
            .read()
            .await
            .values()
            .filter(|a| a.professional_id == professional_id)
            .cloned()
            .collect()
    }

    pub async fn last_visit(&self, patient_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_visits.read().await.get(&patient_id).copied()
    }

    pub async fn count(&self) -> usize {
        self.appointments.read().await.len()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_conflicts(
        &self,
        professional_id: Uuid,
        intervals: &[TimeInterval],
        exclusions: &ConflictExclusions,
    ) -> Result<Vec<Option<ConflictingAppointment>>, AppointmentError> {
        let existing = self.appointments_of(professional_id).await;
        Ok(intervals
            .iter()
            .map(|interval| first_conflict(&existing, interval, exclusions))
            .collect())
    }

    async fn insert_checked(
        &self,
        professional_id: Uuid,
        batch: Vec<Appointment>,
        exclusions: &ConflictExclusions,
        policy: ConflictPolicy,
    ) -> Result<BatchInsertOutcome, AppointmentError> {
        let lock = self.professional_lock(professional_id).await;
        let _guard = lock.lock().await;

        let existing = self.appointments_of(professional_id).await;
        let outcome = plan_batch(&existing, batch, exclusions, policy);

        let mut appointments = self.appointments.write().await;
        for appointment in &outcome.inserted {
            appointments.insert(appointment.id, appointment.clone());
        }
        debug!(
            "Inserted {} appointment(s) for professional {}",
            outcome.inserted.len(),
            professional_id
        );

        Ok(outcome)
    }

    async fn update_checked(
        &self,
        appointment_id: Uuid,
        change: AppointmentChange,
        exclusions: &ConflictExclusions,
    ) -> Result<CheckedUpdate, AppointmentError> {
        let professional_id = self.get(appointment_id).await?.professional_id;
        let lock = self.professional_lock(professional_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock
        let mut appointment = self.get(appointment_id).await?;
        if appointment.status != change.expected_status {
            return Err(AppointmentError::StaleStatus);
        }
        let now = Utc::now();
        if let Some(update) = &change.status {
            update.apply_to(&mut appointment, now);
        }
        appointment.scheduled_at = change.interval.scheduled_at;
        appointment.end_at = change.interval.end_at;
        appointment.updated_at = now;

        if appointment.occupies_time() {
            let others: Vec<Appointment> = self
                .appointments_of(professional_id)
                .await
                .into_iter()
                .filter(|a| a.id != appointment_id)
                .collect();
            if let Some(conflict) = first_conflict(&others, &change.interval, exclusions) {
                return Ok(CheckedUpdate::Conflict(conflict));
            }
        }

        // apply_status does not take the professional lock
        let mut appointments = self.appointments.write().await;
        match appointments.get(&appointment_id) {
            Some(stored) if stored.status == change.expected_status => {
                appointments.insert(appointment.id, appointment.clone());
                Ok(CheckedUpdate::Updated(appointment))
            }
            Some(_) => Err(AppointmentError::StaleStatus),
            None => Err(AppointmentError::NotFound),
        }
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .read()
            .await
            .get(&appointment_id)
            .cloned()
            .ok_or(AppointmentError::NotFound)
    }

    async fn apply_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        update: &StatusUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments.get_mut(&appointment_id).ok_or(AppointmentError::NotFound)?;
        if appointment.status != expected {
            return Err(AppointmentError::StaleStatus);
        }
        update.apply_to(appointment, Utc::now());
        Ok(appointment.clone())
    }

    async fn list_for_professional(
        &self,
        professional_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments: Vec<Appointment> = self
            .appointments_of(professional_id)
            .await
            .into_iter()
            .filter(|a| a.scheduled_at >= from && a.scheduled_at < to)
            .collect();
        appointments.sort_by_key(|a| a.scheduled_at);
        Ok(appointments)
    }

    async fn list_for_recurrence(&self, recurrence_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.recurrence_id == Some(recurrence_id))
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.scheduled_at);
        Ok(appointments)
    }

    async fn record_patient_visit(
        &self,
        patient_id: Uuid,
        visited_at: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let mut visits = self.last_visits.write().await;
        let entry = visits.entry(patient_id).or_insert(visited_at);
        if *entry < visited_at {
            *entry = visited_at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecurrenceStore {
    recurrences: RwLock<HashMap<Uuid, RecurrenceDefinition>>,
}

impl InMemoryRecurrenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, recurrence_id: Uuid, f: F) -> Result<RecurrenceDefinition, AppointmentError>
    where
        F: FnOnce(&mut RecurrenceDefinition) + Send,
    {
        let mut recurrences = self.recurrences.write().await;
        let definition = recurrences
            .get_mut(&recurrence_id)
            .ok_or(AppointmentError::RecurrenceNotFound)?;
        f(definition);
        definition.updated_at = Utc::now();
        Ok(definition.clone())
    }
}

#[async_trait]
impl RecurrenceStore for InMemoryRecurrenceStore {
    async fn insert(&self, definition: RecurrenceDefinition) -> Result<RecurrenceDefinition, AppointmentError> {
        self.recurrences.write().await.insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn get(&self, recurrence_id: Uuid) -> Result<RecurrenceDefinition, AppointmentError> {
        self.recurrences
            .read()
            .await
            .get(&recurrence_id)
            .cloned()
            .ok_or(AppointmentError::RecurrenceNotFound)
    }

    async fn delete(&self, recurrence_id: Uuid) -> Result<(), AppointmentError> {
        self.recurrences.write().await.remove(&recurrence_id);
        Ok(())
    }

    async fn list_active_biweekly(
        &self,
        professional_id: Option<Uuid>,
    ) -> Result<Vec<RecurrenceDefinition>, AppointmentError> {
        let mut recurrences: Vec<RecurrenceDefinition> = self
            .recurrences
            .read()
            .await
            .values()
            .filter(|r| r.is_active_biweekly())
            .filter(|r| professional_id.map_or(true, |id| r.professional_id == id))
            .cloned()
            .collect();
        recurrences.sort_by_key(|r| r.created_at);
        Ok(recurrences)
    }

    async fn list_active_indefinite(&self) -> Result<Vec<RecurrenceDefinition>, AppointmentError> {
        let mut recurrences: Vec<RecurrenceDefinition> = self
            .recurrences
            .read()
            .await
            .values()
            .filter(|r| r.is_active && r.end_type == RecurrenceEndType::Indefinite)
            .cloned()
            .collect();
        recurrences.sort_by_key(|r| r.created_at);
        Ok(recurrences)
    }

    async fn update_exceptions(
        &self,
        recurrence_id: Uuid,
        exceptions: &[NaiveDate],
    ) -> Result<RecurrenceDefinition, AppointmentError> {
        let exceptions = exceptions.to_vec();
        self.modify(recurrence_id, move |r| r.exceptions = exceptions).await
    }

    async fn update_schedule(
        &self,
        recurrence_id: Uuid,
        day_of_week: i32,
        start_date: NaiveDate,
    ) -> Result<RecurrenceDefinition, AppointmentError> {
        self.modify(recurrence_id, move |r| {
            r.day_of_week = day_of_week;
            r.start_date = start_date;
        })
        .await
    }

    async fn set_last_generated(&self, recurrence_id: Uuid, date: NaiveDate) -> Result<(), AppointmentError> {
        self.modify(recurrence_id, move |r| r.last_generated_date = Some(date)).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<Vec<AppointmentToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: AppointmentToken) -> Result<(), AppointmentError> {
        self.tokens.write().await.push(token);
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<AppointmentToken>, AppointmentError> {
        Ok(self.tokens.read().await.iter().find(|t| t.token == token).cloned())
    }

    async fn invalidate_for_appointment(
        &self,
        appointment_id: Uuid,
        action: Option<LinkAction>,
        used_at: DateTime<Utc>,
    ) -> Result<usize, AppointmentError> {
        let mut tokens = self.tokens.write().await;
        let mut count = 0;
        for token in tokens.iter_mut().filter(|t| {
            t.appointment_id == appointment_id
                && t.used_at.is_none()
                && action.map_or(true, |a| t.action == a)
        }) {
            token.used_at = Some(used_at);
            count += 1;
        }
        Ok(count)
    }
}
