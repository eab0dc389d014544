// libs/appointment-cell/src/store/mod.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentStatus, AppointmentToken,
    BatchInsertOutcome, CheckedUpdate, ConflictExclusions, ConflictPolicy, ConflictingAppointment,
    LinkAction, RecurrenceDefinition, StatusUpdate, TimeInterval,
};

pub mod memory;
pub mod supabase;

pub use memory::{InMemoryAppointmentStore, InMemoryRecurrenceStore, InMemoryTokenStore};
pub use supabase::{SupabaseAppointmentStore, SupabaseRecurrenceStore, SupabaseTokenStore};

/// Appointment persistence. Every method that can create or move a blocking
/// interval decides conflicts and writes under the same per-professional lock.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// For each interval, the first blocking appointment overlapping it.
    /// Read-only; no lock is taken.
    async fn find_conflicts(
        &self,
        professional_id: Uuid,
        intervals: &[TimeInterval],
        exclusions: &ConflictExclusions,
    ) -> Result<Vec<Option<ConflictingAppointment>>, AppointmentError>;

    /// Check and insert a batch for one professional inside one lock scope.
    async fn insert_checked(
        &self,
        professional_id: Uuid,
        batch: Vec<Appointment>,
        exclusions: &ConflictExclusions,
        policy: ConflictPolicy,
    ) -> Result<BatchInsertOutcome, AppointmentError>;

    /// Move an appointment (and optionally change its status) after a locked check.
    async fn update_checked(
        &self,
        appointment_id: Uuid,
        change: AppointmentChange,
        exclusions: &ConflictExclusions,
    ) -> Result<CheckedUpdate, AppointmentError>;

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError>;

    /// Status-only update guarded by the status the caller validated against.
    async fn apply_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        update: &StatusUpdate,
    ) -> Result<Appointment, AppointmentError>;

    /// Appointments of one professional starting in `[from, to)`.
    async fn list_for_professional(
        &self,
        professional_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn list_for_recurrence(&self, recurrence_id: Uuid) -> Result<Vec<Appointment>, AppointmentError>;

    async fn record_patient_visit(
        &self,
        patient_id: Uuid,
        visited_at: DateTime<Utc>,
    ) -> Result<(), AppointmentError>;
}

#[async_trait]
pub trait RecurrenceStore: Send + Sync {
    async fn insert(&self, definition: RecurrenceDefinition) -> Result<RecurrenceDefinition, AppointmentError>;

    async fn get(&self, recurrence_id: Uuid) -> Result<RecurrenceDefinition, AppointmentError>;

    async fn delete(&self, recurrence_id: Uuid) -> Result<(), AppointmentError>;

    async fn list_active_biweekly(
        &self,
        professional_id: Option<Uuid>,
    ) -> Result<Vec<RecurrenceDefinition>, AppointmentError>;

    async fn list_active_indefinite(&self) -> Result<Vec<RecurrenceDefinition>, AppointmentError>;

    async fn update_exceptions(
        &self,
        recurrence_id: Uuid,
        exceptions: &[NaiveDate],
    ) -> Result<RecurrenceDefinition, AppointmentError>;

    async fn update_schedule(
        &self,
        recurrence_id: Uuid,
        day_of_week: i32,
        start_date: NaiveDate,
    ) -> Result<RecurrenceDefinition, AppointmentError>;

    async fn set_last_generated(&self, recurrence_id: Uuid, date: NaiveDate) -> Result<(), AppointmentError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: AppointmentToken) -> Result<(), AppointmentError>;

    async fn find(&self, token: &str) -> Result<Option<AppointmentToken>, AppointmentError>;

    /// Mark every unused token of the appointment (optionally one action) as used.
    async fn invalidate_for_appointment(
        &self,
        appointment_id: Uuid,
        action: Option<LinkAction>,
        used_at: DateTime<Utc>,
    ) -> Result<usize, AppointmentError>;
}
