mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentBookingService, AppointmentChange, AppointmentError, AppointmentStatus,
    AppointmentStore, BatchInsertOutcome, CheckedUpdate, ConflictExclusions, ConflictPolicy,
    ConflictingAppointment, InMemoryAppointmentStore, InMemoryRecurrenceStore, RescheduleAppointmentRequest,
    SignedLinkService, StatusUpdate, TimeInterval,
};

use common::{book_request, local, timezone, Harness, BASE_URL, LINK_EXPIRY_HOURS, LINK_SECRET};

fn now() -> DateTime<Utc> {
    local(2026, 3, 1, 8, 0)
}

/// Store whose reads lag behind its writes: `get` answers with a snapshot
/// taken before another request changed the row.
struct LaggingStore {
    inner: Arc<InMemoryAppointmentStore>,
    snapshot: Mutex<Option<Appointment>>,
}

impl LaggingStore {
    async fn freeze(&self, appointment: Appointment) {
        *self.snapshot.lock().await = Some(appointment);
    }
}

#[async_trait]
impl AppointmentStore for LaggingStore {
    async fn find_conflicts(
        &self,
        professional_id: Uuid,
        intervals: &[TimeInterval],
        exclusions: &ConflictExclusions,
    ) -> Result<Vec<Option<ConflictingAppointment>>, AppointmentError> {
        self.inner.find_conflicts(professional_id, intervals, exclusions).await
    }

    async fn insert_checked(
        &self,
        professional_id: Uuid,
        batch: Vec<Appointment>,
        exclusions: &ConflictExclusions,
        policy: ConflictPolicy,
    ) -> Result<BatchInsertOutcome, AppointmentError> {
        self.inner.insert_checked(professional_id, batch, exclusions, policy).await
    }

    async fn update_checked(
        &self,
        appointment_id: Uuid,
        change: AppointmentChange,
        exclusions: &ConflictExclusions,
    ) -> Result<CheckedUpdate, AppointmentError> {
        self.inner.update_checked(appointment_id, change, exclusions).await
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        match self.snapshot.lock().await.clone() {
            Some(stale) if stale.id == appointment_id => Ok(stale),
            _ => self.inner.get(appointment_id).await,
        }
    }

    async fn apply_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        update: &StatusUpdate,
    ) -> Result<Appointment, AppointmentError> {
        self.inner.apply_status(appointment_id, expected, update).await
    }

    async fn list_for_professional(
        &self,
        professional_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_for_professional(professional_id, from, to).await
    }

    async fn list_for_recurrence(&self, recurrence_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_for_recurrence(recurrence_id).await
    }

    async fn record_patient_visit(
        &self,
        patient_id: Uuid,
        visited_at: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        self.inner.record_patient_visit(patient_id, visited_at).await
    }
}

/// A second booking service over the same rows, reading through the lagging store.
fn lagging_service(harness: &Harness) -> (AppointmentBookingService, Arc<LaggingStore>) {
    let store = Arc::new(LaggingStore { inner: harness.appointments.clone(), snapshot: Mutex::new(None) });
    let service = AppointmentBookingService::new(
        store.clone(),
        Arc::new(InMemoryRecurrenceStore::new()),
        Arc::new(SignedLinkService::new(BASE_URL, LINK_SECRET, LINK_EXPIRY_HOURS)),
        LINK_EXPIRY_HOURS,
        timezone(),
    );
    (service, store)
}

#[tokio::test]
async fn test_revert_on_stale_read_cannot_reopen_finished_appointment() {
    let harness = Harness::signed();
    let (lagging, store) = lagging_service(&harness);
    let booked = harness
        .booking
        .book_appointment(book_request(Uuid::new_v4(), local(2026, 3, 9, 9, 0), 50), now())
        .await
        .unwrap()
        .appointment;

    let no_show = harness
        .booking
        .change_status(booked.id, AppointmentStatus::CanceladoFalta, now())
        .await
        .unwrap();
    store.freeze(no_show).await;

    // Meanwhile another request reverts and then finishes it
    harness.booking.change_status(booked.id, AppointmentStatus::Agendado, now()).await.unwrap();
    harness.booking.change_status(booked.id, AppointmentStatus::Finalizado, now()).await.unwrap();

    let result = lagging.change_status(booked.id, AppointmentStatus::Agendado, now()).await;

    assert_matches!(result, Err(AppointmentError::StaleStatus));
    assert_eq!(
        harness.appointments.get(booked.id).await.unwrap().status,
        AppointmentStatus::Finalizado
    );
}

#[tokio::test]
async fn test_reschedule_on_stale_read_cannot_move_cancelled_appointment() {
    let harness = Harness::signed();
    let (lagging, store) = lagging_service(&harness);
    let booked = harness
        .booking
        .book_appointment(book_request(Uuid::new_v4(), local(2026, 3, 9, 9, 0), 50), now())
        .await
        .unwrap()
        .appointment;
    store.freeze(booked.clone()).await;

    harness
        .booking
        .change_status(booked.id, AppointmentStatus::CanceladoAcordado, now())
        .await
        .unwrap();

    let result = lagging
        .reschedule(
            booked.id,
            RescheduleAppointmentRequest {
                scheduled_at: local(2026, 3, 10, 14, 0),
                end_at: local(2026, 3, 10, 14, 50),
            },
            now(),
        )
        .await;

    assert_matches!(result, Err(AppointmentError::StaleStatus));
    let stored = harness.appointments.get(booked.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::CanceladoAcordado);
    assert_eq!(stored.scheduled_at, local(2026, 3, 9, 9, 0));
}
