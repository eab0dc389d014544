mod common;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use appointment_cell::{
    AppointmentStore, ConflictExclusions, ConflictPolicy, ExtensionReport, InMemoryAppointmentStore,
    InMemoryRecurrenceStore, RecurrenceEndType, RecurrenceExtensionJob, RecurrenceStore, RecurrenceType,
};
use shared_utils::test_utils::TestConfig;

use common::{appointment, date, local, recurrence, time, timezone};

struct Fixture {
    job: RecurrenceExtensionJob,
    appointments: Arc<InMemoryAppointmentStore>,
    recurrences: Arc<InMemoryRecurrenceStore>,
}

fn fixture() -> Fixture {
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let recurrences = Arc::new(InMemoryRecurrenceStore::new());
    let job = RecurrenceExtensionJob::new(
        appointments.clone(),
        recurrences.clone(),
        timezone(),
        &TestConfig::default().to_app_config(),
    );
    Fixture { job, appointments, recurrences }
}

fn now() -> DateTime<Utc> {
    local(2026, 3, 2, 6, 0)
}

async fn dates_of(store: &InMemoryAppointmentStore, recurrence_id: Uuid) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = store
        .list_for_recurrence(recurrence_id)
        .await
        .unwrap()
        .iter()
        .map(|a| timezone().local_date(a.scheduled_at))
        .collect();
    dates.sort();
    dates
}

#[tokio::test]
async fn test_extends_indefinite_series_past_horizon_once() {
    let fx = fixture();
    let professional_id = Uuid::new_v4();
    let mut series = recurrence(professional_id, RecurrenceType::Weekly, date(2026, 3, 2), time(9, 0), "Ana");
    series.last_generated_date = Some(date(2026, 3, 2));
    let series = fx.recurrences.insert(series).await.unwrap();

    let first = fx.job.run_once(date(2026, 3, 2), now()).await.unwrap();
    assert_eq!(
        first,
        ExtensionReport {
            series_checked: 1,
            series_extended: 1,
            appointments_created: 8,
            conflicts_skipped: 0,
            failures: 0,
        }
    );
    let dates = dates_of(&fx.appointments, series.id).await;
    assert_eq!(dates.first(), Some(&date(2026, 3, 9)));
    assert_eq!(dates.last(), Some(&date(2026, 4, 27)));
    assert_eq!(
        fx.recurrences.get(series.id).await.unwrap().last_generated_date,
        Some(date(2026, 4, 27))
    );

    let second = fx.job.run_once(date(2026, 3, 2), now()).await.unwrap();
    assert_eq!(second.appointments_created, 0);
    assert_eq!(fx.appointments.count().await, 8);
}

#[tokio::test]
async fn test_conflicting_dates_are_skipped() {
    let fx = fixture();
    let professional_id = Uuid::new_v4();
    let blocker = appointment(professional_id, local(2026, 3, 16, 9, 0), 50);
    fx.appointments
        .insert_checked(professional_id, vec![blocker], &ConflictExclusions::none(), ConflictPolicy::Reject)
        .await
        .unwrap();

    let mut series = recurrence(professional_id, RecurrenceType::Weekly, date(2026, 3, 2), time(9, 0), "Bruno");
    series.last_generated_date = Some(date(2026, 3, 2));
    let series = fx.recurrences.insert(series).await.unwrap();

    let report = fx.job.run_once(date(2026, 3, 2), now()).await.unwrap();

    assert_eq!(report.appointments_created, 7);
    assert_eq!(report.conflicts_skipped, 1);
    assert!(!dates_of(&fx.appointments, series.id).await.contains(&date(2026, 3, 16)));
}

#[tokio::test]
async fn test_materialised_dates_are_not_duplicated() {
    let fx = fixture();
    let professional_id = Uuid::new_v4();
    let mut series = recurrence(professional_id, RecurrenceType::Biweekly, date(2026, 3, 2), time(14, 0), "Carla");
    series.last_generated_date = Some(date(2026, 3, 2));
    let series = fx.recurrences.insert(series).await.unwrap();

    // Left behind by an interrupted earlier pass
    let mut orphan = appointment(professional_id, local(2026, 3, 16, 14, 0), 50);
    orphan.recurrence_id = Some(series.id);
    fx.appointments
        .insert_checked(professional_id, vec![orphan], &ConflictExclusions::none(), ConflictPolicy::Reject)
        .await
        .unwrap();

    let report = fx.job.run_once(date(2026, 3, 2), now()).await.unwrap();

    // 3/16 and 3/30, then 4/13 and 4/27; 3/16 already exists
    assert_eq!(report.appointments_created, 3);
    assert_eq!(report.conflicts_skipped, 0);
    assert_eq!(
        dates_of(&fx.appointments, series.id).await,
        vec![date(2026, 3, 16), date(2026, 3, 30), date(2026, 4, 13), date(2026, 4, 27)]
    );
}

#[tokio::test]
async fn test_finite_and_inactive_series_are_left_alone() {
    let fx = fixture();
    let professional_id = Uuid::new_v4();

    let mut finite = recurrence(professional_id, RecurrenceType::Weekly, date(2026, 3, 2), time(9, 0), "Davi");
    finite.end_type = RecurrenceEndType::ByOccurrences;
    finite.occurrences = Some(4);
    fx.recurrences.insert(finite).await.unwrap();

    let mut inactive = recurrence(professional_id, RecurrenceType::Weekly, date(2026, 3, 2), time(11, 0), "Elisa");
    inactive.is_active = false;
    fx.recurrences.insert(inactive).await.unwrap();

    let report = fx.job.run_once(date(2026, 3, 2), now()).await.unwrap();
    assert_eq!(report, ExtensionReport::default());
    assert_eq!(fx.appointments.count().await, 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let fx = fixture();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(fx.job.run(rx));

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("job stops after shutdown")
        .unwrap();
}
