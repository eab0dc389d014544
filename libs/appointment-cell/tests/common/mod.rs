#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentBookingService, AppointmentStatus, AppointmentType, BookAppointmentRequest,
    ClinicTimezone, InMemoryAppointmentStore, InMemoryRecurrenceStore, InMemoryTokenStore, LinkService,
    SignedLinkService, StoredTokenService,
};

pub const BASE_URL: &str = "https://agenda.example.com";
pub const LINK_SECRET: &str = "test-link-signing-secret";
pub const LINK_EXPIRY_HOURS: i64 = 24;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn timezone() -> ClinicTimezone {
    ClinicTimezone::from_offset_minutes(-180)
}

/// Clinic-local wall clock (UTC-3) as an instant.
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap() + Duration::hours(3)
}

pub fn appointment(professional_id: Uuid, scheduled_at: DateTime<Utc>, minutes: i64) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        professional_id,
        patient_id: Some(Uuid::new_v4()),
        patient_name: Some("Maria Souza".to_string()),
        title: None,
        scheduled_at,
        end_at: scheduled_at + Duration::minutes(minutes),
        status: AppointmentStatus::Agendado,
        appointment_type: AppointmentType::Consultation,
        blocks_time: true,
        group_id: None,
        recurrence_id: None,
        confirmed_at: None,
        cancelled_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn task(professional_id: Uuid, scheduled_at: DateTime<Utc>, minutes: i64, title: &str) -> Appointment {
    Appointment {
        patient_id: None,
        patient_name: None,
        title: Some(title.to_string()),
        appointment_type: AppointmentType::Task,
        ..appointment(professional_id, scheduled_at, minutes)
    }
}

pub fn book_request(professional_id: Uuid, scheduled_at: DateTime<Utc>, minutes: i64) -> BookAppointmentRequest {
    BookAppointmentRequest {
        professional_id,
        patient_id: Some(Uuid::new_v4()),
        patient_name: Some("Maria Souza".to_string()),
        title: None,
        scheduled_at,
        end_at: scheduled_at + Duration::minutes(minutes),
        appointment_type: AppointmentType::Consultation,
        blocks_time: None,
        group_id: None,
    }
}

pub struct Harness {
    pub booking: AppointmentBookingService,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub recurrences: Arc<InMemoryRecurrenceStore>,
    pub tokens: Arc<InMemoryTokenStore>,
}

impl Harness {
    fn with_links(links: impl FnOnce(Arc<InMemoryTokenStore>) -> Arc<dyn LinkService>) -> Self {
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let recurrences = Arc::new(InMemoryRecurrenceStore::new());
        let tokens = Arc::new(InMemoryTokenStore::new());

        let booking = AppointmentBookingService::new(
            appointments.clone(),
            recurrences.clone(),
            links(tokens.clone()),
            LINK_EXPIRY_HOURS,
            timezone(),
        );

        Self { booking, appointments, recurrences, tokens }
    }

    pub fn signed() -> Self {
        Self::with_links(|_| Arc::new(SignedLinkService::new(BASE_URL, LINK_SECRET, LINK_EXPIRY_HOURS)))
    }

    pub fn unsigned() -> Self {
        Self::with_links(|_| Arc::new(SignedLinkService::new(BASE_URL, "", LINK_EXPIRY_HOURS)))
    }

    pub fn stored() -> Self {
        Self::with_links(|tokens| Arc::new(StoredTokenService::new(BASE_URL, LINK_EXPIRY_HOURS, tokens)))
    }
}

/// Query string of a link URL.
pub fn query_of(url: &str) -> &str {
    url.split_once('?').map(|(_, q)| q).unwrap_or("")
}

pub fn query_value<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    query_of(url)
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

pub fn recurrence(
    professional_id: Uuid,
    recurrence_type: appointment_cell::RecurrenceType,
    start_date: NaiveDate,
    start_time: NaiveTime,
    patient_name: &str,
) -> appointment_cell::RecurrenceDefinition {
    use chrono::Datelike;

    appointment_cell::RecurrenceDefinition {
        id: Uuid::new_v4(),
        professional_id,
        patient_id: Some(Uuid::new_v4()),
        patient_name: Some(patient_name.to_string()),
        title: None,
        appointment_type: AppointmentType::Consultation,
        recurrence_type,
        end_type: appointment_cell::RecurrenceEndType::Indefinite,
        start_date,
        start_time,
        duration_minutes: 50,
        day_of_week: start_date.weekday().num_days_from_sunday() as i32,
        end_date: None,
        occurrences: None,
        exceptions: Vec::new(),
        last_generated_date: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
