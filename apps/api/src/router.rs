use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::info;

use appointment_cell::{
    appointment_routes, build_link_service, AppointmentBookingService, AppointmentStore, ClinicTimezone,
    InMemoryAppointmentStore, InMemoryRecurrenceStore, InMemoryTokenStore, RecurrenceExtensionJob,
    RecurrenceStore, SchedulingState, SlotBuilderService, SupabaseAppointmentStore, SupabaseRecurrenceStore,
    SupabaseTokenStore, TokenStore,
};
use availability_cell::{
    availability_routes, AvailabilityService, AvailabilityState, AvailabilityStore, InMemoryAvailabilityStore,
    SupabaseAvailabilityStore,
};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

/// Everything the HTTP layer and the background job share.
pub struct AppServices {
    pub scheduling: SchedulingState,
    pub availability: AvailabilityState,
    pub extension_job: RecurrenceExtensionJob,
}

struct Stores {
    availability: Arc<dyn AvailabilityStore>,
    appointments: Arc<dyn AppointmentStore>,
    recurrences: Arc<dyn RecurrenceStore>,
    tokens: Arc<dyn TokenStore>,
}

fn build_stores(config: &AppConfig) -> Stores {
    match config.storage_backend {
        StorageBackend::Memory => {
            info!("Using in-memory stores; data is lost on restart");
            Stores {
                availability: Arc::new(InMemoryAvailabilityStore::new()),
                appointments: Arc::new(InMemoryAppointmentStore::new()),
                recurrences: Arc::new(InMemoryRecurrenceStore::new()),
                tokens: Arc::new(InMemoryTokenStore::new()),
            }
        }
        StorageBackend::Supabase => {
            info!("Using Supabase stores at {}", config.supabase_url);
            let supabase = Arc::new(SupabaseClient::new(config));
            Stores {
                availability: Arc::new(SupabaseAvailabilityStore::new(supabase.clone(), config)),
                appointments: Arc::new(SupabaseAppointmentStore::new(supabase.clone(), config)),
                recurrences: Arc::new(SupabaseRecurrenceStore::new(supabase.clone(), config)),
                tokens: Arc::new(SupabaseTokenStore::new(supabase, config)),
            }
        }
    }
}

pub fn build_services(config: Arc<AppConfig>) -> AppServices {
    let stores = build_stores(&config);
    let timezone = ClinicTimezone::from_offset_minutes(config.clinic_utc_offset_minutes);

    let availability = Arc::new(AvailabilityService::new(
        stores.availability,
        config.default_appointment_duration_minutes,
    ));
    let links = build_link_service(&config, stores.tokens);

    let booking = Arc::new(AppointmentBookingService::new(
        stores.appointments.clone(),
        stores.recurrences.clone(),
        links,
        config.link_expiry_hours,
        timezone,
    ));
    let slots = Arc::new(SlotBuilderService::new(
        availability.clone(),
        stores.appointments.clone(),
        stores.recurrences.clone(),
        timezone,
    ));
    let extension_job = RecurrenceExtensionJob::new(stores.appointments, stores.recurrences, timezone, &config);

    AppServices {
        scheduling: SchedulingState {
            config: config.clone(),
            booking,
            slots,
            timezone,
        },
        availability: AvailabilityState {
            config,
            service: availability,
        },
        extension_job,
    }
}

pub fn create_router(scheduling: SchedulingState, availability: AvailabilityState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .merge(appointment_routes(scheduling))
        .merge(availability_routes(availability))
}
