pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod timezone;

// Re-export models and services for the API binary and tests
pub use models::*;
pub use router::{appointment_routes, SchedulingState};
pub use services::*;
pub use store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryRecurrenceStore, InMemoryTokenStore,
    RecurrenceStore, SupabaseAppointmentStore, SupabaseRecurrenceStore, SupabaseTokenStore, TokenStore,
};
pub use timezone::ClinicTimezone;
