use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{AvailabilityError, AvailabilityException, AvailabilityRule, ProfessionalSettings};

mod memory;
mod supabase;

pub use memory::InMemoryAvailabilityStore;
pub use supabase::SupabaseAvailabilityStore;

/// Persistence for the weekly templates and their date overrides.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn rules_for_professional(&self, professional_id: Uuid) -> Result<Vec<AvailabilityRule>, AvailabilityError>;

    async fn rules_for_day(&self, professional_id: Uuid, day_of_week: i32) -> Result<Vec<AvailabilityRule>, AvailabilityError>;

    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, AvailabilityError>;

    async fn exceptions_for_date(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<AvailabilityException>, AvailabilityError>;

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<AvailabilityException, AvailabilityError>;

    async fn professional_settings(&self, professional_id: Uuid) -> Result<Option<ProfessionalSettings>, AvailabilityError>;

    async fn list_professionals(&self) -> Result<Vec<ProfessionalSettings>, AvailabilityError>;
}
