use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AvailabilityError, AvailabilityException, AvailabilityRule, ProfessionalSettings};
use super::AvailabilityStore;

pub struct SupabaseAvailabilityStore {
    supabase: Arc<SupabaseClient>,
    service_token: Option<String>,
}

impl SupabaseAvailabilityStore {
    pub fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            service_token: config.service_token().map(str::to_string),
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AvailabilityError> {
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, path, self.service_token.as_deref(), None)
            .await?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse rows: {}", e)))
    }

    async fn insert<T: serde::de::DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, AvailabilityError> {
        let mut rows: Vec<T> = self.supabase
            .request_returning(Method::POST, path, self.service_token.as_deref(), body)
            .await?;

        rows.pop()
            .ok_or_else(|| AvailabilityError::Database("Insert returned no rows".to_string()))
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn rules_for_professional(&self, professional_id: Uuid) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        debug!("Fetching availability rules for professional {}", professional_id);
        let path = format!(
            "/rest/v1/availability_rules?professional_id=eq.{}&order=day_of_week.asc,start_time.asc",
            professional_id
        );
        self.fetch(&path).await
    }

    async fn rules_for_day(&self, professional_id: Uuid, day_of_week: i32) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_rules?professional_id=eq.{}&day_of_week=eq.{}&order=start_time.asc",
            professional_id, day_of_week
        );
        self.fetch(&path).await
    }

    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, AvailabilityError> {
        let body = json!({
            "id": rule.id,
            "professional_id": rule.professional_id,
            "day_of_week": rule.day_of_week,
            "start_time": rule.start_time.format("%H:%M:%S").to_string(),
            "end_time": rule.end_time.format("%H:%M:%S").to_string(),
            "is_active": rule.is_active,
            "created_at": rule.created_at.to_rfc3339(),
            "updated_at": rule.updated_at.to_rfc3339()
        });
        self.insert("/rest/v1/availability_rules", body).await
    }

    async fn exceptions_for_date(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_exceptions?professional_id=eq.{}&date=eq.{}",
            professional_id, date
        );
        self.fetch(&path).await
    }

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<AvailabilityException, AvailabilityError> {
        let body = json!({
            "id": exception.id,
            "professional_id": exception.professional_id,
            "date": exception.date,
            "start_time": exception.start_time.map(|t| t.format("%H:%M:%S").to_string()),
            "end_time": exception.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            "reason": exception.reason,
            "created_at": exception.created_at.to_rfc3339()
        });
        self.insert("/rest/v1/availability_exceptions", body).await
    }

    async fn professional_settings(&self, professional_id: Uuid) -> Result<Option<ProfessionalSettings>, AvailabilityError> {
        let path = format!(
            "/rest/v1/professionals?professional_id=eq.{}&select=professional_id,display_name,appointment_duration_minutes",
            professional_id
        );
        let mut rows: Vec<ProfessionalSettings> = self.fetch(&path).await?;
        Ok(rows.pop())
    }

    async fn list_professionals(&self) -> Result<Vec<ProfessionalSettings>, AvailabilityError> {
        self.fetch("/rest/v1/professionals?select=professional_id,display_name,appointment_duration_minutes&order=display_name.asc").await
    }
}
