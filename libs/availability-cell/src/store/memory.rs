use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AvailabilityError, AvailabilityException, AvailabilityRule, ProfessionalSettings};
use super::AvailabilityStore;

/// Process-local store for development and tests.
#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    rules: RwLock<Vec<AvailabilityRule>>,
    exceptions: RwLock<Vec<AvailabilityException>>,
    professionals: RwLock<Vec<ProfessionalSettings>>,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_professional(&self, settings: ProfessionalSettings) {
        let mut professionals = self.professionals.write().await;
        professionals.retain(|p| p.professional_id != settings.professional_id);
        professionals.push(settings);
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn rules_for_professional(&self, professional_id: Uuid) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        let mut rules: Vec<AvailabilityRule> = self.rules.read().await
            .iter()
            .filter(|r| r.professional_id == professional_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.day_of_week, r.start_time));
        Ok(rules)
    }

    async fn rules_for_day(&self, professional_id: Uuid, day_of_week: i32) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        let rules = self.rules_for_professional(professional_id).await?;
        Ok(rules.into_iter().filter(|r| r.day_of_week == day_of_week).collect())
    }

    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, AvailabilityError> {
        self.rules.write().await.push(rule.clone());
        Ok(rule)
    }

    async fn exceptions_for_date(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        Ok(self.exceptions.read().await
            .iter()
            .filter(|e| e.professional_id == professional_id && e.date == date)
            .cloned()
            .collect())
    }

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<AvailabilityException, AvailabilityError> {
        self.exceptions.write().await.push(exception.clone());
        Ok(exception)
    }

    async fn professional_settings(&self, professional_id: Uuid) -> Result<Option<ProfessionalSettings>, AvailabilityError> {
        Ok(self.professionals.read().await
            .iter()
            .find(|p| p.professional_id == professional_id)
            .cloned())
    }

    async fn list_professionals(&self) -> Result<Vec<ProfessionalSettings>, AvailabilityError> {
        let mut professionals = self.professionals.read().await.clone();
        professionals.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(professionals)
    }
}
