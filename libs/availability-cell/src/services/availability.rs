use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::{
    weekday_index, AvailabilityError, AvailabilityException, AvailabilityRule,
    CreateAvailabilityExceptionRequest, CreateAvailabilityRuleRequest, ProfessionalSettings,
};
use crate::store::AvailabilityStore;

/// Everything the slot builder needs to know about one professional's day.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub professional_id: Uuid,
    pub display_name: String,
    pub date: NaiveDate,
    pub slot_minutes: u32,
    pub rules: Vec<AvailabilityRule>,
    pub exceptions: Vec<AvailabilityException>,
}

impl DaySchedule {
    pub fn is_fully_blocked(&self) -> bool {
        self.exceptions.iter().any(AvailabilityException::is_full_day)
    }
}

pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
    default_slot_minutes: u32,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AvailabilityStore>, default_slot_minutes: u32) -> Self {
        Self { store, default_slot_minutes }
    }

    /// Create a weekly availability rule for a professional
    #[instrument(skip(self, request))]
    pub async fn create_rule(
        &self,
        professional_id: Uuid,
        request: CreateAvailabilityRuleRequest,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        if request.start_time >= request.end_time {
            return Err(AvailabilityError::Validation("Start time must be before end time".to_string()));
        }

        if !(0..=6).contains(&request.day_of_week) {
            return Err(AvailabilityError::Validation(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        let existing = self.store.rules_for_day(professional_id, request.day_of_week).await?;
        let overlaps = existing.iter().any(|rule| {
            rule.is_active && request.start_time < rule.end_time && request.end_time > rule.start_time
        });
        if overlaps {
            return Err(AvailabilityError::OverlappingRule);
        }

        let now = Utc::now();
        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            professional_id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time: request.end_time,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let created = self.store.insert_rule(rule).await?;
        info!("Availability rule {} created for professional {}", created.id, professional_id);
        Ok(created)
    }

    pub async fn list_rules(&self, professional_id: Uuid) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        self.store.rules_for_professional(professional_id).await
    }

    /// Create a full-day or partial exception for one date
    #[instrument(skip(self, request))]
    pub async fn create_exception(
        &self,
        professional_id: Uuid,
        request: CreateAvailabilityExceptionRequest,
    ) -> Result<AvailabilityException, AvailabilityError> {
        match (request.start_time, request.end_time) {
            (None, None) => {
                let existing = self.store.exceptions_for_date(professional_id, request.date).await?;
                if existing.iter().any(AvailabilityException::is_full_day) {
                    return Err(AvailabilityError::DuplicateException(request.date));
                }
            }
            (Some(start), Some(end)) if start < end => {}
            (Some(_), Some(_)) => {
                return Err(AvailabilityError::Validation("Start time must be before end time".to_string()));
            }
            _ => {
                return Err(AvailabilityError::Validation(
                    "Partial exceptions need both start and end time".to_string(),
                ));
            }
        }

        let exception = AvailabilityException {
            id: Uuid::new_v4(),
            professional_id,
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            reason: request.reason,
            created_at: Utc::now(),
        };

        self.store.insert_exception(exception).await
    }

    pub async fn exceptions_for_date(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        self.store.exceptions_for_date(professional_id, date).await
    }

    /// Active rules for the date's weekday plus that date's exceptions.
    pub async fn day_schedule(&self, professional_id: Uuid, date: NaiveDate) -> Result<DaySchedule, AvailabilityError> {
        debug!("Loading day schedule for professional {} on {}", professional_id, date);

        let settings = self.settings_or_default(professional_id).await?;
        let rules = self.store
            .rules_for_day(professional_id, weekday_index(date.weekday()))
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect();
        let exceptions = self.store.exceptions_for_date(professional_id, date).await?;

        Ok(DaySchedule {
            professional_id,
            display_name: settings.display_name,
            date,
            slot_minutes: settings.appointment_duration_minutes.unwrap_or(self.default_slot_minutes),
            rules,
            exceptions,
        })
    }

    pub async fn list_professionals(&self) -> Result<Vec<ProfessionalSettings>, AvailabilityError> {
        self.store.list_professionals().await
    }

    async fn settings_or_default(&self, professional_id: Uuid) -> Result<ProfessionalSettings, AvailabilityError> {
        Ok(self.store
            .professional_settings(professional_id)
            .await?
            .unwrap_or_else(|| ProfessionalSettings {
                professional_id,
                display_name: String::new(),
                appointment_duration_minutes: None,
            }))
    }
}
