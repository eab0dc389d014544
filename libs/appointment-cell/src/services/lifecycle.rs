// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus, FieldUpdate, StatusUpdate};

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Status every newly booked appointment starts in
    pub fn initial_status(&self) -> AppointmentStatus {
        AppointmentStatus::Agendado
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Agendado => vec![
                AppointmentStatus::Confirmado,
                AppointmentStatus::Finalizado,
                AppointmentStatus::CanceladoAcordado,
                AppointmentStatus::CanceladoFalta,
                AppointmentStatus::CanceladoProfissional,
            ],
            AppointmentStatus::Confirmado => vec![
                AppointmentStatus::Agendado,
                AppointmentStatus::Finalizado,
                AppointmentStatus::CanceladoAcordado,
                AppointmentStatus::CanceladoFalta,
                AppointmentStatus::CanceladoProfissional,
            ],
            // Agreed cancellations and no-shows can be reclassified or undone
            AppointmentStatus::CanceladoAcordado => vec![
                AppointmentStatus::Agendado,
                AppointmentStatus::CanceladoFalta,
            ],
            AppointmentStatus::CanceladoFalta => vec![
                AppointmentStatus::Agendado,
                AppointmentStatus::CanceladoAcordado,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Finalizado => vec![],
            AppointmentStatus::CanceladoProfissional => vec![],
        }
    }

    pub fn is_terminal(&self, status: AppointmentStatus) -> bool {
        self.get_valid_transitions(status).is_empty()
    }

    /// Timestamp changes implied by entering `target`. Depends on the target only.
    pub fn side_effects(&self, target: AppointmentStatus, now: DateTime<Utc>) -> StatusUpdate {
        let (confirmed_at, cancelled_at) = match target {
            AppointmentStatus::Confirmado => (FieldUpdate::Set(now), FieldUpdate::Unchanged),
            AppointmentStatus::CanceladoAcordado
            | AppointmentStatus::CanceladoFalta
            | AppointmentStatus::CanceladoProfissional => (FieldUpdate::Unchanged, FieldUpdate::Set(now)),
            AppointmentStatus::Agendado => (FieldUpdate::Cleared, FieldUpdate::Cleared),
            AppointmentStatus::Finalizado => (FieldUpdate::Unchanged, FieldUpdate::Unchanged),
        };

        StatusUpdate {
            status: target,
            confirmed_at,
            cancelled_at,
            updates_last_visit: self.updates_last_visit(target),
        }
    }

    pub fn updates_last_visit(&self, target: AppointmentStatus) -> bool {
        target == AppointmentStatus::Finalizado
    }

    /// Validate and compute the update in one step; rejections mutate nothing.
    pub fn plan_transition(
        &self,
        current_status: AppointmentStatus,
        target: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<StatusUpdate, AppointmentError> {
        self.validate_status_transition(current_status, target)?;
        Ok(self.side_effects(target, now))
    }
}
