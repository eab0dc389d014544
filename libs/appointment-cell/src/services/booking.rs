// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{weekday_from_index, weekday_index};

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentLinks, AppointmentStatus,
    AppointmentType, BookAppointmentRequest, BookingResponse, ConflictCheck, ConflictCheckRequest,
    ConflictExclusions, ConflictPolicy, LinkAction, LinkCredentials, LinkRejection, LinkValidation,
    OccurrenceWithException, RecurrenceDefinition, RecurrencePreviewRequest, RecurringBookingRequest,
    RecurringBookingResponse, RescheduleAppointmentRequest, SeriesConflict,
    SeriesConflictCheckRequest, ShiftWeekdayRequest, ShiftWeekdayResponse, TimeInterval,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::links::{link_expiry, LinkService};
use crate::services::recurrence::{
    add_exception, is_series_date, parse_options, remove_exception, shift_to_weekday, RecurrenceCalculator,
};
use crate::store::{AppointmentStore, RecurrenceStore};
use crate::timezone::ClinicTimezone;

/// Fields shared by single and series bookings.
struct NewAppointment<'a> {
    professional_id: Uuid,
    patient_id: Option<Uuid>,
    patient_name: Option<&'a str>,
    title: Option<&'a str>,
    appointment_type: AppointmentType,
    blocks_time: Option<bool>,
    group_id: Option<Uuid>,
    recurrence_id: Option<Uuid>,
}

impl NewAppointment<'_> {
    fn build(&self, interval: TimeInterval, status: AppointmentStatus, now: DateTime<Utc>) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            professional_id: self.professional_id,
            patient_id: self.patient_id,
            patient_name: self.patient_name.map(str::to_string),
            title: self.title.map(str::to_string),
            scheduled_at: interval.scheduled_at,
            end_at: interval.end_at,
            status,
            appointment_type: self.appointment_type,
            blocks_time: self.blocks_time.unwrap_or_else(|| self.appointment_type.default_blocks_time()),
            group_id: self.group_id,
            recurrence_id: self.recurrence_id,
            confirmed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub struct AppointmentBookingService {
    conflicts: ConflictDetectionService,
    lifecycle: AppointmentLifecycleService,
    calculator: RecurrenceCalculator,
    appointments: Arc<dyn AppointmentStore>,
    recurrences: Arc<dyn RecurrenceStore>,
    links: Arc<dyn LinkService>,
    link_expiry_hours: i64,
    timezone: ClinicTimezone,
}

impl AppointmentBookingService {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        recurrences: Arc<dyn RecurrenceStore>,
        links: Arc<dyn LinkService>,
        link_expiry_hours: i64,
        timezone: ClinicTimezone,
    ) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(appointments.clone()),
            lifecycle: AppointmentLifecycleService::new(),
            calculator: RecurrenceCalculator::new(timezone),
            appointments,
            recurrences,
            links,
            link_expiry_hours,
            timezone,
        }
    }

    pub fn timezone(&self) -> ClinicTimezone {
        self.timezone
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments.get(appointment_id).await
    }

    pub async fn get_recurrence(&self, recurrence_id: Uuid) -> Result<RecurrenceDefinition, AppointmentError> {
        self.recurrences.get(recurrence_id).await
    }

    // ==========================================================================
    // CONFLICT CHECKS
    // ==========================================================================

    pub async fn check_conflict(&self, request: &ConflictCheckRequest) -> Result<ConflictCheck, AppointmentError> {
        let interval = TimeInterval::new(request.scheduled_at, request.end_at)?;
        let exclusions = ConflictExclusions {
            exclude_ids: request.exclude_appointment_id.into_iter().collect(),
            exclude_group_id: request.exclude_group_id,
        };

        self.conflicts.check_conflicts(request.professional_id, interval, &exclusions).await
    }

    pub async fn check_series(&self, request: &SeriesConflictCheckRequest) -> Result<Vec<SeriesConflict>, AppointmentError> {
        let exclusions = ConflictExclusions {
            exclude_ids: request.exclude_appointment_ids.clone(),
            exclude_group_id: request.exclude_group_id,
        };

        self.conflicts
            .bulk_conflict_check(request.professional_id, &request.intervals, &exclusions)
            .await
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    /// Book a single appointment under lock
    #[instrument(skip(self, request), fields(professional_id = %request.professional_id))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingResponse, AppointmentError> {
        let interval = TimeInterval::new(request.scheduled_at, request.end_at)?;
        validate_participant(request.appointment_type, request.patient_id, request.title.as_deref())?;

        let appointment = NewAppointment {
            professional_id: request.professional_id,
            patient_id: request.patient_id,
            patient_name: request.patient_name.as_deref(),
            title: request.title.as_deref(),
            appointment_type: request.appointment_type,
            blocks_time: request.blocks_time,
            group_id: request.group_id,
            recurrence_id: None,
        }
        .build(interval, self.lifecycle.initial_status(), now);

        // Siblings of the same group session may share the slot
        let exclusions = ConflictExclusions::none().with_group(request.group_id);
        let mut outcome = self
            .conflicts
            .book_checked(request.professional_id, vec![appointment], &exclusions, ConflictPolicy::Reject)
            .await?;

        if let Some(series_conflict) = outcome.conflicts.pop() {
            return Err(AppointmentError::Conflict(series_conflict.conflict));
        }
        let appointment = outcome
            .inserted
            .pop()
            .ok_or_else(|| AppointmentError::Database("Booking returned no appointment".to_string()))?;

        info!("Appointment {} booked for professional {}", appointment.id, appointment.professional_id);
        let links = self.issue_links_quietly(&appointment, now).await;
        Ok(BookingResponse { appointment, links })
    }

    /// Create a recurrence and book its occurrences in one locked batch
    #[instrument(skip(self, request), fields(professional_id = %request.professional_id))]
    pub async fn book_recurring(
        &self,
        request: RecurringBookingRequest,
        now: DateTime<Utc>,
    ) -> Result<RecurringBookingResponse, AppointmentError> {
        let options = parse_options(request.start_date, &request.recurrence)?;
        validate_participant(request.appointment_type, request.patient_id, request.title.as_deref())?;

        let occurrences = self.calculator.generate_occurrences(
            request.start_date,
            request.start_time,
            request.duration_minutes,
            &options,
            &[],
        )?;
        let last_date = occurrences
            .last()
            .map(|o| o.date)
            .ok_or_else(|| AppointmentError::Validation("Recurrence produces no occurrences".to_string()))?;

        let definition = self
            .recurrences
            .insert(RecurrenceDefinition {
                id: Uuid::new_v4(),
                professional_id: request.professional_id,
                patient_id: request.patient_id,
                patient_name: request.patient_name.clone(),
                title: request.title.clone(),
                appointment_type: request.appointment_type,
                recurrence_type: options.recurrence_type,
                end_type: options.end_type,
                start_date: request.start_date,
                start_time: request.start_time,
                duration_minutes: request.duration_minutes,
                day_of_week: weekday_index(request.start_date.weekday()),
                end_date: options.end_date,
                occurrences: options.occurrences,
                exceptions: Vec::new(),
                last_generated_date: Some(last_date),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let template = NewAppointment {
            professional_id: request.professional_id,
            patient_id: request.patient_id,
            patient_name: request.patient_name.as_deref(),
            title: request.title.as_deref(),
            appointment_type: request.appointment_type,
            blocks_time: None,
            group_id: None,
            recurrence_id: Some(definition.id),
        };
        let batch: Vec<Appointment> = occurrences
            .iter()
            .map(|o| template.build(o.interval(), self.lifecycle.initial_status(), now))
            .collect();

        let outcome = self
            .conflicts
            .book_checked(request.professional_id, batch, &ConflictExclusions::none(), request.conflict_policy)
            .await?;

        if outcome.inserted.is_empty() {
            // Nothing references the definition: drop it
            self.recurrences.delete(definition.id).await?;
            warn!("Recurrence {} discarded, no occurrence could be booked", definition.id);
            return Err(AppointmentError::SeriesConflict(outcome.conflicts));
        }

        info!(
            "Recurrence {} created with {} occurrence(s), {} skipped",
            definition.id,
            outcome.inserted.len(),
            outcome.conflicts.len()
        );

        let mut appointments = Vec::with_capacity(outcome.inserted.len());
        for appointment in outcome.inserted {
            let links = self.issue_links_quietly(&appointment, now).await;
            appointments.push(BookingResponse { appointment, links });
        }

        Ok(RecurringBookingResponse {
            recurrence: Some(definition),
            appointments,
            conflicts: outcome.conflicts,
        })
    }

    // ==========================================================================
    // RESCHEDULING
    // ==========================================================================

    #[instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingResponse, AppointmentError> {
        let interval = TimeInterval::new(request.scheduled_at, request.end_at)?;
        let current = self.appointments.get(appointment_id).await?;

        let appointment = self.move_appointment(&current, interval, now).await?;
        let links = self.issue_links_quietly(&appointment, now).await;
        Ok(BookingResponse { appointment, links })
    }

    /// Move an appointment to the next occurrence of another weekday, keeping
    /// time of day and duration. Optionally moves every later live occurrence
    /// of its series and the series' weekday with it.
    #[instrument(skip(self, request))]
    pub async fn shift_weekday(
        &self,
        appointment_id: Uuid,
        request: ShiftWeekdayRequest,
        now: DateTime<Utc>,
    ) -> Result<ShiftWeekdayResponse, AppointmentError> {
        let target = weekday_from_index(request.day_of_week).ok_or_else(|| {
            AppointmentError::Validation("Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string())
        })?;
        let current = self.appointments.get(appointment_id).await?;

        let shifted_interval = self.shifted_interval(&current, target);
        let moved = self.move_appointment(&current, shifted_interval, now).await?;
        self.issue_links_quietly(&moved, now).await;

        let mut response = ShiftWeekdayResponse {
            appointments: vec![moved.clone()],
            conflicts: Vec::new(),
            recurrence: None,
        };

        let Some(recurrence_id) = current.recurrence_id.filter(|_| request.apply_to_series) else {
            return Ok(response);
        };

        // Positions are counted over the whole series, in start order
        let series = self.appointments.list_for_recurrence(recurrence_id).await?;
        let later = series
            .iter()
            .enumerate()
            .filter(|(_, a)| a.id != current.id && a.scheduled_at > current.scheduled_at)
            .filter(|(_, a)| !a.status.is_cancelled() && !self.lifecycle.is_terminal(a.status));

        for (index, appointment) in later {
            let interval = self.shifted_interval(appointment, target);
            match self.move_appointment(appointment, interval, now).await {
                Ok(moved) => {
                    self.issue_links_quietly(&moved, now).await;
                    response.appointments.push(moved);
                }
                Err(AppointmentError::Conflict(conflict)) => {
                    response.conflicts.push(SeriesConflict { index, conflict });
                }
                Err(e) => return Err(e),
            }
        }

        let new_anchor = self.timezone.local_date(moved.scheduled_at);
        response.recurrence = Some(
            self.recurrences
                .update_schedule(recurrence_id, request.day_of_week, new_anchor)
                .await?,
        );
        info!(
            "Series {} moved to weekday {} ({} conflict(s))",
            recurrence_id,
            request.day_of_week,
            response.conflicts.len()
        );

        Ok(response)
    }

    fn shifted_interval(&self, appointment: &Appointment, target: chrono::Weekday) -> TimeInterval {
        let local = self.timezone.local(appointment.scheduled_at);
        let scheduled_at = self.timezone.local_to_utc(shift_to_weekday(local, target));
        TimeInterval {
            scheduled_at,
            end_at: scheduled_at + (appointment.end_at - appointment.scheduled_at),
        }
    }

    /// Locked move. A confirmed appointment goes back to AGENDADO since the
    /// confirmation was for the old time.
    async fn move_appointment(
        &self,
        current: &Appointment,
        interval: TimeInterval,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if current.status.is_cancelled() || self.lifecycle.is_terminal(current.status) {
            return Err(AppointmentError::Validation(format!(
                "Appointment in status {} cannot be rescheduled",
                current.status
            )));
        }

        let status = if current.status == AppointmentStatus::Confirmado {
            Some(self.lifecycle.plan_transition(current.status, AppointmentStatus::Agendado, now)?)
        } else {
            None
        };

        let exclusions = ConflictExclusions::excluding(current.id).with_group(current.group_id);
        let moved = self
            .conflicts
            .update_checked(
                current.id,
                AppointmentChange { interval, status, expected_status: current.status },
                &exclusions,
            )
            .await?;

        self.invalidate_links_quietly(current.id, None, now).await;
        debug!("Appointment {} moved to {}", moved.id, moved.scheduled_at);
        Ok(moved)
    }

    // ==========================================================================
    // STATUS
    // ==========================================================================

    /// Apply a status transition with its side effects
    #[instrument(skip(self))]
    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.appointments.get(appointment_id).await?;
        let update = self.lifecycle.plan_transition(current.status, target, now)?;

        // Leaving a cancelled state takes the slot back, so it goes through the lock
        let updated = if current.status.is_cancelled() && !target.is_cancelled() && current.blocks_time {
            let exclusions = ConflictExclusions::excluding(current.id).with_group(current.group_id);
            self.conflicts
                .update_checked(
                    current.id,
                    AppointmentChange {
                        interval: current.interval(),
                        status: Some(update),
                        expected_status: current.status,
                    },
                    &exclusions,
                )
                .await?
        } else {
            self.appointments.apply_status(current.id, current.status, &update).await?
        };

        if update.updates_last_visit {
            if let Some(patient_id) = updated.patient_id {
                self.appointments.record_patient_visit(patient_id, updated.scheduled_at).await?;
            }
        }

        match target {
            AppointmentStatus::Confirmado => {
                self.invalidate_links_quietly(updated.id, Some(LinkAction::Confirm), now).await
            }
            AppointmentStatus::Agendado => {}
            _ => self.invalidate_links_quietly(updated.id, None, now).await,
        }

        info!("Appointment {} status {} -> {}", updated.id, current.status, updated.status);
        Ok(updated)
    }

    // ==========================================================================
    // RECURRENCES
    // ==========================================================================

    pub fn preview(&self, request: &RecurrencePreviewRequest) -> Result<Vec<OccurrenceWithException>, AppointmentError> {
        let options = parse_options(request.start_date, &request.recurrence)?;
        Ok(self.calculator.generate_with_exceptions(
            request.start_date,
            request.start_time,
            request.duration_minutes,
            &options,
            &request.exceptions,
        )?)
    }

    pub async fn recurrence_occurrences(
        &self,
        recurrence_id: Uuid,
    ) -> Result<Vec<OccurrenceWithException>, AppointmentError> {
        let definition = self.recurrences.get(recurrence_id).await?;
        Ok(self.calculator.expand_definition(&definition)?)
    }

    /// Skip or restore one occurrence. Skipping cancels the materialised
    /// appointment of that date; restoring re-activates it under lock.
    #[instrument(skip(self))]
    pub async fn toggle_exception(
        &self,
        recurrence_id: Uuid,
        date: NaiveDate,
        skip: bool,
        now: DateTime<Utc>,
    ) -> Result<RecurrenceDefinition, AppointmentError> {
        let definition = self.recurrences.get(recurrence_id).await?;
        let materialised: Vec<Appointment> = self
            .appointments
            .list_for_recurrence(recurrence_id)
            .await?
            .into_iter()
            .filter(|a| self.timezone.local_date(a.scheduled_at) == date)
            .collect();

        let in_series = is_series_date(&definition, date);
        if !in_series && materialised.is_empty() {
            return Err(AppointmentError::Validation(format!(
                "{} is not an occurrence of recurrence {}",
                date, recurrence_id
            )));
        }

        let exceptions = if skip {
            let live = materialised
                .iter()
                .filter(|a| !a.status.is_cancelled() && !self.lifecycle.is_terminal(a.status));
            for appointment in live {
                self.change_status(appointment.id, AppointmentStatus::CanceladoAcordado, now).await?;
            }
            add_exception(&definition.exceptions, date)
        } else {
            let restorable = materialised
                .iter()
                .filter(|a| a.status == AppointmentStatus::CanceladoAcordado);
            for appointment in restorable {
                self.change_status(appointment.id, AppointmentStatus::Agendado, now).await?;
            }
            remove_exception(&definition.exceptions, date)
        };

        let updated = self.recurrences.update_exceptions(recurrence_id, &exceptions).await?;
        info!(
            "Recurrence {} occurrence {} {}",
            recurrence_id,
            date,
            if skip { "skipped" } else { "restored" }
        );
        Ok(updated)
    }

    // ==========================================================================
    // PUBLIC LINKS
    // ==========================================================================

    pub async fn issue_links(&self, appointment_id: Uuid, now: DateTime<Utc>) -> Result<AppointmentLinks, AppointmentError> {
        let appointment = self.appointments.get(appointment_id).await?;
        if appointment.status.is_cancelled() || self.lifecycle.is_terminal(appointment.status) {
            return Err(AppointmentError::Validation(format!(
                "No links can be issued for an appointment in status {}",
                appointment.status
            )));
        }
        self.links.issue(&appointment, now).await
    }

    pub async fn validate_link(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<LinkValidation, AppointmentError> {
        Ok(match self.resolve_link(credentials, action, now).await? {
            Ok(appointment) => LinkValidation::Valid { appointment_id: appointment.id },
            Err(rejection) => LinkValidation::Rejected(rejection),
        })
    }

    /// Follow a confirm/cancel link on the patient's behalf
    #[instrument(skip(self, credentials))]
    pub async fn consume_link(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .resolve_link(credentials, action, now)
            .await?
            .map_err(AppointmentError::LinkRejected)?;

        let updated = self.change_status(appointment.id, action.target_status(), now).await?;
        self.links.invalidate(updated.id, Some(action), now).await?;
        Ok(updated)
    }

    async fn resolve_link(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<Result<Appointment, LinkRejection>, AppointmentError> {
        let appointment_id = match self.links.validate(credentials, action, now).await? {
            LinkValidation::Valid { appointment_id } => appointment_id,
            LinkValidation::Rejected(rejection) => return Ok(Err(rejection)),
        };

        let appointment = match self.appointments.get(appointment_id).await {
            Ok(appointment) => appointment,
            Err(AppointmentError::NotFound) => return Ok(Err(LinkRejection::Invalid)),
            Err(e) => return Err(e),
        };

        // Signed links carry the expiry of the schedule they were issued for
        let superseded = credentials
            .expires
            .is_some_and(|expires| expires != link_expiry(appointment.scheduled_at, self.link_expiry_hours).timestamp());
        if superseded {
            return Ok(Err(LinkRejection::Invalid));
        }

        // Links only act on a live appointment; once it is cancelled or
        // finished every link for it is spent, whichever mechanism issued it
        let target = action.target_status();
        let live = !appointment.status.is_cancelled() && !self.lifecycle.is_terminal(appointment.status);
        if !live
            || appointment.status == target
            || !self.lifecycle.get_valid_transitions(appointment.status).contains(&target)
        {
            return Ok(Err(LinkRejection::AlreadyUsed));
        }

        Ok(Ok(appointment))
    }

    async fn issue_links_quietly(&self, appointment: &Appointment, now: DateTime<Utc>) -> Option<AppointmentLinks> {
        if !appointment.appointment_type.is_patient_entry() {
            return None;
        }
        match self.links.issue(appointment, now).await {
            Ok(links) => Some(links),
            Err(e) => {
                warn!("Could not issue links for appointment {}: {}", appointment.id, e);
                None
            }
        }
    }

    async fn invalidate_links_quietly(&self, appointment_id: Uuid, action: Option<LinkAction>, now: DateTime<Utc>) {
        if let Err(e) = self.links.invalidate(appointment_id, action, now).await {
            warn!("Could not invalidate links for appointment {}: {}", appointment_id, e);
        }
    }
}

fn validate_participant(
    appointment_type: AppointmentType,
    patient_id: Option<Uuid>,
    title: Option<&str>,
) -> Result<(), AppointmentError> {
    if appointment_type.is_patient_entry() && patient_id.is_none() {
        return Err(AppointmentError::Validation("Consultations require a patient".to_string()));
    }
    if !appointment_type.is_patient_entry() && title.map_or(true, |t| t.trim().is_empty()) {
        return Err(AppointmentError::Validation(format!("{} entries require a title", appointment_type)));
    }
    Ok(())
}

