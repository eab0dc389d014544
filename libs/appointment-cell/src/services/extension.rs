// libs/appointment-cell/src/services/extension.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, ConflictExclusions, ConflictPolicy, RecurrenceDefinition};
use crate::services::conflict::ConflictDetectionService;
use crate::services::recurrence::RecurrenceCalculator;
use crate::store::{AppointmentStore, RecurrenceStore};
use crate::timezone::ClinicTimezone;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionReport {
    pub series_checked: usize,
    pub series_extended: usize,
    pub appointments_created: usize,
    pub conflicts_skipped: usize,
    pub failures: usize,
}

/// Keeps open-ended series materialised ahead of today.
pub struct RecurrenceExtensionJob {
    appointments: Arc<dyn AppointmentStore>,
    recurrences: Arc<dyn RecurrenceStore>,
    conflicts: ConflictDetectionService,
    calculator: RecurrenceCalculator,
    extension_months: u32,
    horizon_days: i64,
    tick: std::time::Duration,
}

impl RecurrenceExtensionJob {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        recurrences: Arc<dyn RecurrenceStore>,
        timezone: ClinicTimezone,
        config: &AppConfig,
    ) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(appointments.clone()),
            appointments,
            recurrences,
            calculator: RecurrenceCalculator::new(timezone),
            extension_months: config.recurrence_extension_months.max(1),
            horizon_days: config.recurrence_extension_horizon_days,
            tick: std::time::Duration::from_secs(config.recurrence_extension_interval_secs.max(1)),
        }
    }

    /// Tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Recurrence extension job started (every {:?})", self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let today = self.calculator.timezone().local_date(now);
                    match self.run_once(today, now).await {
                        Ok(report) if report.appointments_created > 0 => {
                            info!("Recurrence extension: {:?}", report);
                        }
                        Ok(report) => debug!("Recurrence extension: {:?}", report),
                        Err(e) => error!("Recurrence extension failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Recurrence extension job stopped");
    }

    /// One pass over every active INDEFINITE series. A failing series is
    /// logged and counted; the others still run.
    #[instrument(skip(self, now))]
    pub async fn run_once(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<ExtensionReport, AppointmentError> {
        let mut report = ExtensionReport::default();
        let horizon = today + Duration::days(self.horizon_days);

        for definition in self.recurrences.list_active_indefinite().await? {
            report.series_checked += 1;

            let last_generated = definition.last_generated_date.unwrap_or(definition.start_date);
            if last_generated > horizon {
                continue;
            }

            match self.extend(&definition, last_generated, horizon, now).await {
                Ok((created, skipped)) => {
                    if created > 0 {
                        report.series_extended += 1;
                    }
                    report.appointments_created += created;
                    report.conflicts_skipped += skipped;
                }
                Err(e) => {
                    warn!("Could not extend recurrence {}: {}", definition.id, e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn extend(
        &self,
        definition: &RecurrenceDefinition,
        last_generated: NaiveDate,
        horizon: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), AppointmentError> {
        // Whole windows until the series reaches past the horizon, so a second
        // pass on the same day finds nothing left to do
        let mut window = Vec::new();
        let mut cursor = last_generated;
        while cursor <= horizon {
            let next = self.calculator.next_window(definition, cursor, self.extension_months);
            match next.last().map(|o| o.date) {
                Some(date) => cursor = date,
                None => break,
            }
            window.extend(next);
        }
        let Some(new_last) = window.last().map(|o| o.date) else {
            return Ok((0, 0));
        };

        // Dates already materialised by an interrupted earlier pass
        let timezone = self.calculator.timezone();
        let existing: HashSet<NaiveDate> = self
            .appointments
            .list_for_recurrence(definition.id)
            .await?
            .iter()
            .map(|a| timezone.local_date(a.scheduled_at))
            .collect();

        let batch: Vec<Appointment> = window
            .iter()
            .filter(|o| !existing.contains(&o.date))
            .map(|o| Appointment {
                id: Uuid::new_v4(),
                professional_id: definition.professional_id,
                patient_id: definition.patient_id,
                patient_name: definition.patient_name.clone(),
                title: definition.title.clone(),
                scheduled_at: o.scheduled_at,
                end_at: o.end_at,
                status: AppointmentStatus::Agendado,
                appointment_type: definition.appointment_type,
                blocks_time: definition.appointment_type.default_blocks_time(),
                group_id: None,
                recurrence_id: Some(definition.id),
                confirmed_at: None,
                cancelled_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let (created, skipped) = if batch.is_empty() {
            (0, 0)
        } else {
            let outcome = self
                .conflicts
                .book_checked(
                    definition.professional_id,
                    batch,
                    &ConflictExclusions::none(),
                    ConflictPolicy::SkipConflicting,
                )
                .await?;
            (outcome.inserted.len(), outcome.conflicts.len())
        };

        self.recurrences.set_last_generated(definition.id, new_last).await?;
        debug!(
            "Recurrence {} extended to {} ({} created, {} skipped)",
            definition.id, new_last, created, skipped
        );
        Ok((created, skipped))
    }
}
