// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentType, BatchInsertOutcome,
    CheckedUpdate, ConflictCheck, ConflictExclusions, ConflictPolicy, ConflictingAppointment,
    SeriesConflict, TimeInterval,
};
use crate::store::AppointmentStore;

/// Half-open interval overlap. Back-to-back intervals do not overlap.
pub fn appointments_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && end1 > start2
}

/// Earliest stored appointment that blocks `interval`.
pub fn first_conflict<'a, I>(
    existing: I,
    interval: &TimeInterval,
    exclusions: &ConflictExclusions,
) -> Option<ConflictingAppointment>
where
    I: IntoIterator<Item = &'a Appointment>,
{
    existing
        .into_iter()
        .filter(|a| a.occupies_time() && !exclusions.excludes(a))
        .filter(|a| appointments_overlap(interval.scheduled_at, interval.end_at, a.scheduled_at, a.end_at))
        .min_by_key(|a| a.scheduled_at)
        .map(Appointment::as_conflict)
}

/// Decide which rows of a batch may be written, given what is already stored.
/// Rows earlier in the batch count as existing for later rows, except between
/// siblings of the excluded group.
pub fn plan_batch(
    existing: &[Appointment],
    batch: Vec<Appointment>,
    exclusions: &ConflictExclusions,
    policy: ConflictPolicy,
) -> BatchInsertOutcome {
    let mut accepted: Vec<Appointment> = Vec::with_capacity(batch.len());
    let mut conflicts = Vec::new();

    for (index, candidate) in batch.into_iter().enumerate() {
        if !candidate.occupies_time() {
            accepted.push(candidate);
            continue;
        }

        let interval = candidate.interval();
        let stored = first_conflict(existing, &interval, exclusions);
        let sibling = || {
            let sibling_exclusions = ConflictExclusions {
                exclude_ids: Vec::new(),
                exclude_group_id: exclusions
                    .exclude_group_id
                    .filter(|group| candidate.group_id == Some(*group)),
            };
            first_conflict(&accepted, &interval, &sibling_exclusions)
        };

        match stored.or_else(sibling) {
            Some(conflict) => conflicts.push(SeriesConflict { index, conflict }),
            None => accepted.push(candidate),
        }
    }

    if policy == ConflictPolicy::Reject && !conflicts.is_empty() {
        accepted.clear();
    }

    BatchInsertOutcome {
        inserted: accepted,
        conflicts,
    }
}

/// Front door to appointment storage for anything that can change who holds
/// a slot. Checks and writes are delegated to the store's locked operations.
pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Check for appointment conflicts for a professional at a specific time
    #[instrument(skip(self, exclusions))]
    pub async fn check_conflicts(
        &self,
        professional_id: Uuid,
        interval: TimeInterval,
        exclusions: &ConflictExclusions,
    ) -> Result<ConflictCheck, AppointmentError> {
        interval.validate()?;
        debug!(
            "Checking conflicts for professional {} from {} to {}",
            professional_id, interval.scheduled_at, interval.end_at
        );

        let mut results = self.store.find_conflicts(professional_id, &[interval], exclusions).await?;

        match results.pop().flatten() {
            Some(conflict) => {
                warn!("Conflict detected for professional {} with appointment {}", professional_id, conflict.id);
                Ok(ConflictCheck::Conflict(conflict))
            }
            None => Ok(ConflictCheck::Free),
        }
    }

    /// Perform a bulk conflict check for multiple intervals, including
    /// overlaps between the intervals themselves
    #[instrument(skip(self, intervals, exclusions), fields(count = intervals.len()))]
    pub async fn bulk_conflict_check(
        &self,
        professional_id: Uuid,
        intervals: &[TimeInterval],
        exclusions: &ConflictExclusions,
    ) -> Result<Vec<SeriesConflict>, AppointmentError> {
        for interval in intervals {
            interval.validate()?;
        }

        let stored = self.store.find_conflicts(professional_id, intervals, exclusions).await?;

        // Siblings of an excluded group may share a slot with each other
        let check_intra_batch = exclusions.exclude_group_id.is_none();

        let mut conflicts = Vec::new();
        for (index, interval) in intervals.iter().enumerate() {
            let conflict = stored
                .get(index)
                .cloned()
                .flatten()
                .or_else(|| check_intra_batch.then(|| earlier_overlap(intervals, index)).flatten());

            if let Some(conflict) = conflict {
                conflicts.push(SeriesConflict { index, conflict });
            }
        }

        debug!("Bulk check found {} conflicting intervals", conflicts.len());
        Ok(conflicts)
    }

    /// Check and insert one or more appointments in a single locked step
    #[instrument(skip(self, batch, exclusions), fields(count = batch.len()))]
    pub async fn book_checked(
        &self,
        professional_id: Uuid,
        batch: Vec<Appointment>,
        exclusions: &ConflictExclusions,
        policy: ConflictPolicy,
    ) -> Result<BatchInsertOutcome, AppointmentError> {
        for appointment in &batch {
            appointment.interval().validate()?;
            if appointment.professional_id != professional_id {
                return Err(AppointmentError::Validation(
                    "All appointments of a batch must belong to the same professional".to_string(),
                ));
            }
        }

        let outcome = self.store.insert_checked(professional_id, batch, exclusions, policy).await?;
        if !outcome.conflicts.is_empty() {
            warn!(
                "{} conflicting occurrence(s) for professional {} ({:?})",
                outcome.conflicts.len(),
                professional_id,
                policy
            );
        }
        Ok(outcome)
    }

    /// Move an existing appointment after a locked check. The appointment
    /// itself never conflicts with its own previous interval.
    #[instrument(skip(self, change, exclusions))]
    pub async fn update_checked(
        &self,
        appointment_id: Uuid,
        change: AppointmentChange,
        exclusions: &ConflictExclusions,
    ) -> Result<Appointment, AppointmentError> {
        change.interval.validate()?;

        let mut exclusions = exclusions.clone();
        if !exclusions.exclude_ids.contains(&appointment_id) {
            exclusions.exclude_ids.push(appointment_id);
        }

        match self.store.update_checked(appointment_id, change, &exclusions).await? {
            CheckedUpdate::Updated(appointment) => Ok(appointment),
            CheckedUpdate::Conflict(conflict) => Err(AppointmentError::Conflict(conflict)),
        }
    }
}

/// First earlier interval of the same request overlapping `intervals[index]`,
/// reported as a pseudo appointment with a nil id.
fn earlier_overlap(intervals: &[TimeInterval], index: usize) -> Option<ConflictingAppointment> {
    let interval = &intervals[index];
    intervals[..index]
        .iter()
        .enumerate()
        .find(|(_, earlier)| earlier.overlaps(interval))
        .map(|(position, earlier)| ConflictingAppointment {
            id: Uuid::nil(),
            scheduled_at: earlier.scheduled_at,
            end_at: earlier.end_at,
            display_name: format!("ocorrência {} da própria série", position + 1),
            appointment_type: AppointmentType::Consultation,
        })
}
