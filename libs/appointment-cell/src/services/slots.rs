// libs/appointment-cell/src/services/slots.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Days, Duration, NaiveDate, NaiveTime, Timelike};
use futures::future::try_join_all;
use tracing::{debug, instrument};
use uuid::Uuid;

use availability_cell::services::DaySchedule;
use availability_cell::AvailabilityService;

use crate::models::{
    AlternateWeekInfo, Appointment, AppointmentError, BiweeklyHint, DayOverview, OverviewColumn,
    OverviewEntry, SlotAppointment, TimeSlot,
};
use crate::services::biweekly::{compute_hints, slot_key, BiweeklyPairingResolver};
use crate::store::{AppointmentStore, RecurrenceStore};
use crate::timezone::ClinicTimezone;

fn minutes_of(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() / 60
}

fn time_of(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

/// Local end of a slot, saturating at the end of the day.
fn local_end(start: NaiveTime, slot_minutes: u32) -> NaiveTime {
    time_of(minutes_of(start) + slot_minutes)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(start))
}

/// Slot start times generated by the day's rules plus the start of any live
/// appointment that falls between grid points.
fn slot_times(schedule: &DaySchedule, day_appointments: &[Appointment], timezone: &ClinicTimezone) -> BTreeSet<NaiveTime> {
    let step = schedule.slot_minutes.max(1);
    let mut times = BTreeSet::new();

    for rule in schedule.rules.iter().filter(|r| r.is_active) {
        let end = minutes_of(rule.end_time);
        let mut minute = minutes_of(rule.start_time);
        while minute + step <= end {
            if let Some(time) = time_of(minute) {
                times.insert(time);
            }
            minute += step;
        }
    }

    for appointment in day_appointments.iter().filter(|a| !a.status.is_cancelled()) {
        times.insert(timezone.local_time(appointment.scheduled_at));
    }

    times
}

/// Pure slot assembly for one professional and one date.
pub fn build_slots(
    schedule: &DaySchedule,
    day_appointments: &[Appointment],
    hints: &HashMap<String, BiweeklyHint>,
    annotations: &HashMap<Uuid, AlternateWeekInfo>,
    timezone: &ClinicTimezone,
) -> Vec<TimeSlot> {
    if schedule.is_fully_blocked() {
        return Vec::new();
    }

    let live: Vec<&Appointment> = day_appointments.iter().filter(|a| !a.status.is_cancelled()).collect();
    let group_sessions: Vec<&Appointment> = live
        .iter()
        .copied()
        .filter(|a| a.group_id.is_some() && a.occupies_time())
        .collect();
    let times = slot_times(schedule, day_appointments, timezone);
    let step = Duration::minutes(schedule.slot_minutes.max(1) as i64);

    let mut slots = Vec::with_capacity(times.len());
    for &time in &times {
        let scheduled_at = timezone.to_utc(schedule.date, time);
        let end_at = scheduled_at + step;

        let occupants: Vec<&Appointment> = live
            .iter()
            .copied()
            .filter(|a| timezone.local_time(a.scheduled_at) == time)
            .collect();

        // Covered by a group session that started earlier: merged into its start slot
        let inside_group_session = group_sessions
            .iter()
            .any(|g| g.scheduled_at < scheduled_at && scheduled_at < g.end_at);
        if occupants.is_empty() && inside_group_session {
            continue;
        }

        let blocking_exception = schedule
            .exceptions
            .iter()
            .find(|e| !e.is_full_day() && e.overlaps(time, local_end(time, schedule.slot_minutes)));
        let held_by_other = live
            .iter()
            .any(|a| a.occupies_time() && a.scheduled_at < end_at && a.end_at > scheduled_at);

        let span_slots = occupants
            .iter()
            .filter(|a| a.group_id.is_some() && a.occupies_time())
            .map(|g| {
                1 + times
                    .iter()
                    .filter(|t| {
                        let start = timezone.to_utc(schedule.date, **t);
                        g.scheduled_at < start && start < g.end_at
                    })
                    .count() as u32
            })
            .max()
            .unwrap_or(1);

        let is_blocked = blocking_exception.is_some();
        let is_available = !is_blocked && !held_by_other;
        let biweekly_hint = if occupants.is_empty() && is_available {
            hints.get(&slot_key(schedule.date, schedule.professional_id, time)).cloned()
        } else {
            None
        };

        slots.push(TimeSlot {
            time,
            scheduled_at,
            end_at,
            appointments: occupants
                .into_iter()
                .map(|a| SlotAppointment {
                    appointment: a.clone(),
                    status_label: a.status.label().to_string(),
                    alternate_week: annotations.get(&a.id).cloned(),
                })
                .collect(),
            is_available,
            is_blocked,
            block_reason: blocking_exception.and_then(|e| e.reason.clone()),
            span_slots,
            biweekly_hint,
        });
    }

    slots
}

/// Lay out one professional's slots on the day's shared time axis.
pub fn overview_column(schedule: &DaySchedule, slots: Vec<TimeSlot>, day_start: NaiveTime) -> OverviewColumn {
    let entries = slots
        .into_iter()
        .map(|slot| {
            let longest_session = slot
                .appointments
                .iter()
                .filter(|a| a.appointment.group_id.is_some())
                .map(|a| a.appointment.duration_minutes())
                .max()
                .unwrap_or(0);
            OverviewEntry {
                offset_minutes: (slot.time - day_start).num_minutes(),
                duration_minutes: longest_session.max(schedule.slot_minutes as i64),
                slot,
            }
        })
        .collect();

    OverviewColumn {
        professional_id: schedule.professional_id,
        display_name: schedule.display_name.clone(),
        slot_minutes: schedule.slot_minutes,
        entries,
    }
}

pub struct SlotBuilderService {
    availability: Arc<AvailabilityService>,
    appointments: Arc<dyn AppointmentStore>,
    recurrences: Arc<dyn RecurrenceStore>,
    resolver: BiweeklyPairingResolver,
    timezone: ClinicTimezone,
}

impl SlotBuilderService {
    pub fn new(
        availability: Arc<AvailabilityService>,
        appointments: Arc<dyn AppointmentStore>,
        recurrences: Arc<dyn RecurrenceStore>,
        timezone: ClinicTimezone,
    ) -> Self {
        Self {
            availability,
            appointments,
            recurrences,
            resolver: BiweeklyPairingResolver::new(timezone),
            timezone,
        }
    }

    /// Flat ordered slot list for one professional and date
    #[instrument(skip(self))]
    pub async fn slots_for_day(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<TimeSlot>, AppointmentError> {
        let (_, slots) = self.day_slots(professional_id, date).await?;
        Ok(slots)
    }

    async fn day_slots(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<(DaySchedule, Vec<TimeSlot>), AppointmentError> {
        let schedule = self.availability.day_schedule(professional_id, date).await?;
        if schedule.is_fully_blocked() {
            debug!("Professional {} is fully blocked on {}", professional_id, date);
            return Ok((schedule, Vec::new()));
        }

        // The same weekday of the following week is needed for alternate-week availability
        let next_week = date
            .checked_add_days(Days::new(7))
            .ok_or_else(|| AppointmentError::Validation(format!("Date out of range: {}", date)))?;
        let (from, _) = self.timezone.day_bounds(date);
        let (_, to) = self.timezone.day_bounds(next_week);

        let window = self.appointments.list_for_professional(professional_id, from, to).await?;
        let day_appointments: Vec<Appointment> = window
            .iter()
            .filter(|a| self.timezone.local_date(a.scheduled_at) == date)
            .cloned()
            .collect();
        let recurrences = self.recurrences.list_active_biweekly(Some(professional_id)).await?;

        let occupied = self.resolver.occupied_keys(&day_appointments);
        let hints = compute_hints(&recurrences, date, date, &occupied);
        let blocked = self.resolver.blocked_keys(&window);
        let annotations = self.resolver.annotate(&day_appointments, &recurrences, &blocked);

        let slots = build_slots(&schedule, &day_appointments, &hints, &annotations, &self.timezone);
        debug!("Built {} slots for professional {} on {}", slots.len(), professional_id, date);
        Ok((schedule, slots))
    }

    /// All professionals side by side on a time-proportional axis
    #[instrument(skip(self))]
    pub async fn day_overview(&self, date: NaiveDate) -> Result<DayOverview, AppointmentError> {
        let professionals = self.availability.list_professionals().await?;

        let days = try_join_all(
            professionals
                .iter()
                .map(|p| self.day_slots(p.professional_id, date)),
        )
        .await?;

        let day_start = days.iter().flat_map(|(_, slots)| slots.iter().map(|s| s.time)).min();
        let day_end = days
            .iter()
            .flat_map(|(schedule, slots)| {
                slots.iter().map(move |s| local_end(s.time, schedule.slot_minutes * s.span_slots.max(1)))
            })
            .max();

        let columns = match day_start {
            Some(start) => days
                .into_iter()
                .map(|(schedule, slots)| overview_column(&schedule, slots, start))
                .collect(),
            None => days
                .into_iter()
                .map(|(schedule, _)| overview_column(&schedule, Vec::new(), NaiveTime::MIN))
                .collect(),
        };

        Ok(DayOverview {
            date,
            day_start,
            day_end,
            columns,
        })
    }
}
