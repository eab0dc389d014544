// libs/appointment-cell/src/services/biweekly.rs
use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use uuid::Uuid;

use availability_cell::weekday_index;

use crate::models::{
    AlternateWeekInfo, Appointment, BiweeklyHint, RecurrenceDefinition, RecurrenceEndType,
};
use crate::timezone::ClinicTimezone;

/// A biweekly series is "on" in even weeks counted from its anchor.
pub fn is_off_week(anchor: NaiveDate, date: NaiveDate) -> bool {
    let days = (date - anchor).num_days();
    days.div_euclid(7).rem_euclid(2) == 1
}

pub fn slot_key(date: NaiveDate, professional_id: Uuid, time: NaiveTime) -> String {
    format!("{}|{}|{}", date.format("%Y-%m-%d"), professional_id, time.format("%H:%M"))
}

/// The other active biweekly series sharing this one's professional, weekday
/// and start time with a different patient.
pub fn find_pair<'a>(
    recurrence: &RecurrenceDefinition,
    candidates: &'a [RecurrenceDefinition],
) -> Option<&'a RecurrenceDefinition> {
    candidates.iter().find(|other| {
        other.id != recurrence.id
            && other.is_active_biweekly()
            && other.professional_id == recurrence.professional_id
            && other.day_of_week == recurrence.day_of_week
            && other.start_time == recurrence.start_time
            && other.patient_id != recurrence.patient_id
    })
}

/// Whether `date` lies on the series' weekday inside its life span.
/// Parity is not considered here.
fn within_series(recurrence: &RecurrenceDefinition, date: NaiveDate) -> bool {
    if date < recurrence.start_date || weekday_index(date.weekday()) != recurrence.day_of_week {
        return false;
    }

    match recurrence.end_type {
        RecurrenceEndType::ByDate => recurrence.end_date.map_or(false, |end| date <= end),
        RecurrenceEndType::ByOccurrences => {
            let count = recurrence.occurrences.unwrap_or(0) as u64;
            count > 0
                && recurrence
                    .start_date
                    .checked_add_days(Days::new(14 * (count - 1)))
                    .map_or(false, |last| date <= last)
        }
        RecurrenceEndType::Indefinite => true,
    }
}

/// Hints for empty off-week slots of active biweekly series, keyed by slot key.
pub fn compute_hints(
    recurrences: &[RecurrenceDefinition],
    from: NaiveDate,
    to: NaiveDate,
    occupied_keys: &HashSet<String>,
) -> HashMap<String, BiweeklyHint> {
    let mut hints = HashMap::new();

    for recurrence in recurrences.iter().filter(|r| r.is_active_biweekly()) {
        for date in from.iter_days().take_while(|d| *d <= to) {
            if !within_series(recurrence, date) || !is_off_week(recurrence.start_date, date) {
                continue;
            }
            let key = slot_key(date, recurrence.professional_id, recurrence.start_time);
            if occupied_keys.contains(&key) {
                continue;
            }
            hints.entry(key).or_insert_with(|| BiweeklyHint {
                recurrence_id: recurrence.id,
                patient_id: recurrence.patient_id,
                patient_name: recurrence.patient_name.clone(),
                date,
                time: recurrence.start_time,
            });
        }
    }

    hints
}

pub struct BiweeklyPairingResolver {
    timezone: ClinicTimezone,
}

impl BiweeklyPairingResolver {
    pub fn new(timezone: ClinicTimezone) -> Self {
        Self { timezone }
    }

    pub fn appointment_key(&self, appointment: &Appointment) -> String {
        let local = self.timezone.local(appointment.scheduled_at);
        slot_key(local.date(), appointment.professional_id, local.time())
    }

    /// Keys of every appointment currently holding its slot.
    pub fn occupied_keys(&self, appointments: &[Appointment]) -> HashSet<String> {
        appointments
            .iter()
            .filter(|a| a.occupies_time())
            .map(|a| self.appointment_key(a))
            .collect()
    }

    /// Keys held by blocking non-patient entries (tasks, meetings).
    pub fn blocked_keys(&self, appointments: &[Appointment]) -> HashSet<String> {
        appointments
            .iter()
            .filter(|a| a.occupies_time() && !a.appointment_type.is_patient_entry())
            .map(|a| self.appointment_key(a))
            .collect()
    }

    pub fn annotate(
        &self,
        appointments: &[Appointment],
        recurrences: &[RecurrenceDefinition],
        blocked_keys: &HashSet<String>,
    ) -> HashMap<Uuid, AlternateWeekInfo> {
        let mut annotations = HashMap::new();

        for appointment in appointments {
            let Some(recurrence) = appointment
                .recurrence_id
                .and_then(|id| recurrences.iter().find(|r| r.id == id))
                .filter(|r| r.is_active_biweekly())
            else {
                continue;
            };

            let partner = find_pair(recurrence, recurrences);
            let local = self.timezone.local(appointment.scheduled_at);
            let next_week_blocked = local
                .date()
                .checked_add_days(Days::new(7))
                .map_or(true, |d| blocked_keys.contains(&slot_key(d, appointment.professional_id, local.time())));

            annotations.insert(appointment.id, AlternateWeekInfo {
                appointment_id: appointment.id,
                paired_patient_name: partner.and_then(|p| p.patient_name.clone()),
                alternate_week_available: partner.is_none() && !next_week_blocked,
            });
        }

        annotations
    }
}
