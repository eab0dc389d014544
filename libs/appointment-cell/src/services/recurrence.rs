// libs/appointment-cell/src/services/recurrence.rs
use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use tracing::debug;

use availability_cell::weekday_index;

use crate::models::{
    Occurrence, OccurrenceWithException, RecurrenceDefinition, RecurrenceEndType, RecurrenceOptions,
    RecurrenceOptionsRequest, RecurrenceType, RecurrenceValidationError,
};
use crate::services::biweekly::is_off_week;
use crate::timezone::ClinicTimezone;

pub const MAX_OCCURRENCES: u32 = 52;

/// How far ahead an indefinite series is materialised on creation.
pub const INDEFINITE_WINDOW_MONTHS: u32 = 6;

/// Upper bound for BY_DATE series.
pub const MAX_SERIES_SPAN_MONTHS: u32 = 24;

/// Parse and validate wire options. Runs before any date arithmetic.
pub fn parse_options(
    anchor: NaiveDate,
    request: &RecurrenceOptionsRequest,
) -> Result<RecurrenceOptions, RecurrenceValidationError> {
    let end_date = match (request.end_type, request.end_date.as_deref()) {
        (RecurrenceEndType::ByDate, Some(raw)) => Some(
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| RecurrenceValidationError::MalformedEndDate(raw.to_string()))?,
        ),
        _ => None,
    };

    let options = RecurrenceOptions {
        recurrence_type: request.recurrence_type,
        end_type: request.end_type,
        occurrences: request.occurrences,
        end_date,
    };
    validate_options(anchor, &options)?;
    Ok(options)
}

pub fn validate_options(anchor: NaiveDate, options: &RecurrenceOptions) -> Result<(), RecurrenceValidationError> {
    match options.end_type {
        RecurrenceEndType::ByOccurrences => match options.occurrences {
            None => Err(RecurrenceValidationError::MissingOccurrences),
            Some(n) if n == 0 || n > MAX_OCCURRENCES => Err(RecurrenceValidationError::InvalidOccurrences(n)),
            Some(_) => Ok(()),
        },
        RecurrenceEndType::ByDate => match options.end_date {
            None => Err(RecurrenceValidationError::MissingEndDate),
            Some(end_date) if end_date < anchor => Err(RecurrenceValidationError::EndDateBeforeStart {
                start_date: anchor,
                end_date,
            }),
            Some(end_date) => {
                let limit = anchor.checked_add_months(Months::new(MAX_SERIES_SPAN_MONTHS));
                match limit {
                    Some(limit) if end_date <= limit => Ok(()),
                    _ => Err(RecurrenceValidationError::EndDateTooFar(end_date)),
                }
            }
        },
        RecurrenceEndType::Indefinite => Ok(()),
    }
}

/// k-th candidate date counted from the anchor, ignoring end conditions.
/// Monthly dates are anchor + k months, clamped to the end of shorter months.
pub fn nth_date(anchor: NaiveDate, recurrence_type: RecurrenceType, k: u32) -> Option<NaiveDate> {
    match recurrence_type {
        RecurrenceType::Weekly => anchor.checked_add_days(Days::new(7 * k as u64)),
        RecurrenceType::Biweekly => anchor.checked_add_days(Days::new(14 * k as u64)),
        RecurrenceType::Monthly => anchor.checked_add_months(Months::new(k)),
    }
}

/// Every candidate date of a series, exception dates included.
pub fn series_dates(anchor: NaiveDate, options: &RecurrenceOptions) -> Vec<NaiveDate> {
    series_dates_through(anchor, options, indefinite_window_end(anchor))
}

fn indefinite_window_end(anchor: NaiveDate) -> Option<NaiveDate> {
    anchor.checked_add_months(Months::new(INDEFINITE_WINDOW_MONTHS))
}

/// Like [`series_dates`], with indefinite series cut at `indefinite_end`.
fn series_dates_through(
    anchor: NaiveDate,
    options: &RecurrenceOptions,
    indefinite_end: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    for k in 0.. {
        if options.end_type == RecurrenceEndType::ByOccurrences && k >= options.occurrences.unwrap_or(0) {
            break;
        }
        let Some(date) = nth_date(anchor, options.recurrence_type, k) else {
            break;
        };
        let past_end = match options.end_type {
            RecurrenceEndType::ByOccurrences => false,
            RecurrenceEndType::ByDate => options.end_date.map_or(true, |end| date > end),
            RecurrenceEndType::Indefinite => indefinite_end.map_or(true, |end| date > end),
        };
        if past_end {
            break;
        }
        dates.push(date);
    }

    dates
}

/// Whether `date` is a candidate of the stored series. Indefinite series
/// have no window here: any date matching the pattern from the anchor on counts.
pub fn is_series_date(definition: &RecurrenceDefinition, date: NaiveDate) -> bool {
    if definition.end_type != RecurrenceEndType::Indefinite {
        return series_dates(definition.start_date, &definition.options()).contains(&date);
    }
    if date < definition.start_date {
        return false;
    }

    match definition.recurrence_type {
        RecurrenceType::Weekly => weekday_index(date.weekday()) == definition.day_of_week,
        RecurrenceType::Biweekly => {
            weekday_index(date.weekday()) == definition.day_of_week && !is_off_week(definition.start_date, date)
        }
        RecurrenceType::Monthly => (0..)
            .map_while(|k| nth_date(definition.start_date, RecurrenceType::Monthly, k))
            .take_while(|d| *d <= date)
            .any(|d| d == date),
    }
}

pub fn add_exception(exceptions: &[NaiveDate], date: NaiveDate) -> Vec<NaiveDate> {
    let mut updated = exceptions.to_vec();
    updated.push(date);
    updated.sort();
    updated.dedup();
    updated
}

pub fn remove_exception(exceptions: &[NaiveDate], date: NaiveDate) -> Vec<NaiveDate> {
    let mut updated: Vec<NaiveDate> = exceptions.iter().copied().filter(|d| *d != date).collect();
    updated.sort();
    updated.dedup();
    updated
}

pub fn active_occurrence_count(occurrences: &[OccurrenceWithException]) -> usize {
    occurrences.iter().filter(|o| !o.is_exception).count()
}

/// Next date strictly after the local date-time that falls on `target`.
/// Same weekday moves a full week; time of day is preserved.
pub fn shift_to_weekday(local: NaiveDateTime, target: Weekday) -> NaiveDateTime {
    let current = local.weekday().num_days_from_sunday() as i64;
    let wanted = target.num_days_from_sunday() as i64;
    let mut days = (wanted - current).rem_euclid(7);
    if days == 0 {
        days = 7;
    }
    local + Duration::days(days)
}

pub struct RecurrenceCalculator {
    timezone: ClinicTimezone,
}

impl RecurrenceCalculator {
    pub fn new(timezone: ClinicTimezone) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> ClinicTimezone {
        self.timezone
    }

    fn occurrence(&self, date: NaiveDate, start_time: NaiveTime, duration_minutes: u32) -> Occurrence {
        let scheduled_at = self.timezone.to_utc(date, start_time);
        Occurrence {
            date,
            scheduled_at,
            end_at: scheduled_at + Duration::minutes(duration_minutes as i64),
        }
    }

    /// Ordered occurrences of a series with exception dates left out.
    pub fn generate_occurrences(
        &self,
        anchor: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        options: &RecurrenceOptions,
        exceptions: &[NaiveDate],
    ) -> Result<Vec<Occurrence>, RecurrenceValidationError> {
        Ok(self
            .generate_with_exceptions(anchor, start_time, duration_minutes, options, exceptions)?
            .into_iter()
            .filter(|o| !o.is_exception)
            .map(|o| o.occurrence)
            .collect())
    }

    /// Every occurrence of a series, each flagged with whether it was skipped.
    pub fn generate_with_exceptions(
        &self,
        anchor: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        options: &RecurrenceOptions,
        exceptions: &[NaiveDate],
    ) -> Result<Vec<OccurrenceWithException>, RecurrenceValidationError> {
        self.expand(
            anchor,
            start_time,
            duration_minutes,
            options,
            exceptions,
            indefinite_window_end(anchor),
        )
    }

    fn expand(
        &self,
        anchor: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        options: &RecurrenceOptions,
        exceptions: &[NaiveDate],
        indefinite_end: Option<NaiveDate>,
    ) -> Result<Vec<OccurrenceWithException>, RecurrenceValidationError> {
        validate_options(anchor, options)?;
        if duration_minutes == 0 {
            return Err(RecurrenceValidationError::InvalidDuration);
        }

        let occurrences: Vec<OccurrenceWithException> = series_dates_through(anchor, options, indefinite_end)
            .into_iter()
            .map(|date| OccurrenceWithException {
                occurrence: self.occurrence(date, start_time, duration_minutes),
                is_exception: exceptions.contains(&date),
            })
            .collect();

        debug!(
            "Expanded {:?} series from {} into {} occurrences",
            options.recurrence_type,
            anchor,
            occurrences.len()
        );
        Ok(occurrences)
    }

    /// Stored series expansion. An indefinite series runs as far as it has
    /// been materialised, and never less than its initial window.
    pub fn expand_definition(
        &self,
        definition: &RecurrenceDefinition,
    ) -> Result<Vec<OccurrenceWithException>, RecurrenceValidationError> {
        let initial_end = indefinite_window_end(definition.start_date);
        let indefinite_end = match (initial_end, definition.last_generated_date) {
            (Some(initial), Some(generated)) => Some(initial.max(generated)),
            (initial, generated) => initial.or(generated),
        };

        self.expand(
            definition.start_date,
            definition.start_time,
            definition.duration_minutes,
            &definition.options(),
            &definition.exceptions,
            indefinite_end,
        )
    }

    /// Occurrences strictly after `last_generated` up to `last_generated + months`.
    /// Weekly and biweekly candidates are re-filtered by weekday and parity so a
    /// series whose weekday was shifted keeps its new day.
    pub fn next_window(
        &self,
        definition: &RecurrenceDefinition,
        last_generated: NaiveDate,
        months: u32,
    ) -> Vec<Occurrence> {
        let Some(window_end) = last_generated.checked_add_months(Months::new(months)) else {
            return Vec::new();
        };

        let dates: Vec<NaiveDate> = match definition.recurrence_type {
            RecurrenceType::Weekly | RecurrenceType::Biweekly => last_generated
                .iter_days()
                .skip(1)
                .take_while(|d| *d <= window_end)
                .filter(|d| weekday_index(d.weekday()) == definition.day_of_week)
                .filter(|d| *d >= definition.start_date)
                .filter(|d| {
                    definition.recurrence_type == RecurrenceType::Weekly
                        || !is_off_week(definition.start_date, *d)
                })
                .collect(),
            RecurrenceType::Monthly => (0..)
                .map_while(|k| nth_date(definition.start_date, RecurrenceType::Monthly, k))
                .skip_while(|d| *d <= last_generated)
                .take_while(|d| *d <= window_end)
                .collect(),
        };

        dates
            .into_iter()
            .filter(|d| !definition.exceptions.contains(d))
            .map(|d| self.occurrence(d, definition.start_time, definition.duration_minutes))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_shift_to_same_weekday_moves_a_full_week() {
        let local = date(2026, 3, 9).and_hms_opt(9, 30, 0).unwrap();
        let shifted = shift_to_weekday(local, Weekday::Mon);
        assert_eq!(shifted, date(2026, 3, 16).and_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn test_shift_to_earlier_weekday_wraps_forward() {
        // Wednesday -> Monday of the following week
        let local = date(2026, 3, 11).and_hms_opt(14, 0, 0).unwrap();
        let shifted = shift_to_weekday(local, Weekday::Mon);
        assert_eq!(shifted, date(2026, 3, 16).and_hms_opt(14, 0, 0).unwrap());
    }

    #[test]
    fn test_exception_helpers_are_idempotent() {
        let base = vec![date(2026, 3, 16)];
        let once = add_exception(&base, date(2026, 3, 9));
        let twice = add_exception(&once, date(2026, 3, 9));

        assert_eq!(once, twice);
        assert_eq!(once, vec![date(2026, 3, 9), date(2026, 3, 16)]);
        assert_eq!(remove_exception(&twice, date(2026, 3, 9)), base);
        assert_eq!(remove_exception(&base, date(2026, 1, 1)), base);
    }
}
