// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use availability_cell::AvailabilityError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub title: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub blocks_time: bool,
    pub group_id: Option<Uuid>,
    pub recurrence_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            scheduled_at: self.scheduled_at,
            end_at: self.end_at,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_at - self.scheduled_at).num_minutes()
    }

    /// Patient name for consultations, title for everything else.
    pub fn display_name(&self) -> String {
        self.patient_name
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| self.appointment_type.label().to_string())
    }

    /// Whether this row takes part in overlap detection at all.
    pub fn occupies_time(&self) -> bool {
        self.blocks_time && !self.status.is_cancelled()
    }

    pub fn as_conflict(&self) -> ConflictingAppointment {
        ConflictingAppointment {
            id: self.id,
            scheduled_at: self.scheduled_at,
            end_at: self.end_at,
            display_name: self.display_name(),
            appointment_type: self.appointment_type,
        }
    }
}

/// Half-open `[scheduled_at, end_at)` interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeInterval {
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(scheduled_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<Self, AppointmentError> {
        let interval = Self { scheduled_at, end_at };
        interval.validate()?;
        Ok(interval)
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.end_at <= self.scheduled_at {
            return Err(AppointmentError::Validation(
                "End time must be after start time".to_string(),
            ));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.scheduled_at < other.end_at && self.end_at > other.scheduled_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Agendado,
    Confirmado,
    Finalizado,
    CanceladoAcordado,
    CanceladoFalta,
    CanceladoProfissional,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Agendado,
        AppointmentStatus::Confirmado,
        AppointmentStatus::Finalizado,
        AppointmentStatus::CanceladoAcordado,
        AppointmentStatus::CanceladoFalta,
        AppointmentStatus::CanceladoProfissional,
    ];

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CanceladoAcordado
                | AppointmentStatus::CanceladoFalta
                | AppointmentStatus::CanceladoProfissional
        )
    }

    /// Storage code, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Agendado => "AGENDADO",
            AppointmentStatus::Confirmado => "CONFIRMADO",
            AppointmentStatus::Finalizado => "FINALIZADO",
            AppointmentStatus::CanceladoAcordado => "CANCELADO_ACORDADO",
            AppointmentStatus::CanceladoFalta => "CANCELADO_FALTA",
            AppointmentStatus::CanceladoProfissional => "CANCELADO_PROFISSIONAL",
        }
    }

    /// Display label shown to clinic staff.
    pub fn label(&self) -> &'static str {
        match self {
            AppointmentStatus::Agendado => "Agendado",
            AppointmentStatus::Confirmado => "Confirmado",
            AppointmentStatus::Finalizado => "Finalizado",
            AppointmentStatus::CanceladoAcordado => "Cancelado (acordado)",
            AppointmentStatus::CanceladoFalta => "Falta",
            AppointmentStatus::CanceladoProfissional => "Cancelado pelo profissional",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    #[serde(rename = "CONSULTA")]
    Consultation,
    #[serde(rename = "TAREFA")]
    Task,
    #[serde(rename = "REUNIAO")]
    Meeting,
    #[serde(rename = "LEMBRETE")]
    Reminder,
    #[serde(rename = "NOTA")]
    Note,
}

impl AppointmentType {
    /// Reminders and notes never hold the agenda.
    pub fn default_blocks_time(&self) -> bool {
        matches!(
            self,
            AppointmentType::Consultation | AppointmentType::Task | AppointmentType::Meeting
        )
    }

    pub fn is_patient_entry(&self) -> bool {
        matches!(self, AppointmentType::Consultation)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AppointmentType::Consultation => "Consulta",
            AppointmentType::Task => "Tarefa",
            AppointmentType::Meeting => "Reunião",
            AppointmentType::Reminder => "Lembrete",
            AppointmentType::Note => "Nota",
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ==============================================================================
// CONFLICT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictingAppointment {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub display_name: String,
    pub appointment_type: AppointmentType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictCheck {
    Free,
    Conflict(ConflictingAppointment),
}

impl ConflictCheck {
    pub fn is_free(&self) -> bool {
        matches!(self, ConflictCheck::Free)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesConflict {
    /// Position of the occurrence within its series.
    pub index: usize,
    pub conflict: ConflictingAppointment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConflictExclusions {
    #[serde(default)]
    pub exclude_ids: Vec<Uuid>,
    #[serde(default)]
    pub exclude_group_id: Option<Uuid>,
}

impl ConflictExclusions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn excluding(appointment_id: Uuid) -> Self {
        Self {
            exclude_ids: vec![appointment_id],
            exclude_group_id: None,
        }
    }

    pub fn with_group(mut self, group_id: Option<Uuid>) -> Self {
        self.exclude_group_id = group_id;
        self
    }

    pub fn excludes(&self, appointment: &Appointment) -> bool {
        self.exclude_ids.contains(&appointment.id)
            || (self.exclude_group_id.is_some() && appointment.group_id == self.exclude_group_id)
    }
}

/// What to do with a series when some occurrences conflict.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPolicy {
    #[default]
    Reject,
    SkipConflicting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchInsertOutcome {
    pub inserted: Vec<Appointment>,
    pub conflicts: Vec<SeriesConflict>,
}

/// A locked update of an existing appointment.
#[derive(Debug, Clone)]
pub struct AppointmentChange {
    pub interval: TimeInterval,
    pub status: Option<StatusUpdate>,
    /// Status the caller validated against; the locked write is refused
    /// with `StaleStatus` when the row no longer has it.
    pub expected_status: AppointmentStatus,
}

#[derive(Debug, Clone)]
pub enum CheckedUpdate {
    Updated(Appointment),
    Conflict(ConflictingAppointment),
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    Unchanged,
    Set(T),
    Cleared,
}

impl<T: Copy> FieldUpdate<T> {
    pub fn apply(&self, field: &mut Option<T>) {
        match self {
            FieldUpdate::Unchanged => {}
            FieldUpdate::Set(value) => *field = Some(*value),
            FieldUpdate::Cleared => *field = None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: AppointmentStatus,
    pub confirmed_at: FieldUpdate<DateTime<Utc>>,
    pub cancelled_at: FieldUpdate<DateTime<Utc>>,
    pub updates_last_visit: bool,
}

impl StatusUpdate {
    pub fn apply_to(&self, appointment: &mut Appointment, now: DateTime<Utc>) {
        appointment.status = self.status;
        self.confirmed_at.apply(&mut appointment.confirmed_at);
        self.cancelled_at.apply(&mut appointment.cancelled_at);
        appointment.updated_at = now;
    }
}

// ==============================================================================
// RECURRENCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceEndType {
    ByDate,
    ByOccurrences,
    Indefinite,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceOptions {
    pub recurrence_type: RecurrenceType,
    pub end_type: RecurrenceEndType,
    pub occurrences: Option<u32>,
    pub end_date: Option<NaiveDate>,
}

/// Options as they arrive over the wire; `end_date` stays textual so a
/// malformed value is reported as a recurrence error instead of a 422 from serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceOptionsRequest {
    pub recurrence_type: RecurrenceType,
    pub end_type: RecurrenceEndType,
    #[serde(default)]
    pub occurrences: Option<u32>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceDefinition {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub title: Option<String>,
    pub appointment_type: AppointmentType,
    pub recurrence_type: RecurrenceType,
    pub end_type: RecurrenceEndType,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub day_of_week: i32,
    pub end_date: Option<NaiveDate>,
    pub occurrences: Option<u32>,
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
    pub last_generated_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurrenceDefinition {
    pub fn options(&self) -> RecurrenceOptions {
        RecurrenceOptions {
            recurrence_type: self.recurrence_type,
            end_type: self.end_type,
            occurrences: self.occurrences,
            end_date: self.end_date,
        }
    }

    pub fn is_active_biweekly(&self) -> bool {
        self.is_active && self.recurrence_type == RecurrenceType::Biweekly
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            scheduled_at: self.scheduled_at,
            end_at: self.end_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OccurrenceWithException {
    #[serde(flatten)]
    pub occurrence: Occurrence,
    pub is_exception: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceValidationError {
    #[error("Number of occurrences must be between 1 and 52, got {0}")]
    InvalidOccurrences(u32),

    #[error("Number of occurrences is required when ending by occurrences")]
    MissingOccurrences,

    #[error("End date is required when ending by date")]
    MissingEndDate,

    #[error("Invalid end date: {0}")]
    MalformedEndDate(String),

    #[error("End date {end_date} is before start date {start_date}")]
    EndDateBeforeStart { start_date: NaiveDate, end_date: NaiveDate },

    #[error("End date {0} is too far in the future")]
    EndDateTooFar(NaiveDate),

    #[error("Duration must be greater than zero")]
    InvalidDuration,
}

// ==============================================================================
// BIWEEKLY PAIRING & SLOT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiweeklyHint {
    pub recurrence_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlternateWeekInfo {
    pub appointment_id: Uuid,
    pub paired_patient_name: Option<String>,
    pub alternate_week_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotAppointment {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub status_label: String,
    pub alternate_week: Option<AlternateWeekInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub appointments: Vec<SlotAppointment>,
    pub is_available: bool,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub span_slots: u32,
    pub biweekly_hint: Option<BiweeklyHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewColumn {
    pub professional_id: Uuid,
    pub display_name: String,
    pub slot_minutes: u32,
    pub entries: Vec<OverviewEntry>,
}

/// One slot positioned on the shared time axis of the day overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewEntry {
    pub offset_minutes: i64,
    pub duration_minutes: i64,
    pub slot: TimeSlot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayOverview {
    pub date: NaiveDate,
    #[serde(with = "hhmm::option")]
    pub day_start: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    pub day_end: Option<NaiveTime>,
    pub columns: Vec<OverviewColumn>,
}

// ==============================================================================
// LINK / TOKEN MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkAction {
    Confirm,
    Cancel,
}

impl LinkAction {
    pub fn path_segment(&self) -> &'static str {
        match self {
            LinkAction::Confirm => "confirm",
            LinkAction::Cancel => "cancel",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "confirm" => Some(LinkAction::Confirm),
            "cancel" => Some(LinkAction::Cancel),
            _ => None,
        }
    }

    /// Status the appointment moves to when the patient follows the link.
    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            LinkAction::Confirm => AppointmentStatus::Confirmado,
            LinkAction::Cancel => AppointmentStatus::CanceladoAcordado,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentToken {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub action: LinkAction,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Query string of a public link; which fields are present depends on the link mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkCredentials {
    pub id: Option<Uuid>,
    pub expires: Option<i64>,
    pub sig: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkRejection {
    Expired,
    Invalid,
    AlreadyUsed,
}

impl fmt::Display for LinkRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRejection::Expired => write!(f, "link expired"),
            LinkRejection::Invalid => write!(f, "link invalid"),
            LinkRejection::AlreadyUsed => write!(f, "link already used"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkValidation {
    Valid { appointment_id: Uuid },
    Rejected(LinkRejection),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentLinks {
    pub confirm_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub title: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub appointment_type: AppointmentType,
    pub blocks_time: Option<bool>,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub appointment: Appointment,
    pub links: Option<AppointmentLinks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringBookingRequest {
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub title: Option<String>,
    pub appointment_type: AppointmentType,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub recurrence: RecurrenceOptionsRequest,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringBookingResponse {
    pub recurrence: Option<RecurrenceDefinition>,
    pub appointments: Vec<BookingResponse>,
    pub conflicts: Vec<SeriesConflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckRequest {
    pub professional_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
    pub exclude_group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConflictCheckRequest {
    pub professional_id: Uuid,
    pub intervals: Vec<TimeInterval>,
    #[serde(default)]
    pub exclude_appointment_ids: Vec<Uuid>,
    pub exclude_group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrencePreviewRequest {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub recurrence: RecurrenceOptionsRequest,
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftWeekdayRequest {
    pub day_of_week: i32,
    /// Also move every later live occurrence of the appointment's series.
    #[serde(default)]
    pub apply_to_series: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftWeekdayResponse {
    pub appointments: Vec<Appointment>,
    pub conflicts: Vec<SeriesConflict>,
    pub recurrence: Option<RecurrenceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentStatusUpdateRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceExceptionRequest {
    pub date: NaiveDate,
    pub skip: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Recurrence not found")]
    RecurrenceNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    RecurrenceValidation(#[from] RecurrenceValidationError),

    #[error("Appointment conflicts with existing booking")]
    Conflict(ConflictingAppointment),

    #[error("{} occurrence(s) of the series conflict with existing bookings", .0.len())]
    SeriesConflict(Vec<SeriesConflict>),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment status changed concurrently")]
    StaleStatus,

    #[error("Public link rejected: {0}")]
    LinkRejected(LinkRejection),

    #[error("Not allowed to act on this professional's agenda")]
    Forbidden,

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for AppointmentError {
    fn from(err: anyhow::Error) -> Self {
        AppointmentError::Database(err.to_string())
    }
}

/// `HH:mm` wire format for local times of day.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| {
                    NaiveTime::parse_from_str(&raw, "%H:%M")
                        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}
