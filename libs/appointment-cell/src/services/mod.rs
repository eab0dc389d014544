pub mod biweekly;
pub mod booking;
pub mod conflict;
pub mod extension;
pub mod lifecycle;
pub mod links;
pub mod messages;
pub mod recurrence;
pub mod slots;

pub use booking::AppointmentBookingService;
pub use conflict::ConflictDetectionService;
pub use extension::{ExtensionReport, RecurrenceExtensionJob};
pub use lifecycle::AppointmentLifecycleService;
pub use links::{build_link_service, LinkService, SignedLinkService, StoredTokenService};
pub use recurrence::RecurrenceCalculator;
pub use slots::SlotBuilderService;
