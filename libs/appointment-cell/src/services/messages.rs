//! User-facing pt-BR messages.
use crate::models::{ConflictingAppointment, LinkRejection, SeriesConflict};
use crate::timezone::ClinicTimezone;

pub fn conflict_message(conflict: &ConflictingAppointment, timezone: &ClinicTimezone) -> String {
    let start = timezone.local(conflict.scheduled_at);
    let end = timezone.local(conflict.end_at);

    format!(
        "Conflito de horário com {} em {} das {} às {}",
        conflict.display_name,
        start.format("%d/%m/%Y"),
        start.format("%H:%M"),
        end.format("%H:%M"),
    )
}

pub fn series_conflict_message(conflicts: &[SeriesConflict], timezone: &ClinicTimezone) -> String {
    match conflicts {
        [] => "Nenhum conflito encontrado".to_string(),
        [single] => conflict_message(&single.conflict, timezone),
        [first, rest @ ..] => format!(
            "{} (e mais {} ocorrência(s) em conflito)",
            conflict_message(&first.conflict, timezone),
            rest.len()
        ),
    }
}

pub fn link_rejection_message(rejection: LinkRejection) -> &'static str {
    match rejection {
        LinkRejection::Expired => "Este link expirou",
        LinkRejection::Invalid => "Link inválido",
        LinkRejection::AlreadyUsed => "Este link já foi utilizado",
    }
}
