mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::{
    AppointmentError, AppointmentStatus, AppointmentStore, AppointmentToken, CheckedUpdate, ConflictExclusions,
    ConflictPolicy, FieldUpdate, LinkAction, RecurrenceStore, StatusUpdate, SupabaseAppointmentStore,
    SupabaseRecurrenceStore, SupabaseTokenStore, TimeInterval, TokenStore,
};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

use common::{appointment, date, local};

const SERVICE_KEY: &str = "service-role-key";

fn config(server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_service_role_key: SERVICE_KEY.to_string(),
        ..TestConfig::with_supabase_url(&server.uri()).to_app_config()
    }
}

fn appointment_store(server: &MockServer) -> SupabaseAppointmentStore {
    let config = config(server);
    SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config)), &config)
}

fn recurrence_store(server: &MockServer) -> SupabaseRecurrenceStore {
    let config = config(server);
    SupabaseRecurrenceStore::new(Arc::new(SupabaseClient::new(&config)), &config)
}

fn token_store(server: &MockServer) -> SupabaseTokenStore {
    let config = config(server);
    SupabaseTokenStore::new(Arc::new(SupabaseClient::new(&config)), &config)
}

#[tokio::test]
async fn test_batch_insert_goes_through_locked_function() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let candidate = appointment(professional_id, local(2026, 3, 9, 9, 0), 50);
    let inserted = MockSupabaseResponses::appointment_row(
        candidate.id,
        professional_id,
        "2026-03-09T12:00:00Z",
        "2026-03-09T12:50:00Z",
        "AGENDADO",
    );

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/book_appointments_checked"))
        .and(header("authorization", format!("Bearer {}", SERVICE_KEY).as_str()))
        .and(body_partial_json(json!({
            "p_professional_id": professional_id,
            "p_policy": "SKIP_CONFLICTING",
            "p_exclude_ids": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "inserted": [inserted],
            "conflicts": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = appointment_store(&server)
        .insert_checked(professional_id, vec![candidate.clone()], &ConflictExclusions::none(), ConflictPolicy::SkipConflicting)
        .await
        .unwrap();

    assert_eq!(outcome.inserted.len(), 1);
    assert_eq!(outcome.inserted[0].id, candidate.id);
    assert_eq!(outcome.inserted[0].scheduled_at, local(2026, 3, 9, 9, 0));
}

#[tokio::test]
async fn test_find_conflicts_maps_rows_by_index() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let blocker = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/find_appointment_conflicts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "idx": 1,
            "id": blocker,
            "scheduled_at": "2026-03-16T12:00:00Z",
            "end_at": "2026-03-16T12:50:00Z",
            "display_name": "Maria Souza",
            "appointment_type": "CONSULTA"
        }])))
        .mount(&server)
        .await;

    let intervals = vec![
        TimeInterval::new(local(2026, 3, 9, 9, 0), local(2026, 3, 9, 9, 50)).unwrap(),
        TimeInterval::new(local(2026, 3, 16, 9, 0), local(2026, 3, 16, 9, 50)).unwrap(),
    ];
    let conflicts = appointment_store(&server)
        .find_conflicts(professional_id, &intervals, &ConflictExclusions::none())
        .await
        .unwrap();

    assert!(conflicts[0].is_none());
    assert_matches!(&conflicts[1], Some(c) if c.id == blocker && c.display_name == "Maria Souza");
}

#[tokio::test]
async fn test_update_checked_reports_conflict() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let blocker = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/update_appointment_checked"))
        .and(body_partial_json(json!({
            "p_appointment_id": appointment_id,
            "p_expected_status": "CANCELADO_FALTA",
            "p_status": "AGENDADO",
            "p_set_confirmed_at": true,
            "p_confirmed_at": null,
            "p_exclude_ids": [appointment_id]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "appointment": null,
            "conflict": {
                "id": blocker,
                "scheduled_at": "2026-03-10T12:00:00Z",
                "end_at": "2026-03-10T12:50:00Z",
                "display_name": "Revisão de prontuários",
                "appointment_type": "TAREFA"
            }
        })))
        .mount(&server)
        .await;

    let change = appointment_cell::AppointmentChange {
        interval: TimeInterval::new(local(2026, 3, 10, 9, 0), local(2026, 3, 10, 9, 50)).unwrap(),
        status: Some(StatusUpdate {
            status: AppointmentStatus::Agendado,
            confirmed_at: FieldUpdate::Cleared,
            cancelled_at: FieldUpdate::Cleared,
            updates_last_visit: false,
        }),
        expected_status: AppointmentStatus::CanceladoFalta,
    };
    let result = appointment_store(&server)
        .update_checked(appointment_id, change, &ConflictExclusions::excluding(appointment_id))
        .await
        .unwrap();

    assert_matches!(result, CheckedUpdate::Conflict(c) if c.id == blocker);
}

#[tokio::test]
async fn test_update_checked_reports_stale_status() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/update_appointment_checked"))
        .and(body_partial_json(json!({ "p_expected_status": "AGENDADO" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "appointment": null,
            "conflict": null,
            "stale": true
        })))
        .mount(&server)
        .await;

    let change = appointment_cell::AppointmentChange {
        interval: TimeInterval::new(local(2026, 3, 10, 14, 0), local(2026, 3, 10, 14, 50)).unwrap(),
        status: None,
        expected_status: AppointmentStatus::Agendado,
    };
    let result = appointment_store(&server)
        .update_checked(appointment_id, change, &ConflictExclusions::excluding(appointment_id))
        .await;

    assert_matches!(result, Err(AppointmentError::StaleStatus));
}

#[tokio::test]
async fn test_apply_status_is_compare_and_set() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id).as_str()))
        .and(query_param("status", "eq.AGENDADO"))
        .and(header("prefer", "return=representation"))
        .and(body_partial_json(json!({ "status": "CONFIRMADO" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let update = StatusUpdate {
        status: AppointmentStatus::Confirmado,
        confirmed_at: FieldUpdate::Set(local(2026, 3, 1, 8, 0)),
        cancelled_at: FieldUpdate::Unchanged,
        updates_last_visit: false,
    };
    // No row matched the expected status: someone else changed it first
    let result = appointment_store(&server)
        .apply_status(appointment_id, AppointmentStatus::Agendado, &update)
        .await;

    assert_matches!(result, Err(AppointmentError::StaleStatus));
}

#[tokio::test]
async fn test_missing_appointment_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = appointment_store(&server).get(Uuid::new_v4()).await;
    assert_matches!(result, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn test_server_errors_surface_as_database_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/find_appointment_conflicts"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(MockSupabaseResponses::error_response("boom", "XX000")),
        )
        .mount(&server)
        .await;

    let intervals = vec![TimeInterval::new(local(2026, 3, 9, 9, 0), local(2026, 3, 9, 9, 50)).unwrap()];
    let result = appointment_store(&server)
        .find_conflicts(Uuid::new_v4(), &intervals, &ConflictExclusions::none())
        .await;

    assert_matches!(result, Err(AppointmentError::Database(_)));
}

#[tokio::test]
async fn test_biweekly_listing_filters_by_professional() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_recurrences"))
        .and(query_param("is_active", "eq.true"))
        .and(query_param("recurrence_type", "eq.BIWEEKLY"))
        .and(query_param("professional_id", format!("eq.{}", professional_id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let recurrences = recurrence_store(&server)
        .list_active_biweekly(Some(professional_id))
        .await
        .unwrap();
    assert!(recurrences.is_empty());
}

#[tokio::test]
async fn test_updating_missing_recurrence_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_recurrences"))
        .and(body_partial_json(json!({ "exceptions": ["2026-03-09"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = recurrence_store(&server)
        .update_exceptions(Uuid::new_v4(), &[date(2026, 3, 9)])
        .await;
    assert_matches!(result, Err(AppointmentError::RecurrenceNotFound));
}

#[tokio::test]
async fn test_token_invalidation_filters_unused_tokens_of_action() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let used = AppointmentToken {
        id: Uuid::new_v4(),
        appointment_id,
        action: LinkAction::Confirm,
        token: "abc".to_string(),
        expires_at: local(2026, 3, 10, 9, 0),
        used_at: Some(local(2026, 3, 1, 8, 0)),
        created_at: local(2026, 3, 1, 7, 0),
    };

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_tokens"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id).as_str()))
        .and(query_param("used_at", "is.null"))
        .and(query_param("action", "eq.CONFIRM"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([used])))
        .expect(1)
        .mount(&server)
        .await;

    let count = token_store(&server)
        .invalidate_for_appointment(appointment_id, Some(LinkAction::Confirm), local(2026, 3, 1, 8, 0))
        .await
        .unwrap();
    assert_eq!(count, 1);
}
