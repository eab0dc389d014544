mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::{
    appointment_routes, AppointmentBookingService, InMemoryAppointmentStore, InMemoryRecurrenceStore,
    SchedulingState, SignedLinkService, SlotBuilderService,
};
use availability_cell::{AvailabilityService, InMemoryAvailabilityStore};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::{timezone, BASE_URL, LINK_EXPIRY_HOURS, LINK_SECRET};

fn create_test_app() -> Router {
    let config = TestConfig::default().to_arc();
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let recurrences = Arc::new(InMemoryRecurrenceStore::new());
    let availability = Arc::new(AvailabilityService::new(Arc::new(InMemoryAvailabilityStore::new()), 30));

    let booking = AppointmentBookingService::new(
        appointments.clone(),
        recurrences.clone(),
        Arc::new(SignedLinkService::new(BASE_URL, LINK_SECRET, LINK_EXPIRY_HOURS)),
        LINK_EXPIRY_HOURS,
        timezone(),
    );
    let slots = SlotBuilderService::new(availability, appointments, recurrences, timezone());

    appointment_routes(SchedulingState {
        config,
        booking: Arc::new(booking),
        slots: Arc::new(slots),
        timezone: timezone(),
    })
}

fn token_for(user: &TestUser) -> String {
    JwtTestUtils::create_test_token(user, &TestConfig::default().jwt_secret, None)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

fn booking_body(professional_id: Uuid, scheduled_at: &str, end_at: &str) -> Value {
    json!({
        "professional_id": professional_id,
        "patient_id": Uuid::new_v4(),
        "patient_name": "Maria Souza",
        "scheduled_at": scheduled_at,
        "end_at": end_at,
        "appointment_type": "CONSULTA"
    })
}

/// Path and query of an issued public link.
fn link_path(url: &str) -> String {
    url.trim_start_matches(BASE_URL).to_string()
}

#[tokio::test]
async fn test_booking_requires_token() {
    let app = create_test_app();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            None,
            booking_body(Uuid::new_v4(), "2031-03-10T12:00:00Z", "2031-03-10T12:50:00Z"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_booking_for_other_professional_is_forbidden() {
    let app = create_test_app();
    let token = token_for(&TestUser::professional(Uuid::new_v4()));

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            Some(&token),
            booking_body(Uuid::new_v4(), "2031-03-10T12:00:00Z", "2031-03-10T12:50:00Z"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_booking_and_conflict_responses() {
    let app = create_test_app();
    let professional_id = Uuid::new_v4();
    let token = token_for(&TestUser::professional(professional_id));

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            Some(&token),
            booking_body(professional_id, "2031-03-10T12:00:00Z", "2031-03-10T12:50:00Z"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["appointment"]["status"], "AGENDADO");
    assert!(created["links"]["confirm_url"]
        .as_str()
        .unwrap()
        .starts_with(&format!("{}/public/appointments/confirm?", BASE_URL)));

    let (status, rejected) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            Some(&token),
            booking_body(professional_id, "2031-03-10T12:30:00Z", "2031-03-10T13:00:00Z"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        rejected["error"],
        "Conflito de horário com Maria Souza em 10/03/2031 das 09:00 às 09:50"
    );
    assert_eq!(rejected["details"]["conflict"]["id"], created["appointment"]["id"]);

    let (status, check) = send(
        &app,
        json_request(
            "POST",
            "/appointments/conflicts/check",
            Some(&token),
            json!({
                "professional_id": professional_id,
                "scheduled_at": "2031-03-10T12:50:00Z",
                "end_at": "2031-03-10T13:40:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["ok"], true);
}

#[tokio::test]
async fn test_invalid_status_transition_is_unprocessable() {
    let app = create_test_app();
    let professional_id = Uuid::new_v4();
    let token = token_for(&TestUser::professional(professional_id));

    let (_, created) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            Some(&token),
            booking_body(professional_id, "2031-03-10T12:00:00Z", "2031-03-10T12:50:00Z"),
        ),
    )
    .await;
    let id = created["appointment"]["id"].as_str().unwrap().to_string();
    let status_uri = format!("/appointments/{}/status", id);

    let (status, finished) = send(
        &app,
        json_request("PATCH", &status_uri, Some(&token), json!({ "status": "FINALIZADO" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finished["status_label"], "Finalizado");

    let (status, _) = send(
        &app,
        json_request("PATCH", &status_uri, Some(&token), json!({ "status": "AGENDADO" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_public_confirm_link_flow() {
    let app = create_test_app();
    let professional_id = Uuid::new_v4();
    let token = token_for(&TestUser::professional(professional_id));

    let (_, created) = send(
        &app,
        json_request(
            "POST",
            "/appointments",
            Some(&token),
            booking_body(professional_id, "2031-03-10T12:00:00Z", "2031-03-10T12:50:00Z"),
        ),
    )
    .await;
    let confirm = link_path(created["links"]["confirm_url"].as_str().unwrap());
    let query = confirm.split_once('?').map(|(_, q)| q).unwrap();

    let (status, validation) = send(
        &app,
        empty_request("GET", &format!("/public/links/validate?action=confirm&{}", query), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validation["valid"], true);

    let (status, confirmed) = send(&app, empty_request("POST", &confirm, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "CONFIRMADO");
    assert_eq!(confirmed["message"], "Consulta confirmada");

    let (status, reused) = send(&app, empty_request("POST", &confirm, None)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(reused["error"], "Este link já foi utilizado");
}

#[tokio::test]
async fn test_tampered_public_link_is_rejected() {
    let app = create_test_app();
    let uri = format!(
        "/public/links/validate?action=cancel&id={}&expires=1930000000&sig=forged",
        Uuid::new_v4()
    );

    let (status, validation) = send(&app, empty_request("GET", &uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validation["valid"], false);
    assert_eq!(validation["reason"], "invalid");
    assert_eq!(validation["message"], "Link inválido");

    let consume = format!(
        "/public/appointments/cancel?id={}&expires=1930000000&sig=forged",
        Uuid::new_v4()
    );
    let (status, _) = send(&app, empty_request("POST", &consume, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, empty_request("POST", "/public/appointments/reschedule", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_overview_is_admin_only() {
    let app = create_test_app();
    let professional = token_for(&TestUser::professional(Uuid::new_v4()));
    let admin = token_for(&TestUser::admin("admin@clinica.example.com"));

    let (status, _) = send(&app, empty_request("GET", "/schedule/overview?date=2031-03-10", Some(&professional))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, overview) = send(&app, empty_request("GET", "/schedule/overview?date=2031-03-10", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["date"], "2031-03-10");
    assert!(overview["columns"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_recurrence_preview_reports_counts() {
    let app = create_test_app();
    let token = token_for(&TestUser::professional(Uuid::new_v4()));

    let (status, preview) = send(
        &app,
        json_request(
            "POST",
            "/recurrences/preview",
            Some(&token),
            json!({
                "start_date": "2031-03-10",
                "start_time": "09:00:00",
                "duration_minutes": 50,
                "recurrence": {
                    "recurrence_type": "WEEKLY",
                    "end_type": "BY_OCCURRENCES",
                    "occurrences": 4
                },
                "exceptions": ["2031-03-17"]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["total"], 4);
    assert_eq!(preview["active"], 3);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/recurrences/preview",
            Some(&token),
            json!({
                "start_date": "2031-03-10",
                "start_time": "09:00:00",
                "duration_minutes": 50,
                "recurrence": {
                    "recurrence_type": "WEEKLY",
                    "end_type": "BY_OCCURRENCES",
                    "occurrences": 0
                }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
