use std::sync::Arc;
use chrono::{Duration, Utc};
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, LinkMode, StorageBackend};
use shared_models::auth::{User, ROLE_ADMIN, ROLE_PROFESSIONAL};

use crate::crypto;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub link_signing_secret: String,
    pub link_mode: LinkMode,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            link_signing_secret: "test-link-signing-secret".to_string(),
            link_mode: LinkMode::Signed,
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            storage_backend: StorageBackend::Memory,
            public_base_url: "https://agenda.example.com".to_string(),
            link_mode: self.link_mode,
            link_signing_secret: self.link_signing_secret.clone(),
            clinic_utc_offset_minutes: -180,
            default_appointment_duration_minutes: 30,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: ROLE_PROFESSIONAL.to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    /// A professional whose user id is the given professional id.
    pub fn professional(professional_id: Uuid) -> Self {
        Self {
            id: professional_id.to_string(),
            email: "profissional@example.com".to_string(),
            role: ROLE_PROFESSIONAL.to_string(),
        }
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, ROLE_ADMIN)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);
        let signature = crypto::sign(secret, &signing_input)
            .expect("test secret must not be empty");

        format!("{}.{}", signing_input, signature)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// PostgREST row shapes used by wiremock-backed tests.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn appointment_row(
        id: Uuid,
        professional_id: Uuid,
        scheduled_at: &str,
        end_at: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "professional_id": professional_id,
            "patient_id": Uuid::new_v4(),
            "patient_name": "Maria Souza",
            "title": null,
            "scheduled_at": scheduled_at,
            "end_at": end_at,
            "status": status,
            "appointment_type": "CONSULTA",
            "blocks_time": true,
            "group_id": null,
            "recurrence_id": null,
            "confirmed_at": null,
            "cancelled_at": null,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn availability_rule_row(professional_id: Uuid, day_of_week: i32, start: &str, end: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "day_of_week": day_of_week,
            "start_time": start,
            "end_time": end,
            "is_active": true,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
        assert!(app_config.is_link_signing_configured());
    }

    #[test]
    fn test_professional_user_scope() {
        let professional_id = Uuid::new_v4();
        let user = TestUser::professional(professional_id).to_user();

        assert!(user.can_act_for(professional_id));
        assert!(!user.is_admin());
    }

    #[test]
    fn test_jwt_round_trip_resolves_app_role() {
        let config = TestConfig::default();
        let admin = TestUser::admin("admin@example.com");
        let token = JwtTestUtils::create_test_token(&admin, &config.jwt_secret, Some(1));

        let user = validate_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(user.id, admin.id);
        assert!(user.is_admin());
    }

    #[test]
    fn test_expired_and_forged_tokens_rejected() {
        let config = TestConfig::default();
        let user = TestUser::default();

        let expired = JwtTestUtils::create_expired_token(&user, &config.jwt_secret);
        assert_eq!(validate_token(&expired, &config.jwt_secret).unwrap_err(), "Token expired");

        let forged = JwtTestUtils::create_invalid_signature_token(&user);
        assert_eq!(validate_token(&forged, &config.jwt_secret).unwrap_err(), "Invalid token signature");

        let malformed = JwtTestUtils::create_malformed_token();
        assert!(validate_token(&malformed, &config.jwt_secret).is_err());
    }
}
