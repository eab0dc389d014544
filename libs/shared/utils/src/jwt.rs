use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{TimeZone, Utc};
use tracing::debug;

use shared_models::auth::{JwtClaims, User};

use crate::crypto::{self, SignatureError};

/// Validates an HS256 session token issued by the auth provider and
/// resolves the caller. Only identity and role are used by the scheduler.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let mut parts = token.split('.');
    let (header_b64, claims_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err("Invalid token format".to_string()),
    };

    let signing_input = format!("{}.{}", header_b64, claims_b64);
    match crypto::verify(jwt_secret, &signing_input, signature_b64) {
        Ok(()) => {}
        Err(SignatureError::Encoding) => return Err("Invalid signature encoding".to_string()),
        Err(SignatureError::MissingSecret) => return Err("Failed to create HMAC".to_string()),
        Err(SignatureError::Mismatch) => {
            debug!("Token signature verification failed");
            return Err("Invalid token signature".to_string());
        }
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| "Invalid claims encoding".to_string())?;

    let claims: JwtClaims = serde_json::from_slice(&claims_json).map_err(|e| {
        debug!("Failed to parse claims: {}", e);
        "Invalid claims format".to_string()
    })?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp().max(0) as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err("Token expired".to_string());
        }
    }

    let created_at = claims
        .iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    // Supabase keeps the application role in app_metadata; `role` is usually
    // just "authenticated".
    let role = claims
        .app_metadata
        .as_ref()
        .and_then(|meta| meta.get("role"))
        .and_then(|role| role.as_str())
        .map(str::to_string)
        .or(claims.role);

    let user = User {
        id: claims.sub,
        email: claims.email,
        role,
        metadata: claims.user_metadata,
        created_at,
    };

    debug!("Token validated successfully for user: {}", user.id);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    use crate::test_utils::{JwtTestUtils, TestUser};
    use shared_models::auth::ROLE_ADMIN;

    const SECRET: &str = "jwt-unit-test-secret";

    #[test]
    fn test_role_comes_from_app_metadata() {
        let professional_id = Uuid::new_v4();
        let token = JwtTestUtils::create_test_token(&TestUser::professional(professional_id), SECRET, None);

        let user = assert_ok!(validate_token(&token, SECRET));
        assert_eq!(user.id, professional_id.to_string());
        assert!(user.can_act_for(professional_id));
        assert!(!user.can_act_for(Uuid::new_v4()));

        let admin = assert_ok!(validate_token(
            &JwtTestUtils::create_test_token(&TestUser::admin("admin@example.com"), SECRET, None),
            SECRET,
        ));
        assert_eq!(admin.role.as_deref(), Some(ROLE_ADMIN));
    }

    #[test]
    fn test_rejected_tokens() {
        let user = TestUser::default();

        assert_eq!(
            assert_err!(validate_token(&JwtTestUtils::create_expired_token(&user, SECRET), SECRET)),
            "Token expired"
        );
        assert_eq!(
            assert_err!(validate_token(&JwtTestUtils::create_invalid_signature_token(&user), SECRET)),
            "Invalid token signature"
        );
        assert_err!(validate_token(&JwtTestUtils::create_malformed_token(), SECRET));
        assert_err!(validate_token("only.two", SECRET));
        assert_err!(validate_token(&JwtTestUtils::create_test_token(&user, SECRET, None), ""));
    }
}
