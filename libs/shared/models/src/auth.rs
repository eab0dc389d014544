use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_PROFESSIONAL: &str = "professional";

/// Authenticated caller as resolved from the Supabase session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ROLE_ADMIN)
    }

    /// Admins act for every professional; a professional only for itself.
    pub fn can_act_for(&self, professional_id: Uuid) -> bool {
        if self.is_admin() {
            return true;
        }

        self.role.as_deref() == Some(ROLE_PROFESSIONAL)
            && self.id == professional_id.to_string()
    }
}
