use std::env;
use std::str::FromStr;
use tracing::warn;

/// Which persistence backend the API wires its stores to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Supabase,
    Memory,
}

/// Which confirm/cancel link mechanism is issued to patients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Self-contained HMAC-signed links, expiry embedded in the URL.
    Signed,
    /// Random single-use tokens persisted in `appointment_tokens`.
    Stored,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub storage_backend: StorageBackend,
    pub public_base_url: String,
    pub link_mode: LinkMode,
    pub link_signing_secret: String,
    pub link_expiry_hours: i64,
    pub clinic_utc_offset_minutes: i32,
    pub default_appointment_duration_minutes: u32,
    pub recurrence_extension_interval_secs: u64,
    pub recurrence_extension_months: u32,
    pub recurrence_extension_horizon_days: i64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, stores will use the anon key");
                    String::new()
                }),
            storage_backend: match env::var("STORAGE_BACKEND").as_deref() {
                Ok("memory") => StorageBackend::Memory,
                Ok("supabase") => StorageBackend::Supabase,
                Ok(other) => {
                    warn!("Unknown STORAGE_BACKEND '{}', using supabase", other);
                    StorageBackend::Supabase
                }
                Err(_) => StorageBackend::Supabase,
            },
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("PUBLIC_BASE_URL not set, using default");
                    "http://localhost:3000".to_string()
                }),
            link_mode: match env::var("LINK_MODE").as_deref() {
                Ok("stored") => LinkMode::Stored,
                Ok("signed") | Err(_) => LinkMode::Signed,
                Ok(other) => {
                    warn!("Unknown LINK_MODE '{}', using signed links", other);
                    LinkMode::Signed
                }
            },
            link_signing_secret: env::var("LINK_SIGNING_SECRET")
                .unwrap_or_else(|_| {
                    warn!("LINK_SIGNING_SECRET not set, using empty value");
                    String::new()
                }),
            link_expiry_hours: parse_or("LINK_EXPIRY_HOURS", 24),
            clinic_utc_offset_minutes: parse_or("CLINIC_UTC_OFFSET_MINUTES", -180),
            default_appointment_duration_minutes: parse_or("DEFAULT_APPOINTMENT_DURATION_MINUTES", 50),
            recurrence_extension_interval_secs: parse_or("RECURRENCE_EXTENSION_INTERVAL_SECS", 3600),
            recurrence_extension_months: parse_or("RECURRENCE_EXTENSION_MONTHS", 1),
            recurrence_extension_horizon_days: parse_or("RECURRENCE_EXTENSION_HORIZON_DAYS", 31),
            port: parse_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let storage_ready = match self.storage_backend {
            StorageBackend::Memory => true,
            StorageBackend::Supabase => {
                !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        };

        storage_ready
            && !self.supabase_jwt_secret.is_empty()
            && self.is_link_signing_configured()
    }

    /// Bearer used by server-side stores, which run outside a user session.
    pub fn service_token(&self) -> Option<&str> {
        if self.supabase_service_role_key.is_empty() {
            None
        } else {
            Some(&self.supabase_service_role_key)
        }
    }

    pub fn is_link_signing_configured(&self) -> bool {
        match self.link_mode {
            LinkMode::Signed => !self.link_signing_secret.is_empty(),
            LinkMode::Stored => true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            supabase_service_role_key: String::new(),
            storage_backend: StorageBackend::Memory,
            public_base_url: "http://localhost:3000".to_string(),
            link_mode: LinkMode::Signed,
            link_signing_secret: String::new(),
            link_expiry_hours: 24,
            clinic_utc_offset_minutes: -180,
            default_appointment_duration_minutes: 50,
            recurrence_extension_interval_secs: 3600,
            recurrence_extension_months: 1,
            recurrence_extension_horizon_days: 31,
            port: 3000,
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
