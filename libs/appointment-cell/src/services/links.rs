// libs/appointment-cell/src/services/links.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, LinkMode};
use shared_utils::crypto::{self, SignatureError};

use crate::models::{
    Appointment, AppointmentError, AppointmentLinks, AppointmentToken, LinkAction, LinkCredentials,
    LinkRejection, LinkValidation,
};
use crate::store::TokenStore;

const TOKEN_LENGTH: usize = 43;

/// Confirm/cancel links a patient can follow without logging in.
#[async_trait]
pub trait LinkService: Send + Sync {
    /// Issue a fresh confirm/cancel pair. Previously issued links stop working
    /// where the mechanism allows it.
    async fn issue(&self, appointment: &Appointment, now: DateTime<Utc>) -> Result<AppointmentLinks, AppointmentError>;

    async fn validate(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<LinkValidation, AppointmentError>;

    /// Mark links as used. `None` invalidates both actions.
    async fn invalidate(
        &self,
        appointment_id: Uuid,
        action: Option<LinkAction>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError>;
}

pub fn link_expiry(scheduled_at: DateTime<Utc>, expiry_hours: i64) -> DateTime<Utc> {
    scheduled_at + Duration::hours(expiry_hours)
}

fn link_url(base_url: &str, action: LinkAction, query: &str) -> String {
    format!(
        "{}/public/appointments/{}?{}",
        base_url.trim_end_matches('/'),
        action.path_segment(),
        query
    )
}

pub fn build_link_service(config: &AppConfig, token_store: Arc<dyn TokenStore>) -> Arc<dyn LinkService> {
    match config.link_mode {
        LinkMode::Signed => {
            info!("Issuing HMAC-signed appointment links");
            Arc::new(SignedLinkService::new(
                &config.public_base_url,
                &config.link_signing_secret,
                config.link_expiry_hours,
            ))
        }
        LinkMode::Stored => {
            info!("Issuing stored single-use appointment tokens");
            Arc::new(StoredTokenService::new(
                &config.public_base_url,
                config.link_expiry_hours,
                token_store,
            ))
        }
    }
}

/// Stateless links: `?id=&expires=&sig=` with an HMAC over all three and the action.
pub struct SignedLinkService {
    base_url: String,
    secret: String,
    expiry_hours: i64,
}

impl SignedLinkService {
    pub fn new(base_url: &str, secret: &str, expiry_hours: i64) -> Self {
        Self {
            base_url: base_url.to_string(),
            secret: secret.to_string(),
            expiry_hours,
        }
    }

    fn message(appointment_id: Uuid, action: LinkAction, expires: i64) -> String {
        format!("{}:{}:{}", appointment_id, action.path_segment(), expires)
    }

    fn signed_url(&self, appointment_id: Uuid, action: LinkAction, expires: i64) -> Result<String, AppointmentError> {
        let sig = crypto::sign(&self.secret, &Self::message(appointment_id, action, expires))
            .map_err(|e| AppointmentError::Validation(format!("Link signing is not configured: {:?}", e)))?;
        let query = format!(
            "id={}&expires={}&sig={}",
            appointment_id,
            expires,
            urlencoding::encode(&sig)
        );
        Ok(link_url(&self.base_url, action, &query))
    }
}

#[async_trait]
impl LinkService for SignedLinkService {
    async fn issue(&self, appointment: &Appointment, _now: DateTime<Utc>) -> Result<AppointmentLinks, AppointmentError> {
        let expires_at = link_expiry(appointment.scheduled_at, self.expiry_hours);
        let expires = expires_at.timestamp();

        Ok(AppointmentLinks {
            confirm_url: self.signed_url(appointment.id, LinkAction::Confirm, expires)?,
            cancel_url: self.signed_url(appointment.id, LinkAction::Cancel, expires)?,
            expires_at,
        })
    }

    async fn validate(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<LinkValidation, AppointmentError> {
        let (Some(appointment_id), Some(expires), Some(sig)) =
            (credentials.id, credentials.expires, credentials.sig.as_deref())
        else {
            return Ok(LinkValidation::Rejected(LinkRejection::Invalid));
        };

        match crypto::verify(&self.secret, &Self::message(appointment_id, action, expires), sig) {
            Ok(()) => {}
            Err(SignatureError::MissingSecret) => {
                warn!("Signed link presented but no signing secret is configured");
                return Ok(LinkValidation::Rejected(LinkRejection::Invalid));
            }
            Err(_) => return Ok(LinkValidation::Rejected(LinkRejection::Invalid)),
        }

        if now.timestamp() > expires {
            return Ok(LinkValidation::Rejected(LinkRejection::Expired));
        }

        Ok(LinkValidation::Valid { appointment_id })
    }

    async fn invalidate(
        &self,
        appointment_id: Uuid,
        _action: Option<LinkAction>,
        _now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        // Nothing is stored for signed links
        debug!("Signed links of appointment {} need no revocation", appointment_id);
        Ok(())
    }
}

/// Random single-use tokens persisted through a [`TokenStore`].
pub struct StoredTokenService {
    base_url: String,
    expiry_hours: i64,
    store: Arc<dyn TokenStore>,
}

impl StoredTokenService {
    pub fn new(base_url: &str, expiry_hours: i64, store: Arc<dyn TokenStore>) -> Self {
        Self {
            base_url: base_url.to_string(),
            expiry_hours,
            store,
        }
    }

    fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }

    async fn create(
        &self,
        appointment_id: Uuid,
        action: LinkAction,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<String, AppointmentError> {
        let token = AppointmentToken {
            id: Uuid::new_v4(),
            appointment_id,
            action,
            token: Self::generate_token(),
            expires_at,
            used_at: None,
            created_at: now,
        };
        let query = format!("token={}", urlencoding::encode(&token.token));
        self.store.insert(token).await?;
        Ok(link_url(&self.base_url, action, &query))
    }
}

#[async_trait]
impl LinkService for StoredTokenService {
    async fn issue(&self, appointment: &Appointment, now: DateTime<Utc>) -> Result<AppointmentLinks, AppointmentError> {
        let replaced = self.store.invalidate_for_appointment(appointment.id, None, now).await?;
        if replaced > 0 {
            debug!("Invalidated {} previous token(s) of appointment {}", replaced, appointment.id);
        }

        let expires_at = link_expiry(appointment.scheduled_at, self.expiry_hours);
        Ok(AppointmentLinks {
            confirm_url: self.create(appointment.id, LinkAction::Confirm, expires_at, now).await?,
            cancel_url: self.create(appointment.id, LinkAction::Cancel, expires_at, now).await?,
            expires_at,
        })
    }

    async fn validate(
        &self,
        credentials: &LinkCredentials,
        action: LinkAction,
        now: DateTime<Utc>,
    ) -> Result<LinkValidation, AppointmentError> {
        let Some(raw) = credentials.token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(LinkValidation::Rejected(LinkRejection::Invalid));
        };

        let rejection = match self.store.find(raw).await? {
            None => LinkRejection::Invalid,
            Some(token) if token.action != action => LinkRejection::Invalid,
            Some(token) if token.used_at.is_some() => LinkRejection::AlreadyUsed,
            Some(token) if now > token.expires_at => LinkRejection::Expired,
            Some(token) => return Ok(LinkValidation::Valid { appointment_id: token.appointment_id }),
        };

        Ok(LinkValidation::Rejected(rejection))
    }

    async fn invalidate(
        &self,
        appointment_id: Uuid,
        action: Option<LinkAction>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        self.store.invalidate_for_appointment(appointment_id, action, now).await?;
        Ok(())
    }
}
