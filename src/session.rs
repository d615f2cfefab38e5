//! Transporter login sessions
//!
//! Passwords are bcrypt hashes. A successful login issues an opaque uuid
//! token stored with an expiry; the token, not the transporter id, is what
//! travels in the cookie.

use chrono::{DateTime, Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{StoreError, TransportStore};
use crate::transport::Transporter;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Too many login attempts, try again shortly")]
    RateLimited,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, SessionError> {
    bcrypt::hash(password, cost).map_err(|e| SessionError::Hashing(e.to_string()))
}

/// Per-username login throttle
pub struct LoginLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl LoginLimiter {
    pub fn per_minute(attempts: u32) -> Self {
        let attempts = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(attempts)),
        }
    }

    pub fn check(&self, username: &str) -> bool {
        self.limiter.check_key(&username.to_string()).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub transporter: Transporter,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    store: Arc<dyn TransportStore>,
    ttl: Duration,
    limiter: LoginLimiter,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TransportStore>, ttl_hours: u32, attempts_per_minute: u32) -> Self {
        Self {
            store,
            ttl: Duration::hours(i64::from(ttl_hours)),
            limiter: LoginLimiter::per_minute(attempts_per_minute),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, SessionError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }
        if !self.limiter.check(username) {
            warn!(username, "Login rate limit exceeded");
            return Err(SessionError::RateLimited);
        }

        let Some((transporter, password_hash)) = self.store.find_credentials(username).await? else {
            info!(username, "Login for unknown transporter");
            return Err(SessionError::InvalidCredentials);
        };

        let candidate = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &password_hash))
            .await
            .map_err(|e| SessionError::Hashing(e.to_string()))?
            .map_err(|e| SessionError::Hashing(e.to_string()))?;
        if !matches {
            info!(username, "Login with wrong password");
            return Err(SessionError::InvalidCredentials);
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.ttl;
        self.store.create_session(&token, &transporter.id, expires_at).await?;

        info!(transporter_id = %transporter.id, "Transporter logged in");
        Ok(Session {
            token,
            transporter,
            expires_at,
        })
    }

    /// Transporter for a live session token
    pub async fn authenticate(&self, token: &str) -> Result<Option<Transporter>, SessionError> {
        let transporter = self.store.find_session(token, Utc::now()).await?;
        if transporter.is_none() {
            debug!("Session token unknown or expired");
        }
        Ok(transporter)
    }

    pub async fn logout(&self, token: &str) -> Result<(), SessionError> {
        self.store.delete_session(token).await?;
        Ok(())
    }
}
