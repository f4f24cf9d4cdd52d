//! Login credentials and browser sessions.
//!
//! There is one operator account, configured in the settings file (or the
//! environment). A successful login creates a session whose token is handed
//! to the browser once as a cookie. The store only keeps `SHA-256(token)`,
//! so a memory dump of the map does not yield usable cookies.
//!
//! Sessions are in-memory and end at their expiry, on logout, or when the
//! process restarts.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::settings::Settings;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "cardkeep_session";

/// Prefix of every session token.
pub const TOKEN_PREFIX: &str = "cks_";

/// Check a username and password against the configured account.
///
/// Both comparisons always run and use constant-time equality.
///
/// # Errors
///
/// Returns [`AuthError::InvalidCredentials`] if auth is disabled or either
/// value differs.
pub fn verify_credentials(
    settings: &Settings,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    if !settings.auth_enabled() {
        return Err(AuthError::InvalidCredentials);
    }
    let user_ok = settings.auth.username.as_bytes().ct_eq(username.as_bytes());
    let pass_ok = settings.auth.password.as_bytes().ct_eq(password.as_bytes());
    if bool::from(user_ok & pass_ok) {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

/// A fresh session token: `cks_` followed by 64 hex characters.
#[must_use]
pub fn generate_session_token() -> String {
    format!(
        "{TOKEN_PREFIX}{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Hex SHA-256 of a token; the session map key.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A logged-in browser session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory session table keyed by token hash.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `username` lasting `ttl`.
    ///
    /// Returns the plaintext token (only ever returned here) and the
    /// session.
    pub async fn create(&self, username: &str, ttl: Duration) -> (String, Session) {
        let token = generate_session_token();
        let now = Utc::now();
        let session = Session {
            username: username.to_owned(),
            created_at: now,
            expires_at: now + ttl,
        };
        self.sessions
            .write()
            .await
            .insert(hash_token(&token), session.clone());
        info!(username = %username, expires_at = %session.expires_at, "session created");
        (token, session)
    }

    /// Look up the session for a presented token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidSession`] if no session matches.
    /// - [`AuthError::SessionExpired`] if it has expired; it is removed.
    pub async fn validate(&self, token: &str) -> Result<Session, AuthError> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Err(AuthError::InvalidSession);
        }
        let key = hash_token(token);
        let session = self
            .sessions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(AuthError::InvalidSession)?;

        if session.is_expired_at(Utc::now()) {
            self.sessions.write().await.remove(&key);
            debug!(username = %session.username, "expired session rejected");
            return Err(AuthError::SessionExpired {
                expired_at: session.expires_at.to_rfc3339(),
            });
        }
        Ok(session)
    }

    /// End one session. Returns whether it existed.
    pub async fn revoke(&self, token: &str) -> bool {
        let removed = self.sessions.write().await.remove(&hash_token(token));
        if let Some(session) = &removed {
            info!(username = %session.username, "session revoked");
        }
        removed.is_some()
    }

    /// End every session. Returns how many were dropped.
    pub async fn revoke_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            info!(count, "all sessions revoked");
        }
        count
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        before - sessions.len()
    }

    /// Number of live (possibly expired, not yet purged) sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
