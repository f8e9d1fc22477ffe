//! In-memory credential storage
//!
//! Holds the single current `Credential`. Every refresh replaces the whole
//! credential behind an `Arc`, so a reader either sees the old token or the
//! new one, never a mix of fields from both. The lock is held only for the
//! pointer swap or clone; callers never hold it across an await.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::constants::{DEFAULT_EXPIRES_IN_SECS, VALIDITY_MARGIN_SECS};
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// One issued bearer token with its refresh token.
///
/// `expires_in_secs` is the delta the token endpoint advertised, anchored at
/// `issued_at` (our receive time, not the server's clock).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_in_secs: u64,
}

impl Credential {
    /// Build a credential from a token endpoint response received at `issued_at`.
    ///
    /// A refresh response may omit `refresh_token`; the previous one is carried
    /// forward in that case. An initial response without one is rejected.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<&str>,
        issued_at: DateTime<Utc>,
    ) -> Result<Self> {
        if response.access_token.is_empty() {
            return Err(Error::InvalidResponse("empty access_token".into()));
        }
        let refresh_token = match (response.refresh_token, previous_refresh) {
            (Some(token), _) if !token.is_empty() => token,
            (_, Some(previous)) => previous.to_owned(),
            _ => return Err(Error::InvalidResponse("missing refresh_token".into())),
        };
        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".into()),
            issued_at,
            expires_in_secs: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }

    /// Absolute expiry computed from the advertised lifetime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the token is still usable at `now`, keeping a 60s margin.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at() - ChronoDuration::seconds(VALIDITY_MARGIN_SECS)
    }

    /// `Authorization` header value for API calls.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

/// Holder of the current credential.
///
/// Written only by `TokenManager`; read by anything that needs a bearer
/// header. Shared via `Arc<CredentialStore>`.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<Option<Arc<Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current credential, if any.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().clone()
    }

    /// Replace the current credential wholesale and return the new snapshot.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        *self.current.write() = Some(credential.clone());
        debug!(expires_at = %credential.expires_at(), "credential replaced");
        credential
    }

    /// Remove the current credential (after revocation).
    pub fn take(&self) -> Option<Arc<Credential>> {
        self.current.write().take()
    }

    /// `Bearer <token>` for the latest credential. Never waits on a refresh.
    pub fn authorization_header(&self) -> Result<String> {
        self.current()
            .map(|c| c.authorization_header())
            .ok_or(Error::NotAuthenticated)
    }
}
