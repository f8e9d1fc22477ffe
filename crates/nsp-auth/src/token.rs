//! Token endpoint client
//!
//! Three interactions with the NSP REST gateway, all carrying the same
//! Basic credentials:
//! 1. Client-credentials grant (startup)
//! 2. Refresh grant (every refresh interval)
//! 3. Revocation (shutdown)
//!
//! `AuthApi` is the seam `TokenManager` talks through; `HttpAuthApi` is the
//! reqwest implementation.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{GRANT_CLIENT_CREDENTIALS, GRANT_REFRESH_TOKEN, REVOCATION_PATH, TOKEN_PATH};
use crate::error::{Error, Result};

/// Response body from the token endpoint for both grants.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Which grant to request.
#[derive(Debug, Clone, Copy)]
pub enum Grant<'a> {
    ClientCredentials,
    RefreshToken(&'a str),
}

impl Grant<'_> {
    fn body(&self) -> serde_json::Value {
        match self {
            Grant::ClientCredentials => {
                serde_json::json!({ "grant_type": GRANT_CLIENT_CREDENTIALS })
            }
            Grant::RefreshToken(token) => serde_json::json!({
                "grant_type": GRANT_REFRESH_TOKEN,
                "refresh_token": token,
            }),
        }
    }
}

/// Operations against the authentication endpoint.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// POST the grant to the token endpoint and parse the token response.
    async fn request_token(&self, grant: Grant<'_>) -> Result<TokenResponse>;

    /// Revoke an access token.
    async fn revoke(&self, access_token: &str) -> Result<()>;
}

/// `Basic <base64(user:pass)>` header value.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// reqwest-backed `AuthApi`.
pub struct HttpAuthApi {
    client: reqwest::Client,
    token_url: String,
    revocation_url: String,
    basic: Secret<String>,
}

impl HttpAuthApi {
    /// `base_url` is the REST gateway root; endpoint paths are appended to it.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        username: &str,
        password: &Secret<String>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client,
            token_url: format!("{base}{TOKEN_PATH}"),
            revocation_url: format!("{base}{REVOCATION_PATH}"),
            basic: Secret::new(basic_authorization(username, password.expose())),
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn request_token(&self, grant: Grant<'_>) -> Result<TokenResponse> {
        debug!(url = %self.token_url, grant = grant_kind(&grant), "requesting token");
        let response = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::AUTHORIZATION, self.basic.expose().as_str())
            .json(&grant.body())
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::AuthFailure {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    async fn revoke(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.revocation_url)
            .header(reqwest::header::AUTHORIZATION, self.basic.expose().as_str())
            .form(&[("token", access_token), ("token_type_hint", "token")])
            .send()
            .await
            .map_err(|e| Error::Http(format!("revocation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Revocation(format!("revocation endpoint returned {status}")));
        }
        Ok(())
    }
}

fn grant_kind(grant: &Grant<'_>) -> &'static str {
    match grant {
        Grant::ClientCredentials => GRANT_CLIENT_CREDENTIALS,
        Grant::RefreshToken(_) => GRANT_REFRESH_TOKEN,
    }
}
