//! NSP authentication endpoint constants
//!
//! Paths are relative to the REST gateway base URL, e.g.
//! `https://10.73.0.181/rest-gateway/rest/api/v1`.

/// Token endpoint for both the client-credentials and refresh grants
pub const TOKEN_PATH: &str = "/auth/token";

/// Revocation endpoint, called once on shutdown
pub const REVOCATION_PATH: &str = "/auth/revocation";

/// Grant type for the initial Basic-authenticated token request
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

/// Grant type for exchanging a refresh token
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// A token this close to expiry is reported as invalid.
pub const VALIDITY_MARGIN_SECS: i64 = 60;
