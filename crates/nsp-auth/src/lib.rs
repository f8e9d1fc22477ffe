//! NSP REST gateway authentication
//!
//! Obtains a bearer token with HTTP Basic credentials, keeps it fresh with a
//! fixed-interval background refresh, and revokes it on shutdown. The current
//! token lives in a `CredentialStore` that other components read without
//! ever observing a half-written credential.
//!
//! Credential flow:
//! 1. `TokenManager::acquire_initial()` performs the client-credentials grant
//! 2. `TokenManager::start_auto_refresh()` runs the refresh grant every interval
//! 3. Readers call `CredentialStore::authorization_header()` per request
//! 4. `TokenManager::revoke()` invalidates the token during shutdown

pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use manager::{RefreshHealth, TokenManager};
pub use refresh::spawn_refresh_task;
pub use token::{AuthApi, Grant, HttpAuthApi, TokenResponse, basic_authorization};
