//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The API password and Kafka key passphrase come from NSP_API_PASSWORD /
//! KAFKA_KEY_PASSPHRASE or from files named in the config, never from the
//! TOML itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use event_stream::KafkaSettings;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub token: TokenConfig,
    pub subscription: SubscriptionConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// NSP REST gateway access
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Gateway root, e.g. `https://10.73.0.181/rest-gateway/rest/api/v1`
    pub base_url: String,
    pub username: String,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Accept self-signed gateway certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Lifetime NSP advertises for a bearer token
    #[serde(default = "default_token_lifetime")]
    pub lifetime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionConfig {
    /// Notification service root, e.g. `https://10.73.0.181:8544/nbi-notification/api/v1`
    pub base_url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_property_filter")]
    pub property_filter: String,
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_subscription_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    pub ca_location: PathBuf,
    pub certificate_location: PathBuf,
    pub key_location: PathBuf,
    #[serde(skip)]
    pub key_passphrase: Option<Secret<String>>,
    #[serde(default)]
    pub key_passphrase_file: Option<PathBuf>,
    #[serde(default)]
    pub verify_hostname: bool,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub sync_each_write: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub listen_addr: SocketAddr,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    3000
}

fn default_token_lifetime() -> u64 {
    3600
}

fn default_category() -> String {
    "NSP-FAULT".into()
}

fn default_property_filter() -> String {
    "severity = 'warning'".into()
}

fn default_renewal_interval() -> u64 {
    1800
}

fn default_subscription_ttl() -> u64 {
    3400
}

fn default_group_id() -> String {
    "nsp-fault-gateway".into()
}

fn default_session_timeout_ms() -> u32 {
    10_000
}

fn default_export_path() -> PathBuf {
    PathBuf::from("logs/kafka_messages.jsonl")
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            lifetime_secs: default_token_lifetime(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: default_export_path(),
            sync_each_write: false,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, resolve secrets, and validate.
    ///
    /// Secret resolution order, for each secret:
    /// 1. env var (NSP_API_PASSWORD, KAFKA_KEY_PASSPHRASE)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| common::Error::io(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;

        config.api.password =
            resolve_secret("NSP_API_PASSWORD", config.api.password_file.as_deref())?;
        config.kafka.key_passphrase =
            resolve_secret("KAFKA_KEY_PASSPHRASE", config.kafka.key_passphrase_file.as_deref())?;

        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("api.base_url", &self.api.base_url),
            ("subscription.base_url", &self.subscription.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.api.username.is_empty() {
            return Err(common::Error::Config("api.username must not be empty".into()));
        }
        if self.api.password.is_none() {
            return Err(common::Error::MissingSecret(
                "API password (NSP_API_PASSWORD or api.password_file)",
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.request_timeout_secs must be greater than 0".into(),
            ));
        }

        check_interval(
            "token.refresh_interval_secs",
            self.token.refresh_interval_secs,
            "token.lifetime_secs",
            self.token.lifetime_secs,
        )?;
        check_interval(
            "subscription.renewal_interval_secs",
            self.subscription.renewal_interval_secs,
            "subscription.ttl_secs",
            self.subscription.ttl_secs,
        )?;

        if self.subscription.category.is_empty() {
            return Err(common::Error::Config("subscription.category must not be empty".into()));
        }
        if self.kafka.brokers.trim().is_empty() {
            return Err(common::Error::Config("kafka.brokers must not be empty".into()));
        }
        if self.kafka.group_id.is_empty() {
            return Err(common::Error::Config("kafka.group_id must not be empty".into()));
        }
        for (name, file) in [
            ("kafka.ca_location", &self.kafka.ca_location),
            ("kafka.certificate_location", &self.kafka.certificate_location),
            ("kafka.key_location", &self.kafka.key_location),
        ] {
            if !file.is_file() {
                return Err(common::Error::Config(format!(
                    "{name} {} does not exist or is not a file",
                    file.display()
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("nsp-fault-gateway.toml")
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token.refresh_interval_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.subscription.renewal_interval_secs)
    }

    pub fn subscription_ttl(&self) -> Duration {
        Duration::from_secs(self.subscription.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Broker connection settings for the stream consumer.
    pub fn kafka_settings(&self) -> KafkaSettings {
        KafkaSettings {
            brokers: self.kafka.brokers.clone(),
            group_id: self.kafka.group_id.clone(),
            ca_location: self.kafka.ca_location.clone(),
            certificate_location: self.kafka.certificate_location.clone(),
            key_location: self.kafka.key_location.clone(),
            key_passphrase: self.kafka.key_passphrase.clone(),
            verify_hostname: self.kafka.verify_hostname,
            session_timeout_ms: self.kafka.session_timeout_ms,
            connect_timeout: self.request_timeout(),
        }
    }
}

fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var)
        && !value.trim().is_empty()
    {
        return Ok(Some(Secret::new(value.trim().to_owned())));
    }
    match file {
        Some(path) => Secret::from_file(path),
        None => Ok(None),
    }
}

fn check_interval(name: &str, interval: u64, bound_name: &str, bound: u64) -> common::Result<()> {
    if interval == 0 {
        return Err(common::Error::Config(format!("{name} must be greater than 0")));
    }
    if interval >= bound {
        return Err(common::Error::Config(format!(
            "{name} ({interval}) must be shorter than {bound_name} ({bound})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    /// Temp dir holding dummy certificate files and a password file.
    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ca_cert.pem", "client.pem", "client.key"] {
            std::fs::write(dir.path().join(name), "-----BEGIN TEST-----\n").unwrap();
        }
        std::fs::write(dir.path().join("password"), "s3cret\n").unwrap();
        dir
    }

    fn toml_with(dir: &Path, extra_token: &str, extra_subscription: &str) -> String {
        let d = dir.display();
        format!(
            r#"
[api]
base_url = "https://10.73.0.181/rest-gateway/rest/api/v1"
username = "admin"
password_file = "{d}/password"

[token]
{extra_token}

[subscription]
base_url = "https://10.73.0.181:8544/nbi-notification/api/v1"
{extra_subscription}

[kafka]
brokers = "10.73.0.181:9193"
ca_location = "{d}/ca_cert.pem"
certificate_location = "{d}/client.pem"
key_location = "{d}/client.key"
"#
        )
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn clear_secret_env() {
        unsafe {
            remove_env("NSP_API_PASSWORD");
            remove_env("KAFKA_KEY_PASSPHRASE");
        }
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(dir.path(), &toml_with(dir.path(), "", ""));

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.username, "admin");
        assert_eq!(config.api.password.as_ref().unwrap().expose(), "s3cret");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert!(!config.api.accept_invalid_certs);
        assert_eq!(config.token.refresh_interval_secs, 3000);
        assert_eq!(config.token.lifetime_secs, 3600);
        assert_eq!(config.subscription.category, "NSP-FAULT");
        assert_eq!(config.subscription.property_filter, "severity = 'warning'");
        assert_eq!(config.subscription.renewal_interval_secs, 1800);
        assert_eq!(config.subscription.ttl_secs, 3400);
        assert_eq!(config.kafka.group_id, "nsp-fault-gateway");
        assert!(!config.kafka.verify_hostname);
        assert!(config.kafka.key_passphrase.is_none());
        assert_eq!(config.export.path, PathBuf::from("logs/kafka_messages.jsonl"));
        assert_eq!(config.admin.listen_addr, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_password_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(dir.path(), &toml_with(dir.path(), "", ""));

        unsafe { set_env("NSP_API_PASSWORD", "from-env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.password.as_ref().unwrap().expose(), "from-env");
        unsafe { remove_env("NSP_API_PASSWORD") };
    }

    #[test]
    fn test_missing_password_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        std::fs::write(dir.path().join("password"), "  \n").unwrap();
        let path = write_config(dir.path(), &toml_with(dir.path(), "", ""));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::MissingSecret(_)), "got: {err}");
    }

    #[test]
    fn test_key_passphrase_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(dir.path(), &toml_with(dir.path(), "", ""));

        unsafe { set_env("KAFKA_KEY_PASSPHRASE", "keypass") };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.kafka_settings().key_passphrase.unwrap().expose(),
            "keypass"
        );
        unsafe { remove_env("KAFKA_KEY_PASSPHRASE") };
    }

    #[test]
    fn test_refresh_interval_must_be_shorter_than_lifetime() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(
            dir.path(),
            &toml_with(dir.path(), "refresh_interval_secs = 3600\nlifetime_secs = 3600", ""),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains(
                "token.refresh_interval_secs (3600) must be shorter than token.lifetime_secs (3600)"
            ),
            "got: {err}"
        );
    }

    #[test]
    fn test_renewal_interval_must_be_shorter_than_ttl() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(
            dir.path(),
            &toml_with(dir.path(), "", "renewal_interval_secs = 4000"),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("subscription.renewal_interval_secs"), "got: {err}");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let path = write_config(
            dir.path(),
            &toml_with(dir.path(), "refresh_interval_secs = 0", ""),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("must be greater than 0"), "got: {err}");
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        std::fs::remove_file(dir.path().join("client.key")).unwrap();
        let path = write_config(dir.path(), &toml_with(dir.path(), "", ""));

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("kafka.key_location"), "got: {err}");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = fixture();
        let contents = toml_with(dir.path(), "", "").replace(
            "https://10.73.0.181/rest-gateway",
            "10.73.0.181/rest-gateway",
        );
        let path = write_config(dir.path(), &contents);

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("api.base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("nsp-fault-gateway.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
