use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Deserialize, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: String,
    pub token_ttl_days: i64,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub default_redirect: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("token_ttl_days", &self.token_ttl_days)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("default_redirect", &self.default_redirect)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlocklistConfig {
    pub max_failures: u32,
    pub initial_block_secs: i64,
    pub sweep_interval_days: u64,
}

impl BlocklistConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Static,
    Postgres,
}

#[derive(Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub timeout_ms: u64,
    /// Account written to the postgres table at startup, if both are set.
    pub seed_username: Option<String>,
    pub seed_password: Option<String>,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn seed_account(&self) -> Option<(&str, &str)> {
        match (self.seed_username.as_deref(), self.seed_password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("timeout_ms", &self.timeout_ms)
            .field("seed_username", &self.seed_username)
            .field("seed_password", &self.seed_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub blocklist: BlocklistConfig,
    pub store: StoreConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Loads settings from defaults, `config/default`, `config/{RUN_MODE}` and
    /// `LOGIN_`-prefixed environment variables, then validates them.
    ///
    /// `LOGIN_AUTH__SECRET` has no default: the process refuses to start
    /// without it.
    pub fn new() -> Result<Self, AppError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g. `LOGIN_SERVER__PORT=5001` sets `Settings.server.port`
            .add_source(
                Environment::with_prefix("login")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults shared by every environment. The signing secret is
    /// intentionally absent.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("auth.issuer", "login-gateway")?
            .set_default("auth.token_ttl_days", 60)?
            .set_default("auth.cookie_name", "auth")?
            .set_default("auth.default_redirect", "https://example.com")?
            .set_default("blocklist.max_failures", 10)?
            .set_default("blocklist.initial_block_secs", 10)?
            .set_default("blocklist.sweep_interval_days", 30)?
            .set_default("store.backend", "static")?
            .set_default("store.max_connections", 5)?
            .set_default("store.timeout_ms", 2000)?
            .set_default("cors.enabled", true)?
            .set_default("cors.max_age", 3600)
    }

    /// Settings with a fixed secret and a single static account, used by the
    /// integration tests.
    pub fn new_for_test() -> Result<Self, AppError> {
        let settings: Settings = Self::builder()?
            .set_override("environment", "test")?
            .set_override("auth.secret", "test_secret")?
            .set_override("store.username", "alice")?
            .set_override("store.password", "wonderland")?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.validate_auth()?;
        self.validate_store()
    }

    /// Checks the settings the auth core depends on regardless of which
    /// credential store backs it.
    pub fn validate_auth(&self) -> Result<(), AppError> {
        if self.auth.secret.trim().is_empty() {
            return Err(AppError::ConfigError("auth.secret must not be empty".into()));
        }
        if self.auth.token_ttl_days <= 0 {
            return Err(AppError::ConfigError("auth.token_ttl_days must be positive".into()));
        }
        if self.blocklist.initial_block_secs <= 0 {
            return Err(AppError::ConfigError("blocklist.initial_block_secs must be positive".into()));
        }
        if self.blocklist.sweep_interval_days == 0 {
            return Err(AppError::ConfigError("blocklist.sweep_interval_days must be positive".into()));
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<(), AppError> {
        match self.store.backend {
            StoreBackend::Static => {
                let has_user = self.store.username.as_deref().is_some_and(|u| !u.is_empty());
                let has_pass = self.store.password.as_deref().is_some_and(|p| !p.is_empty());
                if !has_user || !has_pass {
                    return Err(AppError::ConfigError(
                        "static store requires store.username and store.password".into(),
                    ));
                }
            }
            StoreBackend::Postgres => {
                if self.store.database_url.as_deref().map_or(true, str::is_empty) {
                    return Err(AppError::ConfigError(
                        "postgres store requires store.database_url".into(),
                    ));
                }
                let partial_seed = self.store.seed_username.is_some() || self.store.seed_password.is_some();
                if partial_seed && self.store.seed_account().is_none() {
                    return Err(AppError::ConfigError(
                        "store.seed_username and store.seed_password must be set together".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigBuilder<DefaultState> {
        Settings::builder()
            .expect("defaults")
            .set_override("auth.secret", "s3cret").unwrap()
            .set_override("store.username", "alice").unwrap()
            .set_override("store.password", "wonderland").unwrap()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.workers as usize, num_cpus::get());
        assert_eq!(settings.auth.token_ttl_days, 60);
        assert_eq!(settings.auth.cookie_name, "auth");
        assert_eq!(settings.blocklist.max_failures, 10);
        assert_eq!(settings.blocklist.initial_block_secs, 10);
        assert_eq!(settings.blocklist.sweep_interval(), Duration::from_secs(30 * 24 * 3600));
        assert_eq!(settings.store.backend, StoreBackend::Static);
        assert_eq!(settings.store.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let result = Settings::builder()
            .unwrap()
            .set_override("store.username", "alice").unwrap()
            .set_override("store.password", "wonderland").unwrap()
            .build()
            .and_then(|c| c.try_deserialize::<Settings>());

        assert!(result.is_err(), "secret has no default");
    }

    #[test]
    fn test_empty_secret_rejected() {
        let settings: Settings = base()
            .set_override("auth.secret", "   ").unwrap()
            .build().unwrap()
            .try_deserialize().unwrap();

        assert!(matches!(settings.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_postgres_requires_url() {
        let settings: Settings = base()
            .set_override("store.backend", "postgres").unwrap()
            .build().unwrap()
            .try_deserialize().unwrap();

        assert_eq!(settings.store.backend, StoreBackend::Postgres);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_seed_account_needs_both_halves() {
        let settings: Settings = base()
            .set_override("store.backend", "postgres").unwrap()
            .set_override("store.database_url", "postgres://localhost/login").unwrap()
            .set_override("store.seed_username", "bob").unwrap()
            .build().unwrap()
            .try_deserialize().unwrap();
        assert!(settings.store.seed_account().is_none());
        assert!(matches!(settings.validate(), Err(AppError::ConfigError(_))));

        let settings: Settings = base()
            .set_override("store.backend", "postgres").unwrap()
            .set_override("store.database_url", "postgres://localhost/login").unwrap()
            .set_override("store.seed_username", "bob").unwrap()
            .set_override("store.seed_password", "builder").unwrap()
            .build().unwrap()
            .try_deserialize().unwrap();
        assert_eq!(settings.store.seed_account(), Some(("bob", "builder")));
        assert!(settings.validate().is_ok());
        assert!(!format!("{:?}", settings).contains("builder"));
    }

    #[test]
    fn test_environment_override() {
        env::set_var("LOGINTEST_SERVER__PORT", "9000");
        env::set_var("LOGINTEST_AUTH__COOKIE_DOMAIN", "example.org");

        let settings: Settings = base()
            .add_source(
                Environment::with_prefix("logintest")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()
            .expect("Failed to build config")
            .try_deserialize()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.auth.cookie_domain.as_deref(), Some("example.org"));

        env::remove_var("LOGINTEST_SERVER__PORT");
        env::remove_var("LOGINTEST_AUTH__COOKIE_DOMAIN");
    }

    #[test]
    fn test_invalid_port() {
        let result = base()
            .set_override("server.port", "invalid").unwrap()
            .build()
            .and_then(|config| config.try_deserialize::<Settings>());

        assert!(result.is_err(), "Expected error for invalid port");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings::new_for_test().unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("test_secret"));
        assert!(!rendered.contains("wonderland"));
    }
}
