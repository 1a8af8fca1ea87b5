pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod store;

use std::sync::Arc;
use actix_cors::Cors;
use actix_web::middleware::Condition;
use actix_web::HttpResponse;
use tracing::info;
use url::Url;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthService, Blocklist, BlocklistPolicy, TokenService};
pub use store::{CredentialStore, MemoryCredentialStore, PgCredentialStore, StaticCredentialStore};

use crate::config::{CorsConfig, StoreBackend};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Permissive CORS when enabled. When disabled no CORS middleware runs at
/// all, so same-origin requests carrying an `Origin` header still pass.
pub fn cors(config: &CorsConfig) -> Condition<Cors> {
    Condition::new(
        config.enabled,
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(config.max_age as usize),
    )
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pg_store: Option<Arc<PgCredentialStore>>,
}

impl AppState {
    /// Builds the credential store named by the configuration and wires the
    /// auth core around it. An unreachable database is a startup error.
    pub async fn new(config: Settings) -> Result<Self> {
        let (store, pg_store) = match config.store.backend {
            StoreBackend::Static => {
                let username = config.store.username.clone().unwrap_or_default();
                let password = config.store.password.clone().unwrap_or_default();
                info!("using static credential store for {}", username);
                (Arc::new(StaticCredentialStore::new(username, password)) as Arc<dyn CredentialStore>, None)
            }
            StoreBackend::Postgres => {
                let url = config
                    .store
                    .database_url
                    .as_deref()
                    .ok_or_else(|| AppError::ConfigError("store.database_url is required".into()))?;
                let pg = Arc::new(
                    PgCredentialStore::connect(url, config.store.max_connections, config.store.timeout())
                        .await?,
                );
                if let Some((username, password)) = config.store.seed_account() {
                    pg.upsert_account(username, password).await?;
                    info!("seeded account {}", username);
                }
                info!("using postgres credential store");
                (pg.clone() as Arc<dyn CredentialStore>, Some(pg))
            }
        };

        let mut state = Self::with_store(config, store)?;
        state.pg_store = pg_store;
        Ok(state)
    }

    /// Wires the auth core around an already constructed store.
    pub fn with_store(config: Settings, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate_auth()?;
        let default_redirect = Url::parse(&config.auth.default_redirect)
            .map_err(|e| AppError::ConfigError(format!("auth.default_redirect: {}", e)))?;

        let tokens = TokenService::new(
            config.auth.secret.as_bytes(),
            config.auth.issuer.clone(),
            chrono::Duration::days(config.auth.token_ttl_days),
            store.clone(),
            config.store.timeout(),
        );
        let blocklist = Arc::new(Blocklist::new(BlocklistPolicy::from(&config.blocklist)));
        let auth_service = AuthService::new(
            store,
            tokens,
            blocklist,
            config.store.timeout(),
            default_redirect,
        );

        Ok(Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            pg_store: None,
        })
    }

    pub fn start_background_tasks(&self) {
        self.auth_service
            .blocklist()
            .start_sweeper(self.config.blocklist.sweep_interval());
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.auth_service.blocklist().shutdown().await;

        if let Some(pg) = &self.pg_store {
            pg.close().await;
        }
        Ok(())
    }
}
