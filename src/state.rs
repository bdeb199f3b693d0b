//! Application state management

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::hosting::{CredentialProvider, ImageHostClient};
use crate::origin::{HttpOrigin, OriginError};
use crate::proxy::ProxySigner;
use crate::router::{MediaRouter, StorageRouter};
use crate::scheduler::{BatchScheduler, SqliteTaskStore, TaskStore};
use crate::upload::SessionManager;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to build origin client: {0}")]
    Origin(#[from] OriginError),

    #[error("Failed to build hosting client: {0}")]
    Hosting(#[from] reqwest::Error),

    #[error("Hosting backend needs HOSTING_TOKEN or HOSTING_USERNAME/HOSTING_PASSWORD")]
    MissingHostingCredentials,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    sessions: SessionManager,
    router: Arc<dyn MediaRouter>,
    scheduler: BatchScheduler,
    signer: ProxySigner,
}

impl AppState {
    /// Assemble state from already-built collaborators
    pub fn new(config: Config, router: Arc<dyn MediaRouter>, store: Arc<dyn TaskStore>) -> Self {
        let sessions = SessionManager::with_limits(
            chrono::Duration::seconds(config.upload.session_ttl_secs),
            config.upload.chunk_upload_ceiling,
        );
        let scheduler = BatchScheduler::new(router.clone(), store, config.scheduler_options());
        let signer = proxy_signer(&config);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                sessions,
                router,
                scheduler,
                signer,
            }),
        }
    }

    /// Wire the production router and SQLite task store
    pub fn from_config(config: Config, db: SqlitePool) -> Result<Self, StateError> {
        let origin = HttpOrigin::new(
            Duration::from_secs(config.origin.timeout_secs),
            &config.origin.user_agent,
        )?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.origin.timeout_secs))
            .build()?;

        let hosting = &config.hosting;
        let credentials = match (&hosting.token, &hosting.username, &hosting.password) {
            (Some(token), _, _) => CredentialProvider::with_static_token(token.clone()),
            (None, Some(username), Some(password)) => CredentialProvider::with_login(
                http.clone(),
                format!("{}{}", hosting.base_url.trim_end_matches('/'), hosting.login_path),
                username.clone(),
                password.clone(),
                Duration::from_secs(hosting.token_ttl_secs),
            ),
            _ => return Err(StateError::MissingHostingCredentials),
        };

        let backend = ImageHostClient::new(
            http,
            hosting.base_url.clone(),
            hosting.upload_path.clone(),
            Arc::new(credentials),
        );

        let router = StorageRouter::new(
            Arc::new(origin),
            Arc::new(backend),
            proxy_signer(&config),
            config.routing_policy(),
        );

        Ok(Self::new(
            config,
            Arc::new(router),
            Arc::new(SqliteTaskStore::new(db)),
        ))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Get the storage router
    pub fn router(&self) -> &dyn MediaRouter {
        self.inner.router.as_ref()
    }

    /// Get the batch scheduler
    pub fn scheduler(&self) -> &BatchScheduler {
        &self.inner.scheduler
    }

    /// Get the proxy token signer
    pub fn signer(&self) -> &ProxySigner {
        &self.inner.signer
    }
}

fn proxy_signer(config: &Config) -> ProxySigner {
    ProxySigner::new(
        config.proxy.secret.as_bytes().to_vec(),
        config.proxy.public_base_url.clone(),
    )
}
