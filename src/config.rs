//! Configuration management for the rehost server

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::media::Platform;
use crate::router::RoutingPolicy;
use crate::scheduler::{BatchSizes, SchedulerOptions};

const DEV_PROXY_SECRET: &str = "rehost-dev-secret";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub upload: UploadConfig,
    pub proxy: ProxyConfig,
    pub hosting: HostingConfig,
    pub origin: OriginConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    pub inline_ceiling: u64,
    pub oversized_ceiling: u64,
    pub proxy_platforms: Vec<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub chunk_upload_ceiling: u64,
    pub session_ttl_secs: i64,
}

#[derive(Clone, Deserialize)]
pub struct ProxyConfig {
    pub secret: String,
    pub public_base_url: String,
    pub max_age_secs: u64,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("secret", &"<redacted>")
            .field("public_base_url", &self.public_base_url)
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct HostingConfig {
    pub base_url: String,
    pub login_path: String,
    pub upload_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Static bearer token; skips login when set
    pub token: Option<String>,
    pub token_ttl_secs: u64,
}

impl std::fmt::Debug for HostingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostingConfig")
            .field("base_url", &self.base_url)
            .field("login_path", &self.login_path)
            .field("upload_path", &self.upload_path)
            .field("username", &self.username)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub batch_size_images: usize,
    pub batch_size_videos: usize,
    pub batch_delay_ms: u64,
    pub task_ttl_secs: i64,
    pub invocation_budget: usize,
    pub required_phase_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        let routing = RoutingPolicy::default();
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            routing: RoutingConfig {
                inline_ceiling: routing.inline_ceiling,
                oversized_ceiling: routing.oversized_ceiling,
                proxy_platforms: Platform::KNOWN.to_vec(),
            },
            upload: UploadConfig {
                chunk_upload_ceiling: crate::upload::DEFAULT_CHUNK_UPLOAD_CEILING,
                session_ttl_secs: crate::upload::DEFAULT_SESSION_TTL_SECS,
            },
            proxy: ProxyConfig {
                secret: DEV_PROXY_SECRET.to_string(),
                public_base_url: "http://localhost:3000".to_string(),
                max_age_secs: 7 * 24 * 3600,
            },
            hosting: HostingConfig {
                base_url: "http://localhost:8080".to_string(),
                login_path: "/api/login".to_string(),
                upload_path: "/upload".to_string(),
                username: None,
                password: None,
                token: None,
                token_ttl_secs: 3600,
            },
            origin: OriginConfig {
                timeout_secs: 60,
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                    .to_string(),
            },
            scheduler: SchedulerConfig {
                batch_size_images: crate::scheduler::DEFAULT_BATCH_SIZE_IMAGES,
                batch_size_videos: crate::scheduler::DEFAULT_BATCH_SIZE_VIDEOS,
                batch_delay_ms: 300,
                task_ttl_secs: crate::scheduler::DEFAULT_TASK_TTL_SECS,
                invocation_budget: 50,
                required_phase_timeout_secs: 30,
            },
            database: DatabaseConfig {
                url: "sqlite:./rehost.db".to_string(),
            },
        }
    }
}

impl Config {
    /// Read configuration from the environment
    ///
    /// `HOSTING_BASE_URL` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_env("SERVER_PORT", defaults.server.port),
            },
            routing: RoutingConfig {
                inline_ceiling: parse_env("INLINE_CEILING_BYTES", defaults.routing.inline_ceiling),
                oversized_ceiling: parse_env(
                    "OVERSIZED_CEILING_BYTES",
                    defaults.routing.oversized_ceiling,
                ),
                proxy_platforms: env::var("PROXY_PLATFORMS")
                    .map(|v| parse_platforms(&v))
                    .unwrap_or(defaults.routing.proxy_platforms),
            },
            upload: UploadConfig {
                chunk_upload_ceiling: parse_env(
                    "CHUNK_UPLOAD_CEILING_BYTES",
                    defaults.upload.chunk_upload_ceiling,
                ),
                session_ttl_secs: parse_env("UPLOAD_SESSION_TTL_SECS", defaults.upload.session_ttl_secs),
            },
            proxy: ProxyConfig {
                secret: env::var("PROXY_SECRET").unwrap_or_else(|_| {
                    tracing::warn!("PROXY_SECRET not set, using development secret");
                    defaults.proxy.secret
                }),
                public_base_url: env::var("PROXY_PUBLIC_BASE_URL")
                    .unwrap_or(defaults.proxy.public_base_url),
                max_age_secs: parse_env("PROXY_MAX_AGE_SECS", defaults.proxy.max_age_secs),
            },
            hosting: HostingConfig {
                base_url: env::var("HOSTING_BASE_URL")?,
                login_path: env::var("HOSTING_LOGIN_PATH").unwrap_or(defaults.hosting.login_path),
                upload_path: env::var("HOSTING_UPLOAD_PATH")
                    .unwrap_or(defaults.hosting.upload_path),
                username: env::var("HOSTING_USERNAME").ok(),
                password: env::var("HOSTING_PASSWORD").ok(),
                token: env::var("HOSTING_TOKEN").ok(),
                token_ttl_secs: parse_env("HOSTING_TOKEN_TTL_SECS", defaults.hosting.token_ttl_secs),
            },
            origin: OriginConfig {
                timeout_secs: parse_env("ORIGIN_TIMEOUT_SECS", defaults.origin.timeout_secs),
                user_agent: env::var("ORIGIN_USER_AGENT").unwrap_or(defaults.origin.user_agent),
            },
            scheduler: SchedulerConfig {
                batch_size_images: parse_env(
                    "BATCH_SIZE_IMAGES",
                    defaults.scheduler.batch_size_images,
                ),
                batch_size_videos: parse_env(
                    "BATCH_SIZE_VIDEOS",
                    defaults.scheduler.batch_size_videos,
                ),
                batch_delay_ms: parse_env("BATCH_DELAY_MS", defaults.scheduler.batch_delay_ms),
                task_ttl_secs: parse_env("TASK_TTL_SECS", defaults.scheduler.task_ttl_secs),
                invocation_budget: parse_env(
                    "INVOCATION_BUDGET",
                    defaults.scheduler.invocation_budget,
                ),
                required_phase_timeout_secs: parse_env(
                    "REQUIRED_PHASE_TIMEOUT_SECS",
                    defaults.scheduler.required_phase_timeout_secs,
                ),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
        };

        Ok(config)
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            inline_ceiling: self.routing.inline_ceiling,
            oversized_ceiling: self.routing.oversized_ceiling,
            proxy_platforms: self.routing.proxy_platforms.iter().copied().collect(),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            batch_sizes: BatchSizes {
                images: self.scheduler.batch_size_images,
                videos: self.scheduler.batch_size_videos,
            },
            batch_delay: Duration::from_millis(self.scheduler.batch_delay_ms),
            task_ttl: chrono::Duration::seconds(self.scheduler.task_ttl_secs),
            invocation_budget: self.scheduler.invocation_budget,
        }
    }

    pub fn required_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.required_phase_timeout_secs)
    }

    pub fn proxy_max_age(&self) -> Duration {
        Duration::from_secs(self.proxy.max_age_secs)
    }
}

/// Parse an env var, warning and falling back on invalid values
fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Comma-separated platform names; unknown names are skipped
fn parse_platforms(raw: &str) -> Vec<Platform> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match name.parse::<Platform>() {
            Ok(Platform::Unknown) | Err(_) => {
                tracing::warn!(platform = name, "Ignoring unsupported proxy platform");
                None
            }
            Ok(platform) => Some(platform),
        })
        .collect()
}
