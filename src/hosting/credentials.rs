//! Bearer credential provider for the hosting backend

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::HostingError;

/// Tokens this close to expiry are refreshed before use
const EXPIRY_SKEW_SECS: i64 = 60;

/// A bearer token and when it stops being valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_fresh(&self) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) > Utc::now()
    }
}

struct LoginConfig {
    url: String,
    username: String,
    password: String,
    default_ttl: Duration,
}

/// Holds the current backend credential and knows how to renew it
pub struct CredentialProvider {
    http: reqwest::Client,
    login: Option<LoginConfig>,
    current: Mutex<Option<Credential>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LoginResponse {
    Flat(TokenBody),
    Nested { data: TokenBody },
}

impl CredentialProvider {
    /// Provider that logs in with username/password
    pub fn with_login(
        http: reqwest::Client,
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        default_ttl: std::time::Duration,
    ) -> Self {
        Self {
            http,
            login: Some(LoginConfig {
                url: login_url.into(),
                username: username.into(),
                password: password.into(),
                default_ttl: Duration::from_std(default_ttl).unwrap_or_else(|_| Duration::hours(1)),
            }),
            current: Mutex::new(None),
        }
    }

    /// Provider with a fixed, non-renewable token
    pub fn with_static_token(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            login: None,
            current: Mutex::new(Some(Credential {
                token: token.into(),
                expires_at: DateTime::<Utc>::MAX_UTC,
            })),
        }
    }

    /// Current token, logging in first when there is none or it is stale
    pub async fn token(&self) -> Result<String, HostingError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref().filter(|c| c.is_fresh()) {
            return Ok(credential.token.clone());
        }

        let credential = self.login().await?;
        let token = credential.token.clone();
        *current = Some(credential);
        Ok(token)
    }

    /// Discard the current token and log in again
    pub async fn refresh(&self) -> Result<Credential, HostingError> {
        let mut current = self.current.lock().await;
        let credential = self.login().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Replace the current credential, e.g. one restored from elsewhere
    pub async fn set(&self, credential: Credential) {
        *self.current.lock().await = Some(credential);
    }

    async fn login(&self) -> Result<Credential, HostingError> {
        let Some(login) = &self.login else {
            return Err(HostingError::Auth(
                "token rejected and no login is configured".to_string(),
            ));
        };

        let response = self
            .http
            .post(&login.url)
            .json(&LoginRequest {
                username: &login.username,
                password: &login.password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HostingError::Auth(format!("login returned {}: {}", status, body)));
        }

        let body = response.text().await?;
        let token = match serde_json::from_str::<LoginResponse>(&body) {
            Ok(LoginResponse::Flat(token)) | Ok(LoginResponse::Nested { data: token }) => token,
            Err(_) => {
                return Err(HostingError::Auth(format!(
                    "login response has no token: {}",
                    body
                )))
            }
        };

        let ttl = token
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or(login.default_ttl);

        tracing::info!(ttl_secs = ttl.num_seconds(), "Obtained hosting backend token");

        Ok(Credential {
            token: token.token,
            expires_at: Utc::now() + ttl,
        })
    }
}
