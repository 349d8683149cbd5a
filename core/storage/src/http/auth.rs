//! Email/password and anonymous authentication against a REST identity service.
//!
//! Speaks the identity toolkit protocol: account endpoints under
//! `identity_base_url` (`accounts:signUp`, `accounts:signInWithPassword`,
//! `accounts:update`) and a form-encoded refresh grant under `token_base_url`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use unigate_common::{Error, Result, SecretString};

use super::{build_client, join_url, send_error, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::session::{AuthBackend, AuthGrant, Tokens, UserIdentity};

/// Default identity endpoint.
pub const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
/// Default token refresh endpoint.
pub const TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com/v1";

/// Token lifetime assumed when the service omits or garbles `expiresIn`.
const FALLBACK_EXPIRES_IN_SECS: i64 = 3600;

/// Rejections caused by the request itself rather than by credentials.
const INPUT_ERRORS: &[&str] = &["EMAIL_EXISTS", "WEAK_PASSWORD", "INVALID_EMAIL", "MISSING_"];

/// Configuration for [`RestAuthBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestAuthConfig {
    /// Project API key sent as the `key` query parameter.
    pub api_key: SecretString,
    #[serde(default = "default_identity_base")]
    pub identity_base_url: String,
    #[serde(default = "default_token_base")]
    pub token_base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_identity_base() -> String {
    IDENTITY_BASE_URL.to_string()
}

fn default_token_base() -> String {
    TOKEN_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RestAuthConfig {
    /// Configuration for the hosted endpoints.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            identity_base_url: default_identity_base(),
            token_base_url: default_token_base(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Account endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Refresh grant response.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn expires_at(expires_in: Option<&str>) -> chrono::DateTime<Utc> {
    let secs = expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(FALLBACK_EXPIRES_IN_SECS);
    Utc::now() + Duration::seconds(secs)
}

/// Map an identity service rejection onto the error taxonomy.
fn auth_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| format!("{}", status));

    match status {
        StatusCode::BAD_REQUEST
            if INPUT_ERRORS.iter().any(|code| message.starts_with(code)) =>
        {
            Error::InvalidInput(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(message)
        }
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::Transport(format!("Identity service error: {} - {}", status, message)),
    }
}

/// REST identity backend.
pub struct RestAuthBackend {
    http: Client,
    config: RestAuthConfig,
}

impl RestAuthBackend {
    pub fn new(config: RestAuthConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::InvalidInput("Auth api_key cannot be empty".to_string()));
        }
        let http = build_client(config.timeout_secs, DEFAULT_USER_AGENT)?;
        Ok(Self { http, config })
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| send_error("Failed to read identity response", e))?;
            serde_json::from_slice(&bytes).map_err(|e| {
                Error::MalformedPayload(format!("Failed to parse identity response: {}", e))
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(auth_error(status, &body))
        }
    }

    async fn account_call(&self, endpoint: &str, body: serde_json::Value) -> Result<AccountResponse> {
        let url = join_url(&self.config.identity_base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.config.api_key.expose())])
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Failed to reach identity service", e))?;

        self.handle_response(response).await
    }

    fn into_grant(account: AccountResponse, is_anonymous: bool) -> Result<AuthGrant> {
        let id_token = account.id_token.ok_or_else(|| {
            Error::MalformedPayload("Identity response is missing idToken".to_string())
        })?;
        let refresh_token = account.refresh_token.ok_or_else(|| {
            Error::MalformedPayload("Identity response is missing refreshToken".to_string())
        })?;

        Ok(AuthGrant {
            user: UserIdentity {
                id: account.local_id,
                display_name: account.display_name.filter(|name| !name.is_empty()),
                email: account.email.filter(|email| !email.is_empty()),
                is_anonymous,
            },
            tokens: Tokens {
                id_token: SecretString::new(id_token),
                refresh_token: SecretString::new(refresh_token),
                expires_at: expires_at(account.expires_in.as_deref()),
            },
        })
    }
}

#[async_trait]
impl AuthBackend for RestAuthBackend {
    fn name(&self) -> &str {
        "rest"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("REST auth backend targeting {}", self.config.identity_base_url);
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthGrant> {
        let account = self
            .account_call(
                "accounts:signInWithPassword",
                json!({
                    "email": email,
                    "password": password.expose(),
                    "returnSecureToken": true,
                }),
            )
            .await?;
        Self::into_grant(account, false)
    }

    async fn sign_in_anonymously(&self) -> Result<AuthGrant> {
        let account = self
            .account_call("accounts:signUp", json!({ "returnSecureToken": true }))
            .await?;
        Self::into_grant(account, true)
    }

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthGrant> {
        let account = self
            .account_call(
                "accounts:signUp",
                json!({
                    "email": email,
                    "password": password.expose(),
                    "returnSecureToken": true,
                }),
            )
            .await?;
        Self::into_grant(account, false)
    }

    async fn update_profile(
        &self,
        id_token: &SecretString,
        display_name: &str,
    ) -> Result<UserIdentity> {
        let account = self
            .account_call(
                "accounts:update",
                json!({
                    "idToken": id_token.expose(),
                    "displayName": display_name,
                    "returnSecureToken": false,
                }),
            )
            .await?;

        Ok(UserIdentity {
            is_anonymous: account.email.as_deref().map_or(true, str::is_empty),
            id: account.local_id,
            display_name: account.display_name,
            email: account.email.filter(|email| !email.is_empty()),
        })
    }

    async fn link_with_password(
        &self,
        id_token: &SecretString,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthGrant> {
        let account = self
            .account_call(
                "accounts:update",
                json!({
                    "idToken": id_token.expose(),
                    "email": email,
                    "password": password.expose(),
                    "returnSecureToken": true,
                }),
            )
            .await?;
        Self::into_grant(account, false)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<Tokens> {
        let url = join_url(&self.config.token_base_url, "token");
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.config.api_key.expose())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| send_error("Failed to refresh token", e))?;

        let refreshed: RefreshResponse = self.handle_response(response).await?;
        debug!("Refreshed id token");

        Ok(Tokens {
            id_token: SecretString::new(refreshed.id_token),
            refresh_token: SecretString::new(refreshed.refresh_token),
            expires_at: expires_at(Some(&refreshed.expires_in)),
        })
    }
}
