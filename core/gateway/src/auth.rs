//! Auth session provider.
//!
//! Owns the current identity and its tokens. Other clients borrow a bearer
//! token per call through [`SessionProvider::token`] and never cache it.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use unigate_common::{Error, Response, Result, SecretString};
use unigate_storage::{AuthBackend, AuthGrant, Tokens, UserIdentity};

use crate::cancel::{respond, CancelScope};

#[derive(Debug, Clone)]
struct AuthSession {
    user: UserIdentity,
    tokens: Tokens,
}

/// Current identity plus a token accessor that refreshes on demand.
pub struct SessionProvider {
    backend: Arc<dyn AuthBackend>,
    session: RwLock<Option<AuthSession>>,
    scope: CancelScope,
}

impl SessionProvider {
    pub fn new(backend: Arc<dyn AuthBackend>, scope: CancelScope) -> Self {
        Self {
            backend,
            session: RwLock::new(None),
            scope,
        }
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Response<UserIdentity> {
        let result = self
            .scope
            .run("sign in", self.backend.sign_in_with_password(email, password))
            .await;
        respond("sign in", self.establish(result).await)
    }

    pub async fn sign_in_anonymously(&self) -> Response<UserIdentity> {
        let result = self
            .scope
            .run("anonymous sign in", self.backend.sign_in_anonymously())
            .await;
        respond("anonymous sign in", self.establish(result).await)
    }

    /// Create an account, then apply `display_name` when given.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        display_name: Option<&str>,
    ) -> Response<UserIdentity> {
        let result = self
            .scope
            .run("sign up", async {
                let mut grant = self.backend.sign_up(email, password).await?;
                if let Some(name) = display_name {
                    grant.user = self
                        .backend
                        .update_profile(&grant.tokens.id_token, name)
                        .await?;
                }
                Ok(grant)
            })
            .await;
        respond("sign up", self.establish(result).await)
    }

    /// Change the signed-in user's display name.
    pub async fn update_profile(&self, display_name: &str) -> Response<UserIdentity> {
        let result = self
            .scope
            .run("update profile", async {
                let token = self.require_token().await?;
                let user = self.backend.update_profile(&token, display_name).await?;

                let mut session = self.session.write().await;
                if let Some(current) = session.as_mut() {
                    if current.user.id == user.id {
                        current.user = user.clone();
                    }
                }
                Ok(user)
            })
            .await;
        respond("update profile", result)
    }

    /// Attach an email/password credential to the current (anonymous) account.
    pub async fn link_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Response<UserIdentity> {
        let result = self
            .scope
            .run("link credential", async {
                let token = self.require_token().await?;
                self.backend.link_with_password(&token, email, password).await
            })
            .await;
        respond("link credential", self.establish(result).await)
    }

    /// Drop the current session. Signing out without a session is a no-op.
    pub async fn sign_out(&self) -> Response<()> {
        if let Some(previous) = self.session.write().await.take() {
            info!("Signed out user {}", previous.user.id);
        }
        Response::success(())
    }

    pub async fn current_user(&self) -> Option<UserIdentity> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.user.clone())
    }

    pub async fn is_signed_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Bearer token of the current session, refreshed first when near
    /// expiry or when `force_refresh` is set.
    pub async fn bearer_token(&self, force_refresh: bool) -> Response<SecretString> {
        let result = self.scope.run("token", self.token(force_refresh)).await;
        respond(
            "token",
            result.and_then(|token| {
                token.ok_or_else(|| Error::Unauthorized("No active session".to_string()))
            }),
        )
    }

    /// Current bearer token, `None` when nobody is signed in.
    ///
    /// No lock is held while the refresh call is in flight. A concurrent
    /// refresh may overwrite this one with an equally valid token.
    pub(crate) async fn token(&self, force_refresh: bool) -> Result<Option<SecretString>> {
        let (user_id, tokens) = {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(session) => (session.user.id.clone(), session.tokens.clone()),
                None => return Ok(None),
            }
        };

        if !force_refresh && !tokens.is_expired() {
            return Ok(Some(tokens.id_token));
        }

        info!("Refreshing id token for user {}", user_id);
        let fresh = self.backend.refresh(&tokens.refresh_token).await?;

        let mut session = self.session.write().await;
        match session.as_mut() {
            Some(current) if current.user.id == user_id => current.tokens = fresh.clone(),
            _ => debug!("Session changed during refresh; discarding refreshed token"),
        }
        Ok(Some(fresh.id_token))
    }

    async fn require_token(&self) -> Result<SecretString> {
        self.token(false)
            .await?
            .ok_or_else(|| Error::Unauthorized("No active session".to_string()))
    }

    async fn establish(&self, grant: Result<AuthGrant>) -> Result<UserIdentity> {
        let grant = grant?;
        let user = grant.user.clone();
        *self.session.write().await = Some(AuthSession {
            user: grant.user,
            tokens: grant.tokens,
        });
        info!(
            "Signed in user {} (anonymous: {})",
            user.id, user.is_anonymous
        );
        Ok(user)
    }
}
