//! In-memory authentication backend.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use unigate_common::{Error, Result, SecretString};

use super::poisoned;
use crate::session::{AuthBackend, AuthGrant, Tokens, UserIdentity};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    identity: UserIdentity,
    password: Option<SecretString>,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    /// id token -> user id
    id_tokens: HashMap<String, String>,
    /// refresh token -> user id
    refresh_tokens: HashMap<String, String>,
}

impl AuthState {
    fn issue(&mut self, user_id: &str, lifetime: Duration) -> Tokens {
        let id_token = Uuid::new_v4().to_string();
        let refresh_token = Uuid::new_v4().to_string();
        self.id_tokens.insert(id_token.clone(), user_id.to_string());
        self.refresh_tokens
            .insert(refresh_token.clone(), user_id.to_string());

        Tokens {
            id_token: SecretString::new(id_token),
            refresh_token: SecretString::new(refresh_token),
            expires_at: Utc::now() + lifetime,
        }
    }

    fn user_for_token(&self, id_token: &SecretString) -> Result<String> {
        self.id_tokens
            .get(id_token.expose())
            .cloned()
            .ok_or_else(|| Error::Unauthorized("INVALID_ID_TOKEN".to_string()))
    }

    fn email_taken(&self, email: &str) -> bool {
        self.accounts
            .values()
            .any(|account| account.identity.email.as_deref() == Some(email))
    }
}

/// In-memory authentication backend.
///
/// Issues opaque random tokens and keeps accounts for the lifetime of the
/// value. Useful for testing and development.
pub struct MemoryAuthBackend {
    state: Mutex<AuthState>,
    token_lifetime: Duration,
    refreshes: AtomicUsize,
}

impl MemoryAuthBackend {
    /// Create a backend issuing tokens valid for one hour.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AuthState::default()),
            token_lifetime: Duration::hours(1),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Override how long issued id tokens stay valid.
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Number of successful token refreshes served.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Whether `id_token` was issued by this backend.
    pub fn is_issued(&self, id_token: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.id_tokens.contains_key(id_token))
            .unwrap_or(false)
    }

    fn check_password(password: &SecretString) -> Result<()> {
        if password.expose().len() < MIN_PASSWORD_LEN {
            return Err(Error::InvalidInput(format!(
                "WEAK_PASSWORD: password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

impl Default for MemoryAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Memory auth backend ready");
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthGrant> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let user = state
            .accounts
            .values()
            .find(|account| {
                account.identity.email.as_deref() == Some(email)
                    && account.password.as_ref() == Some(password)
            })
            .map(|account| account.identity.clone())
            .ok_or_else(|| Error::Unauthorized("INVALID_LOGIN_CREDENTIALS".to_string()))?;

        let tokens = state.issue(&user.id, self.token_lifetime);
        Ok(AuthGrant { user, tokens })
    }

    async fn sign_in_anonymously(&self) -> Result<AuthGrant> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let user = UserIdentity {
            id: Uuid::new_v4().to_string(),
            display_name: None,
            email: None,
            is_anonymous: true,
        };
        state.accounts.insert(
            user.id.clone(),
            Account {
                identity: user.clone(),
                password: None,
            },
        );

        let tokens = state.issue(&user.id, self.token_lifetime);
        Ok(AuthGrant { user, tokens })
    }

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthGrant> {
        Self::check_password(password)?;
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.email_taken(email) {
            return Err(Error::InvalidInput("EMAIL_EXISTS".to_string()));
        }

        let user = UserIdentity {
            id: Uuid::new_v4().to_string(),
            display_name: None,
            email: Some(email.to_string()),
            is_anonymous: false,
        };
        state.accounts.insert(
            user.id.clone(),
            Account {
                identity: user.clone(),
                password: Some(password.clone()),
            },
        );

        let tokens = state.issue(&user.id, self.token_lifetime);
        Ok(AuthGrant { user, tokens })
    }

    async fn update_profile(
        &self,
        id_token: &SecretString,
        display_name: &str,
    ) -> Result<UserIdentity> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let user_id = state.user_for_token(id_token)?;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotFound(format!("USER_NOT_FOUND: {}", user_id)))?;

        account.identity.display_name = Some(display_name.to_string());
        Ok(account.identity.clone())
    }

    async fn link_with_password(
        &self,
        id_token: &SecretString,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthGrant> {
        Self::check_password(password)?;
        let mut state = self.state.lock().map_err(poisoned)?;
        let user_id = state.user_for_token(id_token)?;
        if state.email_taken(email) {
            return Err(Error::InvalidInput("EMAIL_EXISTS".to_string()));
        }

        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotFound(format!("USER_NOT_FOUND: {}", user_id)))?;
        account.identity.email = Some(email.to_string());
        account.identity.is_anonymous = false;
        account.password = Some(password.clone());
        let user = account.identity.clone();

        let tokens = state.issue(&user.id, self.token_lifetime);
        Ok(AuthGrant { user, tokens })
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<Tokens> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let user_id = state
            .refresh_tokens
            .get(refresh_token.expose())
            .cloned()
            .ok_or_else(|| Error::Unauthorized("INVALID_REFRESH_TOKEN".to_string()))?;

        let tokens = state.issue(&user_id, self.token_lifetime);
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(tokens)
    }
}
