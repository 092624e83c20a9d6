//! Auth state, configuration, and credential strategy selection.

use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::{
    credential::{CredentialMode, CredentialStrategy},
    password::PasswordCodec,
    session::SessionStrategy,
    token::TokenStrategy,
};
use crate::store::SharedStore;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
pub const DEFAULT_COOKIE_NAME: &str = "authorization";
/// Longest accepted credential lifetime (one year).
pub const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    credential_mode: CredentialMode,
    token_secret: Option<SecretString>,
    token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    cookie_name: String,
    cookie_secure: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(credential_mode: CredentialMode) -> Self {
        Self {
            credential_mode,
            token_secret: None,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_secure: false,
        }
    }

    #[must_use]
    pub fn with_token_secret(mut self, secret: SecretString) -> Self {
        self.token_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: String) -> Self {
        self.cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn credential_mode(&self) -> CredentialMode {
        self.credential_mode
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

fn check_ttl(kind: &str, seconds: i64) -> Result<()> {
    if (1..=MAX_TTL_SECONDS).contains(&seconds) {
        Ok(())
    } else {
        Err(anyhow!(
            "{kind} TTL must be between 1 and {MAX_TTL_SECONDS} seconds, got {seconds}"
        ))
    }
}

pub struct AuthState {
    config: AuthConfig,
    strategy: Arc<dyn CredentialStrategy>,
    passwords: PasswordCodec,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        strategy: Arc<dyn CredentialStrategy>,
        passwords: PasswordCodec,
    ) -> Self {
        Self {
            config,
            strategy,
            passwords,
        }
    }

    /// Build the strategy named by `config.credential_mode()`.
    ///
    /// # Errors
    /// Token mode without a non-empty signing secret, or a non-positive TTL.
    pub fn from_config(
        config: AuthConfig,
        passwords: PasswordCodec,
        store: SharedStore,
    ) -> Result<Self> {
        let strategy: Arc<dyn CredentialStrategy> = match config.credential_mode {
            CredentialMode::Token => {
                let secret = config
                    .token_secret
                    .as_ref()
                    .filter(|secret| !secret.expose_secret().is_empty())
                    .ok_or_else(|| anyhow!("token mode requires a token secret"))?;
                check_ttl("token", config.token_ttl_seconds)?;
                Arc::new(TokenStrategy::new(secret, config.token_ttl_seconds))
            }
            CredentialMode::Session => {
                check_ttl("session", config.session_ttl_seconds)?;
                Arc::new(SessionStrategy::new(store, config.session_ttl_seconds))
            }
        };
        Ok(Self::new(config, strategy, passwords))
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn strategy(&self) -> &dyn CredentialStrategy {
        self.strategy.as_ref()
    }

    #[must_use]
    pub fn passwords(&self) -> &PasswordCodec {
        &self.passwords
    }
}
