//! Stateless bearer tokens: HS256 JWTs carried as `Bearer <jwt>`.

use super::credential::{AuthError, AuthFuture, CredentialMode, CredentialStrategy};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BEARER_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenStrategy {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_seconds: i64,
}

impl TokenStrategy {
    #[must_use]
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Self {
        let secret = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_seconds,
        }
    }

    /// Sign claims and wrap them in the `Bearer` scheme.
    ///
    /// # Errors
    /// Returns [`AuthError::Issue`] if encoding fails.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Issue(e.to_string()))?;
        Ok(format!("{BEARER_SCHEME} {token}"))
    }

    /// Validate a `Bearer <jwt>` credential and return its claims.
    ///
    /// # Errors
    /// Malformed when the scheme or token is missing, expired past `exp`,
    /// tampered on any other decoding or signature failure.
    pub fn verify(&self, raw: &str) -> Result<TokenClaims, AuthError> {
        let Some((scheme, token)) = raw.split_once(' ') else {
            return Err(AuthError::CredentialMalformed);
        };
        if scheme != BEARER_SCHEME || token.is_empty() {
            return Err(AuthError::CredentialMalformed);
        }
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::CredentialExpired,
                kind => {
                    debug!(?kind, "token rejected");
                    AuthError::CredentialTampered
                }
            })
    }
}

impl CredentialStrategy for TokenStrategy {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Token
    }

    fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    fn issue(&self, user_id: i64) -> AuthFuture<'_, String> {
        Box::pin(async move {
            let iat = Utc::now().timestamp();
            self.sign(&TokenClaims {
                user_id,
                iat,
                exp: iat.saturating_add(self.ttl_seconds),
            })
        })
    }

    fn resolve<'a>(&'a self, raw: &'a str) -> AuthFuture<'a, i64> {
        Box::pin(async move { self.verify(raw).map(|claims| claims.user_id) })
    }

    fn revoke<'a>(&'a self, _raw: &'a str) -> AuthFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}
