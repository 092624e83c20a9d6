//! Shared contract for the two credential strategies.
//!
//! A deployment runs exactly one [`CredentialStrategy`], picked from
//! [`CredentialMode`] at startup. Both strategies report failures through the
//! same [`AuthError`] taxonomy so handlers never care which one is active.

use crate::store::StoreError;
use axum::http::StatusCode;
use std::{fmt, future::Future, pin::Pin, str::FromStr};
use thiserror::Error;

pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in required")]
    CredentialAbsent,
    #[error("credential is malformed")]
    CredentialMalformed,
    #[error("credential has been tampered with")]
    CredentialTampered,
    #[error("credential has expired, sign in again")]
    CredentialExpired,
    #[error("user for this credential no longer exists")]
    UserNotFound,
    #[error("failed to issue credential: {0}")]
    Issue(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Status used for the rejection response. Only server-side faults are 500.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Issue(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CredentialAbsent => "absent",
            Self::CredentialMalformed => "malformed",
            Self::CredentialTampered => "tampered",
            Self::CredentialExpired => "expired",
            Self::UserNotFound => "user_not_found",
            Self::Issue(_) => "issue",
            Self::Store(_) => "store",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialMode {
    /// Signed, stateless bearer token.
    #[default]
    Token,
    /// Opaque id backed by a stored session record.
    Session,
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => f.write_str("token"),
            Self::Session => f.write_str("session"),
        }
    }
}

impl FromStr for CredentialMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown credential mode: {other}")),
        }
    }
}

/// Issues, resolves and revokes the raw credential carried by the cookie.
pub trait CredentialStrategy: Send + Sync {
    fn mode(&self) -> CredentialMode;

    /// Lifetime of an issued credential, also used as the cookie `Max-Age`.
    fn ttl_seconds(&self) -> i64;

    fn issue(&self, user_id: i64) -> AuthFuture<'_, String>;

    /// Map a raw credential to the user id it was issued for.
    fn resolve<'a>(&'a self, raw: &'a str) -> AuthFuture<'a, i64>;

    /// Invalidate a credential. Stateless strategies treat this as a no-op.
    fn revoke<'a>(&'a self, raw: &'a str) -> AuthFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_mode_parses_and_displays() {
        assert_eq!("token".parse::<CredentialMode>(), Ok(CredentialMode::Token));
        assert_eq!(
            " SESSION ".parse::<CredentialMode>(),
            Ok(CredentialMode::Session)
        );
        assert!("cookie".parse::<CredentialMode>().is_err());
        assert_eq!(CredentialMode::Session.to_string(), "session");
        assert_eq!(CredentialMode::default(), CredentialMode::Token);
    }

    #[test]
    fn client_failures_are_unauthorized() {
        for err in [
            AuthError::CredentialAbsent,
            AuthError::CredentialMalformed,
            AuthError::CredentialTampered,
            AuthError::CredentialExpired,
            AuthError::UserNotFound,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{}", err.kind());
        }
        let store = AuthError::Store(StoreError::Aborted("down".to_string()));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AuthError::Issue("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn failure_messages_are_distinct() {
        let messages: std::collections::HashSet<String> = [
            AuthError::CredentialAbsent,
            AuthError::CredentialMalformed,
            AuthError::CredentialTampered,
            AuthError::CredentialExpired,
            AuthError::UserNotFound,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(messages.len(), 5);
    }
}
