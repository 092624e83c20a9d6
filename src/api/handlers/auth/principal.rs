//! Authenticated principal extraction.
//!
//! Flow Overview: read the credential cookie, let the active strategy map it
//! to a user id, then load the user. Every failure clears the cookie.

use axum::{
    Json,
    http::{HeaderMap, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use super::{
    credential::AuthError,
    session::{clear_credential_cookie, extract_credential},
    state::AuthState,
};
use crate::{api::handlers::MessageResponse, store::Store};

/// Authenticated user context derived from the credential cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
}

/// Resolve the request credential to a principal.
///
/// # Errors
/// Any [`AuthError`]; `Store` means persistence was unavailable.
pub async fn authenticate(
    headers: &HeaderMap,
    auth_state: &AuthState,
    store: &dyn Store,
) -> Result<Principal, AuthError> {
    let raw = extract_credential(headers, auth_state.config()).ok_or(AuthError::CredentialAbsent)?;
    let user_id = auth_state.strategy().resolve(&raw).await?;
    let user = store
        .find_user_by_id(user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Principal {
        user_id: user.user_id,
        email: user.email,
    })
}

/// Like [`authenticate`], but failures come back as a ready rejection response.
///
/// # Errors
/// 401 with a clearing `Set-Cookie` for credential failures, 500 for store faults.
pub async fn require_auth(
    headers: &HeaderMap,
    auth_state: &AuthState,
    store: &dyn Store,
) -> Result<Principal, Response> {
    authenticate(headers, auth_state, store)
        .await
        .map_err(|err| rejection(&err, auth_state))
}

fn rejection(err: &AuthError, auth_state: &AuthState) -> Response {
    let status = err.status();
    if status.is_server_error() {
        error!("Failed to authenticate request: {err}");
    } else {
        debug!(reason = err.kind(), "request rejected");
    }

    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_credential_cookie(auth_state.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    let message = if status.is_server_error() {
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    (status, headers, Json(MessageResponse::new(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::auth::{
            credential::CredentialMode,
            password::PasswordCodec,
            state::AuthConfig,
            token::{TokenClaims, TokenStrategy},
        },
        store::{
            IsolationLevel, SharedStore,
            memory::{Fault, MemoryStore},
        },
    };
    use axum::http::{HeaderValue, StatusCode, header::COOKIE};
    use secrecy::SecretString;
    use std::sync::Arc;

    const SECRET: &str = "test-secret";

    async fn seed_user(store: &MemoryStore) -> anyhow::Result<i64> {
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
        let user = tx.insert_user("ada@example.com", "hash").await?;
        tx.commit().await?;
        Ok(user.user_id)
    }

    fn token_state(store: &MemoryStore) -> anyhow::Result<AuthState> {
        let shared: SharedStore = Arc::new(store.clone());
        let config = AuthConfig::new(CredentialMode::Token)
            .with_token_secret(SecretString::from(SECRET.to_string()));
        AuthState::from_config(config, PasswordCodec::default(), shared)
    }

    fn cookie_headers(raw: &str) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("authorization={}", raw.replace(' ', "%20")))?,
        );
        Ok(headers)
    }

    fn clears_cookie(response: &Response) -> bool {
        response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("authorization=;") && v.contains("Max-Age=0"))
    }

    #[tokio::test]
    async fn valid_token_yields_principal() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seed_user(&store).await?;
        let state = token_state(&store)?;
        let raw = state.strategy().issue(user_id).await?;

        let principal = authenticate(&cookie_headers(&raw)?, &state, &store).await?;
        assert_eq!(
            principal,
            Principal {
                user_id,
                email: "ada@example.com".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_cookie_is_absent() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let state = token_state(&store)?;
        let result = authenticate(&HeaderMap::new(), &state, &store).await;
        assert!(matches!(result, Err(AuthError::CredentialAbsent)));
        Ok(())
    }

    #[tokio::test]
    async fn tampered_token_is_rejected_with_cleared_cookie() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seed_user(&store).await?;
        let state = token_state(&store)?;
        let forged = TokenStrategy::new(&SecretString::from("other".to_string()), 60)
            .sign(&TokenClaims {
                user_id,
                iat: chrono::Utc::now().timestamp(),
                exp: chrono::Utc::now().timestamp() + 60,
            })?;
        let headers = cookie_headers(&forged)?;

        assert!(matches!(
            authenticate(&headers, &state, &store).await,
            Err(AuthError::CredentialTampered)
        ));
        let response = require_auth(&headers, &state, &store)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected rejection"))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(clears_cookie(&response));
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seed_user(&store).await?;
        let state = token_state(&store)?;
        let now = chrono::Utc::now().timestamp();
        let expired = TokenStrategy::new(&SecretString::from(SECRET.to_string()), 60).sign(
            &TokenClaims {
                user_id,
                iat: now - 100,
                exp: now - 50,
            },
        )?;
        assert!(matches!(
            authenticate(&cookie_headers(&expired)?, &state, &store).await,
            Err(AuthError::CredentialExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let state = token_state(&store)?;
        let raw = state.strategy().issue(404).await?;
        assert!(matches!(
            authenticate(&cookie_headers(&raw)?, &state, &store).await,
            Err(AuthError::UserNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn store_failure_is_server_error_and_still_clears_cookie() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seed_user(&store).await?;
        let state = token_state(&store)?;
        let raw = state.strategy().issue(user_id).await?;
        store.inject(Fault::Unavailable);

        let response = require_auth(&cookie_headers(&raw)?, &state, &store)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected rejection"))?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(clears_cookie(&response));
        Ok(())
    }
}
