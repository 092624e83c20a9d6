//! Server-side sessions and the credential cookie.
//!
//! Flow Overview: sign-in stores the hash of a random session id and hands the
//! raw id to the client in a cookie; each request hashes the presented id and
//! looks it up. Cookie helpers here are shared by both credential modes.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::{
    credential::{AuthError, AuthFuture, CredentialMode, CredentialStrategy},
    state::{AuthConfig, AuthState},
    utils::{
        encode_cookie_value, extract_cookie, generate_session_id, hash_session_id,
        is_well_formed_session_id,
    },
};
use crate::{api::handlers::MessageResponse, store::SharedStore};

pub struct SessionStrategy {
    store: SharedStore,
    ttl_seconds: i64,
}

impl SessionStrategy {
    #[must_use]
    pub fn new(store: SharedStore, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }
}

impl CredentialStrategy for SessionStrategy {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Session
    }

    fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    fn issue(&self, user_id: i64) -> AuthFuture<'_, String> {
        Box::pin(async move {
            let expires_at = Duration::try_seconds(self.ttl_seconds)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .ok_or_else(|| {
                    AuthError::Issue(format!("session TTL out of range: {}s", self.ttl_seconds))
                })?;
            let raw = generate_session_id().map_err(|e| AuthError::Issue(e.to_string()))?;
            self.store
                .insert_session(user_id, &hash_session_id(&raw), expires_at)
                .await?;
            Ok(raw)
        })
    }

    fn resolve<'a>(&'a self, raw: &'a str) -> AuthFuture<'a, i64> {
        Box::pin(async move {
            if !is_well_formed_session_id(raw) {
                return Err(AuthError::CredentialMalformed);
            }
            // Only the hash is stored; never compare raw ids against the store.
            let session_hash = hash_session_id(raw);
            let Some(record) = self.store.find_session(&session_hash).await? else {
                return Err(AuthError::CredentialAbsent);
            };
            if record.expires_at <= Utc::now() {
                debug!(user_id = record.user_id, "session expired");
                self.store.delete_session(&session_hash).await?;
                return Err(AuthError::CredentialExpired);
            }
            Ok(record.user_id)
        })
    }

    fn revoke<'a>(&'a self, raw: &'a str) -> AuthFuture<'a, ()> {
        Box::pin(async move {
            if is_well_formed_session_id(raw) {
                self.store.delete_session(&hash_session_id(raw)).await?;
            }
            Ok(())
        })
    }
}

#[utoipa::path(
    post,
    path = "/sign-out",
    responses(
        (status = 200, description = "Credential revoked and cookie cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn sign_out(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(raw) = extract_credential(&headers, auth_state.config())
        && let Err(err) = auth_state.strategy().revoke(&raw).await
    {
        error!("Failed to revoke credential: {err}");
    }

    // Always clear the cookie, even if nothing was revoked.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_credential_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Signed out")),
    )
}

/// Build the `HttpOnly` cookie carrying a freshly issued credential.
pub(crate) fn credential_cookie(
    auth_state: &AuthState,
    raw: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let config = auth_state.config();
    let ttl_seconds = auth_state.strategy().ttl_seconds();
    let value = encode_cookie_value(raw);
    let mut cookie = format!(
        "{}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        config.cookie_name()
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_credential_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.cookie_name()
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Raw credential from the configured cookie; empty values count as missing.
pub(crate) fn extract_credential(headers: &HeaderMap, config: &AuthConfig) -> Option<String> {
    extract_cookie(headers, config.cookie_name()).filter(|value| !value.is_empty())
}
