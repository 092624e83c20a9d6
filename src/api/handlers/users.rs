//! Account and profile endpoints.
//!
//! Flow Overview:
//! 1) `POST /sign-up` creates a user and its profile in one transaction.
//! 2) `POST /sign-in` checks the password and issues a credential cookie.
//! 3) `GET`/`PATCH /users` read and update the caller's profile.
//! 4) `GET /users/histories` lists the profile audit trail.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

use super::{
    MessageResponse,
    auth::{
        AuthState, CodecError, PasswordCodec,
        principal::require_auth,
        session::credential_cookie,
        types::{SignInRequest, SignUpRequest},
    },
    message,
};
use crate::{
    profile::{self, ProfileError, ProfileUpdate},
    store::{
        Gender, IsolationLevel, NewProfile, SharedStore, Store, StoreError, User, UserHistory,
        UserProfile,
    },
};

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("email is already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("sign-up transaction failed: {0}")]
    Transaction(StoreError),
}

impl From<StoreError> for SignupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::DuplicateEmail,
            other => Self::Transaction(other),
        }
    }
}

/// Why a sign-in was refused. Both map to 401 but carry distinct messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialMismatch {
    UnknownEmail,
    WrongPassword,
}

impl fmt::Display for CredentialMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEmail => f.write_str("email is not registered"),
            Self::WrongPassword => f.write_str("password does not match"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SigninError {
    #[error("{0}")]
    InvalidCredentials(CredentialMismatch),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfos {
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub profile_image: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_infos: UserInfos,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub data: UserData,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub user_history_id: i64,
    pub changed_field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct HistoryResponse {
    pub data: Vec<HistoryEntry>,
}

impl UserData {
    fn new(user: User, profile: UserProfile) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
            user_infos: UserInfos {
                name: profile.name,
                age: profile.age,
                gender: profile.gender,
                profile_image: profile.profile_image,
            },
        }
    }
}

impl From<UserHistory> for HistoryEntry {
    fn from(entry: UserHistory) -> Self {
        Self {
            user_history_id: entry.user_history_id,
            changed_field: entry.changed_field,
            old_value: entry.old_value,
            new_value: entry.new_value,
            changed_at: entry.changed_at,
        }
    }
}

async fn hash_password(passwords: &PasswordCodec, password: String) -> Result<String, CodecError> {
    let passwords = passwords.clone();
    tokio::task::spawn_blocking(move || passwords.hash(&password))
        .await
        .map_err(|e| CodecError::Hash(e.to_string()))?
}

async fn verify_password(
    passwords: &PasswordCodec,
    password: String,
    digest: String,
) -> Result<bool, CodecError> {
    let passwords = passwords.clone();
    tokio::task::spawn_blocking(move || passwords.verify(&password, &digest))
        .await
        .map_err(|e| CodecError::Digest(e.to_string()))?
}

/// Create a user and its profile atomically.
///
/// # Errors
/// [`SignupError::DuplicateEmail`] when the email is taken, including a race
/// lost inside the transaction. Nothing is persisted on any error.
pub async fn register(
    store: &dyn Store,
    passwords: &PasswordCodec,
    request: SignUpRequest,
) -> Result<User, SignupError> {
    if store.find_user_by_email(&request.email).await?.is_some() {
        return Err(SignupError::DuplicateEmail);
    }

    let password_hash = hash_password(passwords, request.password).await?;

    let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
    let user = tx.insert_user(&request.email, &password_hash).await?;
    tx.insert_profile(&NewProfile {
        user_id: user.user_id,
        name: request.name,
        age: request.age,
        gender: request.gender,
        profile_image: request.profile_image,
    })
    .await?;
    tx.commit().await?;
    Ok(user)
}

/// Look up a user by email and check the password.
///
/// # Errors
/// [`SigninError::InvalidCredentials`] for an unknown email or a wrong password.
pub async fn check_credentials(
    store: &dyn Store,
    passwords: &PasswordCodec,
    email: &str,
    password: String,
) -> Result<User, SigninError> {
    let Some(user) = store.find_user_by_email(email).await? else {
        return Err(SigninError::InvalidCredentials(
            CredentialMismatch::UnknownEmail,
        ));
    };
    if verify_password(passwords, password, user.password_hash.clone()).await? {
        Ok(user)
    } else {
        Err(SigninError::InvalidCredentials(
            CredentialMismatch::WrongPassword,
        ))
    }
}

#[utoipa::path(
    post,
    path = "/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 409, description = "Email already registered", body = MessageResponse),
        (status = 500, description = "Account could not be created", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn sign_up(
    store: Extension<SharedStore>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SignUpRequest>,
) -> impl IntoResponse {
    match register(store.as_ref(), auth_state.passwords(), request).await {
        Ok(user) => {
            info!(user_id = user.user_id, "user signed up");
            message(StatusCode::CREATED, "Signed up")
        }
        Err(err @ SignupError::DuplicateEmail) => {
            debug!("sign-up rejected: {err}");
            message(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => {
            error!("Failed to sign up: {err}");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign up")
        }
    }
}

#[utoipa::path(
    post,
    path = "/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in, credential cookie set", body = MessageResponse),
        (status = 401, description = "Unknown email or wrong password", body = MessageResponse),
        (status = 500, description = "Credential could not be issued", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn sign_in(
    store: Extension<SharedStore>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SignInRequest>,
) -> impl IntoResponse {
    let user = match check_credentials(
        store.as_ref(),
        auth_state.passwords(),
        &request.email,
        request.password,
    )
    .await
    {
        Ok(user) => user,
        Err(err @ SigninError::InvalidCredentials(_)) => {
            debug!("sign-in rejected: {err}");
            return message(StatusCode::UNAUTHORIZED, err.to_string());
        }
        Err(err) => {
            error!("Failed to sign in: {err}");
            return message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign in");
        }
    };

    let raw = match auth_state.strategy().issue(user.user_id).await {
        Ok(raw) => raw,
        Err(err) => {
            error!("Failed to issue credential: {err}");
            return message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign in");
        }
    };

    let cookie = match credential_cookie(&auth_state, &raw) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build credential cookie: {err}");
            return message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign in");
        }
    };

    info!(user_id = user.user_id, "user signed in");
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    (
        StatusCode::OK,
        headers,
        Json(MessageResponse::new("Signed in")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "The caller's account and profile", body = UserResponse),
        (status = 401, description = "Missing or invalid credential", body = MessageResponse),
        (status = 404, description = "Profile not found", body = MessageResponse),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn get_user(
    headers: HeaderMap,
    store: Extension<SharedStore>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state, store.as_ref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection,
    };

    let loaded = async {
        let user = store.find_user_by_id(principal.user_id).await?;
        let profile = store.find_profile(principal.user_id).await?;
        Ok::<_, StoreError>(user.zip(profile))
    }
    .await;

    match loaded {
        Ok(Some((user, profile))) => (
            StatusCode::OK,
            Json(UserResponse {
                data: UserData::new(user, profile),
            }),
        )
            .into_response(),
        Ok(None) => message(StatusCode::NOT_FOUND, "Profile not found"),
        Err(err) => {
            error!("Failed to load user: {err}");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load user")
        }
    }
}

#[utoipa::path(
    patch,
    path = "/users",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = MessageResponse),
        (status = 401, description = "Missing or invalid credential", body = MessageResponse),
        (status = 404, description = "Profile not found", body = MessageResponse),
        (status = 500, description = "Update rolled back", body = MessageResponse),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn patch_user(
    headers: HeaderMap,
    store: Extension<SharedStore>,
    auth_state: Extension<Arc<AuthState>>,
    isolation: Extension<IsolationLevel>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> impl IntoResponse {
    // Authenticate before looking at the body so bad credentials always win.
    let principal = match require_auth(&headers, &auth_state, store.as_ref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection,
    };
    let Json(update) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection.into_response(),
    };

    match profile::update_profile(store.as_ref(), principal.user_id, &update, *isolation).await {
        Ok(_) => message(StatusCode::OK, "Profile updated"),
        Err(ProfileError::ProfileNotFound) => message(StatusCode::NOT_FOUND, "Profile not found"),
        Err(err @ ProfileError::Transaction(_)) => {
            error!("Failed to update profile: {err}");
            message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update profile",
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/users/histories",
    responses(
        (status = 200, description = "Profile changes, newest first", body = HistoryResponse),
        (status = 401, description = "Missing or invalid credential", body = MessageResponse),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn list_histories(
    headers: HeaderMap,
    store: Extension<SharedStore>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state, store.as_ref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection,
    };

    match store.list_history(principal.user_id).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(HistoryResponse {
                data: entries.into_iter().map(HistoryEntry::from).collect(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to list profile history: {err}");
            message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list profile history",
            )
        }
    }
}
