//! Data-access interface for users, profiles, audit history and sessions.
//!
//! Single-row reads and session bookkeeping live on [`Store`]. Every write that
//! touches more than one row goes through a [`StoreTx`] obtained from
//! [`Store::begin`]; dropping a transaction without calling
//! [`StoreTx::commit`] rolls it back, so a failed step can never leave a user
//! without a profile or a profile change without its history.
//!
//! Two backends ship with the crate:
//! - [`postgres::PgStore`], backed by a sqlx pool.
//! - [`memory::MemoryStore`], in-process tables used for dev mode and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, pin::Pin, str::FromStr, sync::Arc};
use thiserror::Error;
use utoipa::ToSchema;

pub mod memory;
pub mod postgres;

/// Boxed future returned by store operations so the traits stay object safe.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Shared handle passed to handlers through an axum `Extension`.
pub type SharedStore = Arc<dyn Store>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The transaction was aborted before it could commit.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Transaction isolation level requested by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "read-committed" => Ok(Self::ReadCommitted),
            "repeatable-read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// Profile gender, stored in its canonical uppercase form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const ALL: [Self; 3] = [Self::Male, Self::Female, Self::Other];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "MALE" => Ok(Self::Male),
            "FEMALE" => Ok(Self::Female),
            "OTHER" => Ok(Self::Other),
            _ => Err(format!("invalid gender: {value}")),
        }
    }
}

impl TryFrom<String> for Gender {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub profile_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields supplied at sign-up.
#[derive(Clone, Debug)]
pub struct NewProfile {
    pub user_id: i64,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub profile_image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserHistory {
    pub user_history_id: i64,
    pub user_id: i64,
    pub changed_field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewHistory {
    pub user_id: i64,
    pub changed_field: String,
    pub old_value: String,
    pub new_value: String,
}

/// Stored server-side session, keyed by the hash of the raw session id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Point lookups and single-statement writes.
pub trait Store: Send + Sync {
    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>>;

    fn find_user_by_id(&self, user_id: i64) -> StoreFuture<'_, Option<User>>;

    fn find_profile(&self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>>;

    /// Audit trail for a user, newest first.
    fn list_history(&self, user_id: i64) -> StoreFuture<'_, Vec<UserHistory>>;

    fn insert_session<'a>(
        &'a self,
        user_id: i64,
        session_hash: &'a [u8],
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;

    /// Look up a session regardless of expiry so callers can tell expired from absent.
    fn find_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>>;

    fn delete_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, ()>;

    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Open a transaction at the requested isolation level.
    fn begin(&self, isolation: IsolationLevel) -> StoreFuture<'_, Box<dyn StoreTx>>;
}

/// Multi-statement unit of work. Dropping it without `commit` rolls back.
pub trait StoreTx: Send {
    fn insert_user<'a>(&'a mut self, email: &'a str, password_hash: &'a str)
    -> StoreFuture<'a, User>;

    fn insert_profile<'a>(&'a mut self, profile: &'a NewProfile) -> StoreFuture<'a, UserProfile>;

    /// Read a profile and hold it against concurrent writers until the transaction ends.
    fn lock_profile(&mut self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>>;

    fn update_profile<'a>(&'a mut self, profile: &'a UserProfile) -> StoreFuture<'a, ()>;

    fn append_history<'a>(&'a mut self, entry: &'a NewHistory) -> StoreFuture<'a, ()>;

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_parses_case_insensitively() {
        assert_eq!("male".parse::<Gender>(), Ok(Gender::Male));
        assert_eq!(" Female ".parse::<Gender>(), Ok(Gender::Female));
        assert_eq!("OTHER".parse::<Gender>(), Ok(Gender::Other));
        assert!("unknown".parse::<Gender>().is_err());
    }

    #[test]
    fn gender_serializes_uppercase_and_deserializes_any_case() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Gender::Female)?, "\"FEMALE\"");
        let gender: Gender = serde_json::from_str("\"other\"")?;
        assert_eq!(gender, Gender::Other);
        assert!(serde_json::from_str::<Gender>("\"robot\"").is_err());
        Ok(())
    }

    #[test]
    fn isolation_level_round_trips_through_cli_names() {
        for level in [
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ] {
            assert_eq!(level.to_string().parse::<IsolationLevel>(), Ok(level));
        }
        assert_eq!(
            "READ_COMMITTED".parse::<IsolationLevel>(),
            Ok(IsolationLevel::ReadCommitted)
        );
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn isolation_level_sql_names() {
        assert_eq!(IsolationLevel::default().as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }
}
