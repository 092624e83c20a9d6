//! PostgreSQL backend.
//!
//! Tables are described in `sql/schema.sql`. Every statement runs inside a
//! `db.query` span carrying the statement text.

use super::{
    Gender, IsolationLevel, NewHistory, NewProfile, SessionRecord, Store, StoreError, StoreFuture,
    StoreTx, User, UserHistory, UserProfile,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{Instrument, Span};

const USER_COLUMNS: &str = "user_id, email, password, created_at, updated_at";
const PROFILE_COLUMNS: &str =
    "user_id, name, age, gender, profile_image, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn map_write_error(err: sqlx::Error, what: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(what.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    let gender: String = row.try_get("gender")?;
    let gender = gender.parse::<Gender>().map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(UserProfile {
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        age: row.try_get("age")?,
        gender,
        profile_image: row.try_get("profile_image")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<UserHistory, sqlx::Error> {
    Ok(UserHistory {
        user_history_id: row.try_get("user_history_id")?,
        user_id: row.try_get("user_id")?,
        changed_field: row.try_get("changed_field")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        changed_at: row.try_get("changed_at")?,
    })
}

impl Store for PgStore {
    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
            let row = sqlx::query(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await?;
            Ok(row.as_ref().map(user_from_row).transpose()?)
        })
    }

    fn find_user_by_id(&self, user_id: i64) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            let query = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
            let row = sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await?;
            Ok(row.as_ref().map(user_from_row).transpose()?)
        })
    }

    fn find_profile(&self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>> {
        Box::pin(async move {
            let query = format!("SELECT {PROFILE_COLUMNS} FROM user_infos WHERE user_id = $1");
            let row = sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await?;
            Ok(row.as_ref().map(profile_from_row).transpose()?)
        })
    }

    fn list_history(&self, user_id: i64) -> StoreFuture<'_, Vec<UserHistory>> {
        Box::pin(async move {
            let query = r"
                SELECT user_history_id, user_id, changed_field, old_value, new_value, changed_at
                FROM user_histories
                WHERE user_id = $1
                ORDER BY changed_at DESC, user_history_id DESC
            ";
            let rows = sqlx::query(query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(db_span("SELECT", query))
                .await?;
            Ok(rows
                .iter()
                .map(history_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn insert_session<'a>(
        &'a self,
        user_id: i64,
        session_hash: &'a [u8],
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO user_sessions (session_hash, user_id, expires_at)
                VALUES ($1, $2, $3)
            ";
            sqlx::query(query)
                .bind(session_hash)
                .bind(user_id)
                .bind(expires_at)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .map_err(|err| map_write_error(err, "user_sessions.session_hash"))?;
            Ok(())
        })
    }

    fn find_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>> {
        Box::pin(async move {
            let query = "SELECT user_id, expires_at FROM user_sessions WHERE session_hash = $1";
            let row = sqlx::query(query)
                .bind(session_hash)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await?;
            match row {
                Some(row) => Ok(Some(SessionRecord {
                    user_id: row.try_get("user_id")?,
                    expires_at: row.try_get("expires_at")?,
                })),
                None => Ok(None),
            }
        })
    }

    fn delete_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // Idempotent: deleting a missing session is not an error.
            let query = "DELETE FROM user_sessions WHERE session_hash = $1";
            sqlx::query(query)
                .bind(session_hash)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await?;
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .instrument(tracing::info_span!(
                    "db.ping",
                    db.system = "postgresql",
                    db.operation = "PING"
                ))
                .await?;
            Ok(())
        })
    }

    fn begin(&self, isolation: IsolationLevel) -> StoreFuture<'_, Box<dyn StoreTx>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            // Must be the first statement of the transaction.
            let query = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
            sqlx::query(&query)
                .execute(&mut *tx)
                .instrument(db_span("SET", &query))
                .await?;
            Ok(Box::new(PgTx { tx }) as Box<dyn StoreTx>)
        })
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx for PgTx {
    fn insert_user<'a>(
        &'a mut self,
        email: &'a str,
        password_hash: &'a str,
    ) -> StoreFuture<'a, User> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO users (email, password) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
            );
            let row = sqlx::query(&query)
                .bind(email)
                .bind(password_hash)
                .fetch_one(&mut *self.tx)
                .instrument(db_span("INSERT", &query))
                .await
                .map_err(|err| map_write_error(err, "users.email"))?;
            Ok(user_from_row(&row)?)
        })
    }

    fn insert_profile<'a>(&'a mut self, profile: &'a NewProfile) -> StoreFuture<'a, UserProfile> {
        Box::pin(async move {
            let query = format!(
                r"INSERT INTO user_infos (user_id, name, age, gender, profile_image)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {PROFILE_COLUMNS}"
            );
            let row = sqlx::query(&query)
                .bind(profile.user_id)
                .bind(&profile.name)
                .bind(profile.age)
                .bind(profile.gender.as_str())
                .bind(profile.profile_image.as_deref())
                .fetch_one(&mut *self.tx)
                .instrument(db_span("INSERT", &query))
                .await
                .map_err(|err| map_write_error(err, "user_infos.user_id"))?;
            Ok(profile_from_row(&row)?)
        })
    }

    fn lock_profile(&mut self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>> {
        Box::pin(async move {
            let query =
                format!("SELECT {PROFILE_COLUMNS} FROM user_infos WHERE user_id = $1 FOR UPDATE");
            let row = sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .instrument(db_span("SELECT", &query))
                .await?;
            Ok(row.as_ref().map(profile_from_row).transpose()?)
        })
    }

    fn update_profile<'a>(&'a mut self, profile: &'a UserProfile) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                UPDATE user_infos
                SET name = $1,
                    age = $2,
                    gender = $3,
                    profile_image = $4,
                    updated_at = $5
                WHERE user_id = $6
            ";
            let result = sqlx::query(query)
                .bind(&profile.name)
                .bind(profile.age)
                .bind(profile.gender.as_str())
                .bind(profile.profile_image.as_deref())
                .bind(profile.updated_at)
                .bind(profile.user_id)
                .execute(&mut *self.tx)
                .instrument(db_span("UPDATE", query))
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Aborted(format!(
                    "profile for user {} disappeared during update",
                    profile.user_id
                )));
            }
            Ok(())
        })
    }

    fn append_history<'a>(&'a mut self, entry: &'a NewHistory) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO user_histories (user_id, changed_field, old_value, new_value)
                VALUES ($1, $2, $3, $4)
            ";
            sqlx::query(query)
                .bind(entry.user_id)
                .bind(&entry.changed_field)
                .bind(&entry.old_value)
                .bind(&entry.new_value)
                .execute(&mut *self.tx)
                .instrument(db_span("INSERT", query))
                .await?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }
}
