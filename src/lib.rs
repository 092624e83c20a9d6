//! # Bulletin
//!
//! Backend for a community board. The part that carries real logic is the
//! identity and profile core:
//!
//! - **Identity verification.** Every protected request carries a credential in
//!   a cookie. Two interchangeable strategies resolve it to a user: a signed,
//!   stateless bearer token (HS256) or an opaque server-side session id whose
//!   SHA-256 is stored. The strategy is picked once at startup. Any failure
//!   clears the cookie and answers with a uniform `401`.
//! - **Audited profile updates.** A partial profile update and the field-level
//!   history entries it produces are written in one transaction with the profile
//!   row locked, so the audit trail never disagrees with the profile.
//!
//! ## Storage
//!
//! `--dsn postgres://...` uses `PostgreSQL` through sqlx. The schema lives in
//! `sql/schema.sql` and is loaded by the operator. `--dsn memory://` keeps all
//! data in-process, which is what the integration tests use.

pub mod api;
pub mod cli;
pub mod profile;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result, ensure};
    use std::{fs, path::PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonical_schema() -> Result<String> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql/schema.sql");
        let sql = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(sql
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect())
    }

    #[test]
    fn schema_defines_all_tables() -> Result<()> {
        let canonical = canonical_schema()?;
        for table in ["users", "user_infos", "user_histories", "user_sessions"] {
            let needle = format!("createtableifnotexists{table}(");
            ensure!(canonical.contains(&needle), "missing table {table}");
        }
        Ok(())
    }

    #[test]
    fn schema_keeps_email_unique_and_profile_one_to_one() -> Result<()> {
        let canonical = canonical_schema()?;
        ensure!(canonical.contains("unique(email)"), "email must be unique");
        ensure!(
            canonical.contains("user_idbigintprimarykeyreferencesusers(user_id)"),
            "user_infos must be keyed by user_id"
        );
        ensure!(
            canonical.contains("session_hashbyteaprimarykey"),
            "sessions must be keyed by their hash"
        );
        Ok(())
    }

    #[test]
    fn schema_accepts_every_gender() -> Result<()> {
        let canonical = canonical_schema()?;
        let expected = crate::store::Gender::ALL
            .iter()
            .map(|gender| format!("'{}'", gender.as_str().to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join(",");
        ensure!(
            canonical.contains(&format!("check(genderin({expected}))")),
            "gender check must list {expected}"
        );
        Ok(())
    }
}
