use crate::cli::{
    actions::{Action, server},
    commands::{self, auth, database},
};
use anyhow::{Result, anyhow};

/// Build the server action from parsed arguments.
///
/// # Errors
/// Returns an error if a required argument is missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let database = database::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port: matches
            .get_one::<u16>(commands::ARG_PORT)
            .copied()
            .unwrap_or(8080),
        dsn: matches
            .get_one::<String>(commands::ARG_DSN)
            .cloned()
            .ok_or_else(|| anyhow!("missing required argument: --{}", commands::ARG_DSN))?,
        db_max_connections: database.max_connections,
        profile_isolation: database.profile_isolation,
        credential_mode: auth.credential_mode,
        token_secret: auth.token_secret,
        token_ttl_seconds: auth.token_ttl_seconds,
        session_ttl_seconds: auth.session_ttl_seconds,
        cookie_name: auth.cookie_name,
        cookie_secure: auth.cookie_secure,
        password_memory_kib: auth.password_memory_kib,
        password_iterations: auth.password_iterations,
        password_parallelism: auth.password_parallelism,
    }))
}
