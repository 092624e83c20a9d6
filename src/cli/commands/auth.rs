use crate::api::handlers::auth::{CredentialMode, DEFAULT_COOKIE_NAME, MAX_TTL_SECONDS};
use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_CREDENTIAL_MODE: &str = "credential-mode";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_PASSWORD_MEMORY_KIB: &str = "password-memory-kib";
pub const ARG_PASSWORD_ITERATIONS: &str = "password-iterations";
pub const ARG_PASSWORD_PARALLELISM: &str = "password-parallelism";

#[derive(Debug, Clone)]
pub struct Options {
    pub credential_mode: CredentialMode,
    pub token_secret: Option<SecretString>,
    pub token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub password_memory_kib: u32,
    pub password_iterations: u32,
    pub password_parallelism: u32,
}

impl Options {
    /// Parse credential and password arguments from matches.
    ///
    /// # Errors
    /// Returns an error if token mode is selected without a token secret.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let credential_mode = matches
            .get_one::<CredentialMode>(ARG_CREDENTIAL_MODE)
            .copied()
            .unwrap_or_default();
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        if credential_mode == CredentialMode::Token && token_secret.is_none() {
            return Err(anyhow!(
                "missing required argument: --{ARG_TOKEN_SECRET} (required for --{ARG_CREDENTIAL_MODE} token)"
            ));
        }

        let read_u32 = |id: &str| -> Result<u32> {
            matches
                .get_one::<u32>(id)
                .copied()
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };
        let read_i64 = |id: &str| -> Result<i64> {
            matches
                .get_one::<i64>(id)
                .copied()
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            credential_mode,
            token_secret,
            token_ttl_seconds: read_i64(ARG_TOKEN_TTL_SECONDS)?,
            session_ttl_seconds: read_i64(ARG_SESSION_TTL_SECONDS)?,
            cookie_name: matches
                .get_one::<String>(ARG_COOKIE_NAME)
                .cloned()
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            password_memory_kib: read_u32(ARG_PASSWORD_MEMORY_KIB)?,
            password_iterations: read_u32(ARG_PASSWORD_ITERATIONS)?,
            password_parallelism: read_u32(ARG_PASSWORD_PARALLELISM)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_credential_args(command);
    with_password_args(command)
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CREDENTIAL_MODE)
                .long(ARG_CREDENTIAL_MODE)
                .help("Credential strategy: signed bearer token or server-side session")
                .env("BULLETIN_CREDENTIAL_MODE")
                .default_value("token")
                .value_parser(|value: &str| value.parse::<CredentialMode>()),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing secret for bearer tokens (required in token mode)")
                .env("BULLETIN_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Bearer token lifetime in seconds")
                .env("BULLETIN_TOKEN_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("BULLETIN_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Name of the credential cookie")
                .env("BULLETIN_COOKIE_NAME")
                .default_value(DEFAULT_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark the credential cookie Secure (serve over HTTPS)")
                .env("BULLETIN_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
}

fn with_password_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PASSWORD_MEMORY_KIB)
                .long(ARG_PASSWORD_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("BULLETIN_PASSWORD_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_ITERATIONS)
                .long(ARG_PASSWORD_ITERATIONS)
                .help("Argon2id iteration count")
                .env("BULLETIN_PASSWORD_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_PARALLELISM)
                .long(ARG_PASSWORD_PARALLELISM)
                .help("Argon2id parallelism")
                .env("BULLETIN_PASSWORD_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
}
