use crate::{
    api::{
        self,
        handlers::auth::{AuthConfig, CredentialMode, PasswordCodec},
    },
    store::IsolationLevel,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub profile_isolation: IsolationLevel,
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

impl Args {
    fn auth_config(&self) -> AuthConfig {
        let config = AuthConfig::new(self.credential_mode)
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_cookie_name(self.cookie_name.clone())
            .with_cookie_secure(self.cookie_secure);
        match &self.token_secret {
            Some(secret) => config.with_token_secret(secret.clone()),
            None => config,
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the password cost is invalid, the store cannot be opened,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let passwords = PasswordCodec::new(
        args.password_memory_kib,
        args.password_iterations,
        args.password_parallelism,
    )
    .context("Invalid password hashing parameters")?;

    let auth_config = args.auth_config();

    debug!(
        credential_mode = %args.credential_mode,
        isolation = %args.profile_isolation,
        "server args parsed"
    );

    api::new(
        args.port,
        &args.dsn,
        args.db_max_connections,
        auth_config,
        passwords,
        args.profile_isolation,
    )
    .await
}
