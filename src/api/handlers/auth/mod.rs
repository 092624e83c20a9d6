//! Identity verification.
//!
//! A request carries one credential in a cookie. Depending on
//! `--credential-mode` that credential is either a signed bearer token
//! ([`token`]) or an opaque server-side session id ([`session`]). Both are
//! hidden behind [`credential::CredentialStrategy`], chosen once at startup and
//! held in [`AuthState`]. [`principal`] turns a request into a user or a
//! rejection that clears the cookie.
//!
//! Passwords are hashed with Argon2id ([`password`]); the cost is configurable.

pub mod credential;
pub mod password;
pub mod principal;
pub mod session;
mod state;
pub mod token;
pub mod types;
mod utils;

pub use credential::{AuthError, CredentialMode, CredentialStrategy};
pub use password::{CodecError, PasswordCodec};
pub use principal::{Principal, authenticate, require_auth};
pub use state::{AuthConfig, AuthState, DEFAULT_COOKIE_NAME, MAX_TTL_SECONDS};
