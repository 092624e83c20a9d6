use crate::store::IsolationLevel;
use anyhow::{Result, anyhow};
use clap::{Arg, ArgMatches, Command};

pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";
pub const ARG_PROFILE_ISOLATION: &str = "profile-isolation";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub max_connections: u32,
    pub profile_isolation: IsolationLevel,
}

impl Options {
    /// Parse database arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let max_connections = matches
            .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
            .copied()
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_DB_MAX_CONNECTIONS}"))?;
        let profile_isolation = matches
            .get_one::<IsolationLevel>(ARG_PROFILE_ISOLATION)
            .copied()
            .unwrap_or_default();

        Ok(Self {
            max_connections,
            profile_isolation,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum number of pooled database connections")
                .env("BULLETIN_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_PROFILE_ISOLATION)
                .long(ARG_PROFILE_ISOLATION)
                .help("Isolation level of the profile update transaction")
                .long_help(
                    "Isolation level of the profile update transaction: read-committed, repeatable-read or serializable. \
                     The profile row is locked for the duration of the update at every level.",
                )
                .env("BULLETIN_PROFILE_ISOLATION")
                .default_value("read-committed")
                .value_parser(|value: &str| value.parse::<IsolationLevel>()),
        )
}
