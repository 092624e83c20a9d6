use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>()
            && parsed <= 5
        {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("BULLETIN_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_from(args: Vec<&str>) -> clap::ArgMatches {
        with_args(Command::new("bulletin")).get_matches_from(args)
    }

    #[test]
    fn counts_repeated_flags() {
        temp_env::with_vars([("BULLETIN_LOG_LEVEL", None::<&str>)], || {
            let matches = matches_from(vec!["bulletin", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn validator_accepts_numbers_and_names() {
        let command = || {
            Command::new("bulletin").arg(
                Arg::new("level")
                    .long("level")
                    .value_parser(validator_log_level()),
            )
        };
        for (input, expected) in [("0", 0u8), ("5", 5), ("info", 2), ("TRACE", 4)] {
            let parsed = command()
                .try_get_matches_from(vec!["bulletin", "--level", input])
                .ok()
                .and_then(|matches| matches.get_one::<u8>("level").copied());
            assert_eq!(parsed, Some(expected), "{input}");
        }
        for input in ["loud", "9"] {
            let result = command().try_get_matches_from(vec!["bulletin", "--level", input]);
            assert!(result.is_err(), "{input}");
        }
    }
}
