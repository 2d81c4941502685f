//! Command-line interface for the relay host.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments.
///
/// Everything except the config path is an override for a value in the
/// configuration file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the transport bind address
    pub bind_address: Option<String>,
    /// Optional override for the number of participant slots
    pub slots: Option<usize>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            slots: matches.get_one::<usize>("slots").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("Relay Host")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dedicated game host admitting players over a relay transport")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Transport bind address (e.g., 127.0.0.1:24642)"),
        )
        .arg(
            Arg::new("slots")
                .short('s')
                .long("slots")
                .value_name("COUNT")
                .help("Number of participant slots offered to joining players")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(&command().get_matches_from(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse_from(&["relay_host"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.bind_address.is_none());
        assert!(args.slots.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = parse_from(&[
            "relay_host",
            "-c",
            "host.toml",
            "--bind",
            "0.0.0.0:9000",
            "--slots",
            "8",
            "-l",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("host.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.slots, Some(8));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_rejects_non_numeric_slots() {
        assert!(command()
            .try_get_matches_from(["relay_host", "--slots", "many"])
            .is_err());
    }
}
