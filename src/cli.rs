//! Command-line argument parsing for calltest

use anyhow::{bail, Result};
use std::path::PathBuf;

/// What the binary should do
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// Run every check loop and the status server
    #[default]
    Serve,
    /// Run the named checks (or all non-skip checks) once and exit
    Once(Vec<String>),
    List,
    Validate,
    DumpConfig,
    Help,
}

/// Parsed command line
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub command: Command,
    pub config: Option<PathBuf>,
    /// `-v` count minus `-q` count
    pub verbosity: i32,
    /// Extra `target=level` filter directives
    pub log: Vec<String>,
}

impl Args {
    /// Default filter directive for the crate's own target
    pub fn base_directive(&self) -> String {
        let level = match self.verbosity {
            i32::MIN..=-2 => "error",
            -1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("calltest={}", level)
    }
}

pub fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse a full argv, program name first
pub fn parse_args_from(args: &[String]) -> Result<Args> {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                match args.get(i) {
                    Some(path) => result.config = Some(PathBuf::from(path)),
                    None => bail!("--config needs a path"),
                }
            }
            "--once" => {
                let mut names = Vec::new();
                while let Some(name) = args.get(i + 1).filter(|a| !a.starts_with('-')) {
                    names.push(name.clone());
                    i += 1;
                }
                result.command = Command::Once(names);
            }
            "--list" => result.command = Command::List,
            "--validate" => result.command = Command::Validate,
            "--dump-config" => result.command = Command::DumpConfig,
            "--log" | "-l" => {
                i += 1;
                match args.get(i) {
                    Some(directive) if directive.contains('=') => result.log.push(directive.clone()),
                    Some(other) => bail!("--log expects target=level, got '{}'", other),
                    None => bail!("--log needs target=level"),
                }
            }
            "--help" | "-h" => result.command = Command::Help,
            flag if flag.starts_with('-') && flag.len() > 1 && flag[1..].chars().all(|c| c == 'v' || c == 'q') => {
                for c in flag[1..].chars() {
                    result.verbosity += if c == 'v' { 1 } else { -1 };
                }
            }
            other => bail!("Unknown argument '{}' (try --help)", other),
        }
        i += 1;
    }

    Ok(result)
}

pub fn print_help() {
    println!("calltest - telephony check engine\n");
    println!("USAGE:");
    println!("    calltest [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --config, -c PATH         Configuration file (default: $CALLTEST_CONFIG)");
    println!("    --once [CHECK...]         Run the named checks (default: all scheduled) once and exit");
    println!("    --list                    List configured checks");
    println!("    --validate                Validate configuration and exit");
    println!("    --dump-config             Print the effective configuration as TOML");
    println!("    -v, -q                    More / less log output (repeatable)");
    println!("    --log, -l TARGET=LEVEL    Extra log filter directive (repeatable)");
    println!("    --help, -h                Show this help message\n");
    println!("Without --once, --list, --validate or --dump-config every check runs");
    println!("on its schedule and the status server listens on [server] host/port.\n");
    println!("ENVIRONMENT:");
    println!("    CALLTEST_CONFIG, CALLTEST_CONTROLLER_HOST, CALLTEST_CONTROLLER_PORT,");
    println!("    CALLTEST_CONTROLLER_USERNAME, CALLTEST_CONTROLLER_PASSWORD, CALLTEST_SERVER_PORT");
    println!("    RUST_LOG is honored in addition to -v/-q/--log");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(rest: &[&str]) -> Vec<String> {
        std::iter::once("calltest")
            .chain(rest.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_default() {
        let result = parse_args_from(&argv(&[])).unwrap();
        assert_eq!(result.command, Command::Serve);
        assert!(result.config.is_none());
        assert_eq!(result.verbosity, 0);
        assert!(result.log.is_empty());
    }

    #[test]
    fn test_parse_args_once_all() {
        let result = parse_args_from(&argv(&["--once"])).unwrap();
        assert_eq!(result.command, Command::Once(vec![]));
    }

    #[test]
    fn test_parse_args_once_named() {
        let result = parse_args_from(&argv(&["--once", "a", "b", "-v"])).unwrap();
        assert_eq!(result.command, Command::Once(vec!["a".into(), "b".into()]));
        assert_eq!(result.verbosity, 1);
    }

    #[test]
    fn test_parse_args_config() {
        let result = parse_args_from(&argv(&["--config", "/etc/calltest.toml", "--list"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/calltest.toml")));
        assert_eq!(result.command, Command::List);
    }

    #[test]
    fn test_parse_args_config_missing_path() {
        assert!(parse_args_from(&argv(&["--config"])).is_err());
    }

    #[test]
    fn test_parse_args_commands() {
        assert_eq!(parse_args_from(&argv(&["--validate"])).unwrap().command, Command::Validate);
        assert_eq!(parse_args_from(&argv(&["--dump-config"])).unwrap().command, Command::DumpConfig);
        assert_eq!(parse_args_from(&argv(&["--help"])).unwrap().command, Command::Help);
        assert_eq!(parse_args_from(&argv(&["-h"])).unwrap().command, Command::Help);
    }

    #[test]
    fn test_parse_args_verbosity() {
        assert_eq!(parse_args_from(&argv(&["-vv"])).unwrap().verbosity, 2);
        assert_eq!(parse_args_from(&argv(&["-v", "-q", "-q"])).unwrap().verbosity, -1);
        assert_eq!(parse_args_from(&argv(&["-vq"])).unwrap().verbosity, 0);
    }

    #[test]
    fn test_parse_args_log_directives() {
        let result = parse_args_from(&argv(&["--log", "calltest::status=debug", "-l", "tokio=warn"])).unwrap();
        assert_eq!(result.log, vec!["calltest::status=debug", "tokio=warn"]);
        assert!(parse_args_from(&argv(&["--log", "debug"])).is_err());
        assert!(parse_args_from(&argv(&["--log"])).is_err());
    }

    #[test]
    fn test_parse_args_unknown() {
        assert!(parse_args_from(&argv(&["--bogus"])).is_err());
        assert!(parse_args_from(&argv(&["stray"])).is_err());
    }

    #[test]
    fn test_base_directive() {
        let mut args = Args::default();
        assert_eq!(args.base_directive(), "calltest=info");
        args.verbosity = 1;
        assert_eq!(args.base_directive(), "calltest=debug");
        args.verbosity = 5;
        assert_eq!(args.base_directive(), "calltest=trace");
        args.verbosity = -1;
        assert_eq!(args.base_directive(), "calltest=warn");
        args.verbosity = -3;
        assert_eq!(args.base_directive(), "calltest=error");
    }
}
