use std::{ffi::OsString, path::PathBuf};

use clap::{ArgAction, Parser};

use crate::config::ConfigError;

/// Run a command and kill it when it exceeds a CPU, memory or wall-clock ceiling.
///
/// Send SIGTSTP (Ctrl-Z) to pause monitoring and SIGCONT (fg) to resume it.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
  /// CPU-time ceiling in seconds (0 = unlimited)
  #[arg(short, long, value_name = "SECS")]
  pub cpu: Option<u64>,

  /// Resident memory ceiling in kilobytes (0 = unlimited)
  #[arg(short, long, value_name = "KB")]
  pub mem: Option<u64>,

  /// Wall-clock ceiling in seconds (0 = unlimited)
  #[arg(short, long, value_name = "SECS")]
  pub wall: Option<u64>,

  /// Settings file (default: ./timedexec.toml, then /etc/timedexec.toml)
  #[arg(long, value_name = "PATH")]
  pub config: Option<PathBuf>,

  /// Delay between two polls of the child, in milliseconds
  #[arg(long, value_name = "MS")]
  pub poll_ms: Option<u64>,

  /// Print the final summary as JSON
  #[arg(long)]
  pub json: bool,

  /// More diagnostics on stderr (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count)]
  pub verbose: u8,

  /// Program to run, followed by its own arguments
  #[arg(
    required = true,
    trailing_var_arg = true,
    allow_hyphen_values = true,
    value_name = "COMMAND"
  )]
  pub command: Vec<String>,
}

impl CliArgs {
  /// Scan `args` (program name first); everything from the first positional
  /// argument on is the child's command line, passed through untouched.
  pub fn parse_from_args<I, T>(args: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
  {
    Ok(Self::try_parse_from(args)?)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn parse(args: &[&str]) -> Result<CliArgs, ConfigError> {
    CliArgs::parse_from_args(std::iter::once("timedexec").chain(args.iter().copied()))
  }

  #[test]
  fn flags_then_command() {
    let args = parse(&["-c", "1", "--mem", "1024", "sleep", "5"]).unwrap();
    assert_eq!(args.cpu, Some(1));
    assert_eq!(args.mem, Some(1024));
    assert_eq!(args.wall, None);
    assert_eq!(args.command, vec!["sleep", "5"]);
  }

  #[test]
  fn command_arguments_are_verbatim() {
    let args = parse(&["ls", "-l", "--cpu", "3"]).unwrap();
    assert_eq!(args.cpu, None);
    assert_eq!(args.command, vec!["ls", "-l", "--cpu", "3"]);

    let args = parse(&["-w", "2", "--", "--odd-name"]).unwrap();
    assert_eq!(args.wall, Some(2));
    assert_eq!(args.command, vec!["--odd-name"]);
  }

  #[test]
  fn verbosity_counts() {
    let args = parse(&["-vv", "true"]).unwrap();
    assert_eq!(args.verbose, 2);
    assert!(!args.json);
  }

  #[test]
  fn rejects_missing_operand() {
    assert!(matches!(parse(&["--cpu"]), Err(ConfigError::Usage(_))));
    assert!(matches!(parse(&["true", "-m"]).map(|a| a.mem), Ok(None)));
  }

  #[test]
  fn rejects_non_integer_operand() {
    assert!(matches!(
      parse(&["--mem", "lots", "true"]),
      Err(ConfigError::Usage(_))
    ));
    assert!(matches!(
      parse(&["--cpu", "-1", "true"]),
      Err(ConfigError::Usage(_))
    ));
  }

  #[test]
  fn rejects_missing_command() {
    assert!(matches!(parse(&[]), Err(ConfigError::Usage(_))));
    assert!(matches!(parse(&["-c", "5"]), Err(ConfigError::Usage(_))));
  }
}
