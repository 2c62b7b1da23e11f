use std::{
  fmt, fs, io,
  path::{Path, PathBuf},
  time::Duration,
};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{cli::CliArgs, usage::UsageSample, utils::Memory};

#[derive(Debug, Error)]
pub enum ConfigError {
  /// bad flag, missing operand or no command; clap renders the details
  #[error("{0}")]
  Usage(#[from] clap::Error),
  #[error("no program for child to run")]
  NoCommand,
  #[error("failed to read config file {path:?}: {source}")]
  Read { path: PathBuf, source: io::Error },
  #[error("failed to parse config file {path:?}: {source}")]
  Parse {
    path: PathBuf,
    source: toml::de::Error,
  },
  #[error("poll interval must be greater than zero")]
  ZeroPollInterval,
}

/// Settings file
///
/// Search path:
/// - the `--config` argument
/// - ./timedexec.toml (cwd of timedexec)
/// - /etc/timedexec.toml
/// - Default (when no config file available)
///
/// Ceilings given on the command line override the ones from the file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  /// Delay between polls of the child
  pub poll_interval_ms: u64,
  /// Default CPU ceiling in seconds
  pub cpu_seconds: u64,
  /// Default memory ceiling in kilobytes
  pub memory_kb: u64,
  /// Default wall-clock ceiling in seconds
  pub wall_seconds: u64,
  /// How far above the CPU ceiling the kernel quota (RLIMIT_CPU) is set
  pub rlimit_grace_secs: u64,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      poll_interval_ms: 100,
      cpu_seconds: 0,
      memory_kb: 0,
      wall_seconds: 0,
      rlimit_grace_secs: 1,
    }
  }
}

impl Settings {
  const SEARCH_PATH: [&'static str; 2] = ["./timedexec.toml", "/etc/timedexec.toml"];

  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = path {
      return Self::read_from(path);
    }
    for candidate in Self::SEARCH_PATH.iter().map(Path::new) {
      if candidate.is_file() {
        return Self::read_from(candidate);
      }
    }
    Ok(Self::default())
  }

  pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// Which ceiling a child went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
  CpuTime,
  Memory,
  WallClock,
}

impl LimitKind {
  pub fn breach_message(self) -> &'static str {
    match self {
      LimitKind::CpuTime => "CPU time reached limit. Terminating child with kill signal.",
      LimitKind::Memory => "memory usage exceeded memory limit. Terminating child with kill signal.",
      LimitKind::WallClock => "wall clock time reached limit. Terminating child with kill signal.",
    }
  }
}

impl fmt::Display for LimitKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      LimitKind::CpuTime => "CPU time",
      LimitKind::Memory => "memory",
      LimitKind::WallClock => "wall clock",
    })
  }
}

/// Ceilings for one session; 0 means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimitSet {
  max_cpu_seconds: u64,
  max_memory_kb: u64,
  max_wall_clock_seconds: u64,
}

impl LimitSet {
  pub fn new(max_cpu_seconds: u64, max_memory_kb: u64, max_wall_clock_seconds: u64) -> Self {
    Self {
      max_cpu_seconds,
      max_memory_kb,
      max_wall_clock_seconds,
    }
  }

  pub fn cpu_seconds(&self) -> Option<u64> {
    (self.max_cpu_seconds > 0).then_some(self.max_cpu_seconds)
  }

  pub fn memory(&self) -> Option<Memory> {
    (self.max_memory_kb > 0).then(|| Memory::from_kilobytes(self.max_memory_kb))
  }

  pub fn wall_clock(&self) -> Option<Duration> {
    (self.max_wall_clock_seconds > 0).then(|| Duration::from_secs(self.max_wall_clock_seconds))
  }

  /// First ceiling strictly exceeded, checked in the order CPU time, memory,
  /// wall clock.
  pub fn first_breach(&self, usage: &UsageSample, elapsed: Duration) -> Option<LimitKind> {
    if let Some(cpu) = self.cpu_seconds() {
      if usage.cpu_time > Duration::from_secs(cpu) {
        return Some(LimitKind::CpuTime);
      }
    }
    if let Some(memory) = self.memory() {
      if usage.peak_memory > memory {
        return Some(LimitKind::Memory);
      }
    }
    if let Some(wall) = self.wall_clock() {
      if elapsed > wall {
        return Some(LimitKind::WallClock);
      }
    }
    None
  }
}

/// Everything a supervision session needs, resolved from the command line
/// and the settings file
#[derive(Debug, Clone)]
pub struct LimitConfig {
  pub limits: LimitSet,
  pub command: Vec<String>,
  pub poll_interval: Duration,
  pub rlimit_grace_secs: u64,
}

impl LimitConfig {
  pub fn resolve(args: &CliArgs, settings: &Settings) -> Result<Self, ConfigError> {
    if args.command.is_empty() {
      return Err(ConfigError::NoCommand);
    }
    let poll_ms = args.poll_ms.unwrap_or(settings.poll_interval_ms);
    if poll_ms == 0 {
      return Err(ConfigError::ZeroPollInterval);
    }
    Ok(Self {
      limits: LimitSet::new(
        args.cpu.unwrap_or(settings.cpu_seconds),
        args.mem.unwrap_or(settings.memory_kb),
        args.wall.unwrap_or(settings.wall_seconds),
      ),
      command: args.command.clone(),
      poll_interval: Duration::from_millis(poll_ms),
      rlimit_grace_secs: settings.rlimit_grace_secs,
    })
  }

  pub fn program(&self) -> &str {
    &self.command[0]
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::io::Write;

  fn usage(cpu_ms: u64, memory_kb: u64) -> UsageSample {
    UsageSample {
      cpu_time: Duration::from_millis(cpu_ms),
      peak_memory: Memory::from_kilobytes(memory_kb),
    }
  }

  fn args(argv: &[&str]) -> CliArgs {
    CliArgs::parse_from_args(std::iter::once("timedexec").chain(argv.iter().copied())).unwrap()
  }

  #[test]
  fn zero_means_unlimited() {
    let limits = LimitSet::default();
    assert_eq!(limits.cpu_seconds(), None);
    assert_eq!(limits.memory(), None);
    assert_eq!(limits.wall_clock(), None);
    assert_eq!(
      limits.first_breach(&usage(u64::MAX / 2, u64::MAX), Duration::from_secs(1 << 40)),
      None
    );
  }

  #[test]
  fn breach_is_strictly_greater() {
    let limits = LimitSet::new(1, 1024, 2);
    assert_eq!(limits.first_breach(&usage(1000, 1024), Duration::from_secs(2)), None);
    assert_eq!(
      limits.first_breach(&usage(1001, 0), Duration::ZERO),
      Some(LimitKind::CpuTime)
    );
    assert_eq!(
      limits.first_breach(&usage(0, 1025), Duration::ZERO),
      Some(LimitKind::Memory)
    );
    assert_eq!(
      limits.first_breach(&usage(0, 0), Duration::from_millis(2001)),
      Some(LimitKind::WallClock)
    );
  }

  #[test]
  fn breach_order_is_cpu_memory_wall() {
    let limits = LimitSet::new(1, 1, 1);
    let elapsed = Duration::from_secs(5);
    assert_eq!(
      limits.first_breach(&usage(5000, 5), elapsed),
      Some(LimitKind::CpuTime)
    );
    assert_eq!(
      limits.first_breach(&usage(0, 5), elapsed),
      Some(LimitKind::Memory)
    );
  }

  #[test]
  fn breach_messages_name_the_limit() {
    assert!(LimitKind::CpuTime.breach_message().contains("CPU time reached limit"));
    assert!(LimitKind::Memory.breach_message().contains("memory limit"));
    assert!(LimitKind::WallClock.breach_message().contains("wall clock"));
  }

  #[test]
  fn command_line_overrides_settings() {
    let settings = Settings {
      cpu_seconds: 10,
      memory_kb: 2048,
      wall_seconds: 30,
      poll_interval_ms: 50,
      rlimit_grace_secs: 2,
    };
    let config = LimitConfig::resolve(&args(&["-c", "3", "echo", "hi"]), &settings).unwrap();
    assert_eq!(config.limits, LimitSet::new(3, 2048, 30));
    assert_eq!(config.poll_interval, Duration::from_millis(50));
    assert_eq!(config.rlimit_grace_secs, 2);
    assert_eq!(config.program(), "echo");
    assert_eq!(config.command, vec!["echo", "hi"]);

    let config = LimitConfig::resolve(&args(&["--poll-ms", "10", "true"]), &settings).unwrap();
    assert_eq!(config.poll_interval, Duration::from_millis(10));
  }

  #[test]
  fn rejects_empty_command() {
    let mut empty = args(&["-c", "3", "true"]);
    empty.command.clear();
    assert!(matches!(
      LimitConfig::resolve(&empty, &Settings::default()),
      Err(ConfigError::NoCommand)
    ));
  }

  #[test]
  fn rejects_zero_poll_interval() {
    let result = LimitConfig::resolve(&args(&["--poll-ms", "0", "true"]), &Settings::default());
    assert!(matches!(result, Err(ConfigError::ZeroPollInterval)));
  }

  #[test]
  fn reads_settings_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "memory_kb = 4096\npoll_interval_ms = 250").unwrap();
    let settings = Settings::load(Some(file.path())).unwrap();
    assert_eq!(settings.memory_kb, 4096);
    assert_eq!(settings.poll_interval_ms, 250);
    assert_eq!(settings.cpu_seconds, 0);
    assert_eq!(settings.rlimit_grace_secs, 1);
  }

  #[test]
  fn reports_bad_settings_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "memory_kb = \"lots\"").unwrap();
    assert!(matches!(
      Settings::load(Some(file.path())),
      Err(ConfigError::Parse { .. })
    ));

    let missing = file.path().with_extension("missing");
    assert!(matches!(
      Settings::load(Some(&missing)),
      Err(ConfigError::Read { .. })
    ));
  }
}
