use std::time::Duration;

use libc::pid_t;
use serde_derive::Serialize;

use crate::{
  config::{LimitKind, LimitSet},
  job::wait::ExitStatus,
  usage::UsageSample,
  utils::Memory,
};

/// Why supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
  /// the child exited on its own (any status, including 127)
  Exited,
  /// the supervisor killed the child for crossing a ceiling
  LimitBreach(LimitKind),
  /// the operator sent SIGINT
  Interrupted,
}

impl Cause {
  fn name(self) -> &'static str {
    match self {
      Cause::Exited => "exited",
      Cause::LimitBreach(_) => "limit_breach",
      Cause::Interrupted => "interrupted",
    }
  }
}

/// Outcome of one supervision session
#[derive(Debug)]
pub struct Report {
  pub pid: pid_t,
  pub status: ExitStatus,
  pub cause: Cause,
  pub limits: LimitSet,
  pub usage: UsageSample,
  pub wall_time: Duration,
}

#[derive(Debug, Serialize)]
pub struct Summary {
  pub pid: pid_t,
  pub cause: &'static str,
  pub limit: Option<LimitKind>,
  pub exit_code: Option<i32>,
  pub signal: Option<i32>,
  pub peak_memory_kb: Memory,
  pub cpu_time_ms: u64,
  pub wall_time_ms: u64,
  pub limits: LimitSet,
}

impl Report {
  pub fn summary(&self) -> Summary {
    Summary {
      pid: self.pid,
      cause: self.cause.name(),
      limit: match self.cause {
        Cause::LimitBreach(kind) => Some(kind),
        _ => None,
      },
      exit_code: self.status.exit_code(),
      signal: self.status.signal_code(),
      peak_memory_kb: self.usage.peak_memory,
      cpu_time_ms: self.usage.cpu_time.as_millis() as u64,
      wall_time_ms: self.wall_time.as_millis() as u64,
      limits: self.limits,
    }
  }

  /// Human-readable summary block
  pub fn render(&self) -> String {
    let mut out = String::from("\nExecution finished\n\nSummary statistics:\n");
    out.push_str(&format!("Max memory (Peak RSS): {}\n", self.usage.peak_memory));
    out.push_str(&format!(
      "CPU time: {:.3} sec\n",
      self.usage.cpu_time.as_secs_f64()
    ));
    out.push_str(&format!(
      "Wall clock time: {:.3} sec\n",
      self.wall_time.as_secs_f64()
    ));
    if let Cause::LimitBreach(kind) = self.cause {
      out.push_str(&format!("Terminated for exceeding the {kind} limit\n"));
    }
    out
  }

  pub fn print(&self, json: bool) -> serde_json::Result<()> {
    if json {
      println!("{}", serde_json::to_string(&self.summary())?);
    } else {
      print!("{}", self.render());
    }
    Ok(())
  }

  /// Exit status for timedexec itself; the child's own status is only reported
  pub fn exit_code(&self) -> i32 {
    match self.cause {
      Cause::Interrupted => 130,
      _ => 0,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::job::{wait, Job};

  fn report(cause: Cause) -> Report {
    let child = Job::new(vec!["true".to_string()]).spawn().unwrap();
    let status = wait::wait(child.pid()).unwrap();
    Report {
      pid: child.pid(),
      status,
      cause,
      limits: LimitSet::new(0, 1024, 0),
      usage: UsageSample {
        cpu_time: Duration::from_millis(1500),
        peak_memory: Memory::from_kilobytes(2048),
      },
      wall_time: Duration::from_millis(2250),
    }
  }

  #[test]
  fn renders_text_summary() {
    let text = report(Cause::LimitBreach(LimitKind::Memory)).render();
    assert!(text.contains("Max memory (Peak RSS): 2048 KB"));
    assert!(text.contains("CPU time: 1.500 sec"));
    assert!(text.contains("Wall clock time: 2.250 sec"));
    assert!(text.contains("exceeding the memory limit"));

    let text = report(Cause::Exited).render();
    assert!(!text.contains("exceeding"));
  }

  #[test]
  fn serializes_json_summary() {
    let value = serde_json::to_value(report(Cause::LimitBreach(LimitKind::CpuTime)).summary()).unwrap();
    assert_eq!(value["cause"], "limit_breach");
    assert_eq!(value["limit"], "cpu_time");
    assert_eq!(value["exit_code"], 0);
    assert_eq!(value["signal"], serde_json::Value::Null);
    assert_eq!(value["peak_memory_kb"], 2048);
    assert_eq!(value["cpu_time_ms"], 1500);
    assert_eq!(value["limits"]["max_memory_kb"], 1024);
  }

  #[test]
  fn interrupt_exits_130() {
    assert_eq!(report(Cause::Interrupted).exit_code(), 130);
    assert_eq!(report(Cause::Exited).exit_code(), 0);
    assert_eq!(report(Cause::LimitBreach(LimitKind::WallClock)).exit_code(), 0);
  }
}
