use rlimit::{setrlimit, Resource};

use super::Limit;

/// Use `setrlimit` to have the kernel enforce a hard CPU-time quota
///
/// The soft limit sits `grace` seconds above the ceiling so the supervisor,
/// which measures CPU time with sub-second precision, reports the breach
/// itself. The kernel only steps in (SIGXCPU, then SIGKILL one second later at
/// the hard limit) when polling has fallen behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRLimit {
  soft: u64,
  hard: u64,
}

impl CpuRLimit {
  pub fn new(seconds: u64, grace: u64) -> Self {
    let soft = seconds.saturating_add(grace);
    Self {
      soft,
      hard: soft.saturating_add(1),
    }
  }

  pub fn soft(&self) -> u64 {
    self.soft
  }

  pub fn hard(&self) -> u64 {
    self.hard
  }
}

impl Limit for CpuRLimit {
  fn apply(&self) -> std::io::Result<()> {
    setrlimit(Resource::CPU, self.soft, self.hard)
  }

  fn failure_message(&self) -> &'static [u8] {
    b"timedexec: warning: failed to set RLIMIT_CPU on child, relying on polling only\n"
  }
}
