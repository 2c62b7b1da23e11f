use std::time::Duration;

use crate::utils::Memory;

/// Kernel-reported resource usage of a reaped child, as filled in by `wait4`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rusage {
  user: Duration,
  system: Duration,
  max_rss: Memory,
}

impl Rusage {
  /// get user + system cpu time
  pub fn cputime(&self) -> Duration {
    self.user + self.system
  }

  /// get max resident memory
  pub fn memory(&self) -> Memory {
    self.max_rss
  }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
  Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

impl From<libc::rusage> for Rusage {
  fn from(a: libc::rusage) -> Self {
    Rusage {
      user: timeval_to_duration(a.ru_utime),
      system: timeval_to_duration(a.ru_stime),
      max_rss: Memory::from_kilobytes(a.ru_maxrss.max(0) as u64),
    }
  }
}

/// Running usage totals for one supervision session.
///
/// Both fields only ever move up: a lower sample (for example the zero read
/// from a process that has just exited) never replaces a higher one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSample {
  pub cpu_time: Duration,
  pub peak_memory: Memory,
}

impl UsageSample {
  pub fn observe_memory(&mut self, memory: Memory) {
    self.peak_memory = self.peak_memory.max(memory);
  }

  pub fn observe_cpu(&mut self, cpu_time: Duration) {
    self.cpu_time = self.cpu_time.max(cpu_time);
  }

  /// Fold in the final numbers the kernel reported at exit.
  pub fn fold_rusage(&mut self, rusage: &Rusage) {
    self.observe_memory(rusage.memory());
    self.observe_cpu(rusage.cputime());
  }
}
