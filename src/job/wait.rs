use std::{fmt, io};

use libc::pid_t;
use log::debug;
use thiserror::Error;
use tokio::task::JoinError;

use crate::usage::Rusage;

/// The exit status and resource usage of a reaped child
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
  rusage: Rusage,
  code: i32,
}

#[derive(Error, Debug)]
pub enum WaitError {
  /// `wait4` was interrupted by a signal; the caller should simply retry
  #[error("wait4 was interrupted by a signal")]
  Interrupted,
  #[error("libc::wait4 failed: {0}")]
  Wait4Failed(#[source] io::Error),
  #[error("tokio::task::spawn_blocking error: `{0}`")]
  JoinError(#[from] JoinError),
}

fn wait4(pid: pid_t, options: i32) -> Result<Option<ExitStatus>, WaitError> {
  let mut status: i32 = 0;
  // SAFETY: rusage is plain old data and the kernel only writes into it
  let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
  let code = unsafe { libc::wait4(pid, &mut status, options, &mut rusage) };

  match code {
    0 => Ok(None),
    code if code < 0 => {
      let err = io::Error::last_os_error();
      if err.kind() == io::ErrorKind::Interrupted {
        Err(WaitError::Interrupted)
      } else {
        Err(WaitError::Wait4Failed(err))
      }
    }
    _ => Ok(Some(ExitStatus {
      rusage: Rusage::from(rusage),
      code: status,
    })),
  }
}

/// Check whether `pid` has exited without suspending the caller.
///
/// Returns `Ok(None)` while the child is still running.
pub fn try_wait(pid: pid_t) -> Result<Option<ExitStatus>, WaitError> {
  wait4(pid, libc::WNOHANG)
}

/// Block until `pid` exits, retrying when a signal interrupts the call.
pub fn wait(pid: pid_t) -> Result<ExitStatus, WaitError> {
  loop {
    match wait4(pid, 0) {
      Ok(Some(status)) => return Ok(status),
      // only WNOHANG reports a running child
      Ok(None) => continue,
      Err(WaitError::Interrupted) => continue,
      Err(e) => return Err(e),
    }
  }
}

impl ExitStatus {
  pub fn is_signal(&self) -> bool {
    libc::WIFSIGNALED(self.code)
  }

  pub fn signal_code(&self) -> Option<i32> {
    if self.is_signal() {
      Some(libc::WTERMSIG(self.code))
    } else {
      None
    }
  }

  pub fn is_exited(&self) -> bool {
    libc::WIFEXITED(self.code)
  }

  pub fn exit_code(&self) -> Option<i32> {
    match self.is_exited() {
      true => Some(libc::WEXITSTATUS(self.code)),
      false => None,
    }
  }

  pub fn rusage(&self) -> &Rusage {
    &self.rusage
  }

  /// debug informations
  pub fn debug(&self) {
    debug!("is_signal: {}", self.is_signal());
    debug!("signal_code: {:?}", self.signal_code());
    debug!("is_exited: {}", self.is_exited());
    debug!("exit_code: {:?}", self.exit_code());
    debug!("time: {:?}", self.rusage.cputime());
    debug!("memory: {}", self.rusage.memory());
  }
}

impl fmt::Display for ExitStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.exit_code(), self.signal_code()) {
      (Some(code), _) => write!(f, "finished normally with status {code}"),
      (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
      (None, None) => write!(f, "ended with raw wait status {:#x}", self.code),
    }
  }
}
