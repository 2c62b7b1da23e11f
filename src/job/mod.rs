pub mod limit;
pub mod wait;

use std::{
  ffi::{CString, NulError},
  io,
  os::raw::c_char,
  time::{Duration, Instant},
};

use libc::pid_t;
use log::{info, warn};
use thiserror::Error;

use self::{
  limit::Limit,
  wait::{ExitStatus, WaitError},
};

/// Exit status of a child whose `execvp` failed
pub const EXEC_FAILED_STATUS: i32 = 127;

const EXEC_FAILED_MESSAGE: &[u8] = b"timedexec: failed to execute child command\n";

/// Run the program with limitations
pub struct Job {
  command: Vec<String>,
  limits: Vec<Box<dyn Limit + Send>>,
}

#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("no program for child to run")]
  EmptyCommand,
  #[error("command argument contains a nul byte: {0}")]
  InvalidArgument(#[from] NulError),
  #[error("failed to fork child process: {0}")]
  Fork(#[source] io::Error),
}

impl Job {
  /// create a new job without any limitations
  pub fn new(command: Vec<String>) -> Self {
    Self {
      command,
      limits: Vec::new(),
    }
  }
}

// builder
impl Job {
  pub fn limit(mut self, limit: impl Limit + Send + 'static) -> Self {
    self.limits.push(Box::new(limit));
    self
  }
}

impl Job {
  /// Fork and exec the command, returning a handle to the running child.
  ///
  /// Everything the child needs is prepared before `fork`; after it the child
  /// only applies limits, calls `execvp`, and on failure exits with
  /// [`EXEC_FAILED_STATUS`].
  pub fn spawn(self) -> Result<ChildHandle, LaunchError> {
    let args = self
      .command
      .iter()
      .map(|arg| CString::new(arg.as_bytes()))
      .collect::<Result<Vec<_>, _>>()?;
    if args.is_empty() {
      return Err(LaunchError::EmptyCommand);
    }
    let mut argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
    argv.push(std::ptr::null());

    // SAFETY: the child branch only runs async-signal-safe code before exec
    match unsafe { libc::fork() } {
      -1 => Err(LaunchError::Fork(io::Error::last_os_error())),
      0 => unsafe { exec_child(&argv, &self.limits) },
      pid => {
        info!("started child {pid}: {:?}", self.command);
        Ok(ChildHandle {
          pid,
          start_time: Instant::now(),
        })
      }
    }
  }
}

unsafe fn exec_child(argv: &[*const c_char], limits: &[Box<dyn Limit + Send>]) -> ! {
  for limit in limits {
    if limit.apply().is_err() {
      write_stderr(limit.failure_message());
    }
  }
  libc::execvp(argv[0], argv.as_ptr());
  write_stderr(EXEC_FAILED_MESSAGE);
  libc::_exit(EXEC_FAILED_STATUS)
}

fn write_stderr(message: &[u8]) {
  // SAFETY: write(2) is async-signal-safe and the buffer outlives the call
  unsafe {
    libc::write(
      libc::STDERR_FILENO,
      message.as_ptr() as *const libc::c_void,
      message.len(),
    );
  }
}

/// A running child owned by the supervisor
///
/// Consumed by [`ChildHandle::reap`]; otherwise dropped by the supervisor once
/// [`ChildHandle::try_wait`] has reported the exit.
#[derive(Debug)]
pub struct ChildHandle {
  pid: pid_t,
  start_time: Instant,
}

impl ChildHandle {
  pub fn pid(&self) -> pid_t {
    self.pid
  }

  /// wall-clock time since the child was started
  pub fn elapsed(&self) -> Duration {
    self.start_time.elapsed()
  }

  pub fn try_wait(&self) -> Result<Option<ExitStatus>, WaitError> {
    wait::try_wait(self.pid)
  }

  /// Send SIGKILL. A child that is already gone is not an error.
  pub fn kill(&self) -> io::Result<()> {
    // SAFETY: plain syscall on a pid we own
    if unsafe { libc::kill(self.pid, libc::SIGKILL) } == 0 {
      return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
      Some(libc::ESRCH) => Ok(()),
      _ => Err(err),
    }
  }

  /// Kill without propagating failure, for paths that are already failing.
  pub fn kill_best_effort(&self) {
    if let Err(e) = self.kill() {
      warn!("failed to kill child {}: {e}", self.pid);
    }
  }

  /// Handle for a pid this process did not fork
  #[cfg(test)]
  pub(crate) fn detached(pid: pid_t) -> Self {
    Self {
      pid,
      start_time: Instant::now(),
    }
  }

  /// Block (off the async runtime) until the child has been reaped.
  pub async fn reap(self) -> Result<ExitStatus, WaitError> {
    let pid = self.pid;
    tokio::task::spawn_blocking(move || wait::wait(pid)).await?
  }
}
