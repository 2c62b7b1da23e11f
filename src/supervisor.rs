use std::{sync::Arc, time::Duration};

use libc::pid_t;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
  config::{LimitKind, LimitSet},
  job::{
    wait::{ExitStatus, WaitError},
    ChildHandle,
  },
  procfs,
  report::{Cause, Report},
  signal::Control,
  usage::UsageSample,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Running,
  Paused,
  Terminated,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error("failed to wait for child {pid}: {source}")]
  Wait { pid: pid_t, source: WaitError },
}

/// Polls one child until it exits, killing it when a ceiling is crossed
pub struct Supervisor {
  limits: LimitSet,
  poll_interval: Duration,
  control: Arc<Control>,
}

fn transition(state: &mut State, next: State) {
  if *state != next {
    debug!("supervisor: {:?} -> {:?}", state, next);
    *state = next;
  }
}

impl Supervisor {
  pub fn new(limits: LimitSet, poll_interval: Duration, control: Arc<Control>) -> Self {
    Self {
      limits,
      poll_interval,
      control,
    }
  }

  /// Supervise `child` until it has been reaped.
  ///
  /// The only normal way out is observing the child's exit. A wait failure
  /// other than EINTR kills the child and is returned as an error.
  pub async fn run(&self, child: ChildHandle) -> Result<Report, SupervisorError> {
    let pid = child.pid();
    let mut state = State::Running;
    let mut usage = UsageSample::default();
    let mut breach: Option<LimitKind> = None;

    let status = loop {
      if self.control.is_interrupted() {
        return self.interrupt(child, usage).await;
      }

      match child.try_wait() {
        Err(WaitError::Interrupted) => continue,
        Err(source) => {
          child.kill_best_effort();
          return Err(SupervisorError::Wait { pid, source });
        }
        Ok(Some(status)) => {
          usage.fold_rusage(status.rusage());
          transition(&mut state, State::Terminated);
          break status;
        }
        Ok(None) => {}
      }

      if self.control.is_paused() {
        transition(&mut state, State::Paused);
        info!("monitoring of child {pid} paused");
        while self.control.is_paused() && !self.control.is_interrupted() {
          self.control.wait_for_signal().await;
        }
        if !self.control.is_interrupted() {
          println!("Signal - resuming monitor.");
          info!("monitoring of child {pid} resumed");
        }
        transition(&mut state, State::Running);
        continue;
      }

      usage.observe_memory(procfs::resident_memory(pid));
      usage.observe_cpu(procfs::cpu_time(pid));
      let elapsed = child.elapsed();
      debug!(
        "child {pid}: cpu {:?}, peak {}, threads {:?}, elapsed {:?}",
        usage.cpu_time,
        usage.peak_memory,
        procfs::thread_count(pid),
        elapsed
      );

      // once killed, wait for the exit instead of killing again
      if breach.is_none() {
        if let Some(kind) = self.limits.first_breach(&usage, elapsed) {
          println!("Parent process: {}", kind.breach_message());
          warn!("child {pid} exceeded its {kind} limit");
          child.kill_best_effort();
          breach = Some(kind);
        }
      }

      tokio::time::sleep(self.poll_interval).await;
    };

    debug_assert_eq!(state, State::Terminated);
    Ok(self.finish(child, status, usage, breach.map_or(Cause::Exited, Cause::LimitBreach)))
  }

  async fn interrupt(
    &self,
    child: ChildHandle,
    mut usage: UsageSample,
  ) -> Result<Report, SupervisorError> {
    let pid = child.pid();
    println!("Parent process: interrupted, terminating child {pid}.");
    child.kill_best_effort();
    let elapsed = child.elapsed();
    let status = child
      .reap()
      .await
      .map_err(|source| SupervisorError::Wait { pid, source })?;
    usage.fold_rusage(status.rusage());
    Ok(Report {
      pid,
      status,
      cause: Cause::Interrupted,
      limits: self.limits,
      usage,
      wall_time: elapsed,
    })
  }

  fn finish(
    &self,
    child: ChildHandle,
    status: ExitStatus,
    usage: UsageSample,
    cause: Cause,
  ) -> Report {
    let pid = child.pid();
    status.debug();
    if status.is_exited() {
      println!("Back to parent - child {status}");
    } else {
      println!("Parent process: child {status}");
    }
    info!("child {pid} {status}");
    Report {
      pid,
      status,
      cause,
      limits: self.limits,
      usage,
      wall_time: child.elapsed(),
    }
  }
}
