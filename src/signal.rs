//! Operator signals relayed to the supervisor.
//!
//! SIGTSTP pauses the monitor, SIGCONT resumes it and SIGINT asks it to stop.
//! None of them touch the child: the relay only flips atomics on a shared
//! [`Control`] and wakes the supervisor, which stays the only component that
//! ever signals the child.

use std::{
  io,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use log::{debug, info};
use tokio::{
  signal::unix::{signal, Signal, SignalKind},
  sync::Notify,
};

/// State shared between the signal relay (writer) and the supervisor (reader)
#[derive(Debug, Default)]
pub struct Control {
  paused: AtomicBool,
  interrupted: AtomicBool,
  wake: Notify,
}

impl Control {
  pub fn is_paused(&self) -> bool {
    self.paused.load(Ordering::SeqCst)
  }

  pub fn is_interrupted(&self) -> bool {
    self.interrupted.load(Ordering::SeqCst)
  }

  pub fn request_pause(&self) {
    self.paused.store(true, Ordering::SeqCst);
    self.wake.notify_one();
  }

  /// Clear the pause flag; returns whether the monitor was paused.
  pub fn request_resume(&self) -> bool {
    let was_paused = self.paused.swap(false, Ordering::SeqCst);
    self.wake.notify_one();
    was_paused
  }

  pub fn request_interrupt(&self) {
    self.interrupted.store(true, Ordering::SeqCst);
    self.wake.notify_one();
  }

  /// Suspend until the relay reports any signal.
  ///
  /// A notification sent while nobody was waiting is kept, so a wake-up can
  /// be stale; callers re-check the flags afterwards.
  pub async fn wait_for_signal(&self) {
    self.wake.notified().await
  }
}

const INTERRUPT_NOTICE: &str = "Signal - exiting on SIGINT";

fn relay(mut stream: Signal, name: &'static str, action: impl Fn() + Send + 'static) {
  tokio::spawn(async move {
    while stream.recv().await.is_some() {
      debug!("received {name}");
      action();
    }
  });
}

/// Install the SIGINT, SIGTSTP and SIGCONT relays for the rest of the process.
///
/// Must be called from inside a tokio runtime.
pub fn install(control: Arc<Control>) -> io::Result<()> {
  let interrupt = signal(SignalKind::interrupt())?;
  let suspend = signal(SignalKind::from_raw(libc::SIGTSTP))?;
  let resume = signal(SignalKind::from_raw(libc::SIGCONT))?;

  let on_interrupt = control.clone();
  relay(interrupt, "SIGINT", move || {
    println!("\n{INTERRUPT_NOTICE}");
    on_interrupt.request_interrupt();
  });

  let on_suspend = control.clone();
  relay(suspend, "SIGTSTP", move || {
    println!("\nSignal - pausing monitor. Use 'fg' or send SIGCONT to resume.");
    on_suspend.request_pause();
  });

  // the supervisor prints the resume notice once it is back to Running
  relay(resume, "SIGCONT", move || {
    if !control.request_resume() {
      debug!("SIGCONT while not paused");
    }
  });

  info!("signal relay installed");
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use std::time::Duration;

  async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
      if condition() {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
  }

  #[test]
  fn pause_flag_is_level_triggered() {
    let control = Control::default();
    assert!(!control.is_paused());
    control.request_pause();
    control.request_pause();
    assert!(control.is_paused());
    assert!(control.request_resume());
    assert!(!control.is_paused());
    assert!(!control.request_resume());
    assert!(!control.is_interrupted());
  }

  #[test]
  fn interrupt_notice_names_the_signal() {
    assert_eq!(INTERRUPT_NOTICE, "Signal - exiting on SIGINT");
  }

  #[tokio::test]
  async fn wake_is_not_lost_before_waiting() {
    let control = Control::default();
    control.request_pause();
    // the notification was sent before anyone waited; this must not hang
    tokio::time::timeout(Duration::from_secs(1), control.wait_for_signal())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn relays_job_control_signals() {
    let control = Arc::new(Control::default());
    install(control.clone()).unwrap();

    // SAFETY: raise only queues a signal we now handle
    unsafe { libc::raise(libc::SIGTSTP) };
    assert!(eventually(|| control.is_paused()).await);

    unsafe { libc::raise(libc::SIGCONT) };
    assert!(eventually(|| !control.is_paused()).await);
    assert!(!control.is_interrupted());
  }
}
