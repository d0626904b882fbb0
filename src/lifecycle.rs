//! Termination signal handling and cleanup (spec.md §4.7).
//!
//! A terminate signal resets the modem to a known state and exits. Since
//! the main loop can be blocked inside a modem read when the serial
//! cable is unplugged (and a plain signal cannot interrupt that), the
//! cleanup routine escalates to a process-group kill whenever it finds
//! the daemon mid-read (spec.md §5 "Cancellation", §9).

use std::{
  os::fd::RawFd,
  process, thread,
  sync::atomic::{AtomicBool, AtomicI32, Ordering},
};

use log::{info, warn};
use nix::{
  libc,
  sys::signal::{killpg, Signal},
  unistd::getpgrp,
};
use signal_hook::iterator::Signals;

static MODEM_FD: AtomicI32 = AtomicI32::new(-1);
static IN_BLOCKED_READ: AtomicBool = AtomicBool::new(false);

/// Record the modem's raw fd so cleanup can reset it directly, without
/// needing a thread-safe handle to the whole `ModemTransport`.
pub fn register_modem_fd(fd: RawFd) {
  MODEM_FD.store(fd, Ordering::SeqCst);
}

/// Mark whether the main loop is currently blocked inside a modem read
/// (spec.md §4.7, §5). Called by `ModemTransport::read` around the
/// actual blocking syscall.
pub fn mark_blocked_read(blocked: bool) {
  IN_BLOCKED_READ.store(blocked, Ordering::SeqCst);
}

/// Spawn the background thread that waits for termination signals and
/// runs cleanup (spec.md §4.7, grounded on the teacher's
/// `terminate_poweroff` signal thread).
pub fn spawn_signal_thread() -> Result<(), String> {
  let mut signals =
    Signals::new([libc::SIGTERM, libc::SIGINT, libc::SIGHUP, libc::SIGQUIT])
      .map_err(|e| format!("Signals::new: {}", e))?;
  thread::Builder::new()
    .name("lifecycle".to_string())
    .spawn(move || {
      for _ in signals.forever() {
        cleanup();
      }
    })
    .map_err(|e| format!("Signal-Thread konnte nicht gestartet werden: {}", e))?;
  Ok(())
}

/// Idempotent cleanup: reset the modem if one is registered, then exit.
/// Must tolerate being invoked during any sleep or read (spec.md §5).
fn cleanup() {
  if IN_BLOCKED_READ.load(Ordering::SeqCst) {
    warn!("Beendigung während blockierendem Modem-Read, eskaliere auf Prozessgruppen-Kill");
    let _ = killpg(getpgrp(), Signal::SIGKILL);
    return;
  }

  let fd = MODEM_FD.load(Ordering::SeqCst);
  if fd >= 0 {
    info!("Sende ATZ an Modem vor Beendigung");
    let cmd = b"ATZ\r";
    unsafe {
      libc::write(fd, cmd.as_ptr() as *const libc::c_void, cmd.len());
    }
  }
  process::exit(0);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blocked_read_flag_round_trips() {
    mark_blocked_read(true);
    assert!(IN_BLOCKED_READ.load(Ordering::SeqCst));
    mark_blocked_read(false);
    assert!(!IN_BLOCKED_READ.load(Ordering::SeqCst));
  }
}
