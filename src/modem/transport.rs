//! Byte-stream transport to the voice modem (spec.md §4.1).
//!
//! Wraps a single serial device handle that can be reconfigured between
//! a blocking, idle-delimited read mode and a nonblocking poll mode, and
//! exposes the DTR-pulse primitive that is the only dependable way to
//! force the modem back into command mode (spec.md §4.1, §9).

use std::{
  io::{self, Read},
  os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
  path::{Path, PathBuf},
  thread,
  time::Duration,
};

use log::{info, warn};
use nix::{
  fcntl::{self, OFlag},
  libc,
  sys::{
    stat::Mode,
    termios::{self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg},
  },
};

use crate::lifecycle;

/// One blocking-mode read returns at most this many bytes, enough to
/// capture one complete modem utterance (spec.md §4.1).
pub const BLOCKING_READ_MAX: usize = 250;
/// Inter-byte idle that ends a blocking read, in deciseconds (VTIME
/// units): spec.md §4.1 "an inter-byte idle has elapsed (~0.1s)".
const BLOCKING_VTIME_DECISECONDS: u8 = 1;
/// How long the DTR pulse stays low (spec.md §4.1: "~250-500ms").
const DTR_PULSE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
  /// A read returns once data is present and the inter-byte idle has
  /// elapsed; at most `BLOCKING_READ_MAX` bytes.
  Blocking,
  /// A read returns immediately with whatever is available (0..N bytes).
  Polling,
}

pub struct ModemTransport {
  path: PathBuf,
  baud: BaudRate,
  fd: OwnedFd,
  mode: ReadMode,
}

impl ModemTransport {
  /// Open the device at `path` at `baud`, 8N1, raw, hardware flow
  /// control, no controlling terminal (spec.md §4.1 "Line parameters"),
  /// starting in `Blocking` mode.
  pub fn open(path: impl AsRef<Path>, baud: BaudRate) -> Result<ModemTransport, String> {
    let path = path.as_ref().to_path_buf();
    let fd = open_device(&path)?;
    let mut transport = ModemTransport {
      path,
      baud,
      fd,
      mode: ReadMode::Blocking,
    };
    transport.configure(ReadMode::Blocking)?;
    Ok(transport)
  }

  pub fn mode(&self) -> ReadMode {
    self.mode
  }

  /// The raw fd backing this transport, for `lifecycle`'s
  /// last-gasp `ATZ` write on termination (spec.md §4.7).
  pub fn raw_fd(&self) -> RawFd {
    self.fd.as_raw_fd()
  }

  fn configure(&mut self, mode: ReadMode) -> Result<(), String> {
    configure_line(self.fd.as_raw_fd(), self.baud, mode)?;
    // The device is opened with `O_NONBLOCK` so `open()` itself can't hang
    // waiting on carrier detect; on a tty that flag also makes the kernel
    // ignore VMIN/VTIME, so it must be cleared again for `Blocking` mode
    // or the configured inter-byte idle timeout never takes effect and
    // every read returns 0 bytes immediately (spec.md §4.1, §5).
    set_nonblocking(self.fd.as_raw_fd(), mode == ReadMode::Polling)?;
    self.mode = mode;
    Ok(())
  }

  /// Switch between blocking and polling mode by closing and reopening
  /// the device (spec.md §4.1: "Mode transitions ... are performed by
  /// closing and reopening the underlying device").
  pub fn switch_mode(&mut self, mode: ReadMode) -> Result<(), String> {
    if self.mode == mode {
      return Ok(());
    }
    let fd = open_device(&self.path)?;
    self.fd = fd;
    let result = self.configure(mode);
    // Re-register with `lifecycle`: the old fd this daemon's cleanup
    // might still reach for is gone now that it's been closed-reopened.
    lifecycle::register_modem_fd(self.fd.as_raw_fd());
    result
  }

  /// Read one utterance. In `Blocking` mode this is a single read of up
  /// to `BLOCKING_READ_MAX` bytes gated by the inter-byte idle timeout;
  /// in `Polling` mode it is a single nonblocking read of whatever is
  /// currently queued.
  pub fn read(&mut self) -> io::Result<Vec<u8>> {
    let blocking = self.mode == ReadMode::Blocking;
    if blocking {
      lifecycle::mark_blocked_read(true);
    }
    let result = self.read_inner();
    if blocking {
      lifecycle::mark_blocked_read(false);
    }
    result
  }

  fn read_inner(&mut self) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; BLOCKING_READ_MAX];
    let fd = self.fd.as_raw_fd();
    let n = loop {
      match unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) } {
        -1 => {
          let err = io::Error::last_os_error();
          if err.kind() == io::ErrorKind::WouldBlock {
            break 0;
          }
          if err.kind() == io::ErrorKind::Interrupted {
            continue;
          }
          return Err(err);
        }
        n => break n as usize,
      }
    };
    buf.truncate(n);
    Ok(buf)
  }

  /// Read a single byte in `Polling` mode, used by the ring-count loop
  /// (spec.md §4.6 step 6.2). Returns `Ok(None)` if nothing is queued.
  pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
    let mut one = [0u8; 1];
    let fd = self.fd.as_raw_fd();
    match unsafe { libc::read(fd, one.as_mut_ptr() as *mut libc::c_void, 1) } {
      -1 => {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
          Ok(None)
        } else {
          Err(err)
        }
      }
      0 => Ok(None),
      _ => Ok(Some(one[0])),
    }
  }

  pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
    let fd = self.fd.as_raw_fd();
    let mut written = 0;
    while written < bytes.len() {
      match unsafe {
        libc::write(
          fd,
          bytes[written..].as_ptr() as *const libc::c_void,
          bytes.len() - written,
        )
      } {
        -1 => {
          let err = io::Error::last_os_error();
          if err.kind() == io::ErrorKind::Interrupted {
            continue;
          }
          return Err(err);
        }
        n => written += n as usize,
      }
    }
    Ok(())
  }

  /// The DTR-pulse primitive (spec.md §4.1 `close_open`): drop DTR,
  /// sleep `DTR_PULSE`, restore it. This is the only reliable way to
  /// return the modem to command mode; a software `+++` escape is not
  /// assumed to work (spec.md §9).
  pub fn pulse_dtr(&mut self) -> Result<(), String> {
    let fd = self.fd.as_raw_fd();
    set_dtr(fd, false).map_err(|e| format!("DTR low fehlgeschlagen: {}", e))?;
    thread::sleep(DTR_PULSE);
    set_dtr(fd, true).map_err(|e| format!("DTR high fehlgeschlagen: {}", e))?;
    info!("DTR-Puls ausgeführt");
    Ok(())
  }
}

fn open_device(path: &Path) -> Result<OwnedFd, String> {
  let flags = OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK;
  fcntl::open(path, flags, Mode::empty())
    .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
    .map_err(|e| format!("open({}) fehlgeschlagen: {}", path.display(), e))
}

fn configure_line(fd: RawFd, baud: BaudRate, mode: ReadMode) -> Result<(), String> {
  let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd) };
  let mut tio = termios::tcgetattr(borrowed).map_err(|e| format!("tcgetattr: {}", e))?;

  // Raw mode: no canonical processing, no echo, no signal interpretation
  // (spec.md §4.1 "Line parameters").
  tio.input_flags = InputFlags::empty();
  tio.output_flags = OutputFlags::empty();
  tio.local_flags = LocalFlags::empty();
  tio.control_flags =
    ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CRTSCTS | ControlFlags::HUPCL;

  termios::cfsetspeed(&mut tio, baud).map_err(|e| format!("cfsetspeed: {}", e))?;

  match mode {
    ReadMode::Blocking => {
      tio.control_chars[termios::SpecialCharacterIndices::VMIN as usize] = 0;
      tio.control_chars[termios::SpecialCharacterIndices::VTIME as usize] =
        BLOCKING_VTIME_DECISECONDS;
    }
    ReadMode::Polling => {
      tio.control_chars[termios::SpecialCharacterIndices::VMIN as usize] = 0;
      tio.control_chars[termios::SpecialCharacterIndices::VTIME as usize] = 0;
    }
  }

  termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| format!("tcsetattr: {}", e))
}

/// Set or clear `O_NONBLOCK` on an already-open fd (spec.md §4.1: mode
/// transitions toggle this, not just VMIN/VTIME).
fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<(), String> {
  let current = fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFL)
    .map_err(|e| format!("fcntl(F_GETFL): {}", e))?;
  let mut flags = OFlag::from_bits_truncate(current);
  flags.set(OFlag::O_NONBLOCK, nonblocking);
  fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFL(flags))
    .map_err(|e| format!("fcntl(F_SETFL): {}", e))?;
  Ok(())
}

fn set_dtr(fd: RawFd, on: bool) -> nix::Result<()> {
  let mut bits: libc::c_int = libc::TIOCM_DTR;
  let request = if on { libc::TIOCMBIS } else { libc::TIOCMBIC };
  let res = unsafe { libc::ioctl(fd, request as _, &mut bits as *mut libc::c_int) };
  if res < 0 {
    return Err(nix::Error::last());
  }
  Ok(())
}

impl Drop for ModemTransport {
  fn drop(&mut self) {
    if let Err(e) = set_dtr(self.fd.as_raw_fd(), false) {
      warn!("DTR konnte beim Schliessen nicht zurückgesetzt werden: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blocking_read_max_matches_spec() {
    assert_eq!(BLOCKING_READ_MAX, 250);
  }
}
