//! Modem transport and AT command driver (spec.md §4.1, §4.2).

pub mod at;
pub mod transport;

use nix::sys::termios::BaudRate;

/// Bit rate for caller-ID-capable modems (spec.md §4.1).
pub const BAUD_CALLER_ID: BaudRate = BaudRate::B1200;
/// Bit rate used by one hardware variant (spec.md §4.1).
pub const BAUD_FAST_VARIANT: BaudRate = BaudRate::B57600;
