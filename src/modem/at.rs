//! AT command driver (spec.md §4.2).

use std::{thread, time::Duration};

use log::{debug, warn};

use super::transport::ModemTransport;

/// Read attempts before giving up on a response (spec.md §4.2, §5).
const MAX_READ_ATTEMPTS: u32 = 20;
/// Sleep after `ATZ` before the next command (spec.md §4.2 step 2).
const POST_RESET_DELAY: Duration = Duration::from_secs(1);

/// Send `cmd` (must already include the trailing `\r`) and read
/// responses until a line containing `OK` is seen or the read-attempt
/// budget is exhausted. Returns whether `OK` was seen.
pub fn send(transport: &mut ModemTransport, cmd: &str) -> bool {
  if let Err(e) = transport.write_all(cmd.as_bytes()) {
    warn!("AT-Schreibfehler für '{}': {}", cmd.trim_end(), e);
    return false;
  }
  for attempt in 0..MAX_READ_ATTEMPTS {
    match transport.read() {
      Ok(bytes) if !bytes.is_empty() => {
        let text = String::from_utf8_lossy(&bytes);
        debug!("AT-Antwort (Versuch {}): {:?}", attempt, text);
        if text.contains("OK") {
          return true;
        }
      }
      Ok(_) => {}
      Err(e) => {
        warn!("AT-Lesefehler: {}", e);
      }
    }
  }
  warn!(
    "Kein 'OK' nach {} Leseversuchen für '{}'",
    MAX_READ_ATTEMPTS,
    cmd.trim_end()
  );
  false
}

/// Write `cmd` without waiting for a response (spec.md §4.2
/// `send_bare`): used for the `+++` escape sequence and its surrounding
/// guard-time pattern.
pub fn send_bare(transport: &mut ModemTransport, cmd: &str) -> Result<(), String> {
  transport
    .write_all(cmd.as_bytes())
    .map_err(|e| format!("send_bare('{}'): {}", cmd.trim_end(), e))
}

/// Initialization sequence for entering caller-ID-listening state
/// (spec.md §4.2): `ATZ`, a settle delay, then the caller-ID-enable
/// command. Failure of either step is fatal to initialization.
pub fn init_caller_id(transport: &mut ModemTransport, enable_cmd: &str) -> Result<(), String> {
  if !send(transport, "ATZ\r") {
    return Err("ATZ fehlgeschlagen".to_string());
  }
  thread::sleep(POST_RESET_DELAY);
  if !send(transport, enable_cmd) {
    return Err(format!("{} fehlgeschlagen", enable_cmd.trim_end()));
  }
  Ok(())
}
