//! Per-call orchestration (spec.md §4.6).
//!
//! Coordinates modem mode switches, caller-ID intake, whitelist/blacklist
//! lookups, the disconnect sequence, and the optional ring-count/DTMF
//! acceptance window. Single-threaded, cooperative, blocking I/O
//! (spec.md §5).

use std::{
  thread,
  time::{Duration, Instant, SystemTime},
};

use log::{error, info, warn};

use crate::{
  calllog::CallLog,
  callerid::{current_year, CallerIdRecord, Utterance},
  config::Config,
  dtmf::{pcm::PcmSource, Detector},
  list_store::{ListStore, MaintenanceHook},
  modem::{at, transport::ModemTransport, transport::ReadMode},
};

/// Inter-ring spacing the ring-count poll tolerates before declaring
/// ringing has stopped (spec.md §4.6 step 6.2: "6s" spacing, "7s" cutoff).
const RING_POLL_TIMEOUT: Duration = Duration::from_secs(7);
const RING_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Ring count at which the DTMF window opens when an answering machine
/// shares the line (spec.md §4.6 step 6.4).
const ANSWERING_MACHINE_RING_COUNT: u32 = 3;
/// DTMF acceptance window duration (spec.md §4.6 step 6.6).
const DTMF_WINDOW: Duration = Duration::from_secs(10);

const DISCONNECT_GAP_SHORT: Duration = Duration::from_millis(300);
const DISCONNECT_GAP_LONG: Duration = Duration::from_secs(1);

/// What happened to one ring/call cycle, for logging and testing. Not a
/// literal state machine enum driving the loop (the procedure in
/// spec.md §4.6 is sequential, not re-entrant), but it names the same
/// outcomes spec.md's states resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
  /// Nothing but a `RING`/echo/empty read this pass; still `IDLE`.
  NothingYet,
  /// Whitelist match, or no list match and the DTMF window closed
  /// without a detection.
  Accepted,
  /// Blacklist match; disconnect sequence was attempted.
  Blocked,
  /// No list match, but the DTMF window saw a `*`-key and a new
  /// blacklist entry was synthesized.
  StarKeyLearned,
}

pub struct CallStateMachine {
  transport: ModemTransport,
  enable_cmd: String,
  whitelist: Option<ListStore>,
  blacklist: ListStore,
  call_log: CallLog,
  config: Config,
  dtmf: Option<(Detector, Box<dyn PcmSource>)>,
  maintenance: Box<dyn MaintenanceHook>,
}

impl CallStateMachine {
  pub fn new(
    transport: ModemTransport, enable_cmd: String, whitelist: Option<ListStore>,
    blacklist: ListStore, call_log: CallLog, config: Config,
    dtmf: Option<(Detector, Box<dyn PcmSource>)>, maintenance: Box<dyn MaintenanceHook>,
  ) -> CallStateMachine {
    CallStateMachine {
      transport,
      enable_cmd,
      whitelist,
      blacklist,
      call_log,
      config,
      dtmf,
      maintenance,
    }
  }

  /// Run forever, handling one ring/call cycle at a time and logging
  /// (rather than propagating) per-call errors so one bad call never
  /// brings the daemon down (spec.md §7).
  pub fn run_forever(&mut self, should_stop: impl Fn() -> bool) {
    while !should_stop() {
      match self.handle_one_cycle() {
        Ok(outcome) => {
          if outcome != CallOutcome::NothingYet {
            info!("Anruf abgeschlossen: {:?}", outcome);
          }
        }
        Err(e) => error!("Fehler im Anrufzyklus: {}", e),
      }
    }
  }

  /// `IDLE` → (caller-ID intake) → decision. Spec.md §4.6 steps 1-3.
  fn handle_one_cycle(&mut self) -> Result<CallOutcome, String> {
    if self.transport.mode() != ReadMode::Blocking {
      self
        .transport
        .switch_mode(ReadMode::Blocking)
        .map_err(|e| format!("switch_mode(Blocking): {}", e))?;
    }

    let raw = self
      .transport
      .read()
      .map_err(|e| format!("Modem-Lesefehler: {}", e))?;
    if raw.is_empty() {
      // spec.md §7: a zero-byte read during a call is discarded, not an
      // error; here it just means nothing arrived this idle window.
      return Ok(CallOutcome::NothingYet);
    }

    match CallerIdRecord::parse(&raw, &self.enable_cmd, current_year()) {
      Utterance::Ring | Utterance::EnableEcho => Ok(CallOutcome::NothingYet),
      Utterance::CallerId(record) => self.process_caller_id(record),
    }
  }

  fn process_caller_id(&mut self, record: CallerIdRecord) -> Result<CallOutcome, String> {
    if let Err(e) = self.call_log.append(&record) {
      warn!("Anrufprotokoll konnte nicht geschrieben werden: {}", e);
    }

    if record.date_mmddyy().is_none() {
      // spec.md §4.6: "Caller-ID parse failures (no DATE = field) abort
      // the current call's list update but allow the run to continue."
      // Grounded in jcblock.c, which returns "accept" from both list
      // scans when the DATE field can't be located.
      error!("DATE-Feld in Caller-ID nicht gefunden, Listenabgleich übersprungen");
      return Ok(CallOutcome::Accepted);
    }

    if let Some(whitelist) = &self.whitelist {
      if whitelist.scan_and_touch(&record).is_match() {
        return Ok(CallOutcome::Accepted);
      }
    }

    if self.blacklist.scan_and_touch(&record).is_match() {
      self.maintenance.on_blacklist_match(SystemTime::now());
      if let Err(e) = self.disconnect_sequence() {
        warn!("Trennsequenz abgebrochen: {}", e);
      }
      return Ok(CallOutcome::Blocked);
    }

    if self.config.dtmf_enabled && self.dtmf.is_some() {
      self.wait_for_user(&record)
    } else {
      Ok(CallOutcome::Accepted)
    }
  }

  /// `WAITING_FOR_USER` (spec.md §4.6 step 6): ring-count poll, then the
  /// optional DTMF acceptance window.
  fn wait_for_user(&mut self, record: &CallerIdRecord) -> Result<CallOutcome, String> {
    let ring_count = self.count_rings()?;

    if self.config.answering_machine_present && ring_count != ANSWERING_MACHINE_RING_COUNT {
      return Ok(CallOutcome::Accepted);
    }

    self.click_cue(&["ATH1\r", "ATH0\r", "ATH1\r"]);

    let detected = self.poll_dtmf_window();

    // Re-issuing ATZ/enable produces the end-of-window cue clicks
    // (spec.md §4.6 step 6.7) and re-arms caller-ID reporting.
    if let Err(e) = at::init_caller_id(&mut self.transport, &self.enable_cmd) {
      warn!("Wiederanmeldung nach DTMF-Fenster fehlgeschlagen: {}", e);
    }

    if detected {
      if let Err(e) = self.blacklist.append_entry(record) {
        error!("*-Taste erkannt, aber Eintrag konnte nicht angehängt werden: {}", e);
        return Ok(CallOutcome::Accepted);
      }
      return Ok(CallOutcome::StarKeyLearned);
    }
    Ok(CallOutcome::Accepted)
  }

  /// Ring-count poll (spec.md §4.6 step 6.1-6.3): switch to polling
  /// mode, count `R` bytes (the start of each `RING`), and return once
  /// `RING_POLL_TIMEOUT` has passed with none.
  fn count_rings(&mut self) -> Result<u32, String> {
    self
      .transport
      .switch_mode(ReadMode::Polling)
      .map_err(|e| format!("switch_mode(Polling): {}", e))?;

    let mut ring_count = 1u32; // the caller-ID already implied one ring
    let mut last_ring_at = Instant::now();
    while last_ring_at.elapsed() < RING_POLL_TIMEOUT {
      match self.transport.read_byte() {
        Ok(Some(b'R')) => {
          ring_count += 1;
          last_ring_at = Instant::now();
        }
        Ok(_) => {}
        Err(e) => warn!("Lesefehler während Klingelzählung: {}", e),
      }
      thread::sleep(RING_POLL_INTERVAL);
    }

    self
      .transport
      .switch_mode(ReadMode::Blocking)
      .map_err(|e| format!("switch_mode(Blocking): {}", e))?;
    Ok(ring_count)
  }

  fn click_cue(&mut self, commands: &[&str]) {
    for cmd in commands {
      if !at::send(&mut self.transport, cmd) {
        warn!("Klick-Kommando '{}' ohne OK beantwortet", cmd.trim_end());
      }
    }
  }

  /// Poll the DTMF detector for up to `DTMF_WINDOW`.
  fn poll_dtmf_window(&mut self) -> bool {
    let Some((detector, source)) = self.dtmf.as_mut() else {
      return false;
    };
    detector.clear_buffer(source.as_mut());
    let start = Instant::now();
    while start.elapsed() < DTMF_WINDOW {
      if detector.poll(source.as_mut()) {
        return true;
      }
    }
    false
  }

  /// Disconnect sequence on a blacklist match (spec.md §4.6 "Disconnect
  /// sequence"). Any `send` failure aborts the whole sequence and leaves
  /// the call unblocked (spec.md §4.6 "Failure handling").
  fn disconnect_sequence(&mut self) -> Result<(), String> {
    self
      .transport
      .pulse_dtr()
      .map_err(|e| format!("DTR-Puls (ohne Caller-ID) fehlgeschlagen: {}", e))?;
    thread::sleep(DISCONNECT_GAP_SHORT);

    require_ok(at::send(&mut self.transport, "ATH1\r"), "ATH1")?;
    thread::sleep(DISCONNECT_GAP_LONG);
    require_ok(at::send(&mut self.transport, "ATH0\r"), "ATH0")?;
    thread::sleep(DISCONNECT_GAP_LONG);

    self
      .transport
      .pulse_dtr()
      .map_err(|e| format!("DTR-Puls (Caller-ID Re-Enable) fehlgeschlagen: {}", e))?;
    at::init_caller_id(&mut self.transport, &self.enable_cmd)
      .map_err(|e| format!("Caller-ID Re-Enable fehlgeschlagen: {}", e))
  }
}

fn require_ok(ok: bool, what: &str) -> Result<(), String> {
  if ok {
    Ok(())
  } else {
    Err(format!("{} ohne 'OK' beantwortet", what))
  }
}
