//! Whitelist and blacklist file store (spec.md §4.4).
//!
//! Both lists use the same fixed-column line format and the same
//! close-reopen-scan-touch discipline; they differ only in what an I/O
//! error during the scan should be read as (spec.md §7, §9
//! "Return-value overload").

use std::{
  fs::OpenOptions,
  io::{Read, Seek, SeekFrom, Write},
  path::{Path, PathBuf},
};

use log::{error, warn};

use crate::callerid::CallerIdRecord;

/// Byte offset of the `?` terminator, must not exceed this.
const MAX_TOKEN_OFFSET: usize = 18;
/// Byte offset where the six-digit last-match date starts.
const DATE_FIELD_OFFSET: usize = 19;
const DATE_FIELD_LEN: usize = 6;
/// Minimum total line length (must be able to hold the date field).
const MIN_LINE_LEN: usize = 26;

/// Offset of the date field in a freshly-appended `*`-key entry
/// (spec.md §4.4 `append_entry`: "offset 20..25").
const APPEND_DATE_OFFSET: usize = 20;
const APPEND_DESCRIPTOR_OFFSET: usize = 34;
const APPEND_RECORD_LEN: usize = 80;
const APPEND_DESCRIPTOR: &[u8] = b"*-KEY ENTRY";

/// What an out-of-band I/O error should resolve to for this particular
/// list. The whitelist biases toward accepting the call (match); the
/// blacklist biases toward accepting the call by the opposite route (no
/// match) — both favor false-negatives over false-positives (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBias {
  TreatAsMatch,
  TreatAsNoMatch,
}

/// Why `scan_and_touch` returned what it did, for logging and testing;
/// the public `bool` the state machine sees already folds this down per
/// spec.md §9's documented overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
  Match,
  NoMatch,
  IoErrorTreatedAsMatch,
  IoErrorTreatedAsNoMatch,
}

impl ScanResult {
  pub fn is_match(self) -> bool {
    matches!(self, ScanResult::Match | ScanResult::IoErrorTreatedAsMatch)
  }
}

pub struct ListStore {
  path: PathBuf,
  bias: ErrorBias,
  /// Used only in log lines ("whitelist"/"blacklist").
  label: &'static str,
}

impl ListStore {
  pub fn new(path: impl Into<PathBuf>, bias: ErrorBias, label: &'static str) -> ListStore {
    ListStore {
      path: path.into(),
      bias,
      label,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_error_result(&self) -> ScanResult {
    match self.bias {
      ErrorBias::TreatAsMatch => ScanResult::IoErrorTreatedAsMatch,
      ErrorBias::TreatAsNoMatch => ScanResult::IoErrorTreatedAsNoMatch,
    }
  }

  /// Close-reopen-scan-touch (spec.md §4.4 `scan_and_touch`). Reopening
  /// on every call is a hard requirement, not an artifact: it observes
  /// concurrent edits by a human operator and clears any stale write
  /// position (spec.md §3 "Ownership & lifecycle", §9).
  pub fn scan_and_touch(&self, record: &CallerIdRecord) -> ScanResult {
    let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
      Ok(f) => f,
      Err(e) => {
        error!(
          "{}: konnte {} nicht öffnen: {}",
          self.label,
          self.path.display(),
          e
        );
        return self.io_error_result();
      }
    };
    let mut content = Vec::new();
    if let Err(e) = file.read_to_end(&mut content) {
      error!("{}: Lesefehler {}: {}", self.label, self.path.display(), e);
      return self.io_error_result();
    }

    let mut pos = 0usize;
    while pos < content.len() {
      let line_end = content[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| pos + i)
        .unwrap_or(content.len());
      let line = &content[pos..line_end];
      let line_start = pos;
      pos = if line_end < content.len() {
        line_end + 1
      } else {
        content.len()
      };

      if line.is_empty() || line[0] == b'#' {
        continue;
      }
      if line.len() < MIN_LINE_LEN {
        warn!(
          "{}: Zeile zu kurz (< {} Bytes), übersprungen: {}",
          self.label,
          MIN_LINE_LEN,
          String::from_utf8_lossy(line)
        );
        continue;
      }
      let Some(q_pos) = line.iter().position(|&b| b == b'?') else {
        warn!(
          "{}: kein '?'-Terminator gefunden, übersprungen: {}",
          self.label,
          String::from_utf8_lossy(line)
        );
        continue;
      };
      if q_pos > MAX_TOKEN_OFFSET {
        warn!(
          "{}: '?'-Terminator jenseits Offset {}, übersprungen: {}",
          self.label,
          MAX_TOKEN_OFFSET,
          String::from_utf8_lossy(line)
        );
        continue;
      }
      let token = String::from_utf8_lossy(&line[..q_pos]);
      if !record.as_str().contains(token.as_ref()) {
        continue;
      }

      // Match. Update the last-match date in place, without changing
      // the line's length.
      let Some(date) = record.date_mmddyy() else {
        warn!(
          "{}: Treffer, aber Caller-ID hat kein DATE-Feld; Datum wird nicht aktualisiert",
          self.label
        );
        return ScanResult::Match;
      };
      if let Err(e) = self.write_date(&mut file, line_start, &date) {
        error!(
          "{}: Datum konnte nicht geschrieben werden: {}",
          self.label, e
        );
        // The match itself already stands; only the housekeeping
        // write failed.
      }
      return ScanResult::Match;
    }
    ScanResult::NoMatch
  }

  fn write_date(
    &self, file: &mut std::fs::File, line_start: usize, date: &[u8; DATE_FIELD_LEN],
  ) -> std::io::Result<()> {
    file.seek(SeekFrom::Start((line_start + DATE_FIELD_OFFSET) as u64))?;
    file.write_all(date)?;
    file.flush()?;
    file.sync_all()
  }

  /// Append a new blacklist entry synthesized from the current call's
  /// caller-ID record (spec.md §4.4 `append_entry`, the `*`-key feature).
  /// Intended for the blacklist instance only.
  pub fn append_entry(&self, record: &CallerIdRecord) -> Result<(), String> {
    let date = record
      .date_mmddyy()
      .ok_or_else(|| "caller-ID record has no DATE field".to_string())?;

    let name = record.name_field().unwrap_or("");
    // A generic carrier label would over-match every cell call from the
    // region; fall back to the number (spec.md §4.4, §8 "Cell Phone guard").
    let token = if name.starts_with("Cell Phone") {
      record.nmbr_field().unwrap_or("")
    } else {
      name
    };
    if token.is_empty() {
      return Err("no usable NAME/NMBR field to build a match token from".to_string());
    }

    let mut line = Vec::with_capacity(APPEND_RECORD_LEN);
    line.push(b'\n');
    line.extend_from_slice(token.as_bytes());
    line.push(b'?');
    line.resize(APPEND_DATE_OFFSET, b' ');
    line.extend_from_slice(&date);
    line.resize(APPEND_DESCRIPTOR_OFFSET, b' ');
    line.extend_from_slice(APPEND_DESCRIPTOR);
    line.resize(line.len().max(APPEND_RECORD_LEN), b' ');

    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&self.path)
      .map_err(|e| format!("konnte {} nicht öffnen: {}", self.path.display(), e))?;
    let len = file
      .metadata()
      .map_err(|e| format!("stat {} fehlgeschlagen: {}", self.path.display(), e))?
      .len();

    // Some editors leave a trailing newline on save, others don't; make
    // the append idempotent either way by overwriting an existing
    // trailing '\n' with the new record's own leading '\n' (spec.md
    // §4.4, §8 "Append newline-idempotence").
    let ends_in_newline = if len > 0 {
      let mut last = [0u8; 1];
      file
        .seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| format!("Lesefehler am Dateiende: {}", e))?;
      last[0] == b'\n'
    } else {
      false
    };
    let seek_pos = if ends_in_newline { len - 1 } else { len };
    file
      .seek(SeekFrom::Start(seek_pos))
      .map_err(|e| format!("seek fehlgeschlagen: {}", e))?;
    file
      .write_all(&line)
      .map_err(|e| format!("Schreibfehler: {}", e))?;
    file.flush().map_err(|e| e.to_string())?;
    file.sync_all().map_err(|e| e.to_string())?;
    Ok(())
  }
}

/// Pluggable age/interval-based truncation trigger (spec.md §4.4
/// `maintenance_sweep`, an external collaborator the core only consumes).
/// The actual truncation logic is out of THE CORE's scope (spec.md §1);
/// this only implements the documented trigger rule so a collaborator can
/// be wired in without the state machine knowing the policy.
pub trait MaintenanceHook {
  /// Called once after every blacklist match (spec.md §4.6 step 5).
  fn on_blacklist_match(&mut self, now: std::time::SystemTime);
}

/// Does nothing; used when no sweep collaborator is configured.
pub struct NoopMaintenanceHook;

impl MaintenanceHook for NoopMaintenanceHook {
  fn on_blacklist_match(&mut self, _now: std::time::SystemTime) {}
}

/// Pure trigger rule: a sweep is due once `min_interval` has elapsed
/// since the last run (spec.md §4.4: "based on elapsed wall time ...
/// (>= 30 days)").
pub fn sweep_due(
  last_run: Option<std::time::SystemTime>, now: std::time::SystemTime,
  min_interval: std::time::Duration,
) -> bool {
  match last_run {
    None => true,
    Some(last) => now.duration_since(last).unwrap_or_default() >= min_interval,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{io::Write as _, time::Duration};
  use tempfile::NamedTempFile;

  fn rec(date: &str, nmbr: &str, name: &str) -> CallerIdRecord {
    CallerIdRecord::from_normalized(format!(
      "DATE = {date}-TIME = 1030-NMBR = {nmbr}-NAME = {name}-\n"
    ))
  }

  #[test]
  fn whitelist_accept_updates_date() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "FRIEND NAME ? 010100 trusted").unwrap();
    f.flush().unwrap();
    let store = ListStore::new(f.path(), ErrorBias::TreatAsMatch, "whitelist");
    let record = rec("011526", "5551234", "FRIEND NAME");
    let result = store.scan_and_touch(&record);
    assert_eq!(result, ScanResult::Match);

    let content = std::fs::read_to_string(f.path()).unwrap();
    assert!(content.starts_with("FRIEND NAME ? 011526 trusted"));
  }

  #[test]
  fn malformed_entry_is_skipped_but_later_lines_still_scanned() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "NO QUESTION MARK HERE AT ALL").unwrap();
    writeln!(f, "TELEMARKETER ? 010100 source").unwrap();
    f.flush().unwrap();
    let store = ListStore::new(f.path(), ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "5551234", "TELEMARKETER");
    assert_eq!(store.scan_and_touch(&record), ScanResult::Match);
  }

  #[test]
  fn comment_and_blank_lines_are_never_touched() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "# a comment with ? in it").unwrap();
    writeln!(f).unwrap();
    writeln!(f, "TELEMARKETER ? 010100 source").unwrap();
    f.flush().unwrap();
    let before = std::fs::read_to_string(f.path()).unwrap();
    let store = ListStore::new(f.path(), ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "5551234", "NOBODY MATCHES");
    assert_eq!(store.scan_and_touch(&record), ScanResult::NoMatch);
    let after = std::fs::read_to_string(f.path()).unwrap();
    assert_eq!(before, after);
  }

  #[test]
  fn io_error_bias_whitelist_is_match() {
    let store = ListStore::new("/nonexistent/whitelist.dat", ErrorBias::TreatAsMatch, "whitelist");
    let record = rec("011526", "5551234", "ANYONE");
    assert_eq!(store.scan_and_touch(&record), ScanResult::IoErrorTreatedAsMatch);
  }

  #[test]
  fn io_error_bias_blacklist_is_no_match() {
    let store = ListStore::new("/nonexistent/blacklist.dat", ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "5551234", "ANYONE");
    assert_eq!(
      store.scan_and_touch(&record),
      ScanResult::IoErrorTreatedAsNoMatch
    );
  }

  #[test]
  fn append_entry_cell_phone_guard_uses_nmbr() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "SOMEONE ELSE ? 010100 source").unwrap();
    f.flush().unwrap();
    let store = ListStore::new(f.path(), ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "9998887777", "Cell Phone   MI");
    store.append_entry(&record).unwrap();
    let content = std::fs::read_to_string(f.path()).unwrap();
    let new_record = content.lines().last().unwrap();
    assert!(new_record.starts_with("9998887777?"));
  }

  #[test]
  fn append_entry_newline_idempotence_trailing_newline() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&vec![b'X'; 119]).unwrap();
    f.write_all(b"\n").unwrap();
    f.flush().unwrap();
    let before_len = std::fs::metadata(f.path()).unwrap().len();
    assert_eq!(before_len, 120);
    let store = ListStore::new(f.path(), ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "9998887777", "UNKNOWN");
    store.append_entry(&record).unwrap();
    let after_len = std::fs::metadata(f.path()).unwrap().len();
    assert_eq!(after_len, 120 - 1 + APPEND_RECORD_LEN as u64);
  }

  #[test]
  fn append_entry_newline_idempotence_no_trailing_newline() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&vec![b'X'; 50]).unwrap();
    f.flush().unwrap();
    let before_len = std::fs::metadata(f.path()).unwrap().len();
    let store = ListStore::new(f.path(), ErrorBias::TreatAsNoMatch, "blacklist");
    let record = rec("011526", "9998887777", "UNKNOWN");
    store.append_entry(&record).unwrap();
    let after_len = std::fs::metadata(f.path()).unwrap().len();
    assert_eq!(after_len, before_len + APPEND_RECORD_LEN as u64);
  }

  #[test]
  fn sweep_due_rule() {
    let now = std::time::SystemTime::now();
    assert!(sweep_due(None, now, Duration::from_secs(30 * 24 * 3600)));
    assert!(!sweep_due(
      Some(now),
      now + Duration::from_secs(1),
      Duration::from_secs(30 * 24 * 3600)
    ));
  }
}
