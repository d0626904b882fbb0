//! Append-only caller-ID call log (spec.md §3 "Call log entry",
//! `callerID.dat`). Never rewritten, one normalized record per call.

use std::{
  fs::OpenOptions,
  io::{Read, Seek, SeekFrom, Write},
  path::{Path, PathBuf},
};

use log::error;

use crate::callerid::CallerIdRecord;

pub struct CallLog {
  path: PathBuf,
}

impl CallLog {
  pub fn new(path: impl Into<PathBuf>) -> CallLog {
    CallLog { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Append one normalized record. Closes and reopens the file first, to
  /// pick up any edits made to it by an external tool while the daemon
  /// runs (spec.md §4.6 step 3: "close/reopen the log first").
  pub fn append(&self, record: &CallerIdRecord) -> Result<(), String> {
    let mut file = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .open(&self.path)
      .map_err(|e| format!("konnte {} nicht öffnen: {}", self.path.display(), e))?;
    file
      .seek(SeekFrom::End(0))
      .map_err(|e| format!("seek fehlgeschlagen: {}", e))?;
    file
      .write_all(record.as_str().as_bytes())
      .map_err(|e| format!("Schreibfehler: {}", e))?;
    file.flush().map_err(|e| e.to_string())?;
    if let Err(e) = file.sync_all() {
      error!("fsync auf {} fehlgeschlagen: {}", self.path.display(), e);
    }
    Ok(())
  }

  #[cfg(test)]
  fn read_all(&self) -> String {
    let mut buf = String::new();
    std::fs::File::open(&self.path)
      .unwrap()
      .read_to_string(&mut buf)
      .unwrap();
    buf
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn append_is_additive_and_never_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("callerID.dat");
    let log = CallLog::new(&path);
    let rec1 = CallerIdRecord::from_normalized("DATE = 011526-NMBR = 1112223333-\n".to_string());
    let rec2 = CallerIdRecord::from_normalized("DATE = 011626-NMBR = 4445556666-\n".to_string());
    log.append(&rec1).unwrap();
    log.append(&rec2).unwrap();
    let content = log.read_all();
    assert_eq!(
      content,
      "DATE = 011526-NMBR = 1112223333-\nDATE = 011626-NMBR = 4445556666-\n"
    );
  }
}
